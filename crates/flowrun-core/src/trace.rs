//! Per-step execution records and the error-context formatter.

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::component::ValueMap;

/// Level of tracing detail.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceLevel {
    /// No tracing.
    Off,
    /// Only trace errors.
    #[default]
    Errors,
    /// Trace each step.
    Steps,
    /// Trace with full inputs/outputs.
    Detailed,
}

/// Record of a single execution step.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub step_index: usize,
    pub step_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_id: Option<String>,
    pub duration_ms: f64,
    #[serde(default)]
    pub inputs: ValueMap,
    #[serde(default)]
    pub outputs: ValueMap,
    /// Loop variables in scope when the step ran.
    #[serde(default)]
    pub loop_context: HashMap<String, Value>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    pub recovered: bool,
    #[serde(skip)]
    started: Option<Instant>,
}

fn truncated(value: &Value, max: usize) -> String {
    let text = crate::context::display_value(value);
    if text.len() > max {
        let cut = text
            .char_indices()
            .take_while(|(i, _)| *i < max)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        format!("{}...", &text[..cut])
    } else {
        text
    }
}

impl fmt::Display for ExecutionTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.success { "ok" } else { "FAILED" };
        let comp = self
            .component_id
            .as_ref()
            .map(|id| format!(" [{id}]"))
            .unwrap_or_default();
        write!(
            f,
            "{status} step {}: {}{comp} {:.1}ms",
            self.step_index, self.step_type, self.duration_ms
        )
    }
}

impl ExecutionTrace {
    pub fn format_detailed(&self) -> String {
        let mut lines = vec![self.to_string()];
        if !self.loop_context.is_empty() {
            lines.push("  Loop context:".into());
            for (name, value) in &self.loop_context {
                lines.push(format!("    {name} = {}", truncated(value, 50)));
            }
        }
        if !self.inputs.is_empty() {
            lines.push("  Inputs:".into());
            for (name, value) in &self.inputs {
                lines.push(format!("    {name}: {}", truncated(value, 80)));
            }
        }
        if !self.outputs.is_empty() {
            lines.push("  Outputs:".into());
            for (name, value) in &self.outputs {
                lines.push(format!("    {name}: {}", truncated(value, 80)));
            }
        }
        if let Some(error) = &self.error {
            lines.push(format!("  Error: {error}"));
        }
        lines.join("\n")
    }
}

/// Collects execution traces during plan execution.
#[derive(Default)]
pub struct ExecutionTracer {
    pub level: TraceLevel,
    pub traces: Vec<ExecutionTrace>,
    step_counter: usize,
    current_loop_context: HashMap<String, Value>,
}

impl ExecutionTracer {
    pub fn new(level: TraceLevel) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Update the loop variables recorded on subsequent traces.
    pub fn set_loop_context(&mut self, context: HashMap<String, Value>) {
        self.current_loop_context = context;
    }

    pub fn clear_loop_context(&mut self) {
        self.current_loop_context.clear();
    }

    pub fn start_step(
        &mut self,
        step_type: &str,
        component_id: Option<&str>,
        inputs: ValueMap,
    ) -> ExecutionTrace {
        let trace = ExecutionTrace {
            step_index: self.step_counter,
            step_type: step_type.to_string(),
            component_id: component_id.map(String::from),
            duration_ms: 0.0,
            inputs,
            outputs: ValueMap::new(),
            loop_context: self.current_loop_context.clone(),
            success: true,
            error: None,
            error_type: None,
            recovered: false,
            started: Some(Instant::now()),
        };
        self.step_counter += 1;
        trace
    }

    pub fn end_step(
        &mut self,
        mut trace: ExecutionTrace,
        outputs: Option<ValueMap>,
        error: Option<&crate::errors::Error>,
    ) {
        if let Some(started) = trace.started.take() {
            trace.duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        }
        trace.outputs = outputs.unwrap_or_default();
        if let Some(err) = error {
            trace.success = false;
            trace.error = Some(err.to_string());
            trace.error_type = Some(err.kind().to_string());
        }

        match self.level {
            TraceLevel::Off => {}
            TraceLevel::Errors if trace.success => {}
            _ => self.traces.push(trace),
        }
    }

    pub fn recent_traces(&self, count: usize) -> &[ExecutionTrace] {
        let start = self.traces.len().saturating_sub(count);
        &self.traces[start..]
    }

    pub fn error_traces(&self) -> Vec<&ExecutionTrace> {
        self.traces.iter().filter(|t| !t.success).collect()
    }

    /// Detailed error context: loop variables in scope, the failing step's
    /// inputs, and the last few successful steps before it.
    pub fn format_error_context(&self, error_trace: &ExecutionTrace) -> String {
        let bar = "=".repeat(70);
        let mut lines = vec![bar.clone(), "ERROR CONTEXT".into(), bar.clone(), String::new()];

        if !error_trace.loop_context.is_empty() {
            lines.push("Loop Variables:".into());
            for (name, value) in &error_trace.loop_context {
                lines.push(format!("  {name} = {}", crate::context::display_value(value)));
            }
            lines.push(String::new());
        }

        lines.push("Failed Step:".into());
        lines.push(error_trace.format_detailed());
        lines.push(String::new());

        let previous: Vec<&ExecutionTrace> = self
            .traces
            .iter()
            .filter(|t| t.step_index < error_trace.step_index)
            .collect();
        let recent = &previous[previous.len().saturating_sub(5)..];
        if !recent.is_empty() {
            lines.push("Previous Steps:".into());
            for trace in recent {
                lines.push(format!("  {trace}"));
            }
            lines.push(String::new());
        }

        lines.push(bar);
        lines.join("\n")
    }

    pub fn format_summary(&self) -> String {
        if self.traces.is_empty() {
            return "No traces recorded".into();
        }
        let errors = self.traces.iter().filter(|t| !t.success).count();
        let recovered = self.traces.iter().filter(|t| t.recovered).count();
        let mut lines = vec![
            "Execution Trace Summary:".to_string(),
            format!("  Total steps traced: {}", self.traces.len()),
            format!("  Errors: {errors}"),
            format!("  Recovered: {recovered}"),
        ];
        if errors > 0 {
            lines.push("\nError steps:".into());
            for trace in self.error_traces() {
                lines.push(format!("  {trace}"));
            }
        }
        lines.join("\n")
    }
}
