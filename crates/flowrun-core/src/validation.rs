//! Static pre-execution validation of plans.
//!
//! Errors and warnings are collected into one report, never raised mid-walk.
//! Unknown variable references are warnings (they may be defined
//! dynamically); hard errors are reserved for unknown components and
//! malformed flow shapes.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::plan::{Plan, Step};
use crate::registry::ComponentRegistry;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Error,
    Warning,
    Info,
}

/// Parsed type of a declared input or output, e.g. `list[string]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeInfo {
    pub base: String,
    pub element_type: Option<String>,
}

impl TypeInfo {
    pub fn any() -> Self {
        Self {
            base: "any".into(),
            element_type: None,
        }
    }

    pub fn parse(type_str: &str) -> Self {
        static LIST_RE: OnceLock<Regex> = OnceLock::new();
        let re = LIST_RE.get_or_init(|| Regex::new(r"^list\[(\w+)\]$").expect("list type pattern"));
        if type_str.is_empty() {
            return Self::any();
        }
        if let Some(caps) = re.captures(type_str) {
            return Self {
                base: "list".into(),
                element_type: Some(caps[1].to_string()),
            };
        }
        Self {
            base: type_str.to_string(),
            element_type: None,
        }
    }
}

/// A validation message (error or warning).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidationMessage {
    pub level: Level,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl fmt::Display for ValidationMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let icon = match self.level {
            Level::Error => "error",
            Level::Warning => "warning",
            Level::Info => "info",
        };
        write!(f, "[{icon}] {}", self.message)?;
        if let Some(location) = &self.location {
            write!(f, "\n  Location: {location}")?;
        }
        if let Some(suggestion) = &self.suggestion {
            write!(f, "\n  Suggestion: {suggestion}")?;
        }
        Ok(())
    }
}

/// Complete validation report for a plan.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub messages: Vec<ValidationMessage>,
}

impl ValidationReport {
    pub fn errors(&self) -> Vec<&ValidationMessage> {
        self.messages
            .iter()
            .filter(|m| m.level == Level::Error)
            .collect()
    }

    pub fn warnings(&self) -> Vec<&ValidationMessage> {
        self.messages
            .iter()
            .filter(|m| m.level == Level::Warning)
            .collect()
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.errors().iter().map(|m| m.message.clone()).collect()
    }

    pub fn format(&self) -> String {
        if self.messages.is_empty() {
            return "Validation passed with no issues".into();
        }

        let errors = self.errors();
        let warnings = self.warnings();
        let status = if !self.valid {
            "FAILED"
        } else {
            "PASSED with warnings"
        };

        let mut lines = vec![format!("Validation {status}"), "=".repeat(50)];
        if !errors.is_empty() {
            lines.push(format!("Errors ({}):", errors.len()));
            for msg in errors {
                lines.push(format!("  {msg}"));
            }
        }
        if !warnings.is_empty() {
            lines.push(format!("\nWarnings ({}):", warnings.len()));
            for msg in warnings {
                lines.push(format!("  {msg}"));
            }
        }
        lines.join("\n")
    }
}

/// Validates plans before execution: schema shape, component existence,
/// reference reachability (flow-sensitive), and declared output names.
pub struct PlanValidator {
    registry: &'static ComponentRegistry,
    messages: Vec<ValidationMessage>,
    available_vars: HashMap<String, TypeInfo>,
    component_outputs: HashMap<String, HashMap<String, TypeInfo>>,
}

impl Default for PlanValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanValidator {
    pub fn new() -> Self {
        Self {
            registry: ComponentRegistry::global(),
            messages: Vec::new(),
            available_vars: HashMap::new(),
            component_outputs: HashMap::new(),
        }
    }

    /// Run all validations. Pure with respect to the plan: repeated calls
    /// return equal reports.
    pub fn validate(mut self, plan: &Plan) -> ValidationReport {
        self.check_schema(plan);

        // Plan inputs are available throughout the flow as {input_name}.
        for (name, decl) in &plan.inputs {
            self.available_vars
                .insert(name.clone(), TypeInfo::parse(&decl.spec().value_type));
        }

        self.check_components(plan);
        self.check_steps(&plan.flow, "flow", plan);

        let valid = !self.messages.iter().any(|m| m.level == Level::Error);
        ValidationReport {
            valid,
            messages: self.messages,
        }
    }

    fn error(&mut self, message: String, location: Option<String>, suggestion: Option<String>) {
        self.messages.push(ValidationMessage {
            level: Level::Error,
            message,
            location,
            suggestion,
        });
    }

    fn warning(&mut self, message: String, location: Option<String>, suggestion: Option<String>) {
        self.messages.push(ValidationMessage {
            level: Level::Warning,
            message,
            location,
            suggestion,
        });
    }

    fn check_schema(&mut self, plan: &Plan) {
        if plan.name.is_none() {
            self.warning(
                "Plan has no 'name' field".into(),
                None,
                Some("Add a 'name' field for better identification".into()),
            );
        }
        if plan.components.is_empty() {
            self.error(
                "Plan has no 'components' section".into(),
                None,
                Some("Add a 'components' section defining your components".into()),
            );
        }
        if plan.flow.is_empty() {
            self.error(
                "Plan has no 'flow' section".into(),
                None,
                Some("Add a 'flow' section defining execution steps".into()),
            );
        }
        for (comp_id, comp_def) in &plan.components {
            if comp_def.type_name.is_none() {
                self.error(
                    format!("Component '{comp_id}' missing 'type'"),
                    Some(format!("components.{comp_id}")),
                    Some("Add 'type' field (e.g. 'transform/template')".into()),
                );
            }
        }
    }

    fn check_components(&mut self, plan: &Plan) {
        for (comp_id, comp_def) in &plan.components {
            let Some(type_name) = &comp_def.type_name else {
                continue;
            };
            match self.registry.manifest(type_name) {
                None => {
                    let available = self.registry.list_types();
                    let short = type_name.split('/').next_back().unwrap_or(type_name);
                    let similar: Vec<&String> =
                        available.iter().filter(|t| t.contains(short)).collect();
                    let suggestion = if similar.is_empty() {
                        format!(
                            "Available: {:?}",
                            available.iter().take(5).collect::<Vec<_>>()
                        )
                    } else {
                        format!("Similar types: {similar:?}")
                    };
                    self.error(
                        format!("Unknown component type: '{type_name}'"),
                        Some(format!("components.{comp_id}")),
                        Some(suggestion),
                    );
                }
                Some(manifest) => {
                    let outputs = manifest
                        .outputs
                        .iter()
                        .map(|(name, spec)| (name.clone(), TypeInfo::parse(&spec.value_type)))
                        .collect();
                    self.component_outputs.insert(comp_id.clone(), outputs);
                }
            }
        }
    }

    fn check_steps(&mut self, steps: &[Step], path: &str, plan: &Plan) {
        for (i, step) in steps.iter().enumerate() {
            let step_path = format!("{path}[{i}]");
            match step {
                Step::Source { source } => self.check_source(source, &step_path, plan),
                Step::Call {
                    call,
                    inputs,
                    outputs,
                } => self.check_call(call, inputs, outputs, &step_path, plan),
                Step::Sink { sink, inputs } => self.check_sink(sink, inputs, &step_path, plan),
                Step::Loop { spec } => self.check_loop(spec, &step_path, plan),
                Step::Conditional { spec } => self.check_conditional(spec, &step_path, plan),
            }
        }
    }

    fn known_component(&mut self, comp_id: &str, step_kind: &str, path: &str, plan: &Plan) -> bool {
        if plan.components.contains_key(comp_id) {
            return true;
        }
        self.error(
            format!("{step_kind} references unknown component: '{comp_id}'"),
            Some(path.to_string()),
            Some(format!(
                "Available components: {:?}",
                plan.components.keys().collect::<Vec<_>>()
            )),
        );
        false
    }

    fn check_source(&mut self, source_id: &str, path: &str, plan: &Plan) {
        if self.known_component(source_id, "Source", path, plan) {
            // Source outputs become available as component_id.output.
            if let Some(outputs) = self.component_outputs.get(source_id).cloned() {
                for (output, type_info) in outputs {
                    self.available_vars
                        .insert(format!("{source_id}.{output}"), type_info);
                }
            }
        }
    }

    fn check_call(
        &mut self,
        comp_id: &str,
        inputs: &serde_json::Map<String, Value>,
        outputs: &std::collections::BTreeMap<String, String>,
        path: &str,
        plan: &Plan,
    ) {
        if !self.known_component(comp_id, "Call", path, plan) {
            return;
        }

        for (input_name, value) in inputs {
            self.check_reference(value, &format!("{path}.inputs.{input_name}"));
        }

        for (output_name, var_name) in outputs {
            match self.component_outputs.get(comp_id) {
                Some(comp_outputs) => {
                    if let Some(type_info) = comp_outputs.get(output_name) {
                        self.available_vars.insert(var_name.clone(), type_info.clone());
                    } else {
                        self.warning(
                            format!("Component '{comp_id}' may not have output '{output_name}'"),
                            Some(format!("{path}.outputs.{output_name}")),
                            None,
                        );
                        self.available_vars.insert(var_name.clone(), TypeInfo::any());
                    }
                }
                None => {
                    self.available_vars.insert(var_name.clone(), TypeInfo::any());
                }
            }
        }
    }

    fn check_sink(
        &mut self,
        sink_id: &str,
        inputs: &serde_json::Map<String, Value>,
        path: &str,
        plan: &Plan,
    ) {
        self.known_component(sink_id, "Sink", path, plan);
        for (input_name, value) in inputs {
            self.check_reference(value, &format!("{path}.inputs.{input_name}"));
        }
    }

    fn check_loop(&mut self, spec: &crate::plan::LoopSpec, path: &str, plan: &Plan) {
        match &spec.over {
            None => self.error(
                "Loop missing 'over' field".into(),
                Some(format!("{path}.loop")),
                Some("Add 'over' specifying what to iterate".into()),
            ),
            Some(over) => {
                self.check_reference(
                    &Value::String(format!("{{{over}}}")),
                    &format!("{path}.loop.over"),
                );
            }
        }

        // Loop variables are scoped to the loop body.
        let saved = self.available_vars.clone();
        self.available_vars.insert(spec.var.clone(), TypeInfo::any());
        if let Some(index_var) = &spec.index {
            self.available_vars
                .insert(index_var.clone(), TypeInfo::parse("integer"));
        }

        self.check_steps(&spec.steps, &format!("{path}.loop.steps"), plan);

        // Loop-local variables go out of scope; component outputs remain.
        self.available_vars
            .retain(|key, _| saved.contains_key(key) || key.contains('.'));
    }

    fn check_conditional(&mut self, spec: &crate::plan::ConditionalSpec, path: &str, plan: &Plan) {
        if spec.condition.is_none() {
            self.error(
                "Conditional missing 'if' field".into(),
                Some(format!("{path}.conditional")),
                Some("Add 'if' specifying the condition".into()),
            );
        }
        self.check_steps(&spec.then, &format!("{path}.conditional.then"), plan);
        self.check_steps(&spec.otherwise, &format!("{path}.conditional.else"), plan);
    }

    fn check_reference(&mut self, value: &Value, location: &str) {
        let Value::String(text) = value else {
            return;
        };

        static REF_RE: OnceLock<Regex> = OnceLock::new();
        let re = REF_RE.get_or_init(|| Regex::new(r"\{([^}]+)\}").expect("reference pattern"));

        let mut unknown = Vec::new();
        for caps in re.captures_iter(text) {
            let reference = &caps[1];
            if self.available_vars.contains_key(reference) {
                continue;
            }
            if let Some(base) = reference.split(['.', '[']).next() {
                if self.component_outputs.contains_key(base)
                    || self.available_vars.contains_key(base)
                {
                    continue;
                }
            }
            unknown.push(reference.to_string());
        }

        for reference in unknown {
            let mut available: Vec<&String> = self.available_vars.keys().collect();
            available.sort();
            self.warning(
                format!("Reference '{{{reference}}}' may not be defined at this point"),
                Some(location.to_string()),
                Some(format!(
                    "Available: {:?}",
                    available.into_iter().take(5).collect::<Vec<_>>()
                )),
            );
        }
    }
}

/// Convenience entry point.
pub fn validate_plan(plan: &Plan) -> ValidationReport {
    PlanValidator::new().validate(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_info_parses_lists() {
        let t = TypeInfo::parse("list[string]");
        assert_eq!(t.base, "list");
        assert_eq!(t.element_type.as_deref(), Some("string"));

        let t = TypeInfo::parse("integer");
        assert_eq!(t.base, "integer");
        assert!(t.element_type.is_none());

        assert_eq!(TypeInfo::parse(""), TypeInfo::any());
    }
}
