//! The dataflow execution engine.
//!
//! The engine is intentionally dumb — it has no hardcoded knowledge of
//! specific fields or component behaviors. It loads a plan, instantiates
//! components from the registry, validates the wiring, and walks the flow
//! tree, routing data between components through the execution context.
//!
//! With a run journal attached (see [`FlowEngine::persistent`]) every call
//! and loop iteration is logged, and a restart with the same run id skips
//! work whose fingerprint or iteration key is already recorded as complete.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use futures::future::BoxFuture;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::component::{Category, Component, ValueMap};
use crate::context::{display_value, has_unresolved_refs, ExecutionContext, OutputMode};
use crate::errors::{
    Error, ErrorAction, ErrorProtocol, ErrorRecord, RecoveryAction, Result,
};
use crate::persist::{call_fingerprint, RunJournal, RunSummary};
use crate::plan::{ConditionalSpec, LoopSpec, Plan, PlanInputSpec, PlanSource, Step};
use crate::registry::ComponentRegistry;
use crate::trace::{ExecutionTrace, ExecutionTracer, TraceLevel};
use crate::validation::PlanValidator;

/// Run-completion hook. Fire-and-forget: errors are logged, never fatal.
pub type CompletionHook =
    Box<dyn Fn(&RunSummary) -> std::result::Result<(), String> + Send + Sync>;

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct ExecStats {
    pub components_executed: u64,
    pub steps_executed: u64,
    pub errors_recovered: u64,
}

/// Result of executing a plan.
#[derive(Debug, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// Accumulated data from "return" destination writes.
    pub returns: ValueMap,
    /// Final outputs per sink instance id.
    pub outputs: BTreeMap<String, ValueMap>,
    pub errors: Vec<ErrorRecord>,
    pub duration_seconds: f64,
    pub stats: ExecStats,
    pub traces: Vec<ExecutionTrace>,
}

fn inputs_full_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\{\$inputs\.([^}]+)\}$").expect("inputs pattern"))
}

fn inputs_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\$inputs\.([^}]+)\}").expect("inputs pattern"))
}

/// Resolve `{$inputs.X}` references: user value, else declared default, else
/// left unresolved for the validator to catch. A full-string placeholder
/// yields the raw input value; partial substitution yields a string.
fn resolve_input_refs(
    value: &Value,
    inputs: &ValueMap,
    schema: &BTreeMap<String, PlanInputSpec>,
) -> Value {
    match value {
        Value::String(s) => {
            if let Some(caps) = inputs_full_re().captures(s) {
                let name = &caps[1];
                if let Some(v) = inputs.get(name) {
                    return v.clone();
                }
                if let Some(default) = schema.get(name).and_then(|spec| spec.default.clone()) {
                    return default;
                }
                return value.clone();
            }
            let replaced = inputs_re().replace_all(s, |caps: &regex::Captures<'_>| {
                let name = &caps[1];
                if let Some(v) = inputs.get(name) {
                    display_value(v)
                } else if let Some(default) = schema.get(name).and_then(|spec| spec.default.as_ref())
                {
                    display_value(default)
                } else {
                    caps[0].to_string()
                }
            });
            Value::String(replaced.into_owned())
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| resolve_input_refs(v, inputs, schema))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_input_refs(v, inputs, schema)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => {
            // An unresolved reference is unknown, not truthy text.
            if has_unresolved_refs(s) {
                return false;
            }
            !matches!(s.to_lowercase().as_str(), "false" | "no" | "0" | "")
        }
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn wrap_component_error(
    component_id: &str,
    context_msg: &str,
    inputs: Option<ValueMap>,
    err: Error,
) -> Error {
    match err {
        already @ Error::Component { .. } => already,
        other => {
            let message = format!("{context_msg}: {other}");
            Error::component_with(component_id, message, inputs, Some(other))
        }
    }
}

pub struct FlowEngine {
    components: HashMap<String, Box<dyn Component>>,
    plan: Option<Plan>,
    context: Option<Arc<ExecutionContext>>,
    error_protocol: ErrorProtocol,
    tracer: ExecutionTracer,
    trace_level: TraceLevel,
    stats: ExecStats,
    plan_inputs: ValueMap,
    journal: Option<RunJournal>,
    loop_path: Vec<String>,
    on_complete: Option<CompletionHook>,
}

impl Default for FlowEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowEngine {
    pub fn new() -> Self {
        Self::with_trace_level(TraceLevel::Errors)
    }

    pub fn with_trace_level(trace_level: TraceLevel) -> Self {
        Self {
            components: HashMap::new(),
            plan: None,
            context: None,
            error_protocol: ErrorProtocol::stop(),
            tracer: ExecutionTracer::new(trace_level),
            trace_level,
            stats: ExecStats::default(),
            plan_inputs: ValueMap::new(),
            journal: None,
            loop_path: Vec::new(),
            on_complete: None,
        }
    }

    /// Engine with checkpoint/resume support. Pass the same `run_id` after a
    /// crash to skip completed work recorded in `state.jsonl`.
    pub fn persistent(run_id: Option<String>) -> Self {
        let mut engine = Self::new();
        engine.journal = Some(RunJournal::new(run_id));
        engine
    }

    /// Attach a completion hook (external history recording).
    pub fn on_complete(mut self, hook: CompletionHook) -> Self {
        self.on_complete = Some(hook);
        self
    }

    pub fn run_id(&self) -> Option<&str> {
        self.journal.as_ref().map(|j| j.run_id())
    }

    pub fn plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    pub fn components(&self) -> &HashMap<String, Box<dyn Component>> {
        &self.components
    }

    /// Root context of the last execution (composites read output mappings
    /// from it).
    pub fn context(&self) -> Option<Arc<ExecutionContext>> {
        self.context.clone()
    }

    pub fn tracer(&self) -> &ExecutionTracer {
        &self.tracer
    }

    /// Load a plan from a parsed plan, JSON document, JSON text, or file.
    pub fn load_plan(&mut self, source: impl Into<PlanSource>) -> Result<()> {
        let plan = source.into().load()?;
        if let Some(eh) = &plan.error_handling {
            self.error_protocol = eh.to_protocol();
        }
        self.plan = Some(plan);
        self.instantiate_components()
    }

    /// Declared plan inputs with their specifications.
    pub fn input_schema(&self) -> BTreeMap<String, PlanInputSpec> {
        self.plan
            .as_ref()
            .map(|p| p.input_schema())
            .unwrap_or_default()
    }

    /// Set plan input values. Re-instantiates components so new values reach
    /// component constructors through `{$inputs.X}` config references.
    pub fn set_inputs(&mut self, inputs: ValueMap) -> Result<()> {
        for (name, value) in inputs {
            self.plan_inputs.insert(name, value);
        }
        if self.plan.is_some() {
            self.instantiate_components()?;
        }
        Ok(())
    }

    /// Required inputs lacking both a user value and a declared default.
    pub fn missing_inputs(&self) -> Vec<(String, PlanInputSpec)> {
        self.input_schema()
            .into_iter()
            .filter(|(name, spec)| {
                spec.required && !self.plan_inputs.contains_key(name) && spec.default.is_none()
            })
            .collect()
    }

    fn instantiate_components(&mut self) -> Result<()> {
        self.components.clear();
        let Some(plan) = &self.plan else {
            return Ok(());
        };
        let registry = ComponentRegistry::global();
        let schema = plan.input_schema();

        for (instance_id, comp_def) in &plan.components {
            let type_name = comp_def.type_name.as_ref().ok_or_else(|| {
                Error::validation(
                    format!("Component '{instance_id}' missing 'type'"),
                    vec![format!("Component '{instance_id}' has no type specified")],
                )
            })?;
            let resolved =
                resolve_input_refs(&Value::Object(comp_def.config.clone()), &self.plan_inputs, &schema);
            let config = match resolved {
                Value::Object(map) => map,
                _ => ValueMap::new(),
            };
            let component = registry.create(type_name, instance_id, config)?;
            self.components.insert(instance_id.clone(), component);
        }
        Ok(())
    }

    /// Static validation of the loaded plan.
    pub fn validate(&self) -> crate::validation::ValidationReport {
        match &self.plan {
            Some(plan) => PlanValidator::new().validate(plan),
            None => crate::validation::ValidationReport {
                valid: false,
                messages: vec![crate::validation::ValidationMessage {
                    level: crate::validation::Level::Error,
                    message: "No plan loaded".into(),
                    location: None,
                    suggestion: None,
                }],
            },
        }
    }

    /// Execute the loaded plan. Validation errors abort before any step
    /// runs; step errors are recorded in the result per the error protocol.
    pub async fn execute(
        &mut self,
        output_dir: Option<&Path>,
        output_mode: OutputMode,
    ) -> Result<ExecutionResult> {
        let plan = self
            .plan
            .clone()
            .ok_or_else(|| Error::execution("No plan loaded"))?;

        let report = PlanValidator::new().validate(&plan);
        if !report.valid {
            return Err(Error::validation(
                "Plan validation failed",
                report.error_messages(),
            ));
        }

        let output_dir: Option<PathBuf> = match (output_dir, &self.journal) {
            (Some(dir), _) => Some(dir.to_path_buf()),
            (None, Some(journal)) => Some(PathBuf::from("runs").join(journal.run_id())),
            (None, None) => None,
        };

        if let Some(journal) = self.journal.as_mut() {
            let dir = output_dir
                .as_deref()
                .ok_or_else(|| Error::execution("Persistent run requires an output directory"))?;
            let resuming = journal.open(dir)?;
            if resuming {
                let state = journal.state();
                tracing::info!(
                    "Resume: loaded state with {} cached calls, {} cached iterations",
                    state.calls_cached,
                    state.iterations_cached
                );
                if !state.pending_calls.is_empty() {
                    tracing::info!(
                        "Resume: {} calls were in-progress (will retry)",
                        state.pending_calls.len()
                    );
                }
            } else {
                let mut fields = ValueMap::new();
                fields.insert("run_id".into(), Value::String(journal.run_id().to_string()));
                fields.insert(
                    "plan_name".into(),
                    Value::String(plan.display_name().to_string()),
                );
                journal.log_event("run_start", fields);
            }
        }

        // Plan-input values become root variables: declared defaults first,
        // user-supplied values on top.
        let mut variables: HashMap<String, Value> = HashMap::new();
        for (name, spec) in plan.input_schema() {
            if let Some(default) = spec.default {
                variables.insert(name, default);
            }
        }
        for (name, value) in &self.plan_inputs {
            variables.insert(name.clone(), value.clone());
        }

        let context = ExecutionContext::root(
            variables,
            plan.settings.clone(),
            output_dir.clone(),
            output_mode,
        );
        for (instance_id, component) in &self.components {
            if component.manifest().category == Category::Sink {
                context.register_sink(instance_id);
            }
        }
        self.context = Some(Arc::clone(&context));
        self.tracer = ExecutionTracer::new(self.trace_level);
        self.stats = ExecStats::default();
        self.loop_path.clear();

        let mut errors: Vec<ErrorRecord> = Vec::new();
        let started = Instant::now();

        let flow = plan.flow.clone();
        let walk = self.execute_steps(&flow, &context, &mut errors).await;
        let duration_seconds = started.elapsed().as_secs_f64();

        let result = match walk {
            Ok(()) => ExecutionResult {
                success: errors.iter().all(|e| e.recovered),
                returns: context.returns(),
                outputs: self.collect_outputs(),
                errors,
                duration_seconds,
                stats: self.stats,
                traces: std::mem::take(&mut self.tracer.traces),
            },
            Err(err) => {
                errors.push(ErrorRecord::from_error(&err));
                ExecutionResult {
                    success: false,
                    returns: context.returns(),
                    outputs: BTreeMap::new(),
                    errors,
                    duration_seconds,
                    stats: self.stats,
                    traces: std::mem::take(&mut self.tracer.traces),
                }
            }
        };

        if let Some(journal) = self.journal.as_mut() {
            let mut fields = ValueMap::new();
            fields.insert("success".into(), Value::Bool(result.success));
            fields.insert(
                "duration_seconds".into(),
                serde_json::json!(result.duration_seconds),
            );
            fields.insert(
                "errors_count".into(),
                serde_json::json!(result.errors.len()),
            );
            fields.insert(
                "stats".into(),
                serde_json::to_value(result.stats).unwrap_or(Value::Null),
            );
            journal.log_event("run_complete", fields);
        }

        if let (Some(journal), Some(hook)) = (&self.journal, &self.on_complete) {
            let state = journal.state();
            let summary = RunSummary {
                run_id: journal.run_id().to_string(),
                plan_name: plan.display_name().to_string(),
                success: result.success,
                duration_seconds: result.duration_seconds,
                output_dir: output_dir
                    .as_ref()
                    .map(|d| d.display().to_string())
                    .unwrap_or_default(),
                stats: serde_json::json!({
                    "components_executed": result.stats.components_executed,
                    "steps_executed": result.stats.steps_executed,
                    "errors_recovered": result.stats.errors_recovered,
                    "calls_cached": state.calls_cached,
                    "iterations_cached": state.iterations_cached,
                    "resumed": journal.is_resuming(),
                }),
            };
            if let Err(err) = hook(&summary) {
                tracing::warn!("run completion hook failed: {err}");
            }
        }

        Ok(result)
    }

    fn execute_steps<'a>(
        &'a mut self,
        steps: &'a [Step],
        ctx: &'a Arc<ExecutionContext>,
        errors: &'a mut Vec<ErrorRecord>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            for (i, step) in steps.iter().enumerate() {
                self.stats.steps_executed += 1;
                let Err(err) = self.execute_step(step, ctx, errors).await else {
                    continue;
                };

                let protocol = self.protocol_for(step.component_id());
                match protocol.on_error {
                    ErrorAction::Stop => {
                        errors.push(ErrorRecord::from_error(&err).at_step(i));
                        let message = format!("Step {i} failed: {err}");
                        return Err(Error::execution_in_step(message, step.describe(), Some(err)));
                    }
                    ErrorAction::Skip => {
                        errors.push(
                            ErrorRecord::from_error(&err)
                                .at_step(i)
                                .recovered_by(RecoveryAction::Skipped),
                        );
                        self.stats.errors_recovered += 1;
                    }
                    ErrorAction::Retry => {
                        let mut attempt = 0u32;
                        let mut last_err = err;
                        let mut recovered = false;
                        while protocol.should_retry(attempt) {
                            tokio::time::sleep(std::time::Duration::from_secs_f64(
                                protocol.retry_delay,
                            ))
                            .await;
                            match self.execute_step(step, ctx, errors).await {
                                Ok(()) => {
                                    recovered = true;
                                    break;
                                }
                                Err(e) => {
                                    last_err = e;
                                    attempt += 1;
                                }
                            }
                        }
                        if recovered {
                            errors.push(
                                ErrorRecord::from_error(&last_err)
                                    .at_step(i)
                                    .recovered_by(RecoveryAction::Retried),
                            );
                            self.stats.errors_recovered += 1;
                        } else {
                            errors.push(ErrorRecord::from_error(&last_err).at_step(i));
                            let message =
                                format!("Step {i} failed after {} attempts: {last_err}", attempt + 1);
                            return Err(Error::execution_in_step(
                                message,
                                step.describe(),
                                Some(last_err),
                            ));
                        }
                    }
                    ErrorAction::Default => {
                        if let Step::Call { outputs, .. } = step {
                            let fallback = protocol.default_value.clone().unwrap_or(Value::Null);
                            for var_name in outputs.values() {
                                ctx.set(var_name, fallback.clone());
                            }
                        }
                        errors.push(
                            ErrorRecord::from_error(&err)
                                .at_step(i)
                                .recovered_by(RecoveryAction::UsedDefault),
                        );
                        self.stats.errors_recovered += 1;
                    }
                }
            }
            Ok(())
        })
    }

    fn execute_step<'a>(
        &'a mut self,
        step: &'a Step,
        ctx: &'a Arc<ExecutionContext>,
        errors: &'a mut Vec<ErrorRecord>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match step {
                Step::Source { source } => self.execute_source(source, ctx).await,
                Step::Call {
                    call,
                    inputs,
                    outputs,
                } => self.execute_call(call, inputs, outputs, ctx).await,
                Step::Sink { sink, inputs } => self.execute_sink(sink, inputs, ctx).await,
                Step::Loop { spec } => self.execute_loop(spec, ctx, errors).await,
                Step::Conditional { spec } => self.execute_conditional(spec, ctx, errors).await,
            }
        })
    }

    fn protocol_for(&self, component_id: Option<&str>) -> ErrorProtocol {
        component_id
            .and_then(|id| self.components.get(id))
            .and_then(|c| c.error_protocol())
            .unwrap_or_else(|| self.error_protocol.clone())
    }

    fn root_context(&self) -> Result<Arc<ExecutionContext>> {
        self.context
            .clone()
            .ok_or_else(|| Error::execution("engine context not initialized"))
    }

    async fn execute_source(&mut self, source_id: &str, ctx: &Arc<ExecutionContext>) -> Result<()> {
        let root = self.root_context()?;
        let result = {
            let component = self.components.get_mut(source_id).ok_or_else(|| {
                Error::execution(format!("Unknown component '{source_id}'"))
            })?;
            component.execute(ValueMap::new(), ctx).await
        };
        match result {
            Ok(outputs) => {
                // Root cache so outputs persist across all scopes.
                root.set_component_output(source_id, outputs);
                self.stats.components_executed += 1;
                Ok(())
            }
            Err(err) => Err(wrap_component_error(
                source_id,
                &format!("Error loading source '{source_id}'"),
                None,
                err,
            )),
        }
    }

    async fn execute_call(
        &mut self,
        comp_id: &str,
        inputs_spec: &ValueMap,
        outputs_map: &BTreeMap<String, String>,
        ctx: &Arc<ExecutionContext>,
    ) -> Result<()> {
        let root = self.root_context()?;
        let inputs = ctx.resolve_inputs(inputs_spec);

        // Fingerprints are computed on resolved inputs, so identical
        // post-interpolation inputs are served from the resume cache.
        let call_hash = self
            .journal
            .as_ref()
            .map(|_| call_fingerprint(comp_id, &inputs));
        if let (Some(journal), Some(hash)) = (&self.journal, &call_hash) {
            if let Some(cached) = journal.completed_call(hash) {
                let cached = cached.clone();
                for (output_name, var_name) in outputs_map {
                    if let Some(value) = cached.get(output_name) {
                        ctx.set(var_name, value.clone());
                    }
                }
                root.set_component_output(comp_id, cached);
                self.stats.components_executed += 1;
                return Ok(());
            }
        }
        if let (Some(journal), Some(hash)) = (self.journal.as_mut(), &call_hash) {
            let mut fields = ValueMap::new();
            fields.insert("component".into(), Value::String(comp_id.to_string()));
            fields.insert("call_hash".into(), Value::String(hash.clone()));
            journal.log_event("call_start", fields);
        }

        let trace = self.tracer.start_step("call", Some(comp_id), inputs.clone());

        let result: Result<ValueMap> = {
            match self.components.get_mut(comp_id) {
                None => Err(Error::execution(format!("Unknown component '{comp_id}'"))),
                Some(component) => {
                    let validation = component.validate(&inputs);
                    if validation.valid {
                        component.execute(inputs.clone(), ctx).await
                    } else {
                        Err(Error::component_with(
                            comp_id,
                            format!("Input validation failed: {:?}", validation.errors),
                            Some(inputs.clone()),
                            None,
                        ))
                    }
                }
            }
        };

        match result {
            Ok(outputs) => {
                if let (Some(journal), Some(hash)) = (self.journal.as_mut(), &call_hash) {
                    let mut fields = ValueMap::new();
                    fields.insert("component".into(), Value::String(comp_id.to_string()));
                    fields.insert("call_hash".into(), Value::String(hash.clone()));
                    fields.insert("outputs".into(), Value::Object(outputs.clone()));
                    journal.log_event("call_complete", fields);
                    journal.record_call_complete(hash.clone(), outputs.clone());
                }

                // Mapped outputs land in the current scope (loop-local by
                // design); the full outputs always land in the root cache.
                for (output_name, var_name) in outputs_map {
                    if let Some(value) = outputs.get(output_name) {
                        ctx.set(var_name, value.clone());
                    }
                }
                root.set_component_output(comp_id, outputs.clone());
                self.stats.components_executed += 1;
                self.tracer.end_step(trace, Some(outputs), None);
                Ok(())
            }
            Err(err) => {
                let err = wrap_component_error(
                    comp_id,
                    &format!("Error in '{comp_id}'"),
                    Some(inputs),
                    err,
                );
                self.tracer.end_step(trace, None, Some(&err));
                Err(err)
            }
        }
    }

    async fn execute_sink(
        &mut self,
        sink_id: &str,
        inputs_spec: &ValueMap,
        ctx: &Arc<ExecutionContext>,
    ) -> Result<()> {
        let root = self.root_context()?;
        let inputs = ctx.resolve_inputs(inputs_spec);

        let result = {
            let component = self.components.get_mut(sink_id).ok_or_else(|| {
                Error::execution(format!("Unknown component '{sink_id}'"))
            })?;
            component.execute(inputs.clone(), ctx).await
        };
        match result {
            Ok(outputs) => {
                root.set_component_output(sink_id, outputs);
                root.mark_sink_finalized(sink_id);
                self.stats.components_executed += 1;
                Ok(())
            }
            Err(err) => Err(wrap_component_error(
                sink_id,
                &format!("Error finalizing sink '{sink_id}'"),
                Some(inputs),
                err,
            )),
        }
    }

    async fn execute_loop(
        &mut self,
        spec: &LoopSpec,
        ctx: &Arc<ExecutionContext>,
        errors: &mut Vec<ErrorRecord>,
    ) -> Result<()> {
        let over = spec
            .over
            .as_ref()
            .ok_or_else(|| Error::execution("Loop missing 'over' field"))?;
        let template = format!("{{{over}}}");
        let resolved = ctx.resolve_template(&template);

        let items: Vec<Value> = match &resolved {
            Value::Array(items) => items.clone(),
            Value::Object(map) => map.keys().map(|k| Value::String(k.clone())).collect(),
            Value::String(s) if *s == template => {
                return Err(Error::execution(format!(
                    "Loop 'over' reference '{over}' resolved to None"
                )))
            }
            _ => {
                return Err(Error::execution(format!(
                    "Loop 'over' reference '{over}' is not iterable"
                )))
            }
        };

        let total = items.len();
        let show_progress = ctx.output_mode() != OutputMode::Quiet && total > 10;
        let progress_interval = if show_progress {
            std::cmp::max(total / 10, 10)
        } else {
            0
        };

        for (i, item) in items.iter().enumerate() {
            let entry = format!("{}[{}]:{}", spec.var, i, display_value(item));
            // Keys are built from the enclosing iteration path before the
            // child scope exists, so nested loops stay globally unique.
            let iter_key = if self.loop_path.is_empty() {
                entry.clone()
            } else {
                format!("{}/{}", self.loop_path.join("/"), entry)
            };

            if let Some(journal) = self.journal.as_mut() {
                if journal.iteration_completed(&iter_key) {
                    continue;
                }
                let mut fields = ValueMap::new();
                fields.insert("iteration_key".into(), Value::String(iter_key.clone()));
                fields.insert("loop_var".into(), Value::String(spec.var.clone()));
                fields.insert("index".into(), serde_json::json!(i));
                journal.log_event("iteration_start", fields);
            }

            let mut loop_vars = HashMap::new();
            loop_vars.insert(spec.var.clone(), item.clone());
            if let Some(index_var) = &spec.index {
                loop_vars.insert(index_var.clone(), serde_json::json!(i));
            }

            let child = ctx.child(loop_vars.clone());
            self.tracer.set_loop_context(loop_vars);

            self.loop_path.push(entry);
            let walked = self.execute_steps(&spec.steps, &child, errors).await;
            self.loop_path.pop();
            walked?;

            if let Some(journal) = self.journal.as_mut() {
                let mut fields = ValueMap::new();
                fields.insert("iteration_key".into(), Value::String(iter_key.clone()));
                journal.log_event("iteration_complete", fields);
                journal.record_iteration_complete(iter_key);
            }

            if show_progress && (i + 1) % progress_interval == 0 {
                let pct = ((i + 1) as f64 / total as f64) * 100.0;
                println!("  [{}] {}/{} ({pct:.0}%)", spec.var, i + 1, total);
            }
        }

        if show_progress && total % progress_interval != 0 {
            println!("  [{}] {total}/{total} (100%)", spec.var);
        }

        self.tracer.clear_loop_context();
        Ok(())
    }

    async fn execute_conditional(
        &mut self,
        spec: &ConditionalSpec,
        ctx: &Arc<ExecutionContext>,
        errors: &mut Vec<ErrorRecord>,
    ) -> Result<()> {
        let template = spec.condition.clone().unwrap_or_else(|| "false".into());
        let condition = ctx.resolve_template(&template);
        if is_truthy(&condition) {
            self.execute_steps(&spec.then, ctx, errors).await
        } else if !spec.otherwise.is_empty() {
            self.execute_steps(&spec.otherwise, ctx, errors).await
        } else {
            Ok(())
        }
    }

    /// Final outputs from every sink component's root-cache entry.
    fn collect_outputs(&self) -> BTreeMap<String, ValueMap> {
        let mut outputs = BTreeMap::new();
        let Some(context) = &self.context else {
            return outputs;
        };
        for (comp_id, component) in &self.components {
            if component.manifest().category != Category::Sink {
                continue;
            }
            if let Some(Value::Object(map)) = context.component_output(comp_id, None) {
                if !map.is_empty() {
                    outputs.insert(comp_id.clone(), map);
                }
            }
        }
        outputs
    }
}
