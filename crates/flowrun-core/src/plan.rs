//! Plan documents: the JSON data model for components, wiring, and flow.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::component::ValueMap;
use crate::errors::{Error, ErrorAction, ErrorProtocol, Result};

/// Declared plan-level input. Plans may use the full spec form or a string
/// shorthand: `"inputs": {"name": "string"}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlanInputDecl {
    Spec(PlanInputSpec),
    Shorthand(String),
}

impl PlanInputDecl {
    pub fn spec(&self) -> PlanInputSpec {
        match self {
            Self::Spec(spec) => spec.clone(),
            Self::Shorthand(value_type) => PlanInputSpec {
                value_type: value_type.clone(),
                required: true,
                default: None,
                description: String::new(),
            },
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanInputSpec {
    #[serde(rename = "type", default = "default_input_type")]
    pub value_type: String,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: String,
}

fn default_input_type() -> String {
    "string".into()
}

fn default_true() -> bool {
    true
}

/// A component instance declaration: `{type: "<category>/<name>", config: {...}}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComponentDef {
    /// Missing type is reported by the validator, not at parse time.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default)]
    pub config: ValueMap,
}

/// Plan-wide error handling defaults.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ErrorHandling {
    #[serde(default)]
    pub default: ErrorAction,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> f64 {
    1.0
}

impl ErrorHandling {
    pub fn to_protocol(&self) -> ErrorProtocol {
        ErrorProtocol {
            on_error: self.default,
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
            default_value: self.default_value.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoopSpec {
    /// Reference to the collection to iterate; reported by the validator
    /// when missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub over: Option<String>,
    #[serde(rename = "as", default = "default_loop_var")]
    pub var: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

fn default_loop_var() -> String {
    "item".into()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConditionalSpec {
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default)]
    pub then: Vec<Step>,
    #[serde(rename = "else", default, skip_serializing_if = "Vec::is_empty")]
    pub otherwise: Vec<Step>,
}

/// One step of a flow. The variant is determined by which key is present.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Step {
    Source {
        source: String,
    },
    Call {
        call: String,
        #[serde(default)]
        inputs: ValueMap,
        /// Maps output names to variable names in the current scope.
        #[serde(default)]
        outputs: BTreeMap<String, String>,
    },
    Sink {
        sink: String,
        #[serde(default)]
        inputs: ValueMap,
    },
    Loop {
        #[serde(rename = "loop")]
        spec: LoopSpec,
    },
    Conditional {
        #[serde(rename = "conditional")]
        spec: ConditionalSpec,
    },
}

impl Step {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Source { .. } => "source",
            Self::Call { .. } => "call",
            Self::Sink { .. } => "sink",
            Self::Loop { .. } => "loop",
            Self::Conditional { .. } => "conditional",
        }
    }

    /// The component instance this step invokes, if any.
    pub fn component_id(&self) -> Option<&str> {
        match self {
            Self::Source { source } => Some(source),
            Self::Call { call, .. } => Some(call),
            Self::Sink { sink, .. } => Some(sink),
            _ => None,
        }
    }

    pub fn describe(&self) -> String {
        match self.component_id() {
            Some(id) => format!("{} '{id}'", self.kind()),
            None => self.kind().to_string(),
        }
    }
}

/// A dataflow plan: typed components wired into a directed execution with
/// loops, conditionals, and hierarchical variable scoping.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub inputs: BTreeMap<String, PlanInputDecl>,
    #[serde(default)]
    pub components: BTreeMap<String, ComponentDef>,
    #[serde(default)]
    pub flow: Vec<Step>,
    #[serde(default)]
    pub settings: ValueMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_handling: Option<ErrorHandling>,
    /// Optional documentation of the declared return shape.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<Value>,
}

impl Plan {
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| Error::validation(format!("invalid plan document: {e}"), vec![e.to_string()]))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| Error::validation(format!("invalid plan JSON: {e}"), vec![e.to_string()]))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Declared inputs as full specs (shorthand expanded).
    pub fn input_schema(&self) -> BTreeMap<String, PlanInputSpec> {
        self.inputs
            .iter()
            .map(|(name, decl)| (name.clone(), decl.spec()))
            .collect()
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }
}

/// Where a plan comes from: a parsed plan, an in-memory document, JSON
/// text, or a file.
pub enum PlanSource {
    Parsed(Plan),
    Value(Value),
    Text(String),
    File(PathBuf),
}

impl PlanSource {
    pub fn load(self) -> Result<Plan> {
        match self {
            Self::Parsed(plan) => Ok(plan),
            Self::Value(value) => Plan::from_value(value),
            Self::Text(text) => Plan::from_json(&text),
            Self::File(path) => Plan::from_file(&path),
        }
    }
}

impl From<Value> for PlanSource {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<&str> for PlanSource {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<&Path> for PlanSource {
    fn from(path: &Path) -> Self {
        Self::File(path.to_path_buf())
    }
}

impl From<PathBuf> for PlanSource {
    fn from(path: PathBuf) -> Self {
        Self::File(path)
    }
}

impl From<Plan> for PlanSource {
    fn from(plan: Plan) -> Self {
        Self::Parsed(plan)
    }
}
