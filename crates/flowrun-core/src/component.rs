//! Component contract — manifests, input validation, and the Component trait.
//!
//! The engine never assumes what fields a component needs. It asks the
//! component for its manifest and routes data accordingly. To add a new
//! component: implement [`ComponentType`] and register it with the registry.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::context::{ExecutionContext, OutputMode};
use crate::errors::{Error, ErrorProtocol, Result};

/// JSON object used for configs, inputs, and outputs throughout the engine.
pub type ValueMap = Map<String, Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Source,
    Transform,
    Control,
    Sink,
}

/// Specification for a component configuration option.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfigSpec {
    #[serde(rename = "type")]
    pub value_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<Value>>,
}

impl ConfigSpec {
    pub fn new(value_type: &str, description: &str) -> Self {
        Self {
            value_type: value_type.into(),
            required: false,
            default: None,
            description: description.into(),
            choices: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_choices(mut self, choices: Vec<Value>) -> Self {
        self.choices = Some(choices);
        self
    }
}

/// Specification for a component input.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InputSpec {
    #[serde(rename = "type")]
    pub value_type: String,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

fn default_true() -> bool {
    true
}

impl InputSpec {
    pub fn new(value_type: &str, description: &str) -> Self {
        Self {
            value_type: value_type.into(),
            required: true,
            description: description.into(),
            default: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// Specification for a component output.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputSpec {
    #[serde(rename = "type")]
    pub value_type: String,
    #[serde(default)]
    pub description: String,
}

impl OutputSpec {
    pub fn new(value_type: &str, description: &str) -> Self {
        Self {
            value_type: value_type.into(),
            description: description.into(),
        }
    }
}

/// Self-description of a component's interface.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComponentManifest {
    #[serde(rename = "type")]
    pub type_name: String,
    pub description: String,
    pub category: Category,
    #[serde(default)]
    pub config: BTreeMap<String, ConfigSpec>,
    #[serde(default)]
    pub inputs: BTreeMap<String, InputSpec>,
    #[serde(default)]
    pub outputs: BTreeMap<String, OutputSpec>,
}

impl ComponentManifest {
    pub fn new(type_name: &str, description: &str, category: Category) -> Self {
        Self {
            type_name: type_name.into(),
            description: description.into(),
            category,
            config: BTreeMap::new(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn config(mut self, name: &str, spec: ConfigSpec) -> Self {
        self.config.insert(name.into(), spec);
        self
    }

    pub fn input(mut self, name: &str, spec: InputSpec) -> Self {
        self.inputs.insert(name.into(), spec);
        self
    }

    pub fn output(mut self, name: &str, spec: OutputSpec) -> Self {
        self.outputs.insert(name.into(), spec);
        self
    }
}

/// Result of validating component inputs against a manifest.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn fail(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
            warnings: Vec::new(),
        }
    }
}

/// Check provided inputs against a manifest: required inputs must be present,
/// unexpected inputs are warnings only.
pub fn check_inputs(manifest: &ComponentManifest, inputs: &ValueMap) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for (name, spec) in &manifest.inputs {
        if spec.required && !inputs.contains_key(name) {
            errors.push(format!("Missing required input: {name}"));
        }
    }
    for name in inputs.keys() {
        if !manifest.inputs.contains_key(name) {
            warnings.push(format!("Unexpected input: {name}"));
        }
    }

    ValidationResult {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

/// The Component trait — a unit of work with a declared manifest.
///
/// Components execute atomically: all outputs are returned in one map.
/// Instances are owned by the engine and executed sequentially, so
/// per-instance mutable state (accumulators) needs no locking.
#[async_trait::async_trait]
pub trait Component: Send + Sync {
    /// The instance id this component was created under in the plan.
    fn instance_id(&self) -> &str;

    /// This instance's manifest.
    fn manifest(&self) -> ComponentManifest;

    /// Per-component error policy override. None means use the plan default.
    fn error_protocol(&self) -> Option<ErrorProtocol> {
        None
    }

    /// Validate resolved inputs before execution.
    fn validate(&self, inputs: &ValueMap) -> ValidationResult {
        check_inputs(&self.manifest(), inputs)
    }

    /// Execute and return outputs keyed by output name.
    async fn execute(&mut self, inputs: ValueMap, context: &ExecutionContext) -> Result<ValueMap>;
}

impl std::fmt::Debug for dyn Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component")
            .field("instance_id", &self.instance_id())
            .field("manifest", &self.manifest())
            .finish()
    }
}

/// Statically-describable component type, used for registry registration.
pub trait ComponentType: Component + Sized + 'static {
    fn describe() -> ComponentManifest;
    fn build(instance_id: &str, config: ValueMap) -> Result<Self>;
}

/// Shared constructor state every builtin component embeds: the instance id,
/// its config, and the manifest the config was checked against.
#[derive(Clone, Debug)]
pub struct ComponentBase {
    pub instance_id: String,
    pub config: ValueMap,
    manifest: ComponentManifest,
}

impl ComponentBase {
    /// Verify config against the manifest: required keys present (or carrying
    /// a default), choices-constrained values within their set.
    pub fn new(instance_id: &str, config: ValueMap, manifest: ComponentManifest) -> Result<Self> {
        for (name, spec) in &manifest.config {
            if spec.required && !config.contains_key(name) && spec.default.is_none() {
                return Err(Error::Config(format!(
                    "Component {instance_id}: missing required config '{name}'"
                )));
            }
            if let (Some(value), Some(choices)) = (config.get(name), &spec.choices) {
                if !choices.contains(value) {
                    return Err(Error::Config(format!(
                        "Component {instance_id}: config '{name}' must be one of {choices:?}"
                    )));
                }
            }
        }
        Ok(Self {
            instance_id: instance_id.to_string(),
            config,
            manifest,
        })
    }

    pub fn manifest(&self) -> ComponentManifest {
        self.manifest.clone()
    }

    /// Config value with fallback to the manifest default.
    pub fn config_value(&self, key: &str) -> Option<Value> {
        if let Some(v) = self.config.get(key) {
            return Some(v.clone());
        }
        self.manifest
            .config
            .get(key)
            .and_then(|spec| spec.default.clone())
    }

    pub fn config_str(&self, key: &str) -> Option<String> {
        self.config_value(key)
            .and_then(|v| v.as_str().map(String::from))
    }

    pub fn config_bool(&self, key: &str, fallback: bool) -> bool {
        self.config_value(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(fallback)
    }

    pub fn config_list(&self, key: &str) -> Option<Vec<Value>> {
        self.config_value(key).and_then(|v| match v {
            Value::Array(items) => Some(items),
            _ => None,
        })
    }

    /// Print a user-facing status message in NORMAL and DEBUG modes.
    pub fn report(&self, message: &str, context: &ExecutionContext) {
        if context.output_mode() >= OutputMode::Normal {
            println!("{message}");
        }
    }

    /// Print an internal detail only in DEBUG mode.
    pub fn debug(&self, message: &str, context: &ExecutionContext) {
        if context.output_mode() == OutputMode::Debug {
            println!("[DEBUG] {message}");
        }
    }
}
