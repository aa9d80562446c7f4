//! Shared test components for engine integration tests.
//!
//! Registered once per test binary into the global registry under `test_*`
//! type names so they never collide with real component crates.

// Each test binary compiles this module; not every binary uses every helper.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Mutex, Once, OnceLock};

use flowrun_core::component::{
    Category, Component, ComponentBase, ComponentManifest, ComponentType, ConfigSpec, InputSpec,
    OutputSpec, ValidationResult, ValueMap,
};
use flowrun_core::context::ExecutionContext;
use flowrun_core::errors::{Error, Result};
use flowrun_core::registry::ComponentRegistry;
use serde_json::{json, Value};

fn exec_counts() -> &'static Mutex<HashMap<String, usize>> {
    static COUNTS: OnceLock<Mutex<HashMap<String, usize>>> = OnceLock::new();
    COUNTS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Number of times a component instance id has executed in this process.
pub fn exec_count(instance_id: &str) -> usize {
    exec_counts()
        .lock()
        .unwrap()
        .get(instance_id)
        .copied()
        .unwrap_or(0)
}

pub fn reset_exec_count(instance_id: &str) {
    exec_counts().lock().unwrap().remove(instance_id);
}

fn bump_exec_count(instance_id: &str) {
    *exec_counts()
        .lock()
        .unwrap()
        .entry(instance_id.to_string())
        .or_insert(0) += 1;
}

/// Source producing a configured list of items.
pub struct ItemsSource {
    base: ComponentBase,
}

impl ComponentType for ItemsSource {
    fn describe() -> ComponentManifest {
        ComponentManifest::new("source/test_items", "Configured item list", Category::Source)
            .config("items", ConfigSpec::new("list", "Items to produce").required())
            .output("items", OutputSpec::new("list", "The items"))
            .output("count", OutputSpec::new("integer", "Item count"))
    }

    fn build(instance_id: &str, config: ValueMap) -> Result<Self> {
        Ok(Self {
            base: ComponentBase::new(instance_id, config, Self::describe())?,
        })
    }
}

#[async_trait::async_trait]
impl Component for ItemsSource {
    fn instance_id(&self) -> &str {
        &self.base.instance_id
    }

    fn manifest(&self) -> ComponentManifest {
        self.base.manifest()
    }

    async fn execute(&mut self, _inputs: ValueMap, _ctx: &ExecutionContext) -> Result<ValueMap> {
        let items = self.base.config_list("items").unwrap_or_default();
        let mut outputs = ValueMap::new();
        outputs.insert("count".into(), json!(items.len()));
        outputs.insert("items".into(), Value::Array(items));
        Ok(outputs)
    }
}

/// Transform uppercasing its `text` input.
pub struct UpperTransform {
    base: ComponentBase,
}

impl ComponentType for UpperTransform {
    fn describe() -> ComponentManifest {
        ComponentManifest::new("transform/test_upper", "Uppercase text", Category::Transform)
            .input("text", InputSpec::new("string", "Text to uppercase"))
            .output("text", OutputSpec::new("string", "Uppercased text"))
    }

    fn build(instance_id: &str, config: ValueMap) -> Result<Self> {
        Ok(Self {
            base: ComponentBase::new(instance_id, config, Self::describe())?,
        })
    }
}

#[async_trait::async_trait]
impl Component for UpperTransform {
    fn instance_id(&self) -> &str {
        &self.base.instance_id
    }

    fn manifest(&self) -> ComponentManifest {
        self.base.manifest()
    }

    async fn execute(&mut self, inputs: ValueMap, _ctx: &ExecutionContext) -> Result<ValueMap> {
        let text = inputs.get("text").and_then(Value::as_str).unwrap_or("");
        let mut outputs = ValueMap::new();
        outputs.insert("text".into(), Value::String(text.to_uppercase()));
        Ok(outputs)
    }
}

/// Transform echoing its inputs as outputs, counting executions.
pub struct ProbeTransform {
    base: ComponentBase,
}

impl ComponentType for ProbeTransform {
    fn describe() -> ComponentManifest {
        ComponentManifest::new("transform/test_probe", "Echo with exec counter", Category::Transform)
    }

    fn build(instance_id: &str, config: ValueMap) -> Result<Self> {
        Ok(Self {
            base: ComponentBase::new(instance_id, config, Self::describe())?,
        })
    }
}

#[async_trait::async_trait]
impl Component for ProbeTransform {
    fn instance_id(&self) -> &str {
        &self.base.instance_id
    }

    fn manifest(&self) -> ComponentManifest {
        self.base.manifest()
    }

    fn validate(&self, _inputs: &ValueMap) -> ValidationResult {
        ValidationResult::ok()
    }

    async fn execute(&mut self, inputs: ValueMap, _ctx: &ExecutionContext) -> Result<ValueMap> {
        bump_exec_count(&self.base.instance_id);
        Ok(inputs)
    }
}

/// Transform failing the first `fail_times` executions (-1 = always).
pub struct FailingTransform {
    base: ComponentBase,
    failures: i64,
}

impl ComponentType for FailingTransform {
    fn describe() -> ComponentManifest {
        ComponentManifest::new("transform/test_fail", "Synthetic failures", Category::Transform)
            .config(
                "fail_times",
                ConfigSpec::new("integer", "How many executions fail (-1 = all)")
                    .with_default(json!(-1)),
            )
    }

    fn build(instance_id: &str, config: ValueMap) -> Result<Self> {
        Ok(Self {
            base: ComponentBase::new(instance_id, config, Self::describe())?,
            failures: 0,
        })
    }
}

#[async_trait::async_trait]
impl Component for FailingTransform {
    fn instance_id(&self) -> &str {
        &self.base.instance_id
    }

    fn manifest(&self) -> ComponentManifest {
        self.base.manifest()
    }

    fn validate(&self, _inputs: &ValueMap) -> ValidationResult {
        ValidationResult::ok()
    }

    async fn execute(&mut self, _inputs: ValueMap, _ctx: &ExecutionContext) -> Result<ValueMap> {
        bump_exec_count(&self.base.instance_id);
        let fail_times = self
            .base
            .config_value("fail_times")
            .and_then(|v| v.as_i64())
            .unwrap_or(-1);
        if fail_times < 0 || self.failures < fail_times {
            self.failures += 1;
            return Err(Error::component(&self.base.instance_id, "synthetic failure"));
        }
        let mut outputs = ValueMap::new();
        outputs.insert("ok".into(), json!(true));
        Ok(outputs)
    }
}

/// Accumulating sink that publishes to the "return" destination: raw inputs
/// while accumulating, items and count on the empty finalize call.
pub struct KeeperSink {
    base: ComponentBase,
    collected: Vec<Value>,
}

impl ComponentType for KeeperSink {
    fn describe() -> ComponentManifest {
        ComponentManifest::new("sink/test_keeper", "Accumulate and return", Category::Sink)
            .output("items", OutputSpec::new("list[dict]", "Collected items"))
            .output("count", OutputSpec::new("integer", "Collected count"))
    }

    fn build(instance_id: &str, config: ValueMap) -> Result<Self> {
        Ok(Self {
            base: ComponentBase::new(instance_id, config, Self::describe())?,
            collected: Vec::new(),
        })
    }
}

#[async_trait::async_trait]
impl Component for KeeperSink {
    fn instance_id(&self) -> &str {
        &self.base.instance_id
    }

    fn manifest(&self) -> ComponentManifest {
        self.base.manifest()
    }

    fn validate(&self, _inputs: &ValueMap) -> ValidationResult {
        ValidationResult::ok()
    }

    async fn execute(&mut self, inputs: ValueMap, ctx: &ExecutionContext) -> Result<ValueMap> {
        if !inputs.is_empty() {
            self.collected.push(Value::Object(inputs.clone()));
        }
        let payload = if inputs.is_empty() {
            let mut payload = ValueMap::new();
            payload.insert("items".into(), Value::Array(self.collected.clone()));
            payload.insert("count".into(), json!(self.collected.len()));
            payload
        } else {
            inputs
        };
        let mut data = ValueMap::new();
        data.insert(self.base.instance_id.clone(), Value::Object(payload));
        ctx.write(&data, "return", None)?;

        let mut outputs = ValueMap::new();
        outputs.insert("count".into(), json!(self.collected.len()));
        outputs.insert("items".into(), Value::Array(self.collected.clone()));
        Ok(outputs)
    }
}

/// Transform exposing its resolved config as outputs (constructor probe).
pub struct ConfigProbe {
    base: ComponentBase,
}

impl ComponentType for ConfigProbe {
    fn describe() -> ComponentManifest {
        ComponentManifest::new("transform/test_cfg", "Expose resolved config", Category::Transform)
    }

    fn build(instance_id: &str, config: ValueMap) -> Result<Self> {
        Ok(Self {
            base: ComponentBase::new(instance_id, config, Self::describe())?,
        })
    }
}

#[async_trait::async_trait]
impl Component for ConfigProbe {
    fn instance_id(&self) -> &str {
        &self.base.instance_id
    }

    fn manifest(&self) -> ComponentManifest {
        self.base.manifest()
    }

    fn validate(&self, _inputs: &ValueMap) -> ValidationResult {
        ValidationResult::ok()
    }

    async fn execute(&mut self, _inputs: ValueMap, _ctx: &ExecutionContext) -> Result<ValueMap> {
        Ok(self.base.config.clone())
    }
}

/// Register the test components into the global registry once per binary.
pub fn setup() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let registry = ComponentRegistry::global();
        registry.register::<ItemsSource>("source/test_items").unwrap();
        registry.register::<UpperTransform>("transform/test_upper").unwrap();
        registry.register::<ProbeTransform>("transform/test_probe").unwrap();
        registry.register::<FailingTransform>("transform/test_fail").unwrap();
        registry.register::<KeeperSink>("sink/test_keeper").unwrap();
        registry.register::<ConfigProbe>("transform/test_cfg").unwrap();
    });
}

/// Unique scratch directory for a test.
pub fn test_dir(label: &str) -> std::path::PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "flowrun-test-{label}-{}-{nanos}",
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn cleanup(dir: &std::path::Path) {
    let _ = std::fs::remove_dir_all(dir);
}
