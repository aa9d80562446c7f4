//! Lookup transform — retrieve a value from a dictionary.

use flowrun_core::component::{
    Category, Component, ComponentBase, ComponentManifest, ComponentType, ConfigSpec, InputSpec,
    OutputSpec, ValueMap,
};
use flowrun_core::context::ExecutionContext;
use flowrun_core::errors::Result;
use serde_json::{json, Value};

/// Look up a value from a dictionary by key, e.g. fetching the expected
/// answer for the current loop item.
pub struct LookupTransform {
    base: ComponentBase,
}

impl ComponentType for LookupTransform {
    fn describe() -> ComponentManifest {
        ComponentManifest::new(
            "transform/lookup",
            "Look up value from dictionary by key",
            Category::Transform,
        )
        .config("default", ConfigSpec::new("any", "Default value if key not found"))
        .input("dict", InputSpec::new("dict", "Dictionary to look up from"))
        .input("key", InputSpec::new("string", "Key to look up"))
        .output("value", OutputSpec::new("any", "The looked-up value"))
        .output("found", OutputSpec::new("boolean", "Whether the key was found"))
    }

    fn build(instance_id: &str, config: ValueMap) -> Result<Self> {
        Ok(Self {
            base: ComponentBase::new(instance_id, config, Self::describe())?,
        })
    }
}

#[async_trait::async_trait]
impl Component for LookupTransform {
    fn instance_id(&self) -> &str {
        &self.base.instance_id
    }

    fn manifest(&self) -> ComponentManifest {
        self.base.manifest()
    }

    async fn execute(&mut self, inputs: ValueMap, _context: &ExecutionContext) -> Result<ValueMap> {
        let empty = ValueMap::new();
        let dict = match inputs.get("dict") {
            Some(Value::Object(map)) => map,
            _ => &empty,
        };
        let key = inputs.get("key").and_then(Value::as_str).unwrap_or("");
        let default = self.base.config_value("default").unwrap_or(Value::Null);

        let found = dict.contains_key(key);
        let value = dict.get(key).cloned().unwrap_or(default);

        let mut outputs = ValueMap::new();
        outputs.insert("value".into(), value);
        outputs.insert("found".into(), json!(found));
        Ok(outputs)
    }
}
