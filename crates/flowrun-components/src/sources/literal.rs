//! Literal source — provides inline values.

use flowrun_core::component::{
    Category, Component, ComponentBase, ComponentManifest, ComponentType, ConfigSpec, OutputSpec,
    ValueMap,
};
use flowrun_core::context::ExecutionContext;
use flowrun_core::errors::Result;
use serde_json::{json, Value};

/// Constants, test data, or values that don't come from files.
pub struct LiteralSource {
    base: ComponentBase,
}

impl ComponentType for LiteralSource {
    fn describe() -> ComponentManifest {
        ComponentManifest::new(
            "source/literal",
            "Provide inline literal values",
            Category::Source,
        )
        .config(
            "value",
            ConfigSpec::new("any", "The literal value to output").required(),
        )
        .config(
            "as_list",
            ConfigSpec::new("boolean", "If true, wrap value in a list").with_default(json!(false)),
        )
        .output("value", OutputSpec::new("any", "The literal value"))
        .output(
            "items",
            OutputSpec::new("list", "Value as list (if as_list or already a list)"),
        )
        .output(
            "count",
            OutputSpec::new("integer", "Number of items if value is a list"),
        )
    }

    fn build(instance_id: &str, config: ValueMap) -> Result<Self> {
        Ok(Self {
            base: ComponentBase::new(instance_id, config, Self::describe())?,
        })
    }
}

#[async_trait::async_trait]
impl Component for LiteralSource {
    fn instance_id(&self) -> &str {
        &self.base.instance_id
    }

    fn manifest(&self) -> ComponentManifest {
        self.base.manifest()
    }

    async fn execute(&mut self, _inputs: ValueMap, _context: &ExecutionContext) -> Result<ValueMap> {
        let value = self.base.config_value("value").unwrap_or(Value::Null);

        // Lists pass through; scalars are wrapped.
        let items = match &value {
            Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        };

        let mut outputs = ValueMap::new();
        outputs.insert("value".into(), value);
        outputs.insert("count".into(), json!(items.len()));
        outputs.insert("items".into(), Value::Array(items));
        Ok(outputs)
    }
}
