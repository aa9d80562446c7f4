//! Collector sink — accumulates data items during execution.

use flowrun_core::component::{
    Category, Component, ComponentBase, ComponentManifest, ComponentType, ConfigSpec, OutputSpec,
    ValidationResult, ValueMap,
};
use flowrun_core::context::ExecutionContext;
use flowrun_core::errors::Result;
use serde_json::{json, Value};

/// Collect data items during execution. Call repeatedly (e.g. in a loop) to
/// accumulate, then once as a `{sink: id}` step to finalize. Each call also
/// writes its payload to the configured destinations under the instance id;
/// the finalize call writes the accumulated items and count.
pub struct CollectorSink {
    base: ComponentBase,
    collected: Vec<Value>,
}

impl ComponentType for CollectorSink {
    fn describe() -> ComponentManifest {
        ComponentManifest::new(
            "sink/collector",
            "Collect data items during execution",
            Category::Sink,
        )
        .config(
            "fields",
            ConfigSpec::new(
                "list",
                "Field names to collect (optional, collects all inputs if not specified)",
            ),
        )
        .config(
            "destinations",
            ConfigSpec::new("list", "Where to write: return, console, or file")
                .with_default(json!(["return"])),
        )
        .config(
            "path",
            ConfigSpec::new("string", "Output path for the file destination"),
        )
        .output("items", OutputSpec::new("list[dict]", "All collected items"))
        .output("count", OutputSpec::new("integer", "Number of items collected"))
    }

    fn build(instance_id: &str, config: ValueMap) -> Result<Self> {
        Ok(Self {
            base: ComponentBase::new(instance_id, config, Self::describe())?,
            collected: Vec::new(),
        })
    }
}

#[async_trait::async_trait]
impl Component for CollectorSink {
    fn instance_id(&self) -> &str {
        &self.base.instance_id
    }

    fn manifest(&self) -> ComponentManifest {
        self.base.manifest()
    }

    fn validate(&self, _inputs: &ValueMap) -> ValidationResult {
        // Accepts any inputs.
        ValidationResult::ok()
    }

    async fn execute(&mut self, inputs: ValueMap, context: &ExecutionContext) -> Result<ValueMap> {
        let fields: Option<Vec<String>> = self.base.config_list("fields").map(|fields| {
            fields
                .into_iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        });

        let item = match &fields {
            Some(fields) => {
                let mut item = ValueMap::new();
                for field in fields {
                    if let Some(value) = inputs.get(field) {
                        item.insert(field.clone(), value.clone());
                    }
                }
                item
            }
            None => inputs.clone(),
        };
        if !item.is_empty() {
            self.collected.push(Value::Object(item));
        }

        // Non-empty calls publish the raw payload; the finalize call (empty
        // inputs) publishes the accumulated items. Last write wins on the
        // return destination.
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

        let destinations = self
            .base
            .config_list("destinations")
            .unwrap_or_else(|| vec![json!("return")]);
        let path = self.base.config_str("path");
        for destination in &destinations {
            if let Some(dest) = destination.as_str() {
                context.write(&data, dest, path.as_deref())?;
            }
        }

        let mut outputs = ValueMap::new();
        outputs.insert("count".into(), json!(self.collected.len()));
        outputs.insert("items".into(), Value::Array(self.collected.clone()));
        Ok(outputs)
    }
}
