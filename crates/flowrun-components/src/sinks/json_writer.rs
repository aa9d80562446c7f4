//! JSON writer sink — writes collected data to a JSON file.

use std::path::PathBuf;

use flowrun_core::component::{
    Category, Component, ComponentBase, ComponentManifest, ComponentType, ConfigSpec, OutputSpec,
    ValidationResult, ValueMap,
};
use flowrun_core::context::ExecutionContext;
use flowrun_core::errors::Result;
use serde_json::{json, Value};

/// Write collected data to a JSON file. Can be called multiple times to
/// accumulate; every call rewrites the file with everything collected so
/// far, so a crash loses at most the in-flight item.
pub struct JsonWriterSink {
    base: ComponentBase,
    collected: Vec<Value>,
}

impl ComponentType for JsonWriterSink {
    fn describe() -> ComponentManifest {
        ComponentManifest::new("sink/json_writer", "Write data to JSON file", Category::Sink)
            .config("path", ConfigSpec::new("string", "Output file path").required())
            .config(
                "pretty",
                ConfigSpec::new("boolean", "Pretty-print JSON").with_default(json!(true)),
            )
            .config(
                "include_metadata",
                ConfigSpec::new("boolean", "Include execution metadata").with_default(json!(true)),
            )
            .config(
                "destinations",
                ConfigSpec::new("list", "Where to write: file, return, or console")
                    .with_default(json!(["file"])),
            )
            .output("path", OutputSpec::new("string", "Path to written file"))
            .output("count", OutputSpec::new("integer", "Number of items written"))
    }

    fn build(instance_id: &str, config: ValueMap) -> Result<Self> {
        Ok(Self {
            base: ComponentBase::new(instance_id, config, Self::describe())?,
            collected: Vec::new(),
        })
    }
}

#[async_trait::async_trait]
impl Component for JsonWriterSink {
    fn instance_id(&self) -> &str {
        &self.base.instance_id
    }

    fn manifest(&self) -> ComponentManifest {
        self.base.manifest()
    }

    fn validate(&self, _inputs: &ValueMap) -> ValidationResult {
        ValidationResult::ok()
    }

    async fn execute(&mut self, inputs: ValueMap, context: &ExecutionContext) -> Result<ValueMap> {
        if !inputs.is_empty() {
            self.collected.push(Value::Object(inputs));
        }

        let configured_path = PathBuf::from(self.base.config_str("path").unwrap_or_default());
        let pretty = self.base.config_bool("pretty", true);
        let include_metadata = self.base.config_bool("include_metadata", true);

        let mut document = ValueMap::new();
        document.insert("results".into(), Value::Array(self.collected.clone()));
        if include_metadata {
            document.insert(
                "metadata".into(),
                json!({
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                    "count": self.collected.len(),
                }),
            );
        }

        let destinations = self
            .base
            .config_list("destinations")
            .unwrap_or_else(|| vec![json!("file")]);

        let mut written_path = String::new();
        for destination in &destinations {
            match destination.as_str() {
                Some("file") => {
                    let path = match context.output_dir() {
                        Some(dir) if configured_path.is_relative() => dir.join(&configured_path),
                        _ => configured_path.clone(),
                    };
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    let file = std::fs::File::create(&path)?;
                    if pretty {
                        serde_json::to_writer_pretty(file, &Value::Object(document.clone()))?;
                    } else {
                        serde_json::to_writer(file, &Value::Object(document.clone()))?;
                    }
                    written_path = path.display().to_string();
                }
                Some("return") => {
                    let mut data = ValueMap::new();
                    data.insert(self.base.instance_id.clone(), Value::Object(document.clone()));
                    context.write(&data, "return", None)?;
                }
                Some("console") => context.write(&document, "console", None)?,
                _ => {}
            }
        }

        let mut outputs = ValueMap::new();
        outputs.insert("count".into(), json!(self.collected.len()));
        outputs.insert("path".into(), Value::String(written_path));
        Ok(outputs)
    }
}
