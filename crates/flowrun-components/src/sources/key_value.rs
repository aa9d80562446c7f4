//! Key-value source — loads delimited pairs from a text file.

use std::path::PathBuf;

use flowrun_core::component::{
    Category, Component, ComponentBase, ComponentManifest, ComponentType, ConfigSpec, OutputSpec,
    ValueMap,
};
use flowrun_core::context::ExecutionContext;
use flowrun_core::errors::{Error, Result};
use serde_json::{json, Value};

/// Load a file of `key | value` lines into a dictionary. Useful for ground
/// truth files and configuration mappings. Lines starting with `#` are
/// comments.
#[derive(Debug)]
pub struct KeyValueSource {
    base: ComponentBase,
}

impl ComponentType for KeyValueSource {
    fn describe() -> ComponentManifest {
        ComponentManifest::new(
            "source/key_value",
            "Load key|value pairs from file into dictionary",
            Category::Source,
        )
        .config("path", ConfigSpec::new("string", "Path to the key-value file").required())
        .config(
            "delimiter",
            ConfigSpec::new("string", "Delimiter between key and value").with_default(json!("|")),
        )
        .config(
            "normalize_values",
            ConfigSpec::new("boolean", "Normalize values (lowercase, strip)")
                .with_default(json!(true)),
        )
        .config(
            "value_type",
            ConfigSpec::new("string", "Type to convert values to")
                .with_default(json!("string"))
                .with_choices(vec![
                    json!("string"),
                    json!("boolean"),
                    json!("integer"),
                    json!("float"),
                ]),
        )
        .output("data", OutputSpec::new("dict", "Dictionary of key-value pairs"))
        .output("keys", OutputSpec::new("list[string]", "List of all keys"))
        .output("count", OutputSpec::new("integer", "Number of entries"))
    }

    fn build(instance_id: &str, config: ValueMap) -> Result<Self> {
        Ok(Self {
            base: ComponentBase::new(instance_id, config, Self::describe())?,
        })
    }
}

fn convert_value(value: &str, value_type: &str, instance_id: &str) -> Result<Value> {
    match value_type {
        "boolean" => Ok(json!(matches!(value, "yes" | "true" | "1"))),
        "integer" => value
            .parse::<i64>()
            .map(|n| json!(n))
            .map_err(|_| Error::Config(format!("Component {instance_id}: '{value}' is not an integer"))),
        "float" => value
            .parse::<f64>()
            .map(|f| json!(f))
            .map_err(|_| Error::Config(format!("Component {instance_id}: '{value}' is not a float"))),
        _ => Ok(Value::String(value.to_string())),
    }
}

#[async_trait::async_trait]
impl Component for KeyValueSource {
    fn instance_id(&self) -> &str {
        &self.base.instance_id
    }

    fn manifest(&self) -> ComponentManifest {
        self.base.manifest()
    }

    async fn execute(&mut self, _inputs: ValueMap, _context: &ExecutionContext) -> Result<ValueMap> {
        let path = PathBuf::from(self.base.config_str("path").unwrap_or_default());
        let delimiter = self.base.config_str("delimiter").unwrap_or_else(|| "|".into());
        let normalize = self.base.config_bool("normalize_values", true);
        let value_type = self
            .base
            .config_str("value_type")
            .unwrap_or_else(|| "string".into());

        if !path.exists() {
            return Err(Error::Config(format!("File not found: {}", path.display())));
        }

        let text = std::fs::read_to_string(&path)?;
        let mut data = ValueMap::new();
        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once(delimiter.as_str()) else {
                continue;
            };
            let key = key.trim();
            let mut value = value.trim().to_string();
            if normalize {
                value = value.to_lowercase();
            }
            data.insert(
                key.to_string(),
                convert_value(&value, &value_type, &self.base.instance_id)?,
            );
        }

        let keys: Vec<Value> = data.keys().map(|k| Value::String(k.clone())).collect();
        let mut outputs = ValueMap::new();
        outputs.insert("count".into(), json!(data.len()));
        outputs.insert("keys".into(), Value::Array(keys));
        outputs.insert("data".into(), Value::Object(data));
        Ok(outputs)
    }
}
