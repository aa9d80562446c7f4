//! CSV writer sink — exports a list of items to CSV.

use std::path::PathBuf;

use flowrun_core::component::{
    Category, Component, ComponentBase, ComponentManifest, ComponentType, ConfigSpec, InputSpec,
    OutputSpec, ValidationResult, ValueMap,
};
use flowrun_core::context::{display_value, ExecutionContext};
use flowrun_core::errors::Result;
use serde_json::{json, Value};

/// Export results to CSV for spreadsheet analysis. Headers come from the
/// configured columns, or from the first item's keys.
pub struct CsvWriterSink {
    base: ComponentBase,
}

impl ComponentType for CsvWriterSink {
    fn describe() -> ComponentManifest {
        ComponentManifest::new("sink/csv_writer", "Export results to CSV file", Category::Sink)
            .config(
                "path",
                ConfigSpec::new("string", "Output file path (e.g. 'results.csv')").required(),
            )
            .config(
                "columns",
                ConfigSpec::new("list", "Specific columns to include (default: all)"),
            )
            .input("items", InputSpec::new("list", "List of items to export"))
            .output("path", OutputSpec::new("string", "Path to written file"))
            .output("count", OutputSpec::new("integer", "Number of rows written"))
    }

    fn build(instance_id: &str, config: ValueMap) -> Result<Self> {
        Ok(Self {
            base: ComponentBase::new(instance_id, config, Self::describe())?,
        })
    }
}

/// RFC 4180 quoting: wrap in quotes when the field contains a comma, quote,
/// or newline; double embedded quotes.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_row(fields: &[String]) -> String {
    fields
        .iter()
        .map(|f| csv_field(f))
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait::async_trait]
impl Component for CsvWriterSink {
    fn instance_id(&self) -> &str {
        &self.base.instance_id
    }

    fn manifest(&self) -> ComponentManifest {
        self.base.manifest()
    }

    fn validate(&self, inputs: &ValueMap) -> ValidationResult {
        if let Some(items) = inputs.get("items") {
            if !items.is_array() {
                return ValidationResult::fail(vec!["'items' must be a list".into()]);
            }
        }
        ValidationResult::ok()
    }

    async fn execute(&mut self, inputs: ValueMap, context: &ExecutionContext) -> Result<ValueMap> {
        let items = match inputs.get("items") {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        if items.is_empty() {
            let mut outputs = ValueMap::new();
            outputs.insert("path".into(), json!(""));
            outputs.insert("count".into(), json!(0));
            return Ok(outputs);
        }

        let configured_path = PathBuf::from(self.base.config_str("path").unwrap_or_default());
        let path = match context.output_dir() {
            Some(dir) if configured_path.is_relative() => dir.join(&configured_path),
            _ => configured_path,
        };

        let columns: Vec<String> = match self.base.config_list("columns") {
            Some(columns) if !columns.is_empty() => columns
                .iter()
                .filter_map(|c| c.as_str().map(String::from))
                .collect(),
            _ => match &items[0] {
                Value::Object(first) => first.keys().cloned().collect(),
                _ => vec!["value".into()],
            },
        };

        let mut lines = vec![csv_row(&columns)];
        for item in &items {
            let row: Vec<String> = match item {
                Value::Object(map) => columns
                    .iter()
                    .map(|col| map.get(col).map(display_value).unwrap_or_default())
                    .collect(),
                other => vec![display_value(other)],
            };
            lines.push(csv_row(&row));
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, lines.join("\n") + "\n")?;

        self.base
            .report(&format!("  CSV: {} rows -> {}", items.len(), path.display()), context);

        let mut outputs = ValueMap::new();
        outputs.insert("path".into(), Value::String(path.display().to_string()));
        outputs.insert("count".into(), json!(items.len()));
        Ok(outputs)
    }
}
