//! Text list source — loads lines from a text file.

use std::path::PathBuf;

use flowrun_core::component::{
    Category, Component, ComponentBase, ComponentManifest, ComponentType, ConfigSpec, OutputSpec,
    ValueMap,
};
use flowrun_core::context::ExecutionContext;
use flowrun_core::errors::{Error, Result};
use serde_json::{json, Value};

/// Load a text file as a list of lines. Useful for item lists, question
/// lists, and other one-per-line inputs.
pub struct TextListSource {
    base: ComponentBase,
}

impl ComponentType for TextListSource {
    fn describe() -> ComponentManifest {
        ComponentManifest::new(
            "source/text_list",
            "Load text file as list of lines",
            Category::Source,
        )
        .config("path", ConfigSpec::new("string", "Path to the text file").required())
        .config(
            "skip_empty",
            ConfigSpec::new("boolean", "Skip empty lines").with_default(json!(true)),
        )
        .config(
            "skip_comments",
            ConfigSpec::new("boolean", "Skip comment lines (starting with #, //, or ;)")
                .with_default(json!(true)),
        )
        .config(
            "comment_prefixes",
            ConfigSpec::new("list", "Prefixes that indicate comment lines")
                .with_default(json!(["#", "//", ";"])),
        )
        .config(
            "strip",
            ConfigSpec::new("boolean", "Strip whitespace from lines").with_default(json!(true)),
        )
        .output("items", OutputSpec::new("list[string]", "List of lines from the file"))
        .output("count", OutputSpec::new("integer", "Number of items loaded"))
    }

    fn build(instance_id: &str, config: ValueMap) -> Result<Self> {
        Ok(Self {
            base: ComponentBase::new(instance_id, config, Self::describe())?,
        })
    }
}

#[async_trait::async_trait]
impl Component for TextListSource {
    fn instance_id(&self) -> &str {
        &self.base.instance_id
    }

    fn manifest(&self) -> ComponentManifest {
        self.base.manifest()
    }

    async fn execute(&mut self, _inputs: ValueMap, _context: &ExecutionContext) -> Result<ValueMap> {
        let path = PathBuf::from(self.base.config_str("path").unwrap_or_default());
        let skip_empty = self.base.config_bool("skip_empty", true);
        let skip_comments = self.base.config_bool("skip_comments", true);
        let strip = self.base.config_bool("strip", true);
        let comment_prefixes: Vec<String> = self
            .base
            .config_list("comment_prefixes")
            .unwrap_or_default()
            .into_iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect();

        if !path.exists() {
            return Err(Error::Config(format!("File not found: {}", path.display())));
        }

        let text = std::fs::read_to_string(&path)?;
        let mut items = Vec::new();
        for raw in text.lines() {
            let line = if strip { raw.trim() } else { raw.trim_end_matches(['\n', '\r']) };
            if skip_empty && line.is_empty() {
                continue;
            }
            if skip_comments && comment_prefixes.iter().any(|p| line.starts_with(p.as_str())) {
                continue;
            }
            items.push(Value::String(line.to_string()));
        }

        let mut outputs = ValueMap::new();
        outputs.insert("count".into(), json!(items.len()));
        outputs.insert("items".into(), Value::Array(items));
        Ok(outputs)
    }
}
