//! Template transform — string interpolation.

use std::sync::OnceLock;

use flowrun_core::component::{
    Category, Component, ComponentBase, ComponentManifest, ComponentType, ConfigSpec, InputSpec,
    OutputSpec, ValueMap,
};
use flowrun_core::context::{display_value, ExecutionContext};
use flowrun_core::errors::{Error, Result};
use regex::Regex;
use serde_json::{json, Value};

/// Substitute `{placeholder}` values into a template string. Useful for
/// building prompts and combining data. Placeholders resolve from the
/// provided values first, then from the execution context.
pub struct TemplateTransform {
    base: ComponentBase,
}

impl ComponentType for TemplateTransform {
    fn describe() -> ComponentManifest {
        ComponentManifest::new(
            "transform/template",
            "String template interpolation",
            Category::Transform,
        )
        .config(
            "template",
            ConfigSpec::new(
                "string",
                "Template string with {placeholders} (can also be provided via input)",
            ),
        )
        .input(
            "template",
            InputSpec::new("string", "Template string (overrides config if provided)").optional(),
        )
        .input(
            "values",
            InputSpec::new("dict", "Dictionary of values to substitute")
                .optional()
                .with_default(json!({})),
        )
        .output("result", OutputSpec::new("string", "Interpolated string"))
    }

    fn build(instance_id: &str, config: ValueMap) -> Result<Self> {
        Ok(Self {
            base: ComponentBase::new(instance_id, config, Self::describe())?,
        })
    }
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([^}]+)\}").expect("placeholder pattern"))
}

#[async_trait::async_trait]
impl Component for TemplateTransform {
    fn instance_id(&self) -> &str {
        &self.base.instance_id
    }

    fn manifest(&self) -> ComponentManifest {
        self.base.manifest()
    }

    async fn execute(&mut self, inputs: ValueMap, context: &ExecutionContext) -> Result<ValueMap> {
        let template = inputs
            .get("template")
            .and_then(Value::as_str)
            .map(String::from)
            .or_else(|| self.base.config_str("template"))
            .ok_or_else(|| {
                Error::component(
                    &self.base.instance_id,
                    "No template provided (via input or config)",
                )
            })?;

        // Values dict plus any extra inputs, extras winning.
        let mut all_values = match inputs.get("values") {
            Some(Value::Object(map)) => map.clone(),
            _ => ValueMap::new(),
        };
        for (key, value) in &inputs {
            if key != "values" {
                all_values.insert(key.clone(), value.clone());
            }
        }

        let result = placeholder_re().replace_all(&template, |caps: &regex::Captures<'_>| {
            let key = &caps[1];
            if let Some(value) = all_values.get(key) {
                return display_value(value);
            }
            match context.get(key) {
                Some(value) => display_value(&value),
                None => caps[0].to_string(),
            }
        });

        let mut outputs = ValueMap::new();
        outputs.insert("result".into(), Value::String(result.into_owned()));
        Ok(outputs)
    }
}
