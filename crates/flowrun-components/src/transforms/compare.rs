//! Compare transform — compare two values.

use flowrun_core::component::{
    Category, Component, ComponentBase, ComponentManifest, ComponentType, ConfigSpec, InputSpec,
    OutputSpec, ValueMap,
};
use flowrun_core::context::{display_value, ExecutionContext};
use flowrun_core::errors::Result;
use serde_json::{json, Value};

/// Compare two values and determine whether they match, with optional
/// normalization and yes/no/true/false coercion. Useful for checking
/// predictions against ground truth.
pub struct CompareTransform {
    base: ComponentBase,
}

impl ComponentType for CompareTransform {
    fn describe() -> ComponentManifest {
        ComponentManifest::new(
            "transform/compare",
            "Compare two values for equality or other relations",
            Category::Transform,
        )
        .config(
            "mode",
            ConfigSpec::new("string", "Comparison mode")
                .with_default(json!("equals"))
                .with_choices(vec![
                    json!("equals"),
                    json!("not_equals"),
                    json!("contains"),
                    json!("greater"),
                    json!("less"),
                ]),
        )
        .config(
            "case_sensitive",
            ConfigSpec::new("boolean", "Case-sensitive string comparison").with_default(json!(false)),
        )
        .config(
            "coerce_bool",
            ConfigSpec::new("boolean", "Coerce yes/no/true/false strings to boolean")
                .with_default(json!(true)),
        )
        .input("actual", InputSpec::new("any", "Actual/predicted value"))
        .input("expected", InputSpec::new("any", "Expected/ground truth value"))
        .output("match", OutputSpec::new("boolean", "Whether values match according to mode"))
        .output("actual_normalized", OutputSpec::new("any", "Normalized actual value"))
        .output("expected_normalized", OutputSpec::new("any", "Normalized expected value"))
    }

    fn build(instance_id: &str, config: ValueMap) -> Result<Self> {
        Ok(Self {
            base: ComponentBase::new(instance_id, config, Self::describe())?,
        })
    }
}

fn normalize(value: &Value, case_sensitive: bool, coerce_bool: bool) -> Value {
    let Value::String(s) = value else {
        return value.clone();
    };
    let trimmed = if case_sensitive {
        s.trim().to_string()
    } else {
        s.trim().to_lowercase()
    };
    if coerce_bool {
        match trimmed.as_str() {
            "yes" | "true" | "1" => return json!(true),
            "no" | "false" | "0" => return json!(false),
            _ => {}
        }
    }
    Value::String(trimmed)
}

/// Ordering for greater/less modes: numeric when both values are numbers,
/// lexicographic when both are strings, no ordering otherwise.
fn value_order(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) {
        return a.partial_cmp(&b);
    }
    match (a, b) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[async_trait::async_trait]
impl Component for CompareTransform {
    fn instance_id(&self) -> &str {
        &self.base.instance_id
    }

    fn manifest(&self) -> ComponentManifest {
        self.base.manifest()
    }

    async fn execute(&mut self, inputs: ValueMap, _context: &ExecutionContext) -> Result<ValueMap> {
        let actual = inputs.get("actual").cloned().unwrap_or(Value::Null);
        let expected = inputs.get("expected").cloned().unwrap_or(Value::Null);
        let mode = self.base.config_str("mode").unwrap_or_else(|| "equals".into());
        let case_sensitive = self.base.config_bool("case_sensitive", false);
        let coerce_bool = self.base.config_bool("coerce_bool", true);

        let actual_norm = normalize(&actual, case_sensitive, coerce_bool);
        let expected_norm = normalize(&expected, case_sensitive, coerce_bool);

        let matched = match mode.as_str() {
            "not_equals" => actual_norm != expected_norm,
            "contains" => display_value(&actual_norm).contains(&display_value(&expected_norm)),
            "greater" => {
                value_order(&actual_norm, &expected_norm) == Some(std::cmp::Ordering::Greater)
            }
            "less" => value_order(&actual_norm, &expected_norm) == Some(std::cmp::Ordering::Less),
            _ => actual_norm == expected_norm,
        };

        let mut outputs = ValueMap::new();
        outputs.insert("match".into(), json!(matched));
        outputs.insert("actual_normalized".into(), actual_norm);
        outputs.insert("expected_normalized".into(), expected_norm);
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_coerces_booleans() {
        assert_eq!(normalize(&json!("Yes"), false, true), json!(true));
        assert_eq!(normalize(&json!(" no "), false, true), json!(false));
        assert_eq!(normalize(&json!("Yes"), false, false), json!("yes"));
    }

    #[test]
    fn normalize_respects_case_sensitivity() {
        assert_eq!(normalize(&json!(" ABC "), true, false), json!("ABC"));
        assert_eq!(normalize(&json!(" ABC "), false, false), json!("abc"));
    }

    #[test]
    fn value_order_numbers_then_strings() {
        assert_eq!(
            value_order(&json!(3), &json!(2)),
            Some(std::cmp::Ordering::Greater)
        );
        assert_eq!(
            value_order(&json!("banana"), &json!("apple")),
            Some(std::cmp::Ordering::Greater)
        );
        assert_eq!(
            value_order(&json!("apple"), &json!("banana")),
            Some(std::cmp::Ordering::Less)
        );
        // Mixed types have no ordering.
        assert_eq!(value_order(&json!("a"), &json!(2)), None);
    }
}
