//! Plan validator tests: schema, component existence, reference flow.

mod common;

use flowrun_core::{validate_plan, Plan};
use serde_json::json;

fn plan(value: serde_json::Value) -> Plan {
    Plan::from_value(value).unwrap()
}

#[test]
fn empty_plan_reports_missing_sections() {
    common::setup();
    let report = validate_plan(&plan(json!({})));
    assert!(!report.valid);
    let messages = report.error_messages();
    assert!(messages.iter().any(|m| m.contains("components")));
    assert!(messages.iter().any(|m| m.contains("flow")));
}

#[test]
fn missing_name_is_a_warning_only() {
    common::setup();
    let report = validate_plan(&plan(json!({
        "components": {"p": {"type": "transform/test_probe", "config": {}}},
        "flow": [{"call": "p"}]
    })));
    assert!(report.valid);
    assert!(report
        .warnings()
        .iter()
        .any(|w| w.message.contains("name")));
}

#[test]
fn component_without_type_is_an_error() {
    common::setup();
    let report = validate_plan(&plan(json!({
        "name": "typeless",
        "components": {"p": {"config": {}}},
        "flow": [{"call": "p"}]
    })));
    assert!(!report.valid);
    assert!(report
        .error_messages()
        .iter()
        .any(|m| m.contains("missing 'type'")));
}

#[test]
fn unknown_component_type_suggests_similar() {
    common::setup();
    let report = validate_plan(&plan(json!({
        "name": "typo",
        "components": {"p": {"type": "transform/test_prob", "config": {}}},
        "flow": [{"call": "p"}]
    })));
    assert!(!report.valid);
    let error = report
        .errors()
        .into_iter()
        .find(|m| m.message.contains("Unknown component type"))
        .expect("unknown type error");
    // test_prob is a substring of test_probe, so the suggestion finds it.
    assert!(error
        .suggestion
        .as_ref()
        .is_some_and(|s| s.contains("test_probe")));
}

#[test]
fn step_referencing_unknown_component_is_an_error() {
    common::setup();
    let report = validate_plan(&plan(json!({
        "name": "dangling",
        "components": {"p": {"type": "transform/test_probe", "config": {}}},
        "flow": [{"call": "ghost"}]
    })));
    assert!(!report.valid);
    assert!(report
        .error_messages()
        .iter()
        .any(|m| m.contains("unknown component: 'ghost'")));
}

#[test]
fn known_references_produce_no_warnings() {
    common::setup();
    let report = validate_plan(&plan(json!({
        "name": "wired",
        "inputs": {"q": {"type": "string"}},
        "components": {
            "s": {"type": "source/test_items", "config": {"items": ["a"]}},
            "up": {"type": "transform/test_upper", "config": {}}
        },
        "flow": [
            {"source": "s"},
            {"call": "up", "inputs": {"text": "{q}"}, "outputs": {"text": "loud"}},
            {"call": "up", "inputs": {"text": "{loud} and {s.items}"}}
        ]
    })));
    assert!(report.valid);
    assert!(
        report.warnings().iter().all(|w| !w.message.contains("may not be defined")),
        "unexpected warnings: {:?}",
        report.warnings()
    );
}

#[test]
fn unknown_reference_is_a_warning_not_error() {
    common::setup();
    let report = validate_plan(&plan(json!({
        "name": "dangling-ref",
        "components": {"up": {"type": "transform/test_upper", "config": {}}},
        "flow": [{"call": "up", "inputs": {"text": "{never_defined}"}}]
    })));
    assert!(report.valid);
    assert!(report
        .warnings()
        .iter()
        .any(|w| w.message.contains("never_defined")));
}

#[test]
fn loop_variables_scope_to_loop_body() {
    common::setup();
    let report = validate_plan(&plan(json!({
        "name": "loop-scope",
        "components": {
            "s": {"type": "source/test_items", "config": {"items": ["a"]}},
            "up": {"type": "transform/test_upper", "config": {}}
        },
        "flow": [
            {"source": "s"},
            {"loop": {"over": "s.items", "as": "it", "index": "i", "steps": [
                {"call": "up", "inputs": {"text": "{it} {i}"}}
            ]}},
            {"call": "up", "inputs": {"text": "{it}"}}
        ]
    })));
    assert!(report.valid);
    // Inside the loop: no warning. After: the loop var is out of scope.
    let warnings: Vec<String> = report
        .warnings()
        .iter()
        .map(|w| format!("{}@{}", w.message, w.location.clone().unwrap_or_default()))
        .collect();
    assert!(
        warnings.iter().any(|w| w.contains("{it}") && w.contains("flow[2]")),
        "warnings: {warnings:?}"
    );
    assert!(!warnings.iter().any(|w| w.contains("flow[1]")));
}

#[test]
fn loop_without_over_is_an_error() {
    common::setup();
    let report = validate_plan(&plan(json!({
        "name": "no-over",
        "components": {"p": {"type": "transform/test_probe", "config": {}}},
        "flow": [{"loop": {"as": "it", "steps": [{"call": "p"}]}}]
    })));
    assert!(!report.valid);
    assert!(report
        .error_messages()
        .iter()
        .any(|m| m.contains("missing 'over'")));
}

#[test]
fn conditional_without_if_is_an_error() {
    common::setup();
    let report = validate_plan(&plan(json!({
        "name": "no-if",
        "components": {"p": {"type": "transform/test_probe", "config": {}}},
        "flow": [{"conditional": {"then": [{"call": "p"}]}}]
    })));
    assert!(!report.valid);
    assert!(report
        .error_messages()
        .iter()
        .any(|m| m.contains("missing 'if'")));
}

#[test]
fn undeclared_output_name_is_a_warning() {
    common::setup();
    let report = validate_plan(&plan(json!({
        "name": "bad-output",
        "components": {"up": {"type": "transform/test_upper", "config": {}}},
        "flow": [{"call": "up", "inputs": {"text": "x"}, "outputs": {"nonexistent": "v"}}]
    })));
    assert!(report.valid);
    assert!(report
        .warnings()
        .iter()
        .any(|w| w.message.contains("may not have output 'nonexistent'")));
}

#[test]
fn validation_is_pure_and_idempotent() {
    common::setup();
    let p = plan(json!({
        "components": {
            "s": {"type": "source/test_items", "config": {"items": ["a"]}},
            "up": {"type": "transform/test_upper", "config": {}}
        },
        "flow": [
            {"source": "s"},
            {"call": "up", "inputs": {"text": "{undefined_ref}"}}
        ]
    }));
    let first = validate_plan(&p);
    let second = validate_plan(&p);
    assert_eq!(
        serde_json::to_value(&first).unwrap(),
        serde_json::to_value(&second).unwrap()
    );
}
