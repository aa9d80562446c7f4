//! Builtin component tests against the real filesystem and engine.

use std::collections::HashMap;
use std::path::PathBuf;

use flowrun_components::ensure_builtins;
use flowrun_core::component::{Component, ComponentType, ValueMap};
use flowrun_core::{ComponentRegistry, ExecutionContext, FlowEngine, OutputMode};
use serde_json::{json, Value};

fn test_dir(label: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "flowrun-components-{label}-{}-{nanos}",
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn cleanup(dir: &std::path::Path) {
    let _ = std::fs::remove_dir_all(dir);
}

fn quiet_ctx() -> std::sync::Arc<ExecutionContext> {
    ExecutionContext::root(HashMap::new(), ValueMap::new(), None, OutputMode::Quiet)
}

fn quiet_ctx_in(dir: &std::path::Path) -> std::sync::Arc<ExecutionContext> {
    ExecutionContext::root(
        HashMap::new(),
        ValueMap::new(),
        Some(dir.to_path_buf()),
        OutputMode::Quiet,
    )
}

fn object(value: Value) -> ValueMap {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

// ===========================================================================
// Registration
// ===========================================================================

#[test]
fn builtins_register_once() {
    ensure_builtins();
    ensure_builtins();
    let registry = ComponentRegistry::global();
    for type_name in [
        "source/literal",
        "source/text_list",
        "source/key_value",
        "transform/template",
        "transform/lookup",
        "transform/compare",
        "transform/echo",
        "sink/collector",
        "sink/json_writer",
        "sink/csv_writer",
    ] {
        assert!(registry.contains(type_name), "missing {type_name}");
    }
}

// ===========================================================================
// Sources
// ===========================================================================

#[tokio::test]
async fn literal_source_emits_value_and_items() {
    let config = object(json!({"value": ["a", "b"]}));
    let mut source = flowrun_components::LiteralSource::build("lit", config).unwrap();
    let outputs = source.execute(ValueMap::new(), &quiet_ctx()).await.unwrap();
    assert_eq!(outputs["value"], json!(["a", "b"]));
    assert_eq!(outputs["items"], json!(["a", "b"]));
    assert_eq!(outputs["count"], json!(2));
}

#[tokio::test]
async fn literal_source_wraps_scalar_in_items() {
    let config = object(json!({"value": 7}));
    let mut source = flowrun_components::LiteralSource::build("lit", config).unwrap();
    let outputs = source.execute(ValueMap::new(), &quiet_ctx()).await.unwrap();
    assert_eq!(outputs["value"], json!(7));
    assert_eq!(outputs["items"], json!([7]));
    assert_eq!(outputs["count"], json!(1));
}

#[tokio::test]
async fn text_list_source_skips_comments_and_blanks() {
    let dir = test_dir("text-list");
    let path = dir.join("items.txt");
    std::fs::write(&path, "alpha\n\n# comment\n// another\n  beta  \n").unwrap();

    let config = object(json!({"path": path.to_str().unwrap()}));
    let mut source = flowrun_components::TextListSource::build("t", config).unwrap();
    let outputs = source.execute(ValueMap::new(), &quiet_ctx()).await.unwrap();
    assert_eq!(outputs["items"], json!(["alpha", "beta"]));
    assert_eq!(outputs["count"], json!(2));

    cleanup(&dir);
}

#[tokio::test]
async fn text_list_source_missing_file_errors() {
    let config = object(json!({"path": "/nonexistent/definitely/missing.txt"}));
    let mut source = flowrun_components::TextListSource::build("t", config).unwrap();
    let err = source
        .execute(ValueMap::new(), &quiet_ctx())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("File not found"));
}

#[tokio::test]
async fn key_value_source_parses_and_converts() {
    let dir = test_dir("key-value");
    let path = dir.join("truth.txt");
    std::fs::write(&path, "# ground truth\nanya | Yes\nloid | NO\n").unwrap();

    let config = object(json!({
        "path": path.to_str().unwrap(),
        "value_type": "boolean"
    }));
    let mut source = flowrun_components::KeyValueSource::build("kv", config).unwrap();
    let outputs = source.execute(ValueMap::new(), &quiet_ctx()).await.unwrap();
    assert_eq!(outputs["data"], json!({"anya": true, "loid": false}));
    assert_eq!(outputs["count"], json!(2));

    cleanup(&dir);
}

#[tokio::test]
async fn key_value_source_rejects_bad_choice() {
    let config = object(json!({"path": "x", "value_type": "complex"}));
    let err = flowrun_components::KeyValueSource::build("kv", config).unwrap_err();
    assert!(err.to_string().contains("must be one of"));
}

// ===========================================================================
// Transforms
// ===========================================================================

#[tokio::test]
async fn template_transform_substitutes_inputs_and_context() {
    let ctx = quiet_ctx();
    ctx.set("ambient", json!("ctx-val"));

    let config = object(json!({"template": "{name}: {ambient} {missing}"}));
    let mut transform = flowrun_components::TemplateTransform::build("tpl", config).unwrap();
    let inputs = object(json!({"name": "test"}));
    let outputs = transform.execute(inputs, &ctx).await.unwrap();
    assert_eq!(outputs["result"], json!("test: ctx-val {missing}"));
}

#[tokio::test]
async fn template_transform_input_overrides_config() {
    let config = object(json!({"template": "config"}));
    let mut transform = flowrun_components::TemplateTransform::build("tpl", config).unwrap();
    let inputs = object(json!({"template": "input {v}", "values": {"v": 1}}));
    let outputs = transform.execute(inputs, &quiet_ctx()).await.unwrap();
    assert_eq!(outputs["result"], json!("input 1"));
}

#[tokio::test]
async fn template_transform_requires_some_template() {
    let mut transform =
        flowrun_components::TemplateTransform::build("tpl", ValueMap::new()).unwrap();
    let err = transform
        .execute(ValueMap::new(), &quiet_ctx())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("No template"));
}

#[tokio::test]
async fn lookup_transform_finds_and_defaults() {
    let config = object(json!({"default": "fallback"}));
    let mut lookup = flowrun_components::LookupTransform::build("lk", config).unwrap();

    let outputs = lookup
        .execute(object(json!({"dict": {"a": 1}, "key": "a"})), &quiet_ctx())
        .await
        .unwrap();
    assert_eq!(outputs["value"], json!(1));
    assert_eq!(outputs["found"], json!(true));

    let outputs = lookup
        .execute(object(json!({"dict": {"a": 1}, "key": "b"})), &quiet_ctx())
        .await
        .unwrap();
    assert_eq!(outputs["value"], json!("fallback"));
    assert_eq!(outputs["found"], json!(false));
}

#[tokio::test]
async fn compare_transform_equals_with_coercion() {
    let mut compare =
        flowrun_components::CompareTransform::build("cmp", ValueMap::new()).unwrap();
    let outputs = compare
        .execute(
            object(json!({"actual": "Yes", "expected": true})),
            &quiet_ctx(),
        )
        .await
        .unwrap();
    assert_eq!(outputs["match"], json!(true));
    assert_eq!(outputs["actual_normalized"], json!(true));
}

#[tokio::test]
async fn compare_transform_modes() {
    let greater = object(json!({"mode": "greater"}));
    let mut compare = flowrun_components::CompareTransform::build("cmp", greater).unwrap();
    let outputs = compare
        .execute(object(json!({"actual": 3, "expected": 2})), &quiet_ctx())
        .await
        .unwrap();
    assert_eq!(outputs["match"], json!(true));

    let contains = object(json!({"mode": "contains"}));
    let mut compare = flowrun_components::CompareTransform::build("cmp", contains).unwrap();
    let outputs = compare
        .execute(
            object(json!({"actual": "hello world", "expected": "world"})),
            &quiet_ctx(),
        )
        .await
        .unwrap();
    assert_eq!(outputs["match"], json!(true));
}

#[tokio::test]
async fn echo_transform_passes_inputs_through() {
    let mut echo = flowrun_components::EchoTransform::build("e", ValueMap::new()).unwrap();
    let inputs = object(json!({"a": 1, "b": [true]}));
    let outputs = echo.execute(inputs.clone(), &quiet_ctx()).await.unwrap();
    assert_eq!(outputs, inputs);
}

// ===========================================================================
// Sinks
// ===========================================================================

#[tokio::test]
async fn collector_accumulates_and_finalizes_to_return() {
    let ctx = quiet_ctx();
    let mut collector =
        flowrun_components::CollectorSink::build("acc", ValueMap::new()).unwrap();

    collector
        .execute(object(json!({"val": "x"})), &ctx)
        .await
        .unwrap();
    collector
        .execute(object(json!({"val": "y"})), &ctx)
        .await
        .unwrap();
    let outputs = collector.execute(ValueMap::new(), &ctx).await.unwrap();

    assert_eq!(outputs["items"], json!([{"val": "x"}, {"val": "y"}]));
    assert_eq!(outputs["count"], json!(2));
    // The finalize call published items to the return space.
    assert_eq!(
        ctx.returns()["acc"],
        json!({"items": [{"val": "x"}, {"val": "y"}], "count": 2})
    );
}

#[tokio::test]
async fn collector_projects_configured_fields() {
    let config = object(json!({"fields": ["keep"]}));
    let mut collector = flowrun_components::CollectorSink::build("acc", config).unwrap();
    let outputs = collector
        .execute(object(json!({"keep": 1, "drop": 2})), &quiet_ctx())
        .await
        .unwrap();
    assert_eq!(outputs["items"], json!([{"keep": 1}]));
}

#[tokio::test]
async fn json_writer_writes_file_with_results() {
    let dir = test_dir("json-writer");
    let ctx = quiet_ctx_in(&dir);

    let config = object(json!({"path": "out.json", "include_metadata": false}));
    let mut writer = flowrun_components::JsonWriterSink::build("jw", config).unwrap();
    writer
        .execute(object(json!({"row": 1})), &ctx)
        .await
        .unwrap();
    let outputs = writer
        .execute(object(json!({"row": 2})), &ctx)
        .await
        .unwrap();
    assert_eq!(outputs["count"], json!(2));

    let written: Value =
        serde_json::from_str(&std::fs::read_to_string(dir.join("out.json")).unwrap()).unwrap();
    assert_eq!(written, json!({"results": [{"row": 1}, {"row": 2}]}));

    cleanup(&dir);
}

#[tokio::test]
async fn json_writer_return_destination_lands_in_returns() {
    let dir = test_dir("json-writer-return");
    let ctx = quiet_ctx_in(&dir);

    let config = object(json!({
        "path": "out.json",
        "include_metadata": false,
        "destinations": ["return"]
    }));
    let mut writer = flowrun_components::JsonWriterSink::build("jw", config).unwrap();
    writer
        .execute(object(json!({"row": 1})), &ctx)
        .await
        .unwrap();

    assert_eq!(ctx.returns()["jw"], json!({"results": [{"row": 1}]}));
    // The file destination was not requested.
    assert!(!dir.join("out.json").exists());

    cleanup(&dir);
}

#[tokio::test]
async fn csv_writer_derives_columns_and_quotes() {
    let dir = test_dir("csv-writer");
    let ctx = quiet_ctx_in(&dir);

    let config = object(json!({"path": "rows.csv"}));
    let mut writer = flowrun_components::CsvWriterSink::build("csv", config).unwrap();
    let inputs = object(json!({
        "items": [
            {"name": "plain", "note": "ok"},
            {"name": "comma,name", "note": "quoted \"yes\""}
        ]
    }));
    let outputs = writer.execute(inputs, &ctx).await.unwrap();
    assert_eq!(outputs["count"], json!(2));

    let written = std::fs::read_to_string(dir.join("rows.csv")).unwrap();
    let mut lines = written.lines();
    assert_eq!(lines.next(), Some("name,note"));
    assert_eq!(lines.next(), Some("plain,ok"));
    assert_eq!(lines.next(), Some("\"comma,name\",\"quoted \"\"yes\"\"\""));

    cleanup(&dir);
}

#[tokio::test]
async fn csv_writer_empty_items_writes_nothing() {
    let dir = test_dir("csv-empty");
    let ctx = quiet_ctx_in(&dir);

    let config = object(json!({"path": "rows.csv"}));
    let mut writer = flowrun_components::CsvWriterSink::build("csv", config).unwrap();
    let outputs = writer
        .execute(object(json!({"items": []})), &ctx)
        .await
        .unwrap();
    assert_eq!(outputs["count"], json!(0));
    assert!(!dir.join("rows.csv").exists());

    cleanup(&dir);
}

// ===========================================================================
// End to end through the engine
// ===========================================================================

#[tokio::test]
async fn builtin_pipeline_end_to_end() {
    ensure_builtins();
    let dir = test_dir("e2e");

    let plan = json!({
        "name": "builtin-e2e",
        "components": {
            "src": {"type": "source/literal", "config": {"value": ["anya", "loid"]}},
            "greet": {"type": "transform/template", "config": {"template": "hello {who}"}},
            "acc": {"type": "sink/collector", "config": {}}
        },
        "flow": [
            {"source": "src"},
            {"loop": {"over": "src.items", "as": "who", "steps": [
                {"call": "greet", "inputs": {"who": "{who}"}, "outputs": {"result": "line"}},
                {"call": "acc", "inputs": {"greeting": "{line}"}}
            ]}},
            {"sink": "acc"}
        ]
    });

    let mut engine = FlowEngine::new();
    engine.load_plan(plan).unwrap();
    let result = engine
        .execute(Some(&dir), OutputMode::Quiet)
        .await
        .unwrap();

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(
        result.returns["acc"]["items"],
        json!([{"greeting": "hello anya"}, {"greeting": "hello loid"}])
    );
    assert_eq!(result.outputs["acc"]["count"], json!(2));

    cleanup(&dir);
}
