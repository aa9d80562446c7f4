//! Persistence tests: fingerprints, journal replay, crash-resume.

mod common;

use std::io::Write;

use flowrun_core::{call_fingerprint, canonical_json, FlowEngine, OutputMode, RunJournal, ValueMap};
use serde_json::{json, Value};

fn object(value: Value) -> ValueMap {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

// ===========================================================================
// Canonical JSON and fingerprints
// ===========================================================================

#[test]
fn canonical_json_sorts_keys_recursively() {
    let value = json!({"b": 1, "a": {"z": true, "m": [1, 2]}});
    assert_eq!(canonical_json(&value), r#"{"a":{"m":[1,2],"z":true},"b":1}"#);
}

#[test]
fn canonical_json_is_compact() {
    let value = json!({"k": [1, "two", null]});
    assert!(!canonical_json(&value).contains(' '));
}

#[test]
fn fingerprint_is_stable_and_short() {
    let inputs = object(json!({"x": 1, "y": "two"}));
    let h1 = call_fingerprint("comp", &inputs);
    let h2 = call_fingerprint("comp", &inputs);
    assert_eq!(h1, h2);
    assert_eq!(h1.len(), 16);
    assert!(h1.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn fingerprint_varies_with_component_and_inputs() {
    let inputs = object(json!({"x": 1}));
    let other_inputs = object(json!({"x": 2}));
    assert_ne!(
        call_fingerprint("a", &inputs),
        call_fingerprint("b", &inputs)
    );
    assert_ne!(
        call_fingerprint("a", &inputs),
        call_fingerprint("a", &other_inputs)
    );
}

#[test]
fn fingerprint_ignores_key_order() {
    // Same map built in different insertion orders hashes identically.
    let mut first = ValueMap::new();
    first.insert("a".into(), json!(1));
    first.insert("b".into(), json!(2));
    let mut second = ValueMap::new();
    second.insert("b".into(), json!(2));
    second.insert("a".into(), json!(1));
    assert_eq!(
        call_fingerprint("c", &first),
        call_fingerprint("c", &second)
    );
}

// ===========================================================================
// Journal replay
// ===========================================================================

#[test]
fn journal_reloads_completed_calls_exactly() {
    let dir = common::test_dir("journal-reload");

    let mut journal = RunJournal::new(Some("r1".into()));
    journal.open(&dir).unwrap();
    let outputs = object(json!({"result": [1, 2]}));
    let mut fields = ValueMap::new();
    fields.insert("component".into(), json!("t"));
    fields.insert("call_hash".into(), json!("abc123"));
    fields.insert("outputs".into(), Value::Object(outputs.clone()));
    journal.log_event("call_complete", fields);

    let mut reloaded = RunJournal::new(Some("r1".into()));
    let resuming = reloaded.open(&dir).unwrap();
    assert!(resuming);
    assert_eq!(reloaded.completed_call("abc123"), Some(&outputs));
    assert_eq!(reloaded.state().calls_cached, 1);

    common::cleanup(&dir);
}

#[test]
fn journal_tolerates_truncated_trailing_line() {
    let dir = common::test_dir("journal-truncated");

    let mut journal = RunJournal::new(Some("r2".into()));
    journal.open(&dir).unwrap();
    let mut fields = ValueMap::new();
    fields.insert("iteration_key".into(), json!("it[0]:a"));
    journal.log_event("iteration_complete", fields);
    drop(journal);

    // Simulate a crash mid-write: a partial JSON line at the end.
    let path = RunJournal::state_path(&dir);
    let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    write!(file, "{{\"type\": \"call_compl").unwrap();
    drop(file);

    let mut reloaded = RunJournal::new(Some("r2".into()));
    assert!(reloaded.open(&dir).unwrap());
    assert!(reloaded.iteration_completed("it[0]:a"));
    assert_eq!(reloaded.state().total_events, 1);

    common::cleanup(&dir);
}

#[test]
fn pending_calls_are_not_trusted() {
    let dir = common::test_dir("journal-pending");

    let mut journal = RunJournal::new(Some("r3".into()));
    journal.open(&dir).unwrap();
    let mut fields = ValueMap::new();
    fields.insert("component".into(), json!("t"));
    fields.insert("call_hash".into(), json!("deadbeef"));
    journal.log_event("call_start", fields);

    let mut reloaded = RunJournal::new(Some("r3".into()));
    reloaded.open(&dir).unwrap();
    // Started but never completed: will re-execute.
    assert!(reloaded.completed_call("deadbeef").is_none());
    assert!(reloaded.state().pending_calls.contains("deadbeef"));

    common::cleanup(&dir);
}

// ===========================================================================
// Resume
// ===========================================================================

fn counting_loop_plan(probe_id: &str) -> Value {
    json!({
        "name": "resume-loop",
        "components": {
            "s": {"type": "source/test_items", "config": {
                "items": ["i0", "i1", "i2", "i3", "i4", "i5", "i6", "i7", "i8", "i9"]
            }},
            probe_id: {"type": "transform/test_probe", "config": {}}
        },
        "flow": [
            {"source": "s"},
            {"loop": {"over": "s.items", "as": "it", "steps": [
                {"call": probe_id, "inputs": {"v": "{it}"}}
            ]}}
        ]
    })
}

#[tokio::test]
async fn resume_skips_completed_iterations() {
    common::setup();
    let dir = common::test_dir("resume-iters");
    let probe = "resume_probe_a";
    common::reset_exec_count(probe);

    // Simulate a crash after iterations 0..4 completed.
    let state_path = RunJournal::state_path(&dir);
    let mut lines = String::new();
    for i in 0..5 {
        lines.push_str(&format!(
            "{{\"timestamp\": \"t\", \"type\": \"iteration_complete\", \"iteration_key\": \"it[{i}]:i{i}\"}}\n"
        ));
    }
    std::fs::write(&state_path, lines).unwrap();

    let mut engine = FlowEngine::persistent(Some("resume-a".into()));
    engine.load_plan(counting_loop_plan(probe)).unwrap();
    let result = engine
        .execute(Some(&dir), OutputMode::Quiet)
        .await
        .unwrap();

    assert!(result.success);
    // Iterations 0..4 were skipped entirely; 5..9 executed.
    assert_eq!(common::exec_count(probe), 5);

    common::cleanup(&dir);
}

#[tokio::test]
async fn restart_after_success_reexecutes_nothing() {
    common::setup();
    let dir = common::test_dir("resume-complete");
    let probe = "resume_probe_b";
    common::reset_exec_count(probe);

    let mut engine = FlowEngine::persistent(Some("resume-b".into()));
    engine.load_plan(counting_loop_plan(probe)).unwrap();
    let result = engine.execute(Some(&dir), OutputMode::Quiet).await.unwrap();
    assert!(result.success);
    assert_eq!(common::exec_count(probe), 10);

    // Same run id, fresh engine: every iteration is already recorded.
    let mut engine = FlowEngine::persistent(Some("resume-b".into()));
    engine.load_plan(counting_loop_plan(probe)).unwrap();
    let result = engine.execute(Some(&dir), OutputMode::Quiet).await.unwrap();
    assert!(result.success);
    assert_eq!(common::exec_count(probe), 10);

    common::cleanup(&dir);
}

#[tokio::test]
async fn nested_loop_iteration_keys_are_unique() {
    common::setup();
    let dir = common::test_dir("nested-keys");

    let plan = json!({
        "name": "nested",
        "components": {
            "outer_src": {"type": "source/test_items", "config": {"items": ["A", "B"]}},
            "inner_src": {"type": "source/test_items", "config": {"items": [1, 2]}},
            "nested_probe": {"type": "transform/test_probe", "config": {}}
        },
        "flow": [
            {"source": "outer_src"},
            {"source": "inner_src"},
            {"loop": {"over": "outer_src.items", "as": "outer", "steps": [
                {"loop": {"over": "inner_src.items", "as": "inner", "steps": [
                    {"call": "nested_probe", "inputs": {"o": "{outer}", "i": "{inner}"}}
                ]}}
            ]}}
        ]
    });

    let mut engine = FlowEngine::persistent(Some("nested-1".into()));
    engine.load_plan(plan).unwrap();
    let result = engine.execute(Some(&dir), OutputMode::Quiet).await.unwrap();
    assert!(result.success);

    let state = std::fs::read_to_string(RunJournal::state_path(&dir)).unwrap();
    let keys: Vec<String> = state
        .lines()
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .filter(|e| e["type"] == "iteration_complete")
        .filter_map(|e| e["iteration_key"].as_str().map(String::from))
        .collect();

    assert!(keys.contains(&"outer[0]:A/inner[0]:1".to_string()), "keys: {keys:?}");
    assert!(keys.contains(&"outer[1]:B/inner[0]:1".to_string()));
    // Two outer iterations, each with two inner iterations, all distinct.
    let unique: std::collections::HashSet<&String> = keys.iter().collect();
    assert_eq!(unique.len(), keys.len());
    assert_eq!(keys.len(), 6);

    common::cleanup(&dir);
}

#[tokio::test]
async fn identical_resolved_inputs_served_from_cache() {
    common::setup();
    let dir = common::test_dir("call-cache");
    let probe = "cache_probe";
    common::reset_exec_count(probe);

    // Two call steps whose different source expressions interpolate to the
    // same resolved inputs.
    let plan = json!({
        "name": "cache",
        "components": {
            "s": {"type": "source/test_items", "config": {"items": ["same", "same"]}},
            probe: {"type": "transform/test_probe", "config": {}}
        },
        "flow": [
            {"source": "s"},
            {"call": probe, "inputs": {"v": "{s.items[0]}"}},
            {"call": probe, "inputs": {"v": "{s.items[1]}"}}
        ]
    });

    let mut engine = FlowEngine::persistent(Some("cache-1".into()));
    engine.load_plan(plan.clone()).unwrap();
    let result = engine.execute(Some(&dir), OutputMode::Quiet).await.unwrap();
    assert!(result.success);
    // The second call hit the in-run cache.
    assert_eq!(common::exec_count(probe), 1);

    // And on resume nothing re-executes.
    let mut engine = FlowEngine::persistent(Some("cache-1".into()));
    engine.load_plan(plan).unwrap();
    let result = engine.execute(Some(&dir), OutputMode::Quiet).await.unwrap();
    assert!(result.success);
    assert_eq!(common::exec_count(probe), 1);

    common::cleanup(&dir);
}

#[tokio::test]
async fn run_events_bracket_the_execution() {
    common::setup();
    let dir = common::test_dir("run-events");

    let plan = json!({
        "name": "bracketed",
        "components": {"p": {"type": "transform/test_probe", "config": {}}},
        "flow": [{"call": "p", "inputs": {"x": "1"}}]
    });

    let mut engine = FlowEngine::persistent(Some("events-1".into()));
    engine.load_plan(plan).unwrap();
    engine.execute(Some(&dir), OutputMode::Quiet).await.unwrap();

    let state = std::fs::read_to_string(RunJournal::state_path(&dir)).unwrap();
    let types: Vec<String> = state
        .lines()
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .filter_map(|e| e["type"].as_str().map(String::from))
        .collect();
    assert_eq!(types.first().map(String::as_str), Some("run_start"));
    assert_eq!(types.last().map(String::as_str), Some("run_complete"));
    assert!(types.contains(&"call_start".to_string()));
    assert!(types.contains(&"call_complete".to_string()));

    common::cleanup(&dir);
}

#[tokio::test]
async fn completion_hook_receives_summary() {
    common::setup();
    let dir = common::test_dir("hook");

    let plan = json!({
        "name": "hooked",
        "components": {"p": {"type": "transform/test_probe", "config": {}}},
        "flow": [{"call": "p", "inputs": {"x": "1"}}]
    });

    let seen = std::sync::Arc::new(std::sync::Mutex::new(None));
    let seen_clone = std::sync::Arc::clone(&seen);
    let mut engine =
        FlowEngine::persistent(Some("hook-1".into())).on_complete(Box::new(move |summary| {
            *seen_clone.lock().unwrap() = Some(summary.clone());
            Ok(())
        }));
    engine.load_plan(plan).unwrap();
    engine.execute(Some(&dir), OutputMode::Quiet).await.unwrap();

    let summary = seen.lock().unwrap().clone().expect("hook fired");
    assert_eq!(summary.run_id, "hook-1");
    assert_eq!(summary.plan_name, "hooked");
    assert!(summary.success);
    assert_eq!(summary.stats["resumed"], json!(false));

    common::cleanup(&dir);
}
