//! Append-only run journal enabling crash-resume.
//!
//! Every call and loop iteration is logged as one JSON line in
//! `state.jsonl`. On restart the log is replayed to rebuild the set of
//! completed work, which is then skipped. The trailing line may be a partial
//! write from a crash; malformed lines are discarded without corrupting
//! earlier state.

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::component::ValueMap;
use crate::errors::Result;

/// Serialize a value with recursively key-sorted objects and compact
/// separators. Byte-equal encodings for semantically equal values.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let elements: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", elements.join(","))
        }
        other => other.to_string(),
    }
}

/// Stable fingerprint for a component call: SHA-256 over the component id
/// and the canonical JSON of its resolved inputs, truncated to 16 hex chars.
/// Identical post-interpolation inputs hash identically regardless of the
/// source expressions they came from.
pub fn call_fingerprint(component_id: &str, inputs: &ValueMap) -> String {
    let canonical = canonical_json(&Value::Object(inputs.clone()));
    let mut hasher = Sha256::new();
    hasher.update(component_id.as_bytes());
    hasher.update(b":");
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

/// In-memory run state rebuilt from the event log.
#[derive(Debug, Default)]
pub struct RunState {
    pub run_id: String,
    pub plan_name: String,
    pub started_at: String,
    /// Completed calls: fingerprint -> captured outputs.
    pub completed_calls: HashMap<String, ValueMap>,
    /// Completed loop iterations by iteration key.
    pub completed_iterations: HashSet<String>,
    /// Calls started but never completed (crash point); retried on resume.
    pub pending_calls: HashSet<String>,
    pub total_events: u64,
    pub calls_cached: u64,
    pub iterations_cached: u64,
}

/// Summary handed to the run-completion hook.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub plan_name: String,
    pub success: bool,
    pub duration_seconds: f64,
    pub output_dir: String,
    pub stats: Value,
}

/// The append-only event log backing a persistent run.
pub struct RunJournal {
    run_id: String,
    state: RunState,
    file: Option<File>,
    path: Option<PathBuf>,
    resuming: bool,
}

impl RunJournal {
    pub fn new(run_id: Option<String>) -> Self {
        let run_id = run_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()[..8].to_string());
        Self {
            state: RunState {
                run_id: run_id.clone(),
                ..Default::default()
            },
            run_id,
            file: None,
            path: None,
            resuming: false,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn is_resuming(&self) -> bool {
        self.resuming
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn state_path(output_dir: &Path) -> PathBuf {
        output_dir.join("state.jsonl")
    }

    /// Open the journal in `output_dir`, replaying any existing state file.
    /// Returns true when resuming a prior run.
    pub fn open(&mut self, output_dir: &Path) -> Result<bool> {
        std::fs::create_dir_all(output_dir)?;
        let path = Self::state_path(output_dir);

        self.resuming = path.exists() && self.load_existing(&path)? > 0;
        self.file = Some(OpenOptions::new().create(true).append(true).open(&path)?);
        self.path = Some(path);
        Ok(self.resuming)
    }

    /// Stream the state file line by line, skipping malformed lines
    /// (truncation-tolerant). Returns the number of events applied.
    fn load_existing(&mut self, path: &Path) -> Result<u64> {
        self.state = RunState {
            run_id: self.run_id.clone(),
            ..Default::default()
        };

        let reader = BufReader::new(File::open(path)?);
        let mut events_loaded = 0;
        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(line) {
                Ok(event) => {
                    self.apply_event(&event);
                    events_loaded += 1;
                }
                Err(_) => continue,
            }
        }
        self.state.total_events = events_loaded;
        Ok(events_loaded)
    }

    fn apply_event(&mut self, event: &Value) {
        let event_type = event.get("type").and_then(Value::as_str).unwrap_or("");
        match event_type {
            "run_start" => {
                if let Some(name) = event.get("plan_name").and_then(Value::as_str) {
                    self.state.plan_name = name.to_string();
                }
                if let Some(ts) = event.get("timestamp").and_then(Value::as_str) {
                    self.state.started_at = ts.to_string();
                }
            }
            "call_start" => {
                if let Some(hash) = event.get("call_hash").and_then(Value::as_str) {
                    self.state.pending_calls.insert(hash.to_string());
                }
            }
            "call_complete" => {
                if let Some(hash) = event.get("call_hash").and_then(Value::as_str) {
                    let outputs = event
                        .get("outputs")
                        .and_then(Value::as_object)
                        .cloned()
                        .unwrap_or_default();
                    self.state.pending_calls.remove(hash);
                    self.state.completed_calls.insert(hash.to_string(), outputs);
                    self.state.calls_cached += 1;
                }
            }
            "iteration_complete" => {
                if let Some(key) = event.get("iteration_key").and_then(Value::as_str) {
                    self.state.completed_iterations.insert(key.to_string());
                    self.state.iterations_cached += 1;
                }
            }
            // iteration_start marks the crash point only; nothing to rebuild.
            _ => {}
        }
    }

    /// Append one event line and flush it before the operation it describes
    /// is considered durable.
    pub fn log_event(&mut self, event_type: &str, fields: ValueMap) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        let mut event = ValueMap::new();
        event.insert(
            "timestamp".into(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
        event.insert("type".into(), Value::String(event_type.to_string()));
        for (key, value) in fields {
            event.insert(key, value);
        }

        let line = match serde_json::to_string(&Value::Object(event)) {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!("state event serialization failed: {err}");
                return;
            }
        };
        if let Err(err) = writeln!(file, "{line}").and_then(|_| file.flush()) {
            tracing::warn!("state event write failed: {err}");
            return;
        }
        self.state.total_events += 1;
    }

    pub fn completed_call(&self, call_hash: &str) -> Option<&ValueMap> {
        self.state.completed_calls.get(call_hash)
    }

    pub fn record_call_complete(&mut self, call_hash: String, outputs: ValueMap) {
        self.state.completed_calls.insert(call_hash, outputs);
    }

    pub fn iteration_completed(&self, key: &str) -> bool {
        self.state.completed_iterations.contains(key)
    }

    pub fn record_iteration_complete(&mut self, key: String) {
        self.state.completed_iterations.insert(key);
    }
}
