//! Execution context with hierarchical variable scoping.
//!
//! Scopes form a parent-linked chain: loops create child frames, the root
//! frame persists for the whole execution. Component outputs, accumulated
//! returns, and sink tracking live on the root frame so they survive
//! loop-scope teardown.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::component::ValueMap;
use crate::errors::{Error, Result};

/// Controls what components print to the console.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Nothing (tests, scripts, piped output).
    Quiet,
    /// Component-chosen output only.
    #[default]
    Normal,
    /// Everything plus internal details.
    Debug,
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([^}]+)\}").expect("placeholder pattern"))
}

fn full_placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\{([^}]+)\}$").expect("full placeholder pattern"))
}

/// Whether a string still contains `{expr}` placeholders after resolution.
pub fn has_unresolved_refs(s: &str) -> bool {
    placeholder_re().is_match(s)
}

/// Stringify a value for template interpolation and iteration keys:
/// strings render bare, everything else as compact JSON.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, PartialEq)]
enum PathSeg {
    Field(String),
    Index(usize),
}

/// Parse a reference expression: `segment ('.' segment | '[' INT ']')*`.
fn parse_path(expr: &str) -> Option<Vec<PathSeg>> {
    let mut segs = Vec::new();
    let mut rest = expr;
    loop {
        if let Some(after) = rest.strip_prefix('[') {
            let close = after.find(']')?;
            segs.push(PathSeg::Index(after[..close].parse().ok()?));
            rest = &after[close + 1..];
        } else {
            let end = rest.find(['.', '[']).unwrap_or(rest.len());
            if end == 0 {
                return None;
            }
            segs.push(PathSeg::Field(rest[..end].to_string()));
            rest = &rest[end..];
        }
        if rest.is_empty() {
            break;
        }
        if let Some(after_dot) = rest.strip_prefix('.') {
            if after_dot.is_empty() {
                return None;
            }
            rest = after_dot;
        }
    }
    Some(segs)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().expect("context lock poisoned")
}

pub struct ExecutionContext {
    parent: Option<Arc<ExecutionContext>>,
    variables: Mutex<HashMap<String, Value>>,
    component_outputs: Mutex<HashMap<String, ValueMap>>,
    returns: Mutex<ValueMap>,
    sink_ids: Mutex<HashSet<String>>,
    finalized_sinks: Mutex<HashSet<String>>,
    warned_sinks: Mutex<HashSet<String>>,
    output_dir: Option<PathBuf>,
    output_mode: Option<OutputMode>,
    settings: ValueMap,
}

impl ExecutionContext {
    /// Create the root frame for an execution.
    pub fn root(
        variables: HashMap<String, Value>,
        settings: ValueMap,
        output_dir: Option<PathBuf>,
        output_mode: OutputMode,
    ) -> Arc<Self> {
        Arc::new(Self {
            parent: None,
            variables: Mutex::new(variables),
            component_outputs: Mutex::new(HashMap::new()),
            returns: Mutex::new(ValueMap::new()),
            sink_ids: Mutex::new(HashSet::new()),
            finalized_sinks: Mutex::new(HashSet::new()),
            warned_sinks: Mutex::new(HashSet::new()),
            output_dir,
            output_mode: Some(output_mode),
            settings,
        })
    }

    /// Create a child frame with additional variables (loop entry).
    pub fn child(self: &Arc<Self>, variables: HashMap<String, Value>) -> Arc<Self> {
        Arc::new(Self {
            parent: Some(Arc::clone(self)),
            variables: Mutex::new(variables),
            component_outputs: Mutex::new(HashMap::new()),
            returns: Mutex::new(ValueMap::new()),
            sink_ids: Mutex::new(HashSet::new()),
            finalized_sinks: Mutex::new(HashSet::new()),
            warned_sinks: Mutex::new(HashSet::new()),
            output_dir: None,
            output_mode: None,
            settings: ValueMap::new(),
        })
    }

    pub fn output_mode(&self) -> OutputMode {
        match (self.output_mode, &self.parent) {
            (Some(mode), _) => mode,
            (None, Some(parent)) => parent.output_mode(),
            (None, None) => OutputMode::Normal,
        }
    }

    pub fn output_dir(&self) -> Option<PathBuf> {
        match (&self.output_dir, &self.parent) {
            (Some(dir), _) => Some(dir.clone()),
            (None, Some(parent)) => parent.output_dir(),
            (None, None) => None,
        }
    }

    pub fn settings(&self) -> ValueMap {
        if !self.settings.is_empty() {
            return self.settings.clone();
        }
        match &self.parent {
            Some(parent) => parent.settings(),
            None => ValueMap::new(),
        }
    }

    pub fn setting(&self, key: &str) -> Option<Value> {
        self.settings().get(key).cloned()
    }

    /// Set a variable in this frame.
    pub fn set(&self, name: &str, value: Value) {
        lock(&self.variables).insert(name.to_string(), value);
    }

    /// Resolve a reference expression against this frame, its component
    /// outputs, and its ancestors. Supports dotted fields and `[N]` indexing.
    /// A missing intermediate or a null value resolves to None.
    pub fn get(&self, expr: &str) -> Option<Value> {
        let segs = parse_path(expr)?;

        if let [PathSeg::Field(head), PathSeg::Field(field), ..] = segs.as_slice() {
            if field == "items" && self.is_sink(head) && !self.is_sink_finalized(head) {
                self.warn_unfinalized_once(head);
            }
        }

        let mut value = match segs.first()? {
            PathSeg::Field(head) => self.lookup_head(head)?,
            PathSeg::Index(_) => return None,
        };
        for seg in &segs[1..] {
            value = match (seg, &value) {
                (PathSeg::Field(field), Value::Object(map)) => map.get(field)?.clone(),
                (PathSeg::Index(i), Value::Array(items)) => items.get(*i)?.clone(),
                _ => return None,
            };
        }
        if value.is_null() {
            None
        } else {
            Some(value)
        }
    }

    fn lookup_head(&self, name: &str) -> Option<Value> {
        if let Some(v) = lock(&self.variables).get(name) {
            return Some(v.clone());
        }
        if let Some(outputs) = lock(&self.component_outputs).get(name) {
            return Some(Value::Object(outputs.clone()));
        }
        self.parent.as_ref().and_then(|p| p.lookup_head(name))
    }

    fn warn_unfinalized_once(&self, sink_id: &str) {
        if let Some(parent) = &self.parent {
            return parent.warn_unfinalized_once(sink_id);
        }
        if lock(&self.warned_sinks).insert(sink_id.to_string()) {
            tracing::warn!(
                "Accessing '{sink_id}.items' before sink finalization. \
                 Add {{\"sink\": \"{sink_id}\"}} to flow before using .items"
            );
        }
    }

    /// Store outputs from a component execution under its instance id.
    pub fn set_component_output(&self, component_id: &str, outputs: ValueMap) {
        lock(&self.component_outputs).insert(component_id.to_string(), outputs);
    }

    /// Get a component's cached outputs (or one named output), walking up.
    pub fn component_output(&self, component_id: &str, output_name: Option<&str>) -> Option<Value> {
        if let Some(outputs) = lock(&self.component_outputs).get(component_id) {
            return match output_name {
                None => Some(Value::Object(outputs.clone())),
                Some(name) => outputs.get(name).cloned(),
            };
        }
        self.parent
            .as_ref()
            .and_then(|p| p.component_output(component_id, output_name))
    }

    /// Register a component as a sink (needs finalization before `.items`).
    pub fn register_sink(&self, sink_id: &str) {
        lock(&self.sink_ids).insert(sink_id.to_string());
    }

    pub fn is_sink(&self, component_id: &str) -> bool {
        if lock(&self.sink_ids).contains(component_id) {
            return true;
        }
        self.parent
            .as_ref()
            .map(|p| p.is_sink(component_id))
            .unwrap_or(false)
    }

    /// Mark a sink as finalized (safe to read `.items`).
    pub fn mark_sink_finalized(&self, sink_id: &str) {
        lock(&self.finalized_sinks).insert(sink_id.to_string());
        if let Some(parent) = &self.parent {
            parent.mark_sink_finalized(sink_id);
        }
    }

    pub fn is_sink_finalized(&self, sink_id: &str) -> bool {
        if lock(&self.finalized_sinks).contains(sink_id) {
            return true;
        }
        self.parent
            .as_ref()
            .map(|p| p.is_sink_finalized(sink_id))
            .unwrap_or(false)
    }

    /// Resolve a value, performing `{expr}` interpolation in strings and
    /// recursing through lists and maps. Other values pass through verbatim.
    pub fn resolve(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => self.resolve_template(s),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.resolve(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Resolve a string template. A full-string single placeholder returns
    /// the raw value (preserving its type); mixed content stringifies each
    /// resolvable placeholder and leaves unresolved ones literal.
    pub fn resolve_template(&self, template: &str) -> Value {
        if let Some(caps) = full_placeholder_re().captures(template) {
            return match self.get(&caps[1]) {
                Some(value) => value,
                None => Value::String(template.to_string()),
            };
        }
        let replaced = placeholder_re().replace_all(template, |caps: &regex::Captures<'_>| {
            match self.get(&caps[1]) {
                Some(value) => display_value(&value),
                None => caps[0].to_string(),
            }
        });
        Value::String(replaced.into_owned())
    }

    /// Resolve every value of a step's `inputs` map.
    pub fn resolve_inputs(&self, inputs_spec: &ValueMap) -> ValueMap {
        inputs_spec
            .iter()
            .map(|(name, value)| (name.clone(), self.resolve(value)))
            .collect()
    }

    /// All variables visible from this frame, plus flattened component
    /// outputs, for debugging and error context.
    pub fn all_variables(&self) -> HashMap<String, Value> {
        let mut result = match &self.parent {
            Some(parent) => parent.all_variables(),
            None => HashMap::new(),
        };
        for (name, value) in lock(&self.variables).iter() {
            result.insert(name.clone(), value.clone());
        }
        for (component_id, outputs) in lock(&self.component_outputs).iter() {
            for (output, value) in outputs {
                result.insert(format!("{component_id}.{output}"), value.clone());
            }
        }
        result
    }

    // === Destination writers ===

    /// Write data to a destination: "return" accumulates in the root frame's
    /// return space, "file" writes JSON (relative paths join `output_dir`),
    /// "console" prints JSON in NORMAL and DEBUG modes.
    pub fn write(&self, data: &ValueMap, to: &str, path: Option<&str>) -> Result<()> {
        match to {
            "return" => {
                self.write_return(data);
                Ok(())
            }
            "file" => {
                let path = path.ok_or_else(|| {
                    Error::execution("File destination requires a 'path' argument")
                })?;
                self.write_file(data, Path::new(path))
            }
            "console" => {
                self.write_console(data);
                Ok(())
            }
            other => Err(Error::execution(format!("Unknown destination: '{other}'"))),
        }
    }

    fn write_return(&self, data: &ValueMap) {
        match &self.parent {
            Some(parent) => parent.write_return(data),
            None => {
                let mut returns = lock(&self.returns);
                for (key, value) in data {
                    returns.insert(key.clone(), value.clone());
                }
            }
        }
    }

    fn write_file(&self, data: &ValueMap, path: &Path) -> Result<()> {
        let full_path = match self.output_dir() {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        };
        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(&full_path)?;
        serde_json::to_writer_pretty(file, &Value::Object(data.clone()))?;
        Ok(())
    }

    fn write_console(&self, data: &ValueMap) {
        if self.output_mode() >= OutputMode::Normal {
            match serde_json::to_string_pretty(&Value::Object(data.clone())) {
                Ok(text) => println!("{text}"),
                Err(err) => tracing::warn!("console destination serialization failed: {err}"),
            }
        }
    }

    /// Accumulated return data (from the root frame).
    pub fn returns(&self) -> ValueMap {
        match &self.parent {
            Some(parent) => parent.returns(),
            None => lock(&self.returns).clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_path_segments() {
        assert_eq!(
            parse_path("results[0].field"),
            Some(vec![
                PathSeg::Field("results".into()),
                PathSeg::Index(0),
                PathSeg::Field("field".into()),
            ])
        );
        assert_eq!(parse_path("plain"), Some(vec![PathSeg::Field("plain".into())]));
        assert!(parse_path("a..b").is_none());
        assert!(parse_path("a[x]").is_none());
        assert!(parse_path("a.").is_none());
    }

    #[test]
    fn display_value_strings_render_bare() {
        assert_eq!(display_value(&Value::String("x".into())), "x");
        assert_eq!(display_value(&serde_json::json!(5)), "5");
        assert_eq!(display_value(&serde_json::json!([1, 2])), "[1,2]");
    }
}
