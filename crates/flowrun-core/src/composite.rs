//! Composite components — a nested plan packaged as a single component.
//!
//! A composite definition is JSON: a declared input/output/config surface
//! plus an `internal` plan (components, flow, output mappings). Executing a
//! composite spins a fresh sub-engine over the internal plan, so the outer
//! engine's validator sees one call step and the internals stay hidden.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::component::{
    check_inputs, Category, Component, ComponentBase, ComponentManifest, ConfigSpec, InputSpec,
    OutputSpec, ValidationResult, ValueMap,
};
use crate::context::ExecutionContext;
use crate::engine::FlowEngine;
use crate::errors::{Error, Result};
use crate::plan::{ComponentDef, Plan};
use crate::registry::ComponentRegistry;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CompositeInternal {
    #[serde(default)]
    pub components: BTreeMap<String, ComponentDef>,
    #[serde(default)]
    pub flow: Vec<crate::plan::Step>,
    /// output name -> `{internal_expr}` evaluated against the inner context.
    #[serde(default)]
    pub output_mappings: BTreeMap<String, String>,
}

/// A composite component definition as stored on disk.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompositeDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, InputSpec>,
    #[serde(default)]
    pub outputs: BTreeMap<String, OutputSpec>,
    #[serde(default)]
    pub config: BTreeMap<String, ConfigSpec>,
    #[serde(default)]
    pub internal: CompositeInternal,
}

impl CompositeDef {
    /// Project the declared surface as a component manifest.
    pub fn manifest(&self) -> ComponentManifest {
        ComponentManifest {
            type_name: format!("composite/{}", self.name),
            description: self.description.clone(),
            category: Category::Transform,
            config: self.config.clone(),
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
        }
    }
}

pub struct CompositeComponent {
    base: ComponentBase,
    def: Arc<CompositeDef>,
}

impl CompositeComponent {
    pub fn new(instance_id: &str, config: ValueMap, def: Arc<CompositeDef>) -> Result<Self> {
        let base = ComponentBase::new(instance_id, config, def.manifest())?;
        Ok(Self { base, def })
    }

    /// The internal plan with composite config forwarded into internal
    /// components that already declare the same config key.
    fn build_internal_plan(&self) -> Plan {
        let mut components = self.def.internal.components.clone();
        for comp_def in components.values_mut() {
            for (key, value) in &self.base.config {
                if key.starts_with('_') {
                    continue;
                }
                if comp_def.config.contains_key(key) {
                    comp_def.config.insert(key.clone(), value.clone());
                }
            }
        }
        Plan {
            name: Some(format!("{}_internal", self.base.instance_id)),
            components,
            flow: self.def.internal.flow.clone(),
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl Component for CompositeComponent {
    fn instance_id(&self) -> &str {
        &self.base.instance_id
    }

    fn manifest(&self) -> ComponentManifest {
        self.def.manifest()
    }

    fn validate(&self, inputs: &ValueMap) -> ValidationResult {
        check_inputs(&self.def.manifest(), inputs)
    }

    async fn execute(&mut self, inputs: ValueMap, context: &ExecutionContext) -> Result<ValueMap> {
        let mut engine = FlowEngine::new();
        engine.load_plan(self.build_internal_plan())?;
        // The composite's inputs become the inner engine's plan inputs.
        engine.set_inputs(inputs)?;

        let result = engine.execute(None, context.output_mode()).await?;
        if !result.success {
            let messages: Vec<String> = result
                .errors
                .iter()
                .filter(|e| !e.recovered)
                .map(|e| e.message.clone())
                .collect();
            return Err(Error::component(
                &self.base.instance_id,
                format!("Composite execution failed: {messages:?}"),
            ));
        }

        let inner_context = engine.context().ok_or_else(|| {
            Error::component(&self.base.instance_id, "composite context missing")
        })?;
        let mut outputs = ValueMap::new();
        for (output_name, mapping) in &self.def.internal.output_mappings {
            let value = inner_context.resolve_template(mapping);
            outputs.insert(output_name.clone(), value);
        }
        Ok(outputs)
    }
}

/// Load a composite definition from a JSON file.
pub fn load_composite_file(path: &Path) -> Result<CompositeDef> {
    let text = std::fs::read_to_string(path)?;
    let def: CompositeDef = serde_json::from_str(&text)?;
    if def.name.is_empty() {
        return Err(Error::Config(format!(
            "Composite definition missing 'name': {}",
            path.display()
        )));
    }
    Ok(def)
}

/// Register a composite under `composite/<name>`.
pub fn register_composite(registry: &ComponentRegistry, def: CompositeDef) -> Result<()> {
    let type_name = format!("composite/{}", def.name);
    let manifest = def.manifest();
    let def = Arc::new(def);
    registry.register_factory(
        &type_name,
        manifest,
        Arc::new(move |instance_id, config| {
            Ok(Box::new(CompositeComponent::new(
                instance_id,
                config,
                Arc::clone(&def),
            )?) as Box<dyn Component>)
        }),
    )
}

/// Scan a directory tree for `*.json` composite definitions and register
/// them all. Individual failures are logged and skipped, never fatal.
/// Returns the names registered.
pub fn discover_composites(registry: &ComponentRegistry, directory: &Path) -> Vec<String> {
    let mut loaded = Vec::new();
    if !directory.exists() {
        return loaded;
    }
    for entry in walkdir::WalkDir::new(directory)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match load_composite_file(path) {
            Ok(def) => {
                let name = def.name.clone();
                match register_composite(registry, def) {
                    Ok(()) => loaded.push(name),
                    Err(err) => {
                        tracing::warn!("Failed to register composite {}: {err}", path.display())
                    }
                }
            }
            Err(err) => tracing::warn!("Failed to load composite {}: {err}", path.display()),
        }
    }
    loaded.sort();
    loaded
}
