//! Component registry: type strings to factories.
//!
//! Plans reference components by type string (e.g. "source/text_list"); the
//! registry instantiates the matching implementation. The process-wide
//! instance is written only at driver startup and read concurrently during
//! execution.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::component::{Component, ComponentManifest, ComponentType, ValueMap};
use crate::errors::{Error, Result};

type BuildFn = Arc<dyn Fn(&str, ValueMap) -> Result<Box<dyn Component>> + Send + Sync>;

struct RegistryEntry {
    manifest: ComponentManifest,
    build: BuildFn,
}

#[derive(Default)]
pub struct ComponentRegistry {
    entries: RwLock<HashMap<String, RegistryEntry>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry instance.
    pub fn global() -> &'static ComponentRegistry {
        static INSTANCE: OnceLock<ComponentRegistry> = OnceLock::new();
        INSTANCE.get_or_init(ComponentRegistry::new)
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, RegistryEntry>> {
        self.entries.read().expect("registry lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, RegistryEntry>> {
        self.entries.write().expect("registry lock poisoned")
    }

    /// Register a statically-describable component type. Fails on duplicates.
    pub fn register<T: ComponentType>(&self, type_name: &str) -> Result<()> {
        self.register_factory(
            type_name,
            T::describe(),
            Arc::new(|instance_id, config| {
                Ok(Box::new(T::build(instance_id, config)?) as Box<dyn Component>)
            }),
        )
    }

    /// Register with an explicit manifest and build closure (composites).
    pub fn register_factory(
        &self,
        type_name: &str,
        manifest: ComponentManifest,
        build: BuildFn,
    ) -> Result<()> {
        let mut entries = self.write();
        if entries.contains_key(type_name) {
            return Err(Error::Config(format!(
                "Component type already registered: {type_name}"
            )));
        }
        entries.insert(type_name.to_string(), RegistryEntry { manifest, build });
        Ok(())
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.read().contains_key(type_name)
    }

    /// Create a component instance. Fails if the type is unknown.
    pub fn create(
        &self,
        type_name: &str,
        instance_id: &str,
        config: ValueMap,
    ) -> Result<Box<dyn Component>> {
        let build = {
            let entries = self.read();
            let entry = entries.get(type_name).ok_or_else(|| {
                Error::Config(format!("Unknown component type: {type_name}"))
            })?;
            Arc::clone(&entry.build)
        };
        build(instance_id, config)
    }

    pub fn list_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.read().keys().cloned().collect();
        types.sort();
        types
    }

    /// Types in a category ("source", "transform", "sink", "composite").
    pub fn list_by_category(&self, category: &str) -> Vec<String> {
        let prefix = format!("{category}/");
        let mut types: Vec<String> = self
            .read()
            .keys()
            .filter(|t| t.starts_with(&prefix))
            .cloned()
            .collect();
        types.sort();
        types
    }

    pub fn manifest(&self, type_name: &str) -> Option<ComponentManifest> {
        self.read().get(type_name).map(|e| e.manifest.clone())
    }

    /// Render registered manifests as markdown, grouped by category prefix.
    pub fn generate_docs(&self, category: Option<&str>) -> String {
        let types = match category {
            Some(cat) => self.list_by_category(cat),
            None => self.list_types(),
        };

        let mut by_category: HashMap<String, Vec<String>> = HashMap::new();
        for type_name in types {
            let cat = type_name
                .split('/')
                .next()
                .unwrap_or("other")
                .to_string();
            by_category.entry(cat).or_default().push(type_name);
        }
        let mut categories: Vec<&String> = by_category.keys().collect();
        categories.sort();

        let mut lines = Vec::new();
        for cat in categories {
            lines.push(format!("## {}s\n", capitalize(cat)));
            for type_name in &by_category[cat] {
                let Some(manifest) = self.manifest(type_name) else {
                    continue;
                };
                lines.push(format!("### `{type_name}`"));
                lines.push(format!("{}\n", manifest.description));

                if !manifest.config.is_empty() {
                    lines.push("**Config:**".into());
                    for (name, spec) in &manifest.config {
                        let req = if spec.required { " (required)" } else { "" };
                        let default = spec
                            .default
                            .as_ref()
                            .map(|d| format!(" = `{d}`"))
                            .unwrap_or_default();
                        lines.push(format!(
                            "- `{name}`: {}{req}{default} - {}",
                            spec.value_type, spec.description
                        ));
                    }
                    lines.push(String::new());
                }

                if !manifest.inputs.is_empty() {
                    lines.push("**Inputs:**".into());
                    for (name, spec) in &manifest.inputs {
                        let req = if spec.required { " (required)" } else { "" };
                        lines.push(format!(
                            "- `{name}`: {}{req} - {}",
                            spec.value_type, spec.description
                        ));
                    }
                    lines.push(String::new());
                }

                if !manifest.outputs.is_empty() {
                    lines.push("**Outputs:**".into());
                    for (name, spec) in &manifest.outputs {
                        lines.push(format!(
                            "- `{name}`: {} - {}",
                            spec.value_type, spec.description
                        ));
                    }
                    lines.push(String::new());
                }

                lines.push("---\n".into());
            }
        }
        lines.join("\n")
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
