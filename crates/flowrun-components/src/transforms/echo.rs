//! Echo transform — identity passthrough.

use flowrun_core::component::{
    Category, Component, ComponentBase, ComponentManifest, ComponentType, ValidationResult,
    ValueMap,
};
use flowrun_core::context::ExecutionContext;
use flowrun_core::errors::Result;

/// Pass inputs through unchanged. A wiring probe: useful when building or
/// debugging a plan to see what a reference resolves to at a given point.
pub struct EchoTransform {
    base: ComponentBase,
}

impl ComponentType for EchoTransform {
    fn describe() -> ComponentManifest {
        ComponentManifest::new(
            "transform/echo",
            "Pass inputs through unchanged",
            Category::Transform,
        )
    }

    fn build(instance_id: &str, config: ValueMap) -> Result<Self> {
        Ok(Self {
            base: ComponentBase::new(instance_id, config, Self::describe())?,
        })
    }
}

#[async_trait::async_trait]
impl Component for EchoTransform {
    fn instance_id(&self) -> &str {
        &self.base.instance_id
    }

    fn manifest(&self) -> ComponentManifest {
        self.base.manifest()
    }

    fn validate(&self, _inputs: &ValueMap) -> ValidationResult {
        ValidationResult::ok()
    }

    async fn execute(&mut self, inputs: ValueMap, _context: &ExecutionContext) -> Result<ValueMap> {
        Ok(inputs)
    }
}
