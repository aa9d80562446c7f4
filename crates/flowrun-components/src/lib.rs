//! flowrun-components — builtin sources, transforms, and sinks.
//!
//! Each component is a self-contained file implementing the Component
//! trait. To add a component: create the file, implement
//! [`flowrun_core::component::ComponentType`], and register it in
//! `register_builtins` below.

pub mod sinks;
pub mod sources;
pub mod transforms;

use std::sync::Once;

use flowrun_core::errors::Result;
use flowrun_core::registry::ComponentRegistry;

pub use sinks::{collector::CollectorSink, csv_writer::CsvWriterSink, json_writer::JsonWriterSink};
pub use sources::{key_value::KeyValueSource, literal::LiteralSource, text_list::TextListSource};
pub use transforms::{
    compare::CompareTransform, echo::EchoTransform, lookup::LookupTransform,
    template::TemplateTransform,
};

/// Register every builtin under its type string. Fails on duplicates; use
/// [`ensure_builtins`] for call sites that may run more than once.
pub fn register_builtins(registry: &ComponentRegistry) -> Result<()> {
    registry.register::<LiteralSource>("source/literal")?;
    registry.register::<TextListSource>("source/text_list")?;
    registry.register::<KeyValueSource>("source/key_value")?;

    registry.register::<TemplateTransform>("transform/template")?;
    registry.register::<LookupTransform>("transform/lookup")?;
    registry.register::<CompareTransform>("transform/compare")?;
    registry.register::<EchoTransform>("transform/echo")?;

    registry.register::<CollectorSink>("sink/collector")?;
    registry.register::<JsonWriterSink>("sink/json_writer")?;
    registry.register::<CsvWriterSink>("sink/csv_writer")?;
    Ok(())
}

/// Register the builtins into the global registry exactly once per process.
pub fn ensure_builtins() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        if let Err(err) = register_builtins(ComponentRegistry::global()) {
            tracing::warn!("builtin registration failed: {err}");
        }
    });
}
