//! flowrun-core — the dataflow plan execution engine.
//!
//! Plans are JSON documents wiring typed components (sources, transforms,
//! sinks) into a directed execution with loops, conditionals, and
//! hierarchical variable scoping. This crate holds the engine, the
//! component contract, the execution context, static plan validation, the
//! composite mechanism, and the event-sourced persistence layer that
//! enables crash-resume.

pub mod component;
pub mod composite;
pub mod context;
pub mod engine;
pub mod errors;
pub mod persist;
pub mod plan;
pub mod registry;
pub mod trace;
pub mod validation;

pub use component::{
    check_inputs, Category, Component, ComponentBase, ComponentManifest, ComponentType,
    ConfigSpec, InputSpec, OutputSpec, ValidationResult, ValueMap,
};
pub use composite::{
    discover_composites, load_composite_file, register_composite, CompositeComponent,
    CompositeDef,
};
pub use context::{display_value, ExecutionContext, OutputMode};
pub use engine::{ExecStats, ExecutionResult, FlowEngine};
pub use errors::{Error, ErrorAction, ErrorProtocol, ErrorRecord, RecoveryAction, Result};
pub use persist::{call_fingerprint, canonical_json, RunJournal, RunState, RunSummary};
pub use plan::{ComponentDef, Plan, PlanInputSpec, PlanSource, Step};
pub use registry::ComponentRegistry;
pub use trace::{ExecutionTrace, ExecutionTracer, TraceLevel};
pub use validation::{validate_plan, PlanValidator, ValidationReport};
