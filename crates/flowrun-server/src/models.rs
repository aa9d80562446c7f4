//! Request and response bodies for the HTTP surface.

use std::collections::BTreeMap;

use flowrun_core::plan::PlanInputSpec;
use flowrun_core::ValueMap;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize)]
pub struct FlowInfo {
    pub name: String,
    pub description: String,
    pub inputs: BTreeMap<String, PlanInputSpec>,
    /// Whether any sink routes data to the "return" destination, i.e.
    /// whether a synchronous execute has something to hand back.
    pub has_returns: bool,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub inputs: ValueMap,
    #[serde(default)]
    pub run_id: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct FlowValidationResult {
    pub valid: bool,
    pub missing_inputs: Vec<String>,
    pub component_count: usize,
    pub step_count: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct AcceptedResponse {
    pub accepted: bool,
    pub flow: String,
}
