//! Route handlers for the flow engine HTTP service.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use flowrun_core::plan::Step;
use flowrun_core::{FlowEngine, OutputMode, Plan};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::models::{AcceptedResponse, ExecuteRequest, FlowInfo, FlowValidationResult};
use crate::AppState;

type HandlerError = (StatusCode, Json<Value>);

fn not_found(detail: String) -> HandlerError {
    (StatusCode::NOT_FOUND, Json(json!({ "detail": detail })))
}

fn bad_request(detail: String) -> HandlerError {
    (StatusCode::BAD_REQUEST, Json(json!({ "detail": detail })))
}

fn internal_error(detail: String) -> HandlerError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "detail": detail })),
    )
}

/// All parseable flow files in the flows directory, sorted by file name.
/// Malformed files are skipped.
pub fn available_flows(flows_dir: &Path) -> Vec<(PathBuf, Plan)> {
    let Ok(entries) = std::fs::read_dir(flows_dir) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    paths.sort();

    paths
        .into_iter()
        .filter_map(|path| Plan::from_file(&path).ok().map(|plan| (path, plan)))
        .collect()
}

fn load_flow(flows_dir: &Path, name: &str) -> Result<(PathBuf, Plan), HandlerError> {
    available_flows(flows_dir)
        .into_iter()
        .find(|(path, plan)| {
            plan.name.as_deref() == Some(name)
                || path.file_stem().and_then(|s| s.to_str()) == Some(name)
        })
        .ok_or_else(|| not_found(format!("Flow '{name}' not found")))
}

/// A flow has returns when any sink routes to the "return" destination.
/// A collector sink with no `destinations` key defaults to return; every
/// other sink type defaults to file.
pub fn has_returns(plan: &Plan) -> bool {
    plan.components.values().any(|comp_def| {
        let Some(type_name) = &comp_def.type_name else {
            return false;
        };
        if !type_name.starts_with("sink/") {
            return false;
        }
        match comp_def.config.get("destinations") {
            Some(Value::Array(destinations)) => {
                destinations.iter().any(|d| d.as_str() == Some("return"))
            }
            _ => type_name == "sink/collector",
        }
    })
}

pub fn count_steps(steps: &[Step]) -> usize {
    steps
        .iter()
        .map(|step| match step {
            Step::Loop { spec } => 1 + count_steps(&spec.steps),
            Step::Conditional { spec } => {
                1 + count_steps(&spec.then) + count_steps(&spec.otherwise)
            }
            _ => 1,
        })
        .sum()
}

fn flow_info(plan: &Plan, path: &Path) -> FlowInfo {
    let name = plan
        .name
        .clone()
        .or_else(|| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .map(String::from)
        })
        .unwrap_or_default();
    FlowInfo {
        name,
        description: plan
            .description
            .clone()
            .unwrap_or_else(|| "No description".into()),
        inputs: plan.input_schema(),
        has_returns: has_returns(plan),
    }
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "flows": available_flows(&state.flows_dir).len(),
        "components": flowrun_core::ComponentRegistry::global().list_types().len(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

pub async fn list_flows_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let flows: Vec<FlowInfo> = available_flows(&state.flows_dir)
        .iter()
        .map(|(path, plan)| flow_info(plan, path))
        .collect();
    Json(flows)
}

pub async fn get_flow_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(name): AxumPath<String>,
) -> Result<Json<Value>, HandlerError> {
    let (path, _) = load_flow(&state.flows_dir, &name)?;
    let text = std::fs::read_to_string(&path)
        .map_err(|e| internal_error(format!("Failed to read flow: {e}")))?;
    let document: Value = serde_json::from_str(&text)
        .map_err(|e| internal_error(format!("Invalid flow JSON: {e}")))?;
    Ok(Json(document))
}

pub async fn validate_flow_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(name): AxumPath<String>,
    body: Option<Json<ExecuteRequest>>,
) -> Result<Json<FlowValidationResult>, HandlerError> {
    let (_, plan) = load_flow(&state.flows_dir, &name)?;
    let request = body.map(|Json(r)| r).unwrap_or_default();

    let mut engine = FlowEngine::new();
    engine
        .load_plan(plan.clone())
        .map_err(|e| bad_request(e.to_string()))?;
    engine
        .set_inputs(request.inputs)
        .map_err(|e| bad_request(e.to_string()))?;

    let report = engine.validate();
    Ok(Json(FlowValidationResult {
        valid: report.valid,
        missing_inputs: engine
            .missing_inputs()
            .into_iter()
            .map(|(name, _)| name)
            .collect(),
        component_count: plan.components.len(),
        step_count: count_steps(&plan.flow),
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct ExecuteQuery {
    pub wait: Option<bool>,
}

pub async fn execute_flow_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(name): AxumPath<String>,
    Query(query): Query<ExecuteQuery>,
    body: Option<Json<ExecuteRequest>>,
) -> Result<Json<Value>, HandlerError> {
    let (_, plan) = load_flow(&state.flows_dir, &name)?;
    let request = body.map(|Json(r)| r).unwrap_or_default();

    // Synchronous only when the caller wants to wait and the flow actually
    // produces a return payload.
    let wait = query.wait.unwrap_or(true) && has_returns(&plan);

    let mut engine = match &request.run_id {
        Some(run_id) => FlowEngine::persistent(Some(run_id.clone())),
        None => FlowEngine::new(),
    };
    engine
        .load_plan(plan)
        .map_err(|e| bad_request(e.to_string()))?;
    engine
        .set_inputs(request.inputs)
        .map_err(|e| bad_request(e.to_string()))?;

    let missing = engine.missing_inputs();
    if !missing.is_empty() {
        let names: Vec<String> = missing.into_iter().map(|(name, _)| name).collect();
        return Err(bad_request(format!("Missing required inputs: {names:?}")));
    }

    if wait {
        let result = engine
            .execute(None, OutputMode::Quiet)
            .await
            .map_err(|e| internal_error(e.to_string()))?;
        let value = serde_json::to_value(&result)
            .map_err(|e| internal_error(format!("Result serialization failed: {e}")))?;
        Ok(Json(value))
    } else {
        let flow_name = name.clone();
        tokio::spawn(async move {
            match engine.execute(None, OutputMode::Quiet).await {
                Ok(result) => tracing::info!(
                    "background flow '{flow_name}' finished: success={} duration={:.2}s",
                    result.success,
                    result.duration_seconds
                ),
                Err(err) => tracing::error!("background flow '{flow_name}' failed: {err}"),
            }
        });
        let accepted = AcceptedResponse {
            accepted: true,
            flow: name,
        };
        Ok(Json(
            serde_json::to_value(accepted)
                .map_err(|e| internal_error(format!("Response serialization failed: {e}")))?,
        ))
    }
}

pub async fn list_components_handler() -> impl IntoResponse {
    Json(flowrun_core::ComponentRegistry::global().list_types())
}

pub async fn list_category_handler(AxumPath(category): AxumPath<String>) -> impl IntoResponse {
    Json(flowrun_core::ComponentRegistry::global().list_by_category(&category))
}

pub async fn component_schema_handler(
    AxumPath((category, name)): AxumPath<(String, String)>,
) -> Result<Json<Value>, HandlerError> {
    let type_name = format!("{category}/{name}");
    let manifest = flowrun_core::ComponentRegistry::global()
        .manifest(&type_name)
        .ok_or_else(|| not_found(format!("Component '{type_name}' not found")))?;
    serde_json::to_value(&manifest)
        .map(Json)
        .map_err(|e| internal_error(format!("Manifest serialization failed: {e}")))
}
