//! flowrun-server — HTTP driver for the flow engine.
//!
//! One of several drivers: loads plans from a flows directory, supplies
//! user inputs, and invokes the engine. Flows with a "return" destination
//! execute synchronously; everything else is scheduled in the background.

pub mod models;
pub mod routes;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub struct AppState {
    pub flows_dir: PathBuf,
    pub started_at: Instant,
}

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub flows_dir: PathBuf,
    pub composites_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 9847,
            flows_dir: PathBuf::from("flows"),
            composites_dir: None,
        }
    }
}

pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health_handler))
        .route("/flows", get(routes::list_flows_handler))
        .route("/flows/:name", get(routes::get_flow_handler))
        .route("/flows/:name/validate", post(routes::validate_flow_handler))
        .route("/flows/:name/execute", post(routes::execute_flow_handler))
        .route("/components", get(routes::list_components_handler))
        .route("/components/:category", get(routes::list_category_handler))
        .route(
            "/components/:category/:name/schema",
            get(routes::component_schema_handler),
        )
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    flowrun_components::ensure_builtins();
    if let Some(composites_dir) = &config.composites_dir {
        let loaded = flowrun_core::discover_composites(
            flowrun_core::ComponentRegistry::global(),
            composites_dir,
        );
        if !loaded.is_empty() {
            info!("Registered composites: {loaded:?}");
        }
    }

    let state = Arc::new(AppState {
        flows_dir: config.flows_dir.clone(),
        started_at: Instant::now(),
    });
    let app = create_app(state);

    let bind_addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Flow engine service v{} starting", env!("CARGO_PKG_VERSION"));
    info!("  Listening on: http://{bind_addr}");
    info!("  Flows dir: {}", config.flows_dir.display());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
