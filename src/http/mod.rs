pub mod handlers;

use crate::config::Config;
use crate::services::runner::CommandRunner;
use crate::services::supervisor::ProcessSupervisor;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub struct AppContext {
    pub supervisor: ProcessSupervisor,
    pub runner: CommandRunner,
}

impl AppContext {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            supervisor: ProcessSupervisor::new(),
            runner: CommandRunner::new(config),
        }
    }
}

pub fn router(context: Arc<AppContext>) -> Router {
    Router::new()
        .route("/api/process-status", get(handlers::process_status))
        .route("/api/start-process", post(handlers::start_process))
        .route("/api/stop-process", post(handlers::stop_process))
        .route("/api/console-log", get(handlers::console_log))
        .route("/api/run-command", post(handlers::run_command))
        .route("/api/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(context)
}
