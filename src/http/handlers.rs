use super::AppContext;
use crate::error::AppError;
use crate::services::log_reader::read_log_lines;
use crate::services::supervisor::ProcessStatus;
use axum::extract::{Query, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartProcessRequest {
    pub script_path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StartProcessResponse {
    pub success: bool,
    pub pid: u32,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct StopProcessRequest {
    pub pid: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct StopProcessResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ConsoleLogQuery {
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConsoleLogResponse {
    pub lines: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RunCommandRequest {
    pub command: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
}

pub async fn process_status(State(context): State<Arc<AppContext>>) -> Json<ProcessStatus> {
    Json(context.supervisor.status().await)
}

pub async fn start_process(
    State(context): State<Arc<AppContext>>,
    Json(request): Json<StartProcessRequest>,
) -> Result<Json<StartProcessResponse>, AppError> {
    let script_path = request
        .script_path
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or(AppError::MissingField("Script path"))?;

    let pid = context.supervisor.start(Path::new(script_path)).await?;
    Ok(Json(StartProcessResponse {
        success: true,
        pid,
        message: "Process started successfully".to_string(),
    }))
}

pub async fn stop_process(
    State(context): State<Arc<AppContext>>,
    Json(request): Json<StopProcessRequest>,
) -> Result<Json<StopProcessResponse>, AppError> {
    let pid = request.pid.ok_or(AppError::MissingField("PID"))?;

    context.supervisor.stop(pid).await?;
    Ok(Json(StopProcessResponse {
        success: true,
        message: "Process stop signal sent successfully".to_string(),
    }))
}

pub async fn console_log(
    Query(query): Query<ConsoleLogQuery>,
) -> Result<Json<ConsoleLogResponse>, AppError> {
    let path = query
        .path
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or(AppError::MissingField("Log path"))?;

    let lines = read_log_lines(Path::new(path)).await?;
    Ok(Json(ConsoleLogResponse { lines }))
}

pub async fn run_command(
    State(context): State<Arc<AppContext>>,
    Json(request): Json<RunCommandRequest>,
) -> Result<String, AppError> {
    let command = request.command.unwrap_or_default();
    context.runner.run(&command).await
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK",
        timestamp: Utc::now().to_rfc3339(),
    })
}
