use crate::error::AppError;
use std::path::Path;
use tracing::error;

/// Reads a console log file and returns its non-empty lines, oldest first.
pub async fn read_log_lines(path: &Path) -> Result<Vec<String>, AppError> {
    if !path.exists() {
        return Err(AppError::LogNotFound);
    }

    let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
        error!(path = %path.display(), error = %e, "Error reading console log");
        AppError::LogReadError
    })?;

    Ok(contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect())
}
