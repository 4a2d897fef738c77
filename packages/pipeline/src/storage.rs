//! Durable JSON output.
//!
//! Files are written to a sibling `.tmp` file and renamed into place, so a
//! reader never observes a half-written record.

use std::path::Path;

use serde::Serialize;

use crate::PipelineError;

/// Writes `value` as indented UTF-8 JSON to `path`, replacing any existing
/// file atomically.
///
/// # Errors
///
/// Returns [`PipelineError`] if serialization fails or the file cannot be
/// written or renamed.
pub async fn write_json_atomic<T: Serialize + Sync>(
    path: &Path,
    value: &T,
) -> Result<(), PipelineError> {
    let body = serde_json::to_vec_pretty(value)?;

    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");

    let written = match tokio::fs::write(&staging, &body).await {
        Ok(()) => tokio::fs::rename(&staging, path).await,
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(e.into());
    }

    Ok(())
}

/// Creates `dir` and any missing parents.
///
/// # Errors
///
/// Returns [`PipelineError::Io`] if the directory cannot be created.
pub async fn ensure_dir(dir: &Path) -> Result<(), PipelineError> {
    tokio::fs::create_dir_all(dir).await?;
    Ok(())
}
