use crate::errors::OrchestrationError;
use crate::flow_machine::Role;
use crate::orchestration_paths;
use crate::plan::write_atomic;
use chrono::Utc;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "tool".to_string()
    } else {
        cleaned
    }
}

/// Returns `<planDir>/.orchestration/transcripts/<agent>_<tool>_<unixMillis>.json`.
///
/// The timestamp is bumped past any file that already exists, so two calls in
/// the same millisecond get distinct paths.
pub fn create_transcript_path(plan_path: &Path, agent: Role, tool_name: &str) -> PathBuf {
    let dir = orchestration_paths::transcripts_dir(plan_path);
    let tool = sanitize(tool_name);
    let mut millis = Utc::now().timestamp_millis();
    loop {
        let candidate = dir.join(format!("{}_{}_{}.json", agent, tool, millis));
        if !candidate.exists() {
            return candidate;
        }
        millis += 1;
    }
}

pub fn save_transcript(path: &Path, payload: &Value) -> Result<(), OrchestrationError> {
    let content = serde_json::to_string_pretty(payload).map_err(|e| transcript_error(path, e))?;
    write_atomic(path, &content).map_err(|e| transcript_error(path, e))?;
    tracing::debug!(transcript = %path.display(), bytes = content.len(), "Saved transcript");
    Ok(())
}

pub fn load_transcript(path: &Path) -> Result<Value, OrchestrationError> {
    let content = fs::read_to_string(path).map_err(|e| transcript_error(path, e))?;
    serde_json::from_str(&content).map_err(|e| transcript_error(path, e))
}

fn transcript_error(path: &Path, err: impl std::fmt::Display) -> OrchestrationError {
    OrchestrationError::Transcript {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
