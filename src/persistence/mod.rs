//! Disk side of orchestration: the event log, tool-call transcripts, the
//! single-writer lock and the resume algorithm.
//!
//! The log is always a checkpoint of the flow machine. It is written after
//! every externally observable change and read back only by
//! [`resume_orchestration`].

mod lock;
mod resume;
mod transcript;

pub use lock::OrchestrationLock;
pub use resume::{resume_orchestration, ResumeOutcome};
pub use transcript::{create_transcript_path, load_transcript, save_transcript};

use crate::errors::{LogParseError, OrchestrationError};
use crate::event_log::{parse_log, serialize_log, EventLog};
use crate::flow_machine::FlowMachine;
use crate::orchestration_paths;
use crate::plan::write_atomic;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Writes the log to `<planDir>/.orchestration/orchestration.log.json`.
///
/// Returns the path written. The directory is created on first write. A
/// failed write is reported, never retried.
pub fn save_log(log: &EventLog) -> Result<PathBuf, OrchestrationError> {
    let path = orchestration_paths::log_path(&log.plan_path);
    let content = serialize_log(log).map_err(|e| OrchestrationError::LogWrite {
        path: path.clone(),
        source: io::Error::new(io::ErrorKind::InvalidData, e),
    })?;
    write_atomic(&path, &content).map_err(|source| OrchestrationError::LogWrite {
        path: path.clone(),
        source,
    })?;
    tracing::debug!(
        log = %path.display(),
        entries = log.entries.len(),
        state = %log.current_state,
        "Saved orchestration log"
    );
    Ok(path)
}

/// Reads the log for `plan_path`.
///
/// `Ok(None)` when no log exists. A log that exists but fails validation is
/// reported as [`OrchestrationError::LogCorrupt`].
pub fn load_log(plan_path: &Path) -> Result<Option<EventLog>, OrchestrationError> {
    let path = orchestration_paths::log_path(plan_path);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(OrchestrationError::LogRead { path, source }),
    };

    let parsed = String::from_utf8(bytes)
        .map_err(|e| LogParseError::Syntax(format!("not UTF-8: {}", e)))
        .and_then(|text| parse_log(&text));

    match parsed {
        Ok(log) => Ok(Some(log)),
        Err(source) => Err(OrchestrationError::LogCorrupt { path, source }),
    }
}

/// Mirrors the machine's state, step and counter into the log header.
#[must_use]
pub fn sync_log_state(log: EventLog, machine: &FlowMachine) -> EventLog {
    log.with_flow_state(
        machine.state(),
        machine.active_step(),
        machine.change_request_count(),
    )
}
