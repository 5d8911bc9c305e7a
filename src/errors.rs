//! Typed error hierarchy for the orchestration engine.
//!
//! - `OrchestrationError` covers disk and plan failures surfaced to the controller
//! - `LogParseError` distinguishes the ways an on-disk event log can be rejected
//!
//! Invalid flow transitions are not errors at this level; see
//! [`crate::flow_machine::InvalidTransition`].

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by persistence, plan access and the orchestrator driver.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// The plan could not be loaded. Fatal for a resume attempt: there is no
    /// step to fall back to.
    #[error("Plan at {path} is unreadable: {reason}")]
    PlanUnreadable { path: PathBuf, reason: String },

    #[error("Failed to update plan pointer at {path}: {source}")]
    PlanWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write orchestration log at {path}: {source}")]
    LogWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read orchestration log at {path}: {source}")]
    LogRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Orchestration log at {path} is corrupt: {source}")]
    LogCorrupt {
        path: PathBuf,
        #[source]
        source: LogParseError,
    },

    #[error("Transcript {path}: {message}")]
    Transcript { path: PathBuf, message: String },

    #[error("Plan at {path} is already being orchestrated by another process")]
    Locked { path: PathBuf },

    #[error("Invalid configuration at {path}: {message}")]
    Config { path: PathBuf, message: String },
}

/// Structural validation failures for a serialized event log.
///
/// Callers match on this to choose between discarding the log and aborting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogParseError {
    #[error("log is not a valid JSON document: {0}")]
    Syntax(String),

    #[error("unsupported log version {found} (expected 1)")]
    UnsupportedVersion { found: String },

    #[error("activeStep must be a non-empty string")]
    InvalidActiveStep,

    #[error("entries must be a sequence")]
    EntriesNotSequence,

    #[error("currentState {found} is not a valid flow state")]
    InvalidState { found: String },

    #[error("log structure is malformed: {0}")]
    Malformed(String),
}
