//! Append-only audit trail of one orchestration attempt.
//!
//! Every mutator consumes the log and returns the next snapshot; nothing
//! edits a snapshot that someone else still holds. Entries are only ever
//! appended, except for the two patch operations that answer the latest open
//! `ask_user` entry and recover the latest open `error` entry.

mod entry;
mod summary;

pub use entry::{LifecycleEvent, LogEntry, LogEntryKind};
pub use summary::{get_log_summary, LogSummary};

use crate::errors::LogParseError;
use crate::flow_machine::{FlowState, Role, TransitionRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// The only log format version this crate reads or writes.
pub const LOG_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLog {
    pub version: u32,
    pub plan_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub active_step: String,
    pub current_state: FlowState,
    pub change_request_count: u32,
    pub completed: bool,
    pub entries: Vec<LogEntry>,
}

/// Fields of a `tool_call` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallRecord {
    pub agent: Role,
    pub tool_name: String,
    pub success: bool,
    pub summary: Option<String>,
    pub transcript_path: Option<PathBuf>,
    pub blocked_reason: Option<String>,
}

impl ToolCallRecord {
    pub fn new(agent: Role, tool_name: impl Into<String>) -> Self {
        Self {
            agent,
            tool_name: tool_name.into(),
            success: true,
            summary: None,
            transcript_path: None,
            blocked_reason: None,
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_transcript(mut self, path: impl Into<PathBuf>) -> Self {
        self.transcript_path = Some(path.into());
        self
    }

    pub fn blocked(mut self, reason: impl Into<String>) -> Self {
        self.success = false;
        self.blocked_reason = Some(reason.into());
        self
    }
}

impl EventLog {
    /// Starts a fresh log with a `started` lifecycle entry.
    pub fn new(plan_path: impl Into<PathBuf>, active_step: impl Into<String>) -> Self {
        let now = Utc::now();
        let log = Self {
            version: LOG_VERSION,
            plan_path: plan_path.into(),
            started_at: now,
            updated_at: now,
            active_step: active_step.into(),
            current_state: FlowState::CoderActive,
            change_request_count: 0,
            completed: false,
            entries: Vec::new(),
        };
        log.record_lifecycle(LifecycleEvent::Started, None)
    }

    fn touched(mut self) -> Self {
        self.updated_at = Utc::now();
        self
    }

    /// Appends an entry stamped with the current active step.
    #[must_use]
    pub fn append(mut self, kind: LogEntryKind) -> Self {
        self.entries.push(LogEntry::new(self.active_step.clone(), kind));
        self.touched()
    }

    #[must_use]
    pub fn record_transition(self, transition: &TransitionRecord) -> Self {
        self.append(LogEntryKind::StateTransition {
            from: transition.from,
            to: transition.to,
            event: transition.event.clone(),
            reason: transition.reason.clone(),
        })
    }

    #[must_use]
    pub fn record_tool_call(self, record: ToolCallRecord) -> Self {
        self.append(LogEntryKind::ToolCall {
            agent: record.agent,
            tool_name: record.tool_name,
            success: record.success,
            summary: record.summary,
            transcript_path: record.transcript_path,
            blocked_reason: record.blocked_reason,
        })
    }

    #[must_use]
    pub fn record_ask_user(self, requester: Role, message: impl Into<String>) -> Self {
        self.append(LogEntryKind::AskUser {
            requester,
            message: message.into(),
            response: None,
            responded_at: None,
        })
    }

    /// Answers the most recent unanswered `ask_user` entry. A no-op when no
    /// question is open.
    #[must_use]
    pub fn record_user_response(mut self, reply: impl Into<String>) -> Self {
        let open = self.entries.iter_mut().rev().find_map(|entry| match &mut entry.kind {
            LogEntryKind::AskUser {
                response,
                responded_at,
                ..
            } if response.is_none() => Some((response, responded_at)),
            _ => None,
        });

        match open {
            Some((response, responded_at)) => {
                *response = Some(reply.into());
                *responded_at = Some(Utc::now());
                self.touched()
            }
            None => {
                tracing::debug!("No open ask_user entry to answer");
                self
            }
        }
    }

    #[must_use]
    pub fn record_error(self, message: impl Into<String>) -> Self {
        self.append(LogEntryKind::Error {
            message: message.into(),
            recovered: false,
            recovered_at: None,
        })
    }

    /// Marks the most recent unrecovered `error` entry as recovered. A no-op
    /// when every error is already recovered.
    #[must_use]
    pub fn mark_error_recovered(mut self) -> Self {
        let open = self.entries.iter_mut().rev().find_map(|entry| match &mut entry.kind {
            LogEntryKind::Error {
                recovered,
                recovered_at,
                ..
            } if !*recovered => Some((recovered, recovered_at)),
            _ => None,
        });

        match open {
            Some((recovered, recovered_at)) => {
                *recovered = true;
                *recovered_at = Some(Utc::now());
                self.touched()
            }
            None => self,
        }
    }

    /// Records a move of the step pointer and starts a new step cycle.
    #[must_use]
    pub fn record_step_change(
        self,
        to_step: impl Into<String>,
        reason: Option<String>,
    ) -> Self {
        let to_step = to_step.into();
        let from_step = self.active_step.clone();
        let mut log = self.append(LogEntryKind::StepChange {
            from_step,
            to_step: to_step.clone(),
            reason,
        });
        log.active_step = to_step;
        log.change_request_count = 0;
        log
    }

    #[must_use]
    pub fn record_lifecycle(self, event: LifecycleEvent, detail: Option<String>) -> Self {
        self.append(LogEntryKind::Lifecycle { event, detail })
    }

    /// Marks the attempt finished. A completed log is superseded on the next resume.
    #[must_use]
    pub fn mark_completed(mut self) -> Self {
        self.completed = true;
        self.record_lifecycle(LifecycleEvent::Completed, None)
    }

    /// Clears `completed` when work continues past the final approve, so the
    /// next resume picks this attempt up instead of superseding it.
    #[must_use]
    pub fn reopen(mut self, detail: impl Into<String>) -> Self {
        self.completed = false;
        self.record_lifecycle(LifecycleEvent::Resumed, Some(detail.into()))
    }

    /// Mirrors flow fields into the header.
    #[must_use]
    pub fn with_flow_state(mut self, state: FlowState, active_step: &str, change_request_count: u32) -> Self {
        self.current_state = state;
        self.active_step = active_step.to_string();
        self.change_request_count = change_request_count;
        self.touched()
    }

    /// Latest unanswered question, as `(requester, message)`.
    pub fn open_question(&self) -> Option<(Role, &str)> {
        self.entries.iter().rev().find_map(|entry| match &entry.kind {
            LogEntryKind::AskUser {
                requester,
                message,
                response: None,
                ..
            } => Some((*requester, message.as_str())),
            _ => None,
        })
    }

    /// Message of the latest unrecovered error.
    pub fn open_error(&self) -> Option<&str> {
        self.entries.iter().rev().find_map(|entry| match &entry.kind {
            LogEntryKind::Error {
                message,
                recovered: false,
                ..
            } => Some(message.as_str()),
            _ => None,
        })
    }

    /// Reason attached to the latest transition into `state`.
    pub fn last_transition_reason_into(&self, state: FlowState) -> Option<&str> {
        self.entries.iter().rev().find_map(|entry| match &entry.kind {
            LogEntryKind::StateTransition { to, reason, .. } if *to == state => reason.as_deref(),
            _ => None,
        })
    }
}

/// Serializes a log to its on-disk JSON form.
pub fn serialize_log(log: &EventLog) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(log)
}

/// Parses and structurally validates a serialized log.
pub fn parse_log(text: &str) -> Result<EventLog, LogParseError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| LogParseError::Syntax(e.to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| LogParseError::Malformed("top level must be an object".to_string()))?;

    match object.get("version") {
        Some(version) if version.as_u64() == Some(u64::from(LOG_VERSION)) => {}
        Some(version) => {
            return Err(LogParseError::UnsupportedVersion {
                found: version.to_string(),
            })
        }
        None => {
            return Err(LogParseError::UnsupportedVersion {
                found: "missing".to_string(),
            })
        }
    }

    match object.get("activeStep").and_then(Value::as_str) {
        Some(step) if !step.is_empty() => {}
        _ => return Err(LogParseError::InvalidActiveStep),
    }

    if !object.get("entries").is_some_and(Value::is_array) {
        return Err(LogParseError::EntriesNotSequence);
    }

    match object.get("currentState") {
        Some(Value::String(state)) if FlowState::parse(state).is_some() => {}
        Some(other) => {
            return Err(LogParseError::InvalidState {
                found: other.to_string(),
            })
        }
        None => {
            return Err(LogParseError::InvalidState {
                found: "missing".to_string(),
            })
        }
    }

    serde_json::from_value(value).map_err(|e| LogParseError::Malformed(e.to_string()))
}
