use crate::flow_machine::{FlowState, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// One audit record. Common fields live here; the variant payload is
/// flattened alongside them under a `type` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub active_step: String,
    #[serde(flatten)]
    pub kind: LogEntryKind,
}

impl LogEntry {
    pub fn new(active_step: impl Into<String>, kind: LogEntryKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            active_step: active_step.into(),
            kind,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    Started,
    Resumed,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum LogEntryKind {
    StateTransition {
        from: FlowState,
        to: FlowState,
        event: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    ToolCall {
        agent: Role,
        tool_name: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transcript_path: Option<PathBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        blocked_reason: Option<String>,
    },
    AskUser {
        requester: Role,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        responded_at: Option<DateTime<Utc>>,
    },
    Error {
        message: String,
        recovered: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recovered_at: Option<DateTime<Utc>>,
    },
    StepChange {
        from_step: String,
        to_step: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Lifecycle {
        event: LifecycleEvent,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

impl LogEntryKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            LogEntryKind::StateTransition { .. } => "state_transition",
            LogEntryKind::ToolCall { .. } => "tool_call",
            LogEntryKind::AskUser { .. } => "ask_user",
            LogEntryKind::Error { .. } => "error",
            LogEntryKind::StepChange { .. } => "step_change",
            LogEntryKind::Lifecycle { .. } => "lifecycle",
        }
    }
}
