use super::events::{FlowState, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name recorded for transitions produced by [`ForcedTransition`].
pub const FORCED_EVENT_NAME: &str = "force_state";

/// A single state change. Records are never modified after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: FlowState,
    pub to: FlowState,
    /// Event name, or `force_state` for administrative transitions.
    pub event: String,
    /// Change-request reason, pending user prompt, error text or force reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TransitionRecord {
    pub fn is_forced(&self) -> bool {
        self.event == FORCED_EVENT_NAME
    }
}

/// Read-only snapshot of the machine's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowContext {
    pub state: FlowState,
    pub active_step: String,
    pub change_request_count: u32,
    pub has_more_steps: bool,
    pub awaiting_reply_from: Option<Role>,
    pub user_prompt: Option<String>,
    pub error_message: Option<String>,
    pub transition_history: Vec<TransitionRecord>,
}

impl FlowContext {
    pub(crate) fn initial(active_step: String) -> Self {
        Self {
            state: FlowState::CoderActive,
            active_step,
            change_request_count: 0,
            has_more_steps: true,
            awaiting_reply_from: None,
            user_prompt: None,
            error_message: None,
            transition_history: Vec::new(),
        }
    }
}

/// An unguarded state override.
///
/// Used when reconstructing a machine from a persisted log. This type is not
/// deserializable and is not a [`super::FlowEvent`], so agent-produced input
/// can never carry one into [`super::FlowMachine::force_state`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForcedTransition {
    pub(crate) target: FlowState,
    pub(crate) reason: String,
    pub(crate) prompt: Option<String>,
    pub(crate) reply_from: Option<Role>,
    pub(crate) error: Option<String>,
}

impl ForcedTransition {
    pub fn new(target: FlowState, reason: impl Into<String>) -> Self {
        Self {
            target,
            reason: reason.into(),
            prompt: None,
            reply_from: None,
            error: None,
        }
    }

    /// Pending prompt (and asking role) to restore when forcing into
    /// `awaiting_user_input`.
    pub fn with_prompt(mut self, prompt: impl Into<String>, reply_from: Option<Role>) -> Self {
        self.prompt = Some(prompt.into());
        self.reply_from = reply_from;
        self
    }

    /// Error message to restore when forcing into `error`.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn target(&self) -> FlowState {
        self.target
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}
