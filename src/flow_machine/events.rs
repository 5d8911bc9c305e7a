use serde::{Deserialize, Serialize};
use std::fmt;

/// The four states of a coder/reviewer flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    CoderActive,
    ReviewerActive,
    AwaitingUserInput,
    Error,
}

impl FlowState {
    pub const ALL: [FlowState; 4] = [
        FlowState::CoderActive,
        FlowState::ReviewerActive,
        FlowState::AwaitingUserInput,
        FlowState::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FlowState::CoderActive => "coder_active",
            FlowState::ReviewerActive => "reviewer_active",
            FlowState::AwaitingUserInput => "awaiting_user_input",
            FlowState::Error => "error",
        }
    }

    /// Parses the serialized name of a state.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.as_str() == value)
    }

    /// The role whose turn it is, if any.
    pub fn active_role(&self) -> Option<Role> {
        match self {
            FlowState::CoderActive => Some(Role::Coder),
            FlowState::ReviewerActive => Some(Role::Reviewer),
            FlowState::AwaitingUserInput | FlowState::Error => None,
        }
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The two turn-taking agent roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Coder,
    Reviewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Coder => "coder",
            Role::Reviewer => "reviewer",
        }
    }

    /// The state in which this role holds the turn.
    pub fn active_state(&self) -> FlowState {
        match self {
            Role::Coder => FlowState::CoderActive,
            Role::Reviewer => FlowState::ReviewerActive,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Events accepted by [`super::FlowMachine::send`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowEvent {
    RequestReview,
    RequestChanges { reason: String },
    Approve,
    AskUser { message: String, requester: Role },
    UserReply { response: String },
    SystemError { error: String },
}

impl FlowEvent {
    /// Stable name used in transition records and diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            FlowEvent::RequestReview => "request_review",
            FlowEvent::RequestChanges { .. } => "request_changes",
            FlowEvent::Approve => "approve",
            FlowEvent::AskUser { .. } => "ask_user",
            FlowEvent::UserReply { .. } => "user_reply",
            FlowEvent::SystemError { .. } => "system_error",
        }
    }
}
