//! Dispatcher from agent-issued tool actions to flow transitions.
//!
//! The executor owns the [`FlowMachine`] for one plan. Its only disk side
//! effect is advancing the plan's `active_step` pointer when a step is
//! approved and another step follows.

use crate::errors::OrchestrationError;
use crate::flow_machine::{
    FlowEvent, FlowMachine, FlowState, ForcedTransition, InvalidTransition, Role, TransitionRecord,
};
use crate::plan::PlanStore;
use crate::step_resolver::StepResolver;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// An action produced by one agent turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolAction {
    RequestReview,
    RequestChanges { reason: String },
    Approve,
    AskUser { message: String, requester: Role },
    /// An upstream permission guard already rejected the action.
    Blocked { reason: String },
}

impl ToolAction {
    pub fn name(&self) -> &'static str {
        match self {
            ToolAction::RequestReview => "request_review",
            ToolAction::RequestChanges { .. } => "request_changes",
            ToolAction::Approve => "approve",
            ToolAction::AskUser { .. } => "ask_user",
            ToolAction::Blocked { .. } => "blocked",
        }
    }
}

/// A step pointer move performed by an approve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepAdvance {
    pub from: String,
    pub to: String,
}

/// What the controller should do after an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub state: FlowState,
    pub trigger_coder: bool,
    pub trigger_reviewer: bool,
    pub awaiting_user: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_prompt: Option<String>,
    /// Must be shown to the operator or returned to the acting agent as a
    /// tool-level error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_request_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_advanced: Option<StepAdvance>,
    pub plan_completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition: Option<TransitionRecord>,
}

impl ExecutionResult {
    fn landed(machine: &FlowMachine, transition: TransitionRecord) -> Self {
        let state = machine.state();
        Self {
            success: true,
            state,
            trigger_coder: state == FlowState::CoderActive,
            trigger_reviewer: state == FlowState::ReviewerActive,
            awaiting_user: state == FlowState::AwaitingUserInput,
            user_prompt: machine.user_prompt().map(str::to_string),
            blocked_reason: None,
            change_request_count: None,
            step_advanced: None,
            plan_completed: false,
            transition: Some(transition),
        }
    }

    fn blocked(state: FlowState, reason: String) -> Self {
        Self {
            success: false,
            state,
            trigger_coder: false,
            trigger_reviewer: false,
            awaiting_user: false,
            user_prompt: None,
            blocked_reason: Some(reason),
            change_request_count: None,
            step_advanced: None,
            plan_completed: false,
            transition: None,
        }
    }

    fn rejected(state: FlowState, err: InvalidTransition) -> Self {
        tracing::warn!(state = %state, event = %err.event, "Rejected action: {}", err.message);
        Self::blocked(state, err.message)
    }
}

pub struct ToolExecutor {
    machine: FlowMachine,
    plan_path: PathBuf,
    resolver: Box<dyn StepResolver>,
    plan_store: Box<dyn PlanStore>,
}

impl ToolExecutor {
    pub fn new(
        machine: FlowMachine,
        plan_path: impl Into<PathBuf>,
        resolver: Box<dyn StepResolver>,
        plan_store: Box<dyn PlanStore>,
    ) -> Self {
        Self {
            machine,
            plan_path: plan_path.into(),
            resolver,
            plan_store,
        }
    }

    /// Applies one agent action.
    ///
    /// Invalid actions come back as `Ok` with `success == false` and leave the
    /// machine untouched. `Err` means the plan pointer could not be written;
    /// the machine is untouched in that case too.
    pub fn execute(&mut self, action: ToolAction) -> Result<ExecutionResult, OrchestrationError> {
        tracing::debug!(action = action.name(), state = %self.machine.state(), "Executing action");
        match action {
            ToolAction::RequestReview => Ok(self.send(FlowEvent::RequestReview)),

            ToolAction::RequestChanges { reason } => {
                let mut result = self.send(FlowEvent::RequestChanges { reason });
                if result.success {
                    result.change_request_count = Some(self.machine.change_request_count());
                }
                Ok(result)
            }

            ToolAction::Approve => self.approve(),

            ToolAction::AskUser { message, requester } => {
                Ok(self.send(FlowEvent::AskUser { message, requester }))
            }

            ToolAction::Blocked { reason } => {
                tracing::info!(reason = %reason, "Action blocked upstream");
                Ok(ExecutionResult::blocked(self.machine.state(), reason))
            }
        }
    }

    /// Delivers the operator's reply to a pending prompt.
    pub fn handle_user_reply(&mut self, response: impl Into<String>) -> ExecutionResult {
        self.send(FlowEvent::UserReply {
            response: response.into(),
        })
    }

    /// Reports an unrecoverable failure of the current turn.
    pub fn report_error(&mut self, error: impl Into<String>) -> ExecutionResult {
        self.send(FlowEvent::SystemError {
            error: error.into(),
        })
    }

    /// Operator recovery: forces the machine out of `error` back to
    /// `coder_active`. `None` when the machine is not in `error`.
    pub(crate) fn recover_from_error(&mut self, reason: &str) -> Option<TransitionRecord> {
        if self.machine.state() != FlowState::Error {
            return None;
        }
        tracing::info!(step = %self.machine.active_step(), reason, "Recovering from error");
        Some(
            self.machine
                .force_state(ForcedTransition::new(FlowState::CoderActive, reason)),
        )
    }

    fn send(&mut self, event: FlowEvent) -> ExecutionResult {
        match self.machine.send(event) {
            Ok(transition) => ExecutionResult::landed(&self.machine, transition),
            Err(err) => ExecutionResult::rejected(self.machine.state(), err),
        }
    }

    fn approve(&mut self) -> Result<ExecutionResult, OrchestrationError> {
        if !self.machine.can_accept(&FlowEvent::Approve) {
            let state = self.machine.state();
            return Ok(ExecutionResult::rejected(
                state,
                InvalidTransition {
                    state,
                    event: "approve".to_string(),
                    message: format!("event 'approve' is not valid in state '{}'", state),
                },
            ));
        }

        let current = self.machine.active_step().to_string();
        match self.resolver.next_step(&current) {
            Some(next) => {
                // Write first: a failed write must leave the machine where it was.
                self.plan_store.update_active_step(&self.plan_path, &next)?;
                self.machine.set_has_more_steps(true);
                let mut result = self.send(FlowEvent::Approve);
                self.machine.begin_step(next.clone());
                tracing::info!(from = %current, to = %next, "Step approved, advancing plan");
                result.change_request_count = Some(0);
                result.step_advanced = Some(StepAdvance {
                    from: current,
                    to: next,
                });
                Ok(result)
            }
            None => {
                self.machine.set_has_more_steps(false);
                let mut result = self.send(FlowEvent::Approve);
                tracing::info!(step = %current, "Final step approved, plan completed");
                result.plan_completed = result.success;
                Ok(result)
            }
        }
    }

    pub fn state(&self) -> FlowState {
        self.machine.state()
    }

    pub fn active_step(&self) -> &str {
        self.machine.active_step()
    }

    pub fn change_request_count(&self) -> u32 {
        self.machine.change_request_count()
    }

    pub fn is_awaiting_user(&self) -> bool {
        self.machine.state() == FlowState::AwaitingUserInput
    }

    pub fn pending_user_prompt(&self) -> Option<&str> {
        if self.is_awaiting_user() {
            self.machine.user_prompt()
        } else {
            None
        }
    }

    pub fn plan_path(&self) -> &Path {
        &self.plan_path
    }

    pub fn machine(&self) -> &FlowMachine {
        &self.machine
    }
}

#[cfg(test)]
#[path = "tests/tool_executor_tests.rs"]
mod tests;
