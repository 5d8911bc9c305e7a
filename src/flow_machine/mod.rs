//! Guarded coder/reviewer state machine.
//!
//! This module is the only place flow transitions happen. It performs no I/O:
//! events go in through [`FlowMachine::send`], snapshots come out through
//! [`FlowMachine::context`]. A rejected event leaves the machine untouched.

mod context;
mod events;

pub use context::{FlowContext, ForcedTransition, TransitionRecord, FORCED_EVENT_NAME};
pub use events::{FlowEvent, FlowState, Role};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default number of change requests tolerated within one step.
pub const DEFAULT_MAX_CHANGE_REQUESTS: u32 = 3;

/// Tunables for the flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Change requests allowed per step before the loop guard halts the flow.
    #[serde(default = "default_max_change_requests")]
    pub max_change_requests: u32,
}

fn default_max_change_requests() -> u32 {
    DEFAULT_MAX_CHANGE_REQUESTS
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            max_change_requests: DEFAULT_MAX_CHANGE_REQUESTS,
        }
    }
}

/// An event arrived that the current state does not accept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct InvalidTransition {
    pub state: FlowState,
    pub event: String,
    pub message: String,
}

/// Prompt shown when the loop guard halts a step.
pub fn loop_guard_prompt(step: &str, count: u32, max: u32) -> String {
    format!(
        "Loop guard: step {} has received {} change requests (limit {}). \
         Coder and reviewer are not converging; reply with guidance to continue.",
        step, count, max
    )
}

/// Prompt shown when the final step is approved.
pub fn plan_completed_prompt(step: &str) -> String {
    format!(
        "Plan completed: step {} was the final step and has been approved.",
        step
    )
}

/// Where a valid event lands, computed before anything is mutated.
struct Landing {
    to: FlowState,
    change_request_count: u32,
    awaiting_reply_from: Option<Role>,
    user_prompt: Option<String>,
    error_message: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FlowMachine {
    context: FlowContext,
    config: FlowConfig,
}

impl FlowMachine {
    /// Creates a machine in `coder_active` at the given step.
    pub fn new(active_step: impl Into<String>, config: FlowConfig) -> Self {
        Self {
            context: FlowContext::initial(active_step.into()),
            config,
        }
    }

    /// Applies an event through the transition table.
    ///
    /// Returns the recorded transition, or a diagnostic when the event is not
    /// valid in the current state. Never panics.
    pub fn send(&mut self, event: FlowEvent) -> Result<TransitionRecord, InvalidTransition> {
        let landing = self.resolve(&event)?;
        let from = self.context.state;

        self.context.state = landing.to;
        self.context.change_request_count = landing.change_request_count;
        self.context.awaiting_reply_from = landing.awaiting_reply_from;
        self.context.user_prompt = landing.user_prompt;
        self.context.error_message = landing.error_message;

        let record = TransitionRecord {
            from,
            to: landing.to,
            event: event.name().to_string(),
            reason: landing.reason,
            timestamp: Utc::now(),
        };
        self.context.transition_history.push(record.clone());

        tracing::debug!(
            from = %from,
            to = %record.to,
            event = %record.event,
            step = %self.context.active_step,
            "Flow transition"
        );
        Ok(record)
    }

    /// Returns true if `event` would be accepted in the current state.
    pub fn can_accept(&self, event: &FlowEvent) -> bool {
        self.resolve(event).is_ok()
    }

    /// Moves to `forced.target` without consulting the transition table.
    ///
    /// Administrative only: used to reconstruct a machine from a persisted log.
    pub fn force_state(&mut self, forced: ForcedTransition) -> TransitionRecord {
        let from = self.context.state;
        let ForcedTransition {
            target,
            reason,
            prompt,
            reply_from,
            error,
        } = forced;

        self.context.state = target;
        match target {
            FlowState::AwaitingUserInput => {
                self.context.user_prompt = Some(prompt.unwrap_or_else(|| reason.clone()));
                self.context.awaiting_reply_from = reply_from;
                self.context.error_message = None;
            }
            FlowState::Error => {
                self.context.user_prompt = None;
                self.context.awaiting_reply_from = None;
                self.context.error_message = Some(error.unwrap_or_else(|| reason.clone()));
            }
            FlowState::CoderActive | FlowState::ReviewerActive => {
                self.context.user_prompt = None;
                self.context.awaiting_reply_from = None;
                self.context.error_message = None;
            }
        }

        let record = TransitionRecord {
            from,
            to: target,
            event: FORCED_EVENT_NAME.to_string(),
            reason: Some(reason),
            timestamp: Utc::now(),
        };
        self.context.transition_history.push(record.clone());
        tracing::debug!(from = %from, to = %target, "Forced flow transition");
        record
    }

    pub fn state(&self) -> FlowState {
        self.context.state
    }

    /// Returns an owned snapshot of the context.
    pub fn context(&self) -> FlowContext {
        self.context.clone()
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    pub fn active_step(&self) -> &str {
        &self.context.active_step
    }

    pub fn change_request_count(&self) -> u32 {
        self.context.change_request_count
    }

    pub fn user_prompt(&self) -> Option<&str> {
        self.context.user_prompt.as_deref()
    }

    pub fn last_transition(&self) -> Option<&TransitionRecord> {
        self.context.transition_history.last()
    }

    /// Tells the machine whether an approve should continue to another step.
    pub fn set_has_more_steps(&mut self, has_more_steps: bool) {
        self.context.has_more_steps = has_more_steps;
    }

    /// Starts a new step cycle after an approve advanced the plan.
    pub(crate) fn begin_step(&mut self, step: impl Into<String>) {
        self.context.active_step = step.into();
        self.context.change_request_count = 0;
        self.context.has_more_steps = true;
    }

    /// Sets the counter directly. Resume uses this once replay has gone past
    /// the point where the loop guard can fire.
    pub(crate) fn restore_change_request_count(&mut self, count: u32) {
        self.context.change_request_count = count;
    }

    fn resolve(&self, event: &FlowEvent) -> Result<Landing, InvalidTransition> {
        use FlowEvent::*;
        use FlowState::*;

        let ctx = &self.context;
        let active = |to: FlowState, reason: Option<String>| Landing {
            to,
            change_request_count: ctx.change_request_count,
            awaiting_reply_from: None,
            user_prompt: None,
            error_message: None,
            reason,
        };
        let awaiting = |count: u32, from: Option<Role>, prompt: String| Landing {
            to: AwaitingUserInput,
            change_request_count: count,
            awaiting_reply_from: from,
            user_prompt: Some(prompt.clone()),
            error_message: None,
            reason: Some(prompt),
        };

        match (ctx.state, event) {
            (_, SystemError { error }) => Ok(Landing {
                to: FlowState::Error,
                change_request_count: ctx.change_request_count,
                awaiting_reply_from: None,
                user_prompt: None,
                error_message: Some(error.clone()),
                reason: Some(error.clone()),
            }),

            (CoderActive, RequestReview) => Ok(active(ReviewerActive, None)),

            // The active role is the asker; the requester field is informational.
            (CoderActive, AskUser { message, .. }) => Ok(awaiting(
                ctx.change_request_count,
                Some(Role::Coder),
                message.clone(),
            )),

            (ReviewerActive, AskUser { message, .. }) => Ok(awaiting(
                ctx.change_request_count,
                Some(Role::Reviewer),
                message.clone(),
            )),

            (ReviewerActive, RequestChanges { reason }) => {
                let count = ctx.change_request_count + 1;
                if count > self.config.max_change_requests {
                    tracing::warn!(
                        step = %ctx.active_step,
                        count,
                        max = self.config.max_change_requests,
                        "Loop guard triggered"
                    );
                    Ok(awaiting(
                        count,
                        None,
                        loop_guard_prompt(&ctx.active_step, count, self.config.max_change_requests),
                    ))
                } else {
                    let mut landing = active(CoderActive, Some(reason.clone()));
                    landing.change_request_count = count;
                    Ok(landing)
                }
            }

            (ReviewerActive, Approve) => {
                if ctx.has_more_steps {
                    Ok(active(CoderActive, None))
                } else {
                    Ok(awaiting(
                        ctx.change_request_count,
                        None,
                        plan_completed_prompt(&ctx.active_step),
                    ))
                }
            }

            (AwaitingUserInput, UserReply { response }) => {
                let to = ctx
                    .awaiting_reply_from
                    .map(|role| role.active_state())
                    .unwrap_or(CoderActive);
                Ok(active(to, Some(response.clone())))
            }

            (state, event) => Err(InvalidTransition {
                state,
                event: event.name().to_string(),
                message: format!(
                    "event '{}' is not valid in state '{}'",
                    event.name(),
                    state
                ),
            }),
        }
    }
}

#[cfg(test)]
mod tests;
