//! Controller glue: one process driving one plan.
//!
//! The orchestrator holds the single-writer lock, owns the executor and the
//! current log snapshot, and saves after every externally observable change.
//! Log entries are appended in the order operations are invoked.

use crate::config::{FlowConfigOverrides, OrchestrationConfig};
use crate::errors::OrchestrationError;
use crate::event_log::{EventLog, LifecycleEvent, ToolCallRecord};
use crate::flow_machine::{FlowState, Role};
use crate::persistence::{
    create_transcript_path, resume_orchestration, save_log, save_transcript, sync_log_state,
    OrchestrationLock,
};
use crate::plan::{MarkdownPlanStore, PlanStore};
use crate::tool_executor::{ExecutionResult, ToolAction, ToolExecutor};
use crate::tool_filter::{create_tool_filter, ToolDecision, ToolFilter};
use serde_json::Value;
use std::path::{Path, PathBuf};

const USER_REPLY_CALL: &str = "user_reply";

pub struct Orchestrator {
    plan_path: PathBuf,
    config: OrchestrationConfig,
    executor: ToolExecutor,
    log: EventLog,
    resume_error: Option<String>,
    fresh_start: bool,
    _lock: OrchestrationLock,
}

impl Orchestrator {
    /// Locks the plan, resumes from disk and saves the resumed log.
    pub fn open(plan_path: &Path, config: OrchestrationConfig) -> Result<Self, OrchestrationError> {
        let lock = OrchestrationLock::acquire(plan_path)?;
        let store = MarkdownPlanStore;
        let outcome = resume_orchestration(
            &store,
            plan_path,
            &config.flow,
            FlowConfigOverrides::default(),
        )?;
        let plan = store.load_plan(plan_path)?;

        if let Some(error) = &outcome.error {
            tracing::warn!("{}", error);
        }

        let executor = ToolExecutor::new(
            outcome.flow_machine,
            plan_path,
            Box::new(plan.step_resolver()),
            Box::new(store),
        );
        save_log(&outcome.log)?;

        tracing::info!(
            plan = %plan_path.display(),
            fresh = outcome.is_fresh_start,
            state = %executor.state(),
            step = %executor.active_step(),
            "Orchestration opened"
        );

        Ok(Self {
            plan_path: plan_path.to_path_buf(),
            config,
            executor,
            log: outcome.log,
            resume_error: outcome.error,
            fresh_start: outcome.is_fresh_start,
            _lock: lock,
        })
    }

    /// Applies one agent action and checkpoints the result.
    ///
    /// A rejected action is still logged and saved. `Err` is returned only for
    /// a failed plan pointer write or a failed save.
    pub fn apply(&mut self, action: ToolAction) -> Result<ExecutionResult, OrchestrationError> {
        let agent = match (&action, self.executor.state().active_role()) {
            (ToolAction::AskUser { requester, .. }, None) => *requester,
            _ => self.acting_role(),
        };
        let tool_name = action.name();

        let result = match self.executor.execute(action.clone()) {
            Ok(result) => result,
            Err(err) => {
                self.checkpoint(|log| {
                    log.record_tool_call(
                        ToolCallRecord::new(agent, tool_name).blocked(err.to_string()),
                    )
                })?;
                return Err(err);
            }
        };

        let mut call = ToolCallRecord::new(agent, tool_name);
        if let Some(reason) = &result.blocked_reason {
            call = call.blocked(reason.clone());
        }

        self.checkpoint(|log| {
            let mut log = log.record_tool_call(call);
            if let Some(transition) = &result.transition {
                log = log.record_transition(transition);
            }
            if let (ToolAction::AskUser { message, .. }, true) = (&action, result.success) {
                log = log.record_ask_user(agent, message.clone());
            }
            if let Some(advance) = &result.step_advanced {
                log = log.record_step_change(
                    advance.to.clone(),
                    Some(format!("step {} approved", advance.from)),
                );
            }
            if result.plan_completed {
                log = log.mark_completed();
            }
            log
        })?;

        Ok(result)
    }

    /// Delivers an operator reply to the pending prompt.
    ///
    /// A rejected reply is logged as a blocked `user_reply` call. A reply to the
    /// plan-completed prompt reopens the attempt.
    pub fn reply(&mut self, response: &str) -> Result<ExecutionResult, OrchestrationError> {
        let agent = self.acting_role();
        let result = self.executor.handle_user_reply(response);
        if !result.success {
            let reason = result.blocked_reason.clone().unwrap_or_default();
            let call = ToolCallRecord::new(agent, USER_REPLY_CALL).blocked(reason);
            self.checkpoint(|log| log.record_tool_call(call))?;
            return Ok(result);
        }

        self.checkpoint(|log| {
            let log = match &result.transition {
                Some(transition) => log.record_transition(transition),
                None => log,
            };
            let log = log.record_user_response(response);
            if log.completed {
                log.reopen("operator continued after plan completion")
            } else {
                log
            }
        })?;
        Ok(result)
    }

    /// Moves the flow to `error` and records why.
    pub fn record_error(&mut self, message: &str) -> Result<ExecutionResult, OrchestrationError> {
        let result = self.executor.report_error(message);
        self.checkpoint(|log| {
            let log = match &result.transition {
                Some(transition) => log.record_transition(transition),
                None => log,
            };
            log.record_error(message)
        })?;
        Ok(result)
    }

    /// Operator recovery from `error`. Returns false when there is nothing to
    /// recover from.
    pub fn recover(&mut self, reason: &str) -> Result<bool, OrchestrationError> {
        let Some(transition) = self.executor.recover_from_error(reason) else {
            return Ok(false);
        };
        self.checkpoint(|log| {
            log.record_transition(&transition)
                .mark_error_recovered()
                .record_lifecycle(LifecycleEvent::Resumed, Some(format!("recovered: {}", reason)))
        })?;
        Ok(true)
    }

    /// Stores a tool-call payload out of line and logs a reference to it.
    pub fn record_tool_call(
        &mut self,
        agent: Role,
        tool_name: &str,
        payload: &Value,
    ) -> Result<PathBuf, OrchestrationError> {
        let path = create_transcript_path(&self.plan_path, agent, tool_name);
        save_transcript(&path, payload)?;
        let call = ToolCallRecord::new(agent, tool_name).with_transcript(path.clone());
        self.checkpoint(|log| log.record_tool_call(call))?;
        Ok(path)
    }

    /// Checks a tool invocation against the role's write policy. Denials are
    /// logged as blocked tool calls.
    pub fn guard_tool(
        &mut self,
        role: Role,
        tool_name: &str,
        input: &Value,
    ) -> Result<ToolDecision, OrchestrationError> {
        let decision = self.tool_filter(role).check(tool_name, input);
        if let ToolDecision::Denied { reason } = &decision {
            tracing::info!(role = %role, tool = tool_name, "Tool call denied");
            let call = ToolCallRecord::new(role, tool_name).blocked(reason.clone());
            self.checkpoint(|log| log.record_tool_call(call))?;
        }
        Ok(decision)
    }

    pub fn tool_filter(&self, role: Role) -> ToolFilter {
        create_tool_filter(role, self.config.reviewer.read_only)
    }

    /// The role an action or reply is attributed to in the log.
    fn acting_role(&self) -> Role {
        self.executor.state().active_role().unwrap_or(Role::Coder)
    }

    fn checkpoint(&mut self, update: impl FnOnce(EventLog) -> EventLog) -> Result<(), OrchestrationError> {
        let log = update(self.log.clone());
        self.log = sync_log_state(log, self.executor.machine());
        save_log(&self.log)?;
        Ok(())
    }

    pub fn state(&self) -> FlowState {
        self.executor.state()
    }

    pub fn active_step(&self) -> &str {
        self.executor.active_step()
    }

    pub fn change_request_count(&self) -> u32 {
        self.executor.change_request_count()
    }

    pub fn pending_user_prompt(&self) -> Option<&str> {
        self.executor.pending_user_prompt()
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// Set when resume discarded a corrupt log.
    pub fn resume_error(&self) -> Option<&str> {
        self.resume_error.as_deref()
    }

    pub fn is_fresh_start(&self) -> bool {
        self.fresh_start
    }

    pub fn plan_path(&self) -> &Path {
        &self.plan_path
    }
}

#[cfg(test)]
#[path = "tests/orchestrator_tests.rs"]
mod tests;
