use super::load_log;
use crate::config::FlowConfigOverrides;
use crate::errors::OrchestrationError;
use crate::event_log::{EventLog, LifecycleEvent, LogEntryKind};
use crate::flow_machine::{FlowConfig, FlowEvent, FlowMachine, FlowState, ForcedTransition, Role};
use crate::plan::PlanStore;
use std::path::Path;

const REPLAY_REASON: &str = "replayed change request";
const GENERIC_RESUME_PROMPT: &str =
    "Orchestration resumed while waiting for operator input. Reply to continue.";
const GENERIC_RESUME_ERROR: &str = "Orchestration resumed in the error state";

/// A reconstructed machine and log, ready for the next action.
#[derive(Debug)]
pub struct ResumeOutcome {
    pub flow_machine: FlowMachine,
    pub log: EventLog,
    /// Set when an on-disk log was discarded. Non-fatal; must be shown.
    pub error: Option<String>,
    pub is_fresh_start: bool,
}

/// Rebuilds the flow machine and event log for `plan_path` from disk.
///
/// Only an unreadable plan (or an unreadable log file) is an error. A corrupt
/// log is discarded and reported through [`ResumeOutcome::error`]; a completed
/// log is superseded by a fresh attempt. Nothing is written.
pub fn resume_orchestration(
    plan_store: &dyn PlanStore,
    plan_path: &Path,
    config: &FlowConfig,
    overrides: FlowConfigOverrides,
) -> Result<ResumeOutcome, OrchestrationError> {
    let config = overrides.apply(config);
    let plan = plan_store.load_plan(plan_path)?;
    let plan_step = plan.active_step().to_string();

    let existing = match load_log(plan_path) {
        Ok(existing) => existing,
        Err(OrchestrationError::LogCorrupt { path, source }) => {
            tracing::warn!(log = %path.display(), "Discarding corrupt orchestration log: {}", source);
            let message = format!(
                "Discarded corrupt orchestration log at {}: {}",
                path.display(),
                source
            );
            return Ok(fresh_start(plan_path, &plan_step, config, Some(message)));
        }
        Err(e) => return Err(e),
    };

    let mut log = match existing {
        None => {
            tracing::info!(plan = %plan_path.display(), step = %plan_step, "Starting fresh orchestration");
            return Ok(fresh_start(plan_path, &plan_step, config, None));
        }
        Some(log) if log.completed => {
            tracing::info!(plan = %plan_path.display(), "Previous orchestration completed, starting a new attempt");
            return Ok(fresh_start(plan_path, &plan_step, config, None));
        }
        Some(log) => log,
    };
    log.plan_path = plan_path.to_path_buf();

    if log.active_step != plan_step {
        tracing::info!(
            log_step = %log.active_step,
            plan_step = %plan_step,
            "Plan step pointer was edited while paused, resyncing log"
        );
        log = log.record_step_change(
            plan_step.clone(),
            Some("plan step pointer edited while paused".to_string()),
        );
    }

    let flow_machine = restore_flow_machine(&log, config);
    let log = log.record_lifecycle(
        LifecycleEvent::Resumed,
        Some(format!(
            "state {} at step {} after {} change requests",
            flow_machine.state(),
            flow_machine.active_step(),
            flow_machine.change_request_count()
        )),
    );
    let log = super::sync_log_state(log, &flow_machine);

    tracing::info!(
        state = %flow_machine.state(),
        step = %flow_machine.active_step(),
        change_requests = flow_machine.change_request_count(),
        "Resumed orchestration"
    );

    Ok(ResumeOutcome {
        flow_machine,
        log,
        error: None,
        is_fresh_start: false,
    })
}

fn fresh_start(
    plan_path: &Path,
    step: &str,
    config: FlowConfig,
    error: Option<String>,
) -> ResumeOutcome {
    ResumeOutcome {
        flow_machine: FlowMachine::new(step, config),
        log: EventLog::new(plan_path, step),
        error,
        is_fresh_start: true,
    }
}

/// Builds a machine matching the log header.
///
/// The change-request counter is replayed through real review cycles so the
/// loop guard keeps its natural trigger point. Replay stops once the guard
/// has had its chance to fire; any remaining count is restored directly. The
/// recorded state then wins over whatever the replay produced.
fn restore_flow_machine(log: &EventLog, config: FlowConfig) -> FlowMachine {
    let replay_limit = config.max_change_requests.saturating_add(1);
    let mut machine = FlowMachine::new(log.active_step.clone(), config);

    for cycle in 0..log.change_request_count.min(replay_limit) {
        let replayed = machine.send(FlowEvent::RequestReview).and_then(|_| {
            machine.send(FlowEvent::RequestChanges {
                reason: REPLAY_REASON.to_string(),
            })
        });
        if let Err(err) = replayed {
            tracing::warn!(cycle, "Change-request replay stopped early: {}", err);
            break;
        }
    }
    if machine.change_request_count() < log.change_request_count {
        tracing::debug!(
            replayed = machine.change_request_count(),
            recorded = log.change_request_count,
            "Restoring change-request count past the loop guard"
        );
        machine.restore_change_request_count(log.change_request_count);
    }

    let target = log.current_state;
    let forced = match target {
        FlowState::AwaitingUserInput => {
            let (prompt, reply_from) = pending_prompt(log);
            if machine.state() == target && machine.user_prompt() == Some(prompt) {
                None
            } else {
                Some(ForcedTransition::new(target, "restore recorded state").with_prompt(prompt, reply_from))
            }
        }
        FlowState::Error => Some(
            ForcedTransition::new(target, "restore recorded state")
                .with_error(log.open_error().unwrap_or(GENERIC_RESUME_ERROR)),
        ),
        FlowState::CoderActive | FlowState::ReviewerActive => {
            (machine.state() != target).then(|| ForcedTransition::new(target, "restore recorded state"))
        }
    };

    if let Some(forced) = forced {
        tracing::debug!(from = %machine.state(), to = %target, "Correcting replayed state to recorded state");
        machine.force_state(forced);
    }
    machine
}

/// The prompt the operator still owes an answer to.
///
/// Whichever comes last wins: an unanswered `ask_user` entry, or a transition
/// into `awaiting_user_input` such as a loop-guard halt.
fn pending_prompt(log: &EventLog) -> (&str, Option<Role>) {
    log.entries
        .iter()
        .rev()
        .find_map(|entry| match &entry.kind {
            LogEntryKind::AskUser {
                requester,
                message,
                response: None,
                ..
            } => Some((message.as_str(), Some(*requester))),
            LogEntryKind::StateTransition {
                to: FlowState::AwaitingUserInput,
                reason: Some(reason),
                ..
            } => Some((reason.as_str(), None)),
            _ => None,
        })
        .unwrap_or((GENERIC_RESUME_PROMPT, None))
}
