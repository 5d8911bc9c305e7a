use super::*;
use crate::flow_machine::FlowConfig;
use crate::plan::{MarkdownPlanStore, Plan};
use crate::step_resolver::ListStepResolver;
use std::cell::RefCell;
use std::rc::Rc;
use tempfile::TempDir;

/// Plan store that records pointer writes instead of touching disk.
#[derive(Clone, Default)]
struct RecordingPlanStore {
    writes: Rc<RefCell<Vec<String>>>,
    fail_writes: bool,
}

impl PlanStore for RecordingPlanStore {
    fn load_plan(&self, path: &Path) -> Result<Plan, OrchestrationError> {
        Err(OrchestrationError::PlanUnreadable {
            path: path.to_path_buf(),
            reason: "not used in executor tests".to_string(),
        })
    }

    fn update_active_step(&self, path: &Path, step: &str) -> Result<(), OrchestrationError> {
        if self.fail_writes {
            return Err(OrchestrationError::PlanWrite {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            });
        }
        self.writes.borrow_mut().push(step.to_string());
        Ok(())
    }
}

fn executor_with(steps: &[&str], store: RecordingPlanStore, max: u32) -> ToolExecutor {
    ToolExecutor::new(
        FlowMachine::new(steps[0], FlowConfig { max_change_requests: max }),
        "/plans/plan.md",
        Box::new(ListStepResolver::new(steps.iter().copied())),
        Box::new(store),
    )
}

#[test]
fn test_request_review_triggers_reviewer() {
    let mut executor = executor_with(&["1", "2"], RecordingPlanStore::default(), 3);

    let result = executor.execute(ToolAction::RequestReview).unwrap();

    assert!(result.success);
    assert!(result.trigger_reviewer);
    assert!(!result.trigger_coder);
    assert_eq!(result.state, FlowState::ReviewerActive);
    assert_eq!(result.transition.unwrap().event, "request_review");
}

#[test]
fn test_request_changes_triggers_coder_and_returns_counter() {
    let mut executor = executor_with(&["1", "2"], RecordingPlanStore::default(), 3);
    executor.execute(ToolAction::RequestReview).unwrap();

    let result = executor
        .execute(ToolAction::RequestChanges {
            reason: "handle empty input".to_string(),
        })
        .unwrap();

    assert!(result.success);
    assert!(result.trigger_coder);
    assert_eq!(result.change_request_count, Some(1));
    assert_eq!(executor.change_request_count(), 1);
}

#[test]
fn test_loop_guard_awaits_user_instead_of_triggering_coder() {
    let mut executor = executor_with(&["1"], RecordingPlanStore::default(), 1);
    let mut last = None;
    for _ in 0..2 {
        executor.execute(ToolAction::RequestReview).unwrap();
        last = Some(
            executor
                .execute(ToolAction::RequestChanges {
                    reason: "still wrong".to_string(),
                })
                .unwrap(),
        );
    }

    let result = last.unwrap();
    assert!(result.success);
    assert!(!result.trigger_coder);
    assert!(result.awaiting_user);
    assert_eq!(result.change_request_count, Some(2));
    assert!(executor.pending_user_prompt().unwrap().contains("Loop guard"));
}

#[test]
fn test_approve_with_next_step_advances_plan_pointer() {
    let store = RecordingPlanStore::default();
    let mut executor = executor_with(&["1", "2", "3"], store.clone(), 3);
    executor.execute(ToolAction::RequestReview).unwrap();
    executor
        .execute(ToolAction::RequestChanges {
            reason: "x".to_string(),
        })
        .unwrap();
    executor.execute(ToolAction::RequestReview).unwrap();

    let result = executor.execute(ToolAction::Approve).unwrap();

    assert!(result.success);
    assert!(result.trigger_coder);
    assert_eq!(result.state, FlowState::CoderActive);
    assert_eq!(
        result.step_advanced,
        Some(StepAdvance {
            from: "1".to_string(),
            to: "2".to_string()
        })
    );
    assert_eq!(executor.active_step(), "2");
    assert_eq!(executor.change_request_count(), 0);
    assert_eq!(*store.writes.borrow(), vec!["2".to_string()]);
}

#[test]
fn test_approve_on_final_step_completes_without_writing() {
    let store = RecordingPlanStore::default();
    let mut executor = executor_with(&["1"], store.clone(), 3);
    executor.execute(ToolAction::RequestReview).unwrap();
    executor
        .execute(ToolAction::RequestChanges {
            reason: "x".to_string(),
        })
        .unwrap();
    executor.execute(ToolAction::RequestReview).unwrap();

    let result = executor.execute(ToolAction::Approve).unwrap();

    assert!(result.success);
    assert!(result.awaiting_user);
    assert!(result.plan_completed);
    assert!(result.user_prompt.unwrap().contains("completed"));
    assert_eq!(executor.change_request_count(), 1);
    assert_eq!(executor.active_step(), "1");
    assert!(store.writes.borrow().is_empty());
}

#[test]
fn test_approve_in_wrong_state_is_blocked_without_writing() {
    let store = RecordingPlanStore::default();
    let mut executor = executor_with(&["1", "2"], store.clone(), 3);

    let result = executor.execute(ToolAction::Approve).unwrap();

    assert!(!result.success);
    assert!(result.blocked_reason.unwrap().contains("approve"));
    assert_eq!(executor.state(), FlowState::CoderActive);
    assert!(store.writes.borrow().is_empty());
}

#[test]
fn test_failed_plan_write_leaves_machine_untouched() {
    let store = RecordingPlanStore {
        fail_writes: true,
        ..Default::default()
    };
    let mut executor = executor_with(&["1", "2"], store, 3);
    executor.execute(ToolAction::RequestReview).unwrap();

    let err = executor
        .execute(ToolAction::Approve)
        .expect_err("write failure should surface");

    assert!(matches!(err, OrchestrationError::PlanWrite { .. }));
    assert_eq!(executor.state(), FlowState::ReviewerActive);
    assert_eq!(executor.active_step(), "1");
}

#[test]
fn test_ask_user_and_reply_round_trip_from_reviewer() {
    let mut executor = executor_with(&["1"], RecordingPlanStore::default(), 3);
    executor.execute(ToolAction::RequestReview).unwrap();

    let result = executor
        .execute(ToolAction::AskUser {
            message: "Should errors be logged?".to_string(),
            requester: Role::Reviewer,
        })
        .unwrap();
    assert!(result.awaiting_user);
    assert_eq!(result.user_prompt.as_deref(), Some("Should errors be logged?"));
    assert!(executor.is_awaiting_user());

    let reply = executor.handle_user_reply("Yes, at warn level");
    assert!(reply.success);
    assert!(reply.trigger_reviewer);
    assert!(!reply.trigger_coder);
    assert!(!executor.is_awaiting_user());
    assert_eq!(executor.pending_user_prompt(), None);
}

#[test]
fn test_blocked_action_bypasses_machine() {
    let mut executor = executor_with(&["1"], RecordingPlanStore::default(), 3);

    let result = executor
        .execute(ToolAction::Blocked {
            reason: "reviewer attempted Write".to_string(),
        })
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.blocked_reason.as_deref(), Some("reviewer attempted Write"));
    assert!(result.transition.is_none());
    assert!(executor.machine().context().transition_history.is_empty());
}

#[test]
fn test_invalid_action_reports_diagnostic() {
    let mut executor = executor_with(&["1"], RecordingPlanStore::default(), 3);

    let result = executor
        .execute(ToolAction::RequestChanges {
            reason: "coder cannot request changes".to_string(),
        })
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.change_request_count, None);
    assert!(result.blocked_reason.unwrap().contains("coder_active"));
    assert_eq!(executor.change_request_count(), 0);
}

#[test]
fn test_reply_when_not_awaiting_is_rejected() {
    let mut executor = executor_with(&["1"], RecordingPlanStore::default(), 3);
    let result = executor.handle_user_reply("hello?");
    assert!(!result.success);
    assert_eq!(executor.state(), FlowState::CoderActive);
}

#[test]
fn test_report_error_moves_to_error_state() {
    let mut executor = executor_with(&["1"], RecordingPlanStore::default(), 3);
    let result = executor.report_error("agent process exited");
    assert!(result.success);
    assert_eq!(result.state, FlowState::Error);
    assert!(!result.trigger_coder && !result.trigger_reviewer);
}

#[test]
fn test_approve_rewrites_plan_file_on_disk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("plan.md");
    std::fs::write(&path, "---\nactive_step: \"1\"\n---\n## Step 1: a\n## Step 2: b\n").unwrap();
    let plan = MarkdownPlanStore.load_plan(&path).unwrap();

    let mut executor = ToolExecutor::new(
        FlowMachine::new(plan.active_step(), FlowConfig::default()),
        &path,
        Box::new(plan.step_resolver()),
        Box::new(MarkdownPlanStore),
    );
    executor.execute(ToolAction::RequestReview).unwrap();
    executor.execute(ToolAction::Approve).unwrap();

    assert_eq!(MarkdownPlanStore.load_plan(&path).unwrap().active_step(), "2");
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "---\nactive_step: \"2\"\n---\n## Step 1: a\n## Step 2: b\n"
    );
}

#[test]
fn test_tool_action_json_shape() {
    let action: ToolAction =
        serde_json::from_str(r#"{"type":"ask_user","message":"hi","requester":"reviewer"}"#).unwrap();
    assert_eq!(
        action,
        ToolAction::AskUser {
            message: "hi".to_string(),
            requester: Role::Reviewer
        }
    );
    assert!(serde_json::from_str::<ToolAction>(r#"{"type":"force_state"}"#).is_err());
}

#[test]
fn test_recover_from_error_forces_coder_active() {
    let mut executor = executor_with(&["1"], RecordingPlanStore::default(), 3);
    assert!(executor.recover_from_error("not in error").is_none());

    executor.report_error("agent process exited");
    let record = executor.recover_from_error("operator restarted agent").unwrap();

    assert!(record.is_forced());
    assert_eq!(record.from, FlowState::Error);
    assert_eq!(executor.state(), FlowState::CoderActive);
    assert!(executor.execute(ToolAction::RequestReview).unwrap().success);
}
