//! Tests for the flow state machine.

use super::*;

fn machine_with_max(max_change_requests: u32) -> FlowMachine {
    FlowMachine::new("1", FlowConfig { max_change_requests })
}

fn all_events() -> Vec<FlowEvent> {
    vec![
        FlowEvent::RequestReview,
        FlowEvent::RequestChanges {
            reason: "fix tests".to_string(),
        },
        FlowEvent::Approve,
        FlowEvent::AskUser {
            message: "which db?".to_string(),
            requester: Role::Coder,
        },
        FlowEvent::UserReply {
            response: "postgres".to_string(),
        },
        FlowEvent::SystemError {
            error: "agent crashed".to_string(),
        },
    ]
}

/// Builds a machine sitting in `state`, reached through valid events only.
fn machine_in(state: FlowState) -> FlowMachine {
    let mut machine = machine_with_max(3);
    match state {
        FlowState::CoderActive => {}
        FlowState::ReviewerActive => {
            machine.send(FlowEvent::RequestReview).unwrap();
        }
        FlowState::AwaitingUserInput => {
            machine
                .send(FlowEvent::AskUser {
                    message: "question".to_string(),
                    requester: Role::Coder,
                })
                .unwrap();
        }
        FlowState::Error => {
            machine
                .send(FlowEvent::SystemError {
                    error: "boom".to_string(),
                })
                .unwrap();
        }
    }
    assert_eq!(machine.state(), state);
    machine
}

fn is_in_table(state: FlowState, event: &FlowEvent) -> bool {
    matches!(
        (state, event),
        (_, FlowEvent::SystemError { .. })
            | (FlowState::CoderActive, FlowEvent::RequestReview)
            | (FlowState::CoderActive, FlowEvent::AskUser { .. })
            | (FlowState::ReviewerActive, FlowEvent::RequestChanges { .. })
            | (FlowState::ReviewerActive, FlowEvent::Approve)
            | (FlowState::ReviewerActive, FlowEvent::AskUser { .. })
            | (FlowState::AwaitingUserInput, FlowEvent::UserReply { .. })
    )
}

#[test]
fn test_initial_state_is_coder_active() {
    let machine = machine_with_max(3);
    let ctx = machine.context();
    assert_eq!(ctx.state, FlowState::CoderActive);
    assert_eq!(ctx.active_step, "1");
    assert_eq!(ctx.change_request_count, 0);
    assert!(ctx.has_more_steps);
    assert!(ctx.transition_history.is_empty());
}

#[test]
fn test_events_outside_table_are_rejected_without_mutation() {
    for state in FlowState::ALL {
        for event in all_events() {
            if is_in_table(state, &event) {
                continue;
            }
            let mut machine = machine_in(state);
            let before = machine.context();

            let err = machine
                .send(event.clone())
                .expect_err("event outside the table should be rejected");

            assert_eq!(err.state, state);
            assert_eq!(err.event, event.name());
            assert!(err.message.contains(event.name()), "got: {}", err.message);
            assert_eq!(machine.context(), before, "{:?} + {:?} mutated", state, event);
            assert!(!machine.can_accept(&event));
        }
    }
}

#[test]
fn test_events_inside_table_are_accepted() {
    for state in FlowState::ALL {
        for event in all_events() {
            if !is_in_table(state, &event) {
                continue;
            }
            let mut machine = machine_in(state);
            assert!(machine.can_accept(&event));
            assert!(machine.send(event).is_ok());
        }
    }
}

#[test]
fn test_review_cycle_transitions() {
    let mut machine = machine_with_max(3);

    let record = machine.send(FlowEvent::RequestReview).unwrap();
    assert_eq!(record.from, FlowState::CoderActive);
    assert_eq!(record.to, FlowState::ReviewerActive);
    assert_eq!(record.event, "request_review");

    let record = machine
        .send(FlowEvent::RequestChanges {
            reason: "missing error handling".to_string(),
        })
        .unwrap();
    assert_eq!(record.to, FlowState::CoderActive);
    assert_eq!(record.reason.as_deref(), Some("missing error handling"));
    assert_eq!(machine.change_request_count(), 1);
}

#[test]
fn test_loop_guard_fires_on_fourth_change_request_with_default_max() {
    let mut machine = machine_with_max(3);

    for round in 1..=4u32 {
        machine.send(FlowEvent::RequestReview).unwrap();
        machine
            .send(FlowEvent::RequestChanges {
                reason: format!("round {}", round),
            })
            .unwrap();

        if round < 4 {
            assert_eq!(machine.state(), FlowState::CoderActive, "round {}", round);
        }
    }

    assert_eq!(machine.state(), FlowState::AwaitingUserInput);
    assert_eq!(machine.change_request_count(), 4);
    let prompt = machine.user_prompt().unwrap();
    assert!(prompt.contains("Loop guard"), "got: {}", prompt);
    assert_eq!(machine.context().awaiting_reply_from, None);
}

#[test]
fn test_loop_guard_fires_on_third_change_request_with_max_two() {
    let mut machine = machine_with_max(2);

    for round in 1..=3u32 {
        machine.send(FlowEvent::RequestReview).unwrap();
        machine
            .send(FlowEvent::RequestChanges {
                reason: format!("round {}", round),
            })
            .unwrap();
        if round < 3 {
            assert_eq!(machine.state(), FlowState::CoderActive);
        }
    }

    assert_eq!(machine.state(), FlowState::AwaitingUserInput);
    assert_eq!(machine.change_request_count(), 3);
}

#[test]
fn test_reply_after_loop_guard_returns_to_coder_and_keeps_counter() {
    let mut machine = machine_with_max(1);
    for _ in 0..2 {
        machine.send(FlowEvent::RequestReview).unwrap();
        machine
            .send(FlowEvent::RequestChanges {
                reason: "again".to_string(),
            })
            .unwrap();
    }
    assert_eq!(machine.state(), FlowState::AwaitingUserInput);

    machine
        .send(FlowEvent::UserReply {
            response: "split the step".to_string(),
        })
        .unwrap();

    assert_eq!(machine.state(), FlowState::CoderActive);
    assert_eq!(machine.change_request_count(), 2);
    assert_eq!(machine.user_prompt(), None);
}

#[test]
fn test_approve_with_more_steps_returns_to_coder() {
    let mut machine = machine_with_max(3);
    machine.send(FlowEvent::RequestReview).unwrap();

    let record = machine.send(FlowEvent::Approve).unwrap();

    assert_eq!(record.to, FlowState::CoderActive);
    assert_eq!(machine.change_request_count(), 0);
}

#[test]
fn test_approve_on_last_step_awaits_user_with_completed_prompt() {
    let mut machine = machine_with_max(3);
    machine.send(FlowEvent::RequestReview).unwrap();
    machine
        .send(FlowEvent::RequestChanges {
            reason: "nit".to_string(),
        })
        .unwrap();
    machine.send(FlowEvent::RequestReview).unwrap();
    machine.set_has_more_steps(false);

    machine.send(FlowEvent::Approve).unwrap();

    assert_eq!(machine.state(), FlowState::AwaitingUserInput);
    assert!(machine.user_prompt().unwrap().contains("completed"));
    assert_eq!(machine.change_request_count(), 1);
}

#[test]
fn test_ask_user_from_reviewer_returns_to_reviewer() {
    let mut machine = machine_with_max(3);
    machine.send(FlowEvent::RequestReview).unwrap();

    machine
        .send(FlowEvent::AskUser {
            message: "Is the public API allowed to change?".to_string(),
            requester: Role::Reviewer,
        })
        .unwrap();
    assert_eq!(machine.state(), FlowState::AwaitingUserInput);
    assert_eq!(machine.context().awaiting_reply_from, Some(Role::Reviewer));
    assert_eq!(
        machine.user_prompt(),
        Some("Is the public API allowed to change?")
    );

    machine
        .send(FlowEvent::UserReply {
            response: "No".to_string(),
        })
        .unwrap();

    assert_eq!(machine.state(), FlowState::ReviewerActive);
    assert_eq!(machine.context().awaiting_reply_from, None);
}

#[test]
fn test_ask_user_requester_follows_active_role() {
    let mut machine = machine_with_max(3);
    machine
        .send(FlowEvent::AskUser {
            message: "clarify".to_string(),
            requester: Role::Reviewer,
        })
        .unwrap();
    assert_eq!(machine.context().awaiting_reply_from, Some(Role::Coder));
}

#[test]
fn test_system_error_from_every_state() {
    for state in FlowState::ALL {
        let mut machine = machine_in(state);
        machine
            .send(FlowEvent::SystemError {
                error: "disk full".to_string(),
            })
            .unwrap();
        assert_eq!(machine.state(), FlowState::Error);
        assert_eq!(machine.context().error_message.as_deref(), Some("disk full"));
    }
}

#[test]
fn test_state_matches_latest_transition() {
    let mut machine = machine_with_max(3);
    machine.send(FlowEvent::RequestReview).unwrap();
    let _ = machine.send(FlowEvent::RequestReview);
    machine
        .send(FlowEvent::AskUser {
            message: "?".to_string(),
            requester: Role::Reviewer,
        })
        .unwrap();

    let ctx = machine.context();
    assert_eq!(ctx.transition_history.len(), 2);
    assert_eq!(ctx.transition_history.last().unwrap().to, ctx.state);
}

#[test]
fn test_force_state_bypasses_table_and_records_transition() {
    let mut machine = machine_with_max(3);

    let record = machine.force_state(
        ForcedTransition::new(FlowState::AwaitingUserInput, "resume")
            .with_prompt("pending question", Some(Role::Reviewer)),
    );

    assert!(record.is_forced());
    assert_eq!(record.from, FlowState::CoderActive);
    assert_eq!(record.to, FlowState::AwaitingUserInput);
    assert_eq!(machine.user_prompt(), Some("pending question"));
    assert_eq!(machine.context().awaiting_reply_from, Some(Role::Reviewer));
    assert_eq!(machine.last_transition().unwrap().to, machine.state());
}

#[test]
fn test_force_state_into_error_uses_reason_when_no_message() {
    let mut machine = machine_with_max(3);
    machine.force_state(ForcedTransition::new(FlowState::Error, "restored"));
    assert_eq!(machine.context().error_message.as_deref(), Some("restored"));

    machine.force_state(ForcedTransition::new(FlowState::CoderActive, "operator recovery"));
    assert_eq!(machine.context().error_message, None);
}

#[test]
fn test_context_is_a_detached_snapshot() {
    let mut machine = machine_with_max(3);
    let snapshot = machine.context();
    machine.send(FlowEvent::RequestReview).unwrap();

    assert_eq!(snapshot.state, FlowState::CoderActive);
    assert_eq!(machine.state(), FlowState::ReviewerActive);
}

#[test]
fn test_begin_step_resets_counter() {
    let mut machine = machine_with_max(3);
    machine.send(FlowEvent::RequestReview).unwrap();
    machine
        .send(FlowEvent::RequestChanges {
            reason: "x".to_string(),
        })
        .unwrap();

    machine.begin_step("2");

    assert_eq!(machine.active_step(), "2");
    assert_eq!(machine.change_request_count(), 0);
}

#[test]
fn test_flow_event_serialization_is_tagged() {
    let event = FlowEvent::RequestChanges {
        reason: "rename".to_string(),
    };
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "request_changes");
    assert_eq!(json["reason"], "rename");
    assert_eq!(FlowState::parse("awaiting_user_input"), Some(FlowState::AwaitingUserInput));
    assert_eq!(FlowState::parse("done"), None);
}
