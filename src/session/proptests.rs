//! Property-based tests for the session
//!
//! These tests drive random operation sequences through the session and check
//! that the transcript invariants hold after every step.

use super::*;
use crate::tracker::{ConfirmationPolicy, Decision};
use crate::transcript::{
    AgentEvent, Part, Role, SubscriptionId, ToolInvocationPart, ToolState, TurnId,
};
use proptest::prelude::*;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

// ============================================================================
// Test Helpers
// ============================================================================

const GATED: &str = "getWeatherInformation";
const AUTO: &str = "getLocalTime";

fn test_session() -> Session {
    Session::new(
        Arc::new(ConfirmationPolicy::new([GATED])),
        SessionConfig::default(),
    )
}

/// Operations a user or an agent stream can perform
#[derive(Debug, Clone)]
enum Op {
    Send(String),
    OpenTurn { turn: u8 },
    AppendText { turn: u8, text: String },
    GrowText { turn: u8, index: u8, suffix: String },
    AppendTool { turn: u8, call: u8, gated: bool, state: ToolState },
    UpdateTool { turn: u8, index: u8, call: u8, gated: bool, state: ToolState },
    Finalize { turn: u8 },
    EndStream,
    FailStream,
    Resolve { call: u8, approve: bool, with_result: bool },
    ToolFinished { call: u8, ok: bool },
    Stop,
    Reset,
}

fn turn_id(turn: u8) -> TurnId {
    TurnId::new(format!("agent-{turn}"))
}

fn call_id(call: u8) -> String {
    format!("call-{call}")
}

fn tool_part(call: u8, gated: bool, state: ToolState) -> Part {
    let name = if gated { GATED } else { AUTO };
    let mut tool = ToolInvocationPart::new(name, call_id(call), state, json!({"n": call}));
    match state {
        ToolState::OutputAvailable => tool.output = Some(json!("done")),
        ToolState::OutputError => tool.error_text = Some("boom".to_string()),
        ToolState::InputStreaming | ToolState::InputAvailable => {}
    }
    Part::ToolInvocation(tool)
}

/// Apply `op`, sending agent events through the most recently opened stream
fn apply(session: &mut Session, op: Op) {
    let latest = session.open_streams().last();
    let event = match op {
        Op::Send(text) => {
            let _ = session.send(&text);
            return;
        }
        Op::EndStream => {
            if let Some(sub) = latest {
                session.stream_ended(sub);
            }
            return;
        }
        Op::FailStream => {
            if let Some(sub) = latest {
                session.stream_failed(sub, TransportError::new("reset by peer"));
            }
            return;
        }
        Op::Resolve {
            call,
            approve,
            with_result,
        } => {
            let decision = if approve {
                Decision::Approve
            } else {
                Decision::Deny
            };
            let result = with_result.then(|| json!({"temp": 72}));
            let _ = session.resolve_confirmation(&call_id(call), decision, result);
            return;
        }
        Op::ToolFinished { call, ok } => {
            let outcome = if ok {
                Ok(json!("sunny"))
            } else {
                Err(ExecutionError::new("offline"))
            };
            let _ = session.record_tool_result(&call_id(call), outcome);
            return;
        }
        Op::Stop => {
            session.stop();
            return;
        }
        Op::Reset => {
            session.reset();
            return;
        }
        Op::OpenTurn { turn } => AgentEvent::TurnOpened {
            turn_id: turn_id(turn),
            role: Role::Assistant,
            created_at: None,
        },
        Op::AppendText { turn, text } => AgentEvent::PartAppended {
            turn_id: turn_id(turn),
            part: Part::text(text),
        },
        Op::GrowText {
            turn,
            index,
            suffix,
        } => {
            let current = session
                .store()
                .turn(&turn_id(turn))
                .and_then(|t| t.parts.get(usize::from(index)))
                .and_then(Part::as_text)
                .unwrap_or_default()
                .to_string();
            AgentEvent::PartUpdated {
                turn_id: turn_id(turn),
                index: usize::from(index),
                part: Part::text(current + &suffix),
            }
        }
        Op::AppendTool {
            turn,
            call,
            gated,
            state,
        } => AgentEvent::PartAppended {
            turn_id: turn_id(turn),
            part: tool_part(call, gated, state),
        },
        Op::UpdateTool {
            turn,
            index,
            call,
            gated,
            state,
        } => AgentEvent::PartUpdated {
            turn_id: turn_id(turn),
            index: usize::from(index),
            part: tool_part(call, gated, state),
        },
        Op::Finalize { turn } => AgentEvent::TurnFinalized {
            turn_id: turn_id(turn),
        },
    };
    session.apply_agent_event(latest.unwrap_or(SubscriptionId(0)), event);
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_tool_state() -> impl Strategy<Value = ToolState> {
    prop_oneof![
        Just(ToolState::InputStreaming),
        Just(ToolState::InputAvailable),
        Just(ToolState::OutputAvailable),
        Just(ToolState::OutputError),
    ]
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        2 => prop_oneof![Just("eggs".to_string()), Just("   ".to_string()), "[a-z ]{0,12}"]
            .prop_map(Op::Send),
        3 => (0u8..3).prop_map(|turn| Op::OpenTurn { turn }),
        3 => (0u8..3, "[a-z ]{0,8}").prop_map(|(turn, text)| Op::AppendText { turn, text }),
        3 => (0u8..3, 0u8..3, "[a-z ]{0,8}")
            .prop_map(|(turn, index, suffix)| Op::GrowText { turn, index, suffix }),
        4 => (0u8..3, 0u8..4, any::<bool>(), arb_tool_state()).prop_map(
            |(turn, call, gated, state)| Op::AppendTool { turn, call, gated, state }
        ),
        4 => (0u8..3, 0u8..3, 0u8..4, any::<bool>(), arb_tool_state()).prop_map(
            |(turn, index, call, gated, state)| Op::UpdateTool { turn, index, call, gated, state }
        ),
        2 => (0u8..3).prop_map(|turn| Op::Finalize { turn }),
        1 => Just(Op::EndStream),
        1 => Just(Op::FailStream),
        3 => (0u8..4, any::<bool>(), any::<bool>()).prop_map(|(call, approve, with_result)| {
            Op::Resolve { call, approve, with_result }
        }),
        2 => (0u8..4, any::<bool>()).prop_map(|(call, ok)| Op::ToolFinished { call, ok }),
        1 => Just(Op::Stop),
        1 => Just(Op::Reset),
    ]
}

// ============================================================================
// Observation Helpers
// ============================================================================

type PartKey = (TurnId, usize);

fn texts(session: &Session) -> HashMap<PartKey, String> {
    session
        .turns()
        .iter()
        .flat_map(|turn| {
            turn.parts
                .iter()
                .enumerate()
                .filter_map(move |(i, part)| {
                    part.as_text()
                        .map(|text| ((turn.id.clone(), i), text.to_string()))
                })
        })
        .collect()
}

fn tool_states(session: &Session) -> HashMap<String, ToolState> {
    session
        .turns()
        .iter()
        .flat_map(|turn| turn.tool_parts())
        .map(|tool| (tool.call_id.clone(), tool.state))
        .collect()
}

fn rank(state: ToolState) -> u8 {
    match state {
        ToolState::InputStreaming => 0,
        ToolState::InputAvailable => 1,
        ToolState::OutputAvailable | ToolState::OutputError => 2,
    }
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // Visible text never shrinks or loses its prefix
    #[test]
    fn prop_text_only_grows(ops in proptest::collection::vec(arb_op(), 0..40)) {
        let mut session = test_session();
        let mut seen = texts(&session);

        for op in ops {
            let was_reset = matches!(op, Op::Reset);
            apply(&mut session, op);
            let now = texts(&session);
            if !was_reset {
                for (key, before) in &seen {
                    if let Some(after) = now.get(key) {
                        prop_assert!(
                            after.starts_with(before.as_str()),
                            "Text at {:?} went from {:?} to {:?}", key, before, after
                        );
                    }
                }
            }
            seen = now;
        }
    }

    // Tool states only move forward and terminal states never change
    #[test]
    fn prop_tool_states_forward_only(ops in proptest::collection::vec(arb_op(), 0..40)) {
        let mut session = test_session();
        let mut seen = tool_states(&session);

        for op in ops {
            let was_reset = matches!(op, Op::Reset);
            apply(&mut session, op);
            let now = tool_states(&session);
            if !was_reset {
                for (call, before) in &seen {
                    if let Some(after) = now.get(call) {
                        let forward = rank(*after) > rank(*before) || after == before;
                        prop_assert!(forward, "{} went from {} to {}", call, before, after);
                    }
                }
            }
            seen = now;
        }
    }

    // pending_confirmations() is empty iff status != awaiting-confirmation
    #[test]
    fn prop_pending_iff_awaiting(ops in proptest::collection::vec(arb_op(), 0..40)) {
        let mut session = test_session();
        for op in ops {
            apply(&mut session, op);
            let awaiting = session.status() == SessionStatus::AwaitingConfirmation;
            prop_assert_eq!(session.pending_confirmations().is_empty(), !awaiting);
            prop_assert_eq!(session.status().accepts_input(), !awaiting);
        }
    }

    // Reset from any reachable state empties the transcript and goes idle
    #[test]
    fn prop_reset_always_idle(ops in proptest::collection::vec(arb_op(), 0..30)) {
        let mut session = test_session();
        for op in ops {
            apply(&mut session, op);
        }
        let open: Vec<_> = session.open_streams().collect();
        let effects = session.reset();

        prop_assert!(session.turns().is_empty());
        prop_assert_eq!(session.status(), SessionStatus::Idle);
        prop_assert_eq!(session.open_streams().count(), 0);
        for subscription in open {
            prop_assert!(
                effects.contains(&Effect::CloseStream { subscription }),
                "stream {} not closed",
                subscription
            );
            let outcome = session.apply_agent_event(
                subscription,
                AgentEvent::TurnOpened {
                    turn_id: turn_id(9),
                    role: Role::Assistant,
                    created_at: None,
                },
            );
            prop_assert_eq!(outcome, EventOutcome::Stale);
        }
        prop_assert!(session.turns().is_empty());
    }

    // Once no stream is open, no call is left without a way to finish
    #[test]
    fn prop_closed_streams_leave_no_orphan_calls(
        ops in proptest::collection::vec(arb_op(), 0..40)
    ) {
        let mut session = test_session();
        for op in ops {
            apply(&mut session, op);
        }
        session.stop();
        prop_assert!(matches!(
            session.status(),
            SessionStatus::Idle | SessionStatus::AwaitingConfirmation
        ));
        let policy = ConfirmationPolicy::new([GATED]);
        for tool in session.turns().iter().flat_map(|t| t.tool_parts()) {
            prop_assert!(
                tool.state.is_terminal() || policy.is_pending(tool),
                "Orphaned call {:?}", tool
            );
        }
    }
}
