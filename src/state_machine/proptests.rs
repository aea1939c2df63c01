//! Property-based tests for the state machine
//!
//! These tests verify key invariants hold across arbitrary envelope streams.

use super::state::*;
use super::transition::*;
use super::*;
use crate::history::CommitOutcome;
use crate::protocol::{AgentResponse, Envelope, TraceKind};
use proptest::prelude::*;
use serde_json::json;

// ============================================================================
// Test Helpers
// ============================================================================

fn test_context() -> ControllerContext {
    ControllerContext::new("test-model", "default")
}

fn streaming_session(id: &str) -> Session {
    let mut session = Session::new(SessionId::from(id), "question", "all");
    session.phase = Phase::Streaming;
    session
}

fn inbound(id: &str, envelope: Envelope) -> Event {
    Event::Inbound {
        session_id: SessionId::from(id),
        inbound: Inbound::now(envelope),
    }
}

fn count_commits(effects: &[Effect]) -> usize {
    effects
        .iter()
        .filter(|e| matches!(e, Effect::Commit { .. }))
        .count()
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_tool_name() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("sql".to_string()),
        Just("chart".to_string()),
        Just("search".to_string()),
    ]
}

fn arb_text() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 .,]{0,20}"
}

fn arb_trace_kind() -> impl Strategy<Value = TraceKind> {
    prop_oneof![
        Just(TraceKind::Thinking),
        Just(TraceKind::Reflection),
        Just(TraceKind::ChainOfThought),
        Just(TraceKind::Reasoning),
    ]
}

fn arb_non_terminal_envelope() -> impl Strategy<Value = Envelope> {
    prop_oneof![
        arb_text().prop_map(Envelope::ReasoningToken),
        arb_text().prop_map(Envelope::AnswerToken),
        (arb_tool_name(), any::<u8>()).prop_map(|(tool, n)| Envelope::ToolInvoked {
            tool,
            arguments: json!({ "n": n }),
        }),
        (arb_tool_name(), any::<u8>()).prop_map(|(tool, n)| Envelope::ToolResult {
            tool,
            result: json!(n),
        }),
        arb_text().prop_map(Envelope::AnswerFragment),
        arb_text().prop_map(Envelope::AnswerFinalized),
        arb_text().prop_map(Envelope::AnalysisChunk),
        arb_text().prop_map(Envelope::Stage),
        arb_text().prop_map(Envelope::CodeChunk),
        arb_trace_kind().prop_map(Envelope::Trace),
        arb_text().prop_map(|analysis| Envelope::DataReady(AgentResponse {
            analysis: Some(analysis),
            ..AgentResponse::default()
        })),
    ]
}

fn arb_envelope() -> impl Strategy<Value = Envelope> {
    prop_oneof![
        8 => arb_non_terminal_envelope(),
        1 => proptest::option::of(arb_text()).prop_map(|answer| Envelope::Terminal {
            payload: None,
            answer,
        }),
        1 => arb_text().prop_map(Envelope::Error),
    ]
}

fn arb_answer_growing_envelope() -> impl Strategy<Value = Envelope> {
    prop_oneof![
        arb_text().prop_map(Envelope::AnswerToken),
        arb_text().prop_map(Envelope::AnalysisChunk),
        arb_text().prop_map(Envelope::AnswerFinalized),
        arb_text().prop_map(Envelope::ReasoningToken),
        (arb_tool_name(), any::<u8>()).prop_map(|(tool, n)| Envelope::ToolInvoked {
            tool,
            arguments: json!({ "n": n }),
        }),
    ]
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Any sequence of envelopes is absorbed without panicking, and once the
    /// session leaves streaming it never returns to it
    #[test]
    fn prop_accumulator_total(envelopes in proptest::collection::vec(arb_envelope(), 0..40)) {
        let mut session = streaming_session("s");
        let mut ended = false;
        for envelope in envelopes {
            session = apply(&session, &Inbound::now(envelope));
            if ended {
                prop_assert_eq!(session.phase, Phase::Terminal);
            }
            ended = session.phase == Phase::Terminal;
        }
    }

    /// Once answer tokens have started, the answer only grows
    #[test]
    fn prop_answer_text_monotonic_after_tokens(
        first in "[a-z]{1,5}",
        envelopes in proptest::collection::vec(arb_answer_growing_envelope(), 0..30),
    ) {
        let mut session = apply(
            &streaming_session("s"),
            &Inbound::now(Envelope::AnswerToken(first)),
        );
        for envelope in envelopes {
            let before = session.answer_text.len();
            session = apply(&session, &Inbound::now(envelope));
            prop_assert!(session.answer_text.len() >= before);
        }
    }

    /// Results never create tool calls; every result lands on a prior invocation
    #[test]
    fn prop_tool_results_never_exceed_invocations(
        envelopes in proptest::collection::vec(arb_non_terminal_envelope(), 0..40),
    ) {
        let mut session = streaming_session("s");
        let mut invoked = 0usize;
        for envelope in envelopes {
            if matches!(envelope, Envelope::ToolInvoked { .. }) {
                invoked += 1;
            }
            session = apply(&session, &Inbound::now(envelope));
        }
        prop_assert_eq!(session.tool_calls.len(), invoked);
    }

    /// A terminal envelope commits exactly once no matter what follows it
    #[test]
    fn prop_single_commit_per_session(
        before in proptest::collection::vec(arb_non_terminal_envelope(), 0..10),
        after in proptest::collection::vec(arb_envelope(), 0..10),
    ) {
        let context = test_context();
        let mut state = ControllerState::with_session(streaming_session("s"));
        let mut commits = 0;

        let terminal = Envelope::Terminal { payload: None, answer: None };
        let events = before
            .into_iter()
            .map(|e| inbound("s", e))
            .chain(std::iter::once(inbound("s", terminal.clone())))
            .chain(after.into_iter().map(|e| inbound("s", e)))
            .chain(std::iter::once(inbound("s", terminal)))
            .chain(std::iter::once(Event::ChannelClosed {
                session_id: SessionId::from("s"),
                code: Some(1000),
            }))
            .chain(std::iter::once(Event::Cancel));

        for event in events {
            match transition(&state, &context, event) {
                Ok(result) => {
                    commits += count_commits(&result.effects);
                    state = result.new_state;
                }
                Err(TransitionError::Stale(_)) => {}
                Err(e) => prop_assert!(false, "unexpected error: {e}"),
            }
        }
        prop_assert_eq!(commits, 1);
    }

    /// A new submission retires the previous session before opening its own
    /// channel, and the previous session always reaches a final phase first
    #[test]
    fn prop_submit_retires_previous_first(
        partial in "[a-z]{0,10}",
        question in "[a-zA-Z]{1,20}",
        saved in any::<bool>(),
    ) {
        let context = test_context();
        let mut previous = streaming_session("a");
        previous.answer_text = partial.clone();
        let state = ControllerState::with_session(previous);

        let result = transition(&state, &context, Event::Submit {
            session_id: SessionId::from("b"),
            question,
            dataset: "all".to_string(),
        }).unwrap();
        let mut effects = result.effects;

        // Stand in for the executor resolving the commit
        if count_commits(&effects) > 0 {
            let outcome = if saved {
                CommitOutcome::Committed
            } else {
                CommitOutcome::Failed("disk full".to_string())
            };
            let resolved = transition(&result.new_state, &context, Event::CommitResolved {
                session_id: SessionId::from("a"),
                outcome,
            }).unwrap();
            effects.extend(resolved.effects);
        }

        let open = effects.iter()
            .position(|e| matches!(e, Effect::OpenChannel { .. }))
            .unwrap();
        let close = effects.iter()
            .position(|e| matches!(e, Effect::CloseChannel { session_id, .. } if session_id.as_str() == "a"))
            .unwrap();
        let retire = effects.iter()
            .position(|e| matches!(e, Effect::Commit { .. } | Effect::Discard { .. }))
            .unwrap();
        let settled = effects.iter()
            .position(|e| matches!(e, Effect::PhaseChanged { session_id, phase }
                if session_id.as_str() == "a" && phase.is_final()))
            .unwrap();
        prop_assert!(close < open);
        prop_assert!(retire < open);
        prop_assert!(settled < open);
        // Empty answers are never committed
        prop_assert_eq!(count_commits(&effects), usize::from(!partial.is_empty()));
    }

    /// Events for a session that is not active never change state
    #[test]
    fn prop_foreign_events_are_stale(envelope in arb_envelope()) {
        let state = ControllerState::with_session(streaming_session("current"));
        let result = transition(&state, &test_context(), inbound("other", envelope));
        prop_assert!(matches!(result, Err(TransitionError::Stale(_))));
    }

    /// Commit resolution always ends in a final phase
    #[test]
    fn prop_commit_resolution_is_final(committed in any::<bool>()) {
        let mut session = streaming_session("s");
        session.phase = Phase::Terminal;
        let outcome = if committed {
            CommitOutcome::Committed
        } else {
            CommitOutcome::Failed("disk full".to_string())
        };
        let result = transition(
            &ControllerState::with_session(session),
            &test_context(),
            Event::CommitResolved { session_id: SessionId::from("s"), outcome },
        ).unwrap();
        prop_assert!(result.new_state.active.unwrap().phase.is_final());
    }
}
