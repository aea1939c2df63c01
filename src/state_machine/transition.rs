//! Pure state transition function
//!
//! Given the same state, context and event it always produces the same new
//! state and effects. Channel I/O, commits and timers happen in the runtime.

use super::accumulator::apply;
use super::state::{ControllerContext, ControllerState, EndReason, Phase, Session, SessionId};
use super::{Effect, Event};
use crate::history::CommitOutcome;
use crate::protocol::OpenRequest;
use crate::render::{Notice, RenderFrame};
use std::time::Duration;
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ControllerState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ControllerState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }

    /// Run `effects` before the ones already queued
    pub fn with_effects_first(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        let queued = std::mem::take(&mut self.effects);
        self.effects.extend(effects);
        self.effects.extend(queued);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("Question is empty")]
    EmptyQuestion,
    #[error("Session id {0} is already active")]
    DuplicateSessionId(SessionId),
    /// Event for a session that is no longer active or no longer streaming.
    /// Expected under network races; never user-facing.
    #[error("Stale event: {0}")]
    Stale(String),
}

/// Pure transition function
pub fn transition(
    state: &ControllerState,
    context: &ControllerContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (state.active.as_ref(), event) {
        // ============================================================
        // Submission
        // ============================================================
        (
            active,
            Event::Submit {
                session_id,
                question,
                dataset,
            },
        ) => submit(active, context, session_id, &question, dataset),

        // ============================================================
        // Channel lifecycle
        // ============================================================
        (Some(session), Event::ChannelOpened { session_id })
            if session.id == session_id && session.phase == Phase::Open =>
        {
            let mut next = session.clone();
            next.phase = Phase::Streaming;
            Ok(TransitionResult::new(ControllerState::with_session(next.clone()))
                .with_effect(Effect::phase_changed(&next))
                .with_effect(Effect::render(&next)))
        }

        (Some(session), Event::Inbound { session_id, inbound })
            if session.id == session_id && session.phase == Phase::Streaming =>
        {
            let next = apply(session, &inbound);
            if next.phase == Phase::Terminal {
                Ok(finish(next, context.close_linger))
            } else {
                Ok(TransitionResult::new(ControllerState::with_session(next.clone()))
                    .with_effect(Effect::render(&next)))
            }
        }

        // Transport failure: keep the partial transcript, tell the user
        (Some(session), Event::ChannelError { session_id, message })
            if session.id == session_id && session.phase.is_live() =>
        {
            let mut next = session.clone();
            next.error = Some(message.clone());
            next.end(EndReason::TransportError);
            Ok(finish(next, Duration::ZERO).with_effect(Effect::Notify {
                notice: Notice::connection_failed(&message),
            }))
        }

        // A transport close counts as a terminal envelope
        (Some(session), Event::ChannelClosed { session_id, .. })
            if session.id == session_id && session.phase.is_live() =>
        {
            let mut next = session.clone();
            next.end(EndReason::Disconnected);
            Ok(finish(next, Duration::ZERO))
        }

        // ============================================================
        // Cancellation
        // ============================================================
        (Some(session), Event::Cancel) if session.phase.is_live() => {
            let mut next = session.clone();
            next.end(EndReason::Cancelled);
            Ok(finish(next, Duration::ZERO))
        }

        // ============================================================
        // Commit resolution and teardown
        // ============================================================
        (Some(session), Event::CommitResolved { session_id, outcome })
            if session.id == session_id && session.phase == Phase::Terminal =>
        {
            let mut next = session.clone();
            next.phase = match outcome {
                CommitOutcome::Committed => Phase::Committed,
                CommitOutcome::Rejected(_) | CommitOutcome::Failed(_) => Phase::Discarded,
            };

            let mut effects = vec![Effect::phase_changed(&next)];
            if let CommitOutcome::Failed(message) = outcome {
                effects.push(Effect::Notify {
                    notice: Notice::history_unavailable(&message),
                });
            }

            // A replaced session leaves the screen at once for the held submission
            if let Some(pending) = state.pending.clone() {
                return Ok(open(pending, context).with_effects_first(effects));
            }

            effects.push(Effect::ScheduleClear {
                session_id: next.id.clone(),
                delay: context.clear_grace,
            });
            Ok(TransitionResult::new(ControllerState::with_session(next)).with_effects(effects))
        }

        (Some(session), Event::GraceElapsed { session_id })
            if session.id == session_id && session.phase.is_final() =>
        {
            Ok(TransitionResult::new(ControllerState::default()).with_effect(Effect::Render {
                frame: RenderFrame::idle(),
            }))
        }

        // ============================================================
        // History
        // ============================================================
        (active, Event::ClearHistory) => {
            let keep_active = active.filter(|s| !s.phase.is_final()).cloned();
            let mut result = TransitionResult::new(ControllerState {
                active: keep_active.clone(),
                pending: state.pending.clone(),
            })
            .with_effect(Effect::ClearHistory);
            if keep_active.is_none() {
                result = result.with_effect(Effect::Render {
                    frame: RenderFrame::idle(),
                });
            }
            Ok(result)
        }

        // ============================================================
        // Everything else arrived too late or for someone else
        // ============================================================
        (active, event) => Err(TransitionError::Stale(format!(
            "{event:?} while active session is {:?} ({})",
            active.map(|s| &s.id),
            active.map_or("none", |s| s.phase.as_str()),
        ))),
    }
}

fn submit(
    active: Option<&Session>,
    context: &ControllerContext,
    session_id: SessionId,
    question: &str,
    dataset: String,
) -> Result<TransitionResult, TransitionError> {
    let question = question.trim();
    if question.is_empty() {
        return Err(TransitionError::EmptyQuestion);
    }
    if active.is_some_and(|s| s.id == session_id) {
        return Err(TransitionError::DuplicateSessionId(session_id));
    }

    let session = Session::new(session_id, question, dataset);

    match active {
        // Streamed text is committed first; the new session opens once the
        // commit resolves
        Some(previous) if previous.phase.is_live() && previous.has_partial_answer() => {
            let mut retired = previous.clone();
            retired.end(EndReason::Replaced);
            Ok(TransitionResult::new(ControllerState {
                active: Some(retired.clone()),
                pending: Some(session),
            })
            .with_effect(Effect::close_channel(&retired.id, Duration::ZERO))
            .with_effect(Effect::phase_changed(&retired))
            .with_effect(Effect::commit(retired)))
        }

        // Nothing worth keeping: discard and open straight away
        Some(previous) if previous.phase.is_live() => {
            let mut retired = previous.clone();
            retired.phase = Phase::Discarded;
            retired.ended_by = Some(EndReason::Replaced);
            Ok(open(session, context).with_effects_first([
                Effect::close_channel(&retired.id, Duration::ZERO),
                Effect::phase_changed(&retired),
                Effect::Discard {
                    session_id: retired.id,
                },
            ]))
        }

        // A commit is still in flight; the latest submission waits for it
        Some(previous) if previous.phase == Phase::Terminal => {
            Ok(TransitionResult::new(ControllerState {
                active: Some(previous.clone()),
                pending: Some(session),
            }))
        }

        _ => Ok(open(session, context)),
    }
}

/// Make `session` active and request its channel
fn open(session: Session, context: &ControllerContext) -> TransitionResult {
    let request = OpenRequest {
        question: session.question.clone(),
        dataset: session.dataset.clone(),
        model: context.model.clone(),
        persona: context.persona.clone(),
    };
    TransitionResult::new(ControllerState::with_session(session.clone()))
        .with_effect(Effect::phase_changed(&session))
        .with_effect(Effect::render(&session))
        .with_effect(Effect::OpenChannel {
            session_id: session.id,
            request,
        })
}

/// Terminal transition: close the channel, flush the view, commit
fn finish(session: Session, linger: Duration) -> TransitionResult {
    TransitionResult::new(ControllerState::with_session(session.clone()))
        .with_effect(Effect::close_channel(&session.id, linger))
        .with_effect(Effect::render(&session))
        .with_effect(Effect::phase_changed(&session))
        .with_effect(Effect::commit(session))
}
