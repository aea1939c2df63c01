//! Pure reducer from inbound envelopes to in-progress answer state
//!
//! `apply` never mutates its input and never fails; decode errors are
//! handled before envelopes get here.

use super::event::Inbound;
use super::state::{EndReason, Session, ToolCall};
use crate::protocol::Envelope;

/// Fold one inbound envelope into a session, returning the new session
pub fn apply(session: &Session, inbound: &Inbound) -> Session {
    let mut next = session.clone();

    match &inbound.envelope {
        Envelope::ReasoningToken(token) => next.reasoning_text.push_str(token),

        Envelope::AnswerToken(token) => {
            next.answer_text.push_str(token);
            next.saw_answer_tokens = true;
        }

        Envelope::ToolInvoked { tool, arguments } => {
            next.tool_calls
                .push(ToolCall::new(tool, arguments.clone(), inbound.received_at));
        }

        // FIFO per tool name: the protocol carries no correlation id
        Envelope::ToolResult { tool, result } => {
            if let Some(call) = next
                .tool_calls
                .iter_mut()
                .find(|call| call.tool == *tool && call.is_pending())
            {
                call.result = Some(result.clone());
            }
        }

        Envelope::DataReady(payload) => next.terminal_payload = Some(payload.clone()),

        Envelope::AnswerFragment(content) => {
            if next.saw_answer_tokens {
                next.answer_text.push_str(content);
            } else {
                next.answer_text.clone_from(content);
            }
        }

        Envelope::AnalysisChunk(chunk) => {
            next.answer_text.push_str(chunk);
            next.saw_answer_tokens = true;
        }

        Envelope::AnswerFinalized(content) => {
            if content.len() > next.answer_text.len() {
                next.answer_text.clone_from(content);
            }
            next.reasoning_text.clear();
        }

        Envelope::Terminal { payload, answer } => {
            if let Some(payload) = payload {
                next.terminal_payload = Some(payload.clone());
            }
            if next.answer_text.is_empty() {
                let seeded = payload
                    .as_ref()
                    .and_then(|p| p.answer_text())
                    .or(answer.as_deref());
                if let Some(text) = seeded {
                    next.answer_text = text.to_string();
                }
            }
            next.end(EndReason::Completed);
        }

        Envelope::Error(message) => {
            next.error = Some(message.clone());
            next.end(EndReason::Failed);
        }

        Envelope::Stage(message) => next.stage = Some(message.clone()),

        Envelope::CodeChunk(chunk) => next.code.push_str(chunk),

        Envelope::CodeGenerated(code) => next.code.clone_from(code),

        Envelope::Trace(_) => {}
    }

    next
}
