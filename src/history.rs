//! Conversation history
//!
//! The committer turns finished sessions into log entries at most once per
//! session id. The log is an ordered, append-only view backed by a durable
//! `LogStore`.

mod committer;
pub mod export;
mod log;
mod store;

pub use committer::{CommitError, CommitOutcome, CommitRejected, HistoryCommitter};
pub use log::ConversationLog;
pub use store::{InMemoryLogStore, LogStore, SqliteLogStore, StoreError};

use crate::protocol::AgentResponse;
use crate::state_machine::{EndReason, Session, SessionId, ToolCall};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One answered question as it appears in the conversation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommittedSession {
    pub id: SessionId,
    pub question: String,
    pub dataset: String,
    pub tool_calls: Vec<ToolCall>,
    pub answer_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_payload: Option<AgentResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_by: Option<EndReason>,
    pub committed_at: DateTime<Utc>,
}

impl CommittedSession {
    /// Snapshot a session's fields at commit time
    pub fn from_session(session: &Session, committed_at: DateTime<Utc>) -> Self {
        Self {
            id: session.id.clone(),
            question: session.question.clone(),
            dataset: session.dataset.clone(),
            tool_calls: session.tool_calls.clone(),
            answer_text: session.answer_text.clone(),
            terminal_payload: session.terminal_payload.clone(),
            error: session.error.clone(),
            ended_by: session.ended_by,
            committed_at,
        }
    }
}

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("History store error: {0}")]
    Store(#[from] StoreError),
}
