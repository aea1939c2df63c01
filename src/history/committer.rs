//! At-most-once persistence of finished sessions

use super::{CommittedSession, ConversationLog, HistoryError};
use crate::state_machine::{Session, SessionId};
use chrono::Utc;
use std::collections::HashSet;
use thiserror::Error;

/// Why a commit was refused without touching the log
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommitRejected {
    #[error("Session {0} was already committed")]
    DuplicateCommitAttempt(SessionId),
    #[error("Session {0} has an empty question")]
    EmptyQuestionOnCommit(SessionId),
}

#[derive(Error, Debug)]
pub enum CommitError {
    #[error(transparent)]
    Rejected(#[from] CommitRejected),
    #[error(transparent)]
    History(#[from] HistoryError),
}

/// What became of a commit, as reported back to the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    Rejected(CommitRejected),
    /// The store failed; the session id stays recorded
    Failed(String),
}

impl From<&Result<CommittedSession, CommitError>> for CommitOutcome {
    fn from(result: &Result<CommittedSession, CommitError>) -> Self {
        match result {
            Ok(_) => CommitOutcome::Committed,
            Err(CommitError::Rejected(rejected)) => CommitOutcome::Rejected(rejected.clone()),
            Err(CommitError::History(e)) => CommitOutcome::Failed(e.to_string()),
        }
    }
}

/// Owner of the committed-id set
///
/// Ids are never removed, not even when the log is cleared.
pub struct HistoryCommitter {
    committed: HashSet<SessionId>,
    log: ConversationLog,
}

impl HistoryCommitter {
    /// Seed the committed-id set from entries already in the log
    pub fn new(log: ConversationLog) -> Self {
        let committed = log.entries().into_iter().map(|e| e.id).collect();
        Self { committed, log }
    }

    pub fn is_committed(&self, id: &SessionId) -> bool {
        self.committed.contains(id)
    }

    /// Persist a finished session unless it has no question or was already committed
    pub async fn commit(&mut self, session: &Session) -> Result<CommittedSession, CommitError> {
        if session.question.trim().is_empty() {
            return Err(CommitRejected::EmptyQuestionOnCommit(session.id.clone()).into());
        }
        // Recorded before the write so a retry can never produce a second entry
        if !self.committed.insert(session.id.clone()) {
            return Err(CommitRejected::DuplicateCommitAttempt(session.id.clone()).into());
        }

        let entry = CommittedSession::from_session(session, Utc::now());
        self.log.append(entry.clone()).await?;
        tracing::info!(
            session_id = %session.id,
            tool_calls = entry.tool_calls.len(),
            answer_len = entry.answer_text.len(),
            "Committed session"
        );
        Ok(entry)
    }
}
