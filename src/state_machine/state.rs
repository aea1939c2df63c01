//! Session state types

use crate::protocol::AgentResponse;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

// ============================================================================
// Session identity
// ============================================================================

/// Process-unique session identifier, generated at submission time
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh id; ids are never reused
    pub fn generate() -> Self {
        Self(format!("msg_{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Phase
// ============================================================================

/// Lifecycle phase of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Channel requested, not yet connected
    #[default]
    Open,
    /// Envelopes flowing
    Streaming,
    /// No further envelopes accepted; commit pending
    Terminal,
    /// Persisted to the conversation log
    Committed,
    /// Finished without a log entry
    Discarded,
}

impl Phase {
    /// Open or streaming: the session still owns a channel
    pub fn is_live(self) -> bool {
        matches!(self, Phase::Open | Phase::Streaming)
    }

    /// Committed or discarded: nothing left to do but clear the view
    pub fn is_final(self) -> bool {
        matches!(self, Phase::Committed | Phase::Discarded)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Open => "open",
            Phase::Streaming => "streaming",
            Phase::Terminal => "terminal",
            Phase::Committed => "committed",
            Phase::Discarded => "discarded",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session stopped streaming
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// `complete` / `stream_end`
    Completed,
    /// Server sent an `error` envelope
    Failed,
    /// Transport closed without a terminal envelope
    Disconnected,
    /// Transport failure
    TransportError,
    /// User cancelled
    Cancelled,
    /// A newer submission took over
    Replaced,
}

// ============================================================================
// Tool calls
// ============================================================================

/// A tool the agent invoked, with its result once it arrives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    pub invoked_at: DateTime<Utc>,
}

impl ToolCall {
    pub fn new(tool: impl Into<String>, arguments: Value, invoked_at: DateTime<Utc>) -> Self {
        Self {
            tool: tool.into(),
            arguments,
            result: None,
            invoked_at,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.result.is_none()
    }
}

// ============================================================================
// Session
// ============================================================================

/// The unit of work for one user question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub question: String,
    pub dataset: String,
    pub tool_calls: Vec<ToolCall>,
    pub reasoning_text: String,
    pub answer_text: String,
    /// Sticky once answer text started streaming (`answer_token` or
    /// `analysis_chunk`)
    pub saw_answer_tokens: bool,
    pub terminal_payload: Option<AgentResponse>,
    /// Last progress message from the agent
    pub stage: Option<String>,
    /// Generated code streamed by the agent
    pub code: String,
    pub error: Option<String>,
    pub ended_by: Option<EndReason>,
    pub phase: Phase,
}

impl Session {
    pub fn new(id: SessionId, question: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self {
            id,
            question: question.into(),
            dataset: dataset.into(),
            tool_calls: Vec::new(),
            reasoning_text: String::new(),
            answer_text: String::new(),
            saw_answer_tokens: false,
            terminal_payload: None,
            stage: None,
            code: String::new(),
            error: None,
            ended_by: None,
            phase: Phase::Open,
        }
    }

    /// Whether any answer text has been streamed so far
    pub fn has_partial_answer(&self) -> bool {
        !self.answer_text.is_empty()
    }

    /// Stop accepting envelopes
    pub(crate) fn end(&mut self, reason: EndReason) {
        self.phase = Phase::Terminal;
        self.ended_by = Some(reason);
    }
}

// ============================================================================
// Controller state and context
// ============================================================================

/// State owned by the session controller
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControllerState {
    /// The session currently receiving channel events, or still on screen
    /// during the post-commit grace delay
    pub active: Option<Session>,
    /// Submission held back until the active session's commit resolves
    pub pending: Option<Session>,
}

impl ControllerState {
    pub fn with_session(session: Session) -> Self {
        Self {
            active: Some(session),
            pending: None,
        }
    }

    pub fn active_id(&self) -> Option<&SessionId> {
        self.active.as_ref().map(|s| &s.id)
    }
}

/// Default delay before the channel is closed after a terminal envelope
pub const DEFAULT_CLOSE_LINGER: Duration = Duration::from_millis(20);

/// Default delay between commit and clearing the live view
pub const DEFAULT_CLEAR_GRACE: Duration = Duration::from_millis(150);

/// Immutable configuration for the controller
#[derive(Debug, Clone)]
pub struct ControllerContext {
    /// Model hint forwarded to the agent
    pub model: String,
    pub persona: String,
    pub close_linger: Duration,
    pub clear_grace: Duration,
}

impl ControllerContext {
    pub fn new(model: impl Into<String>, persona: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            persona: persona.into(),
            close_linger: DEFAULT_CLOSE_LINGER,
            clear_grace: DEFAULT_CLEAR_GRACE,
        }
    }

    pub fn with_close_linger(mut self, linger: Duration) -> Self {
        self.close_linger = linger;
        self
    }

    pub fn with_clear_grace(mut self, grace: Duration) -> Self {
        self.clear_grace = grace;
        self
    }
}
