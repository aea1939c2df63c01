//! Effects produced by state transitions

use super::state::{Phase, Session, SessionId};
use crate::protocol::OpenRequest;
use crate::render::{Notice, RenderFrame};
use std::time::Duration;

/// Effects to be executed after state transition
#[derive(Debug, Clone)]
pub enum Effect {
    /// Open the duplex channel for a new session
    OpenChannel {
        session_id: SessionId,
        request: OpenRequest,
    },

    /// Close a session's channel, optionally after a short linger
    CloseChannel {
        session_id: SessionId,
        linger: Duration,
    },

    /// Hand a finished session to the history committer
    Commit { session: Box<Session> },

    /// A session was retired without a log entry
    Discard { session_id: SessionId },

    /// Push a frame through the render debouncer
    Render { frame: RenderFrame },

    /// Emit `GraceElapsed` after a delay
    ScheduleClear {
        session_id: SessionId,
        delay: Duration,
    },

    /// Empty the conversation log
    ClearHistory,

    /// Notify connected clients of a phase change
    PhaseChanged { session_id: SessionId, phase: Phase },

    /// Surface a dismissible notification
    Notify { notice: Notice },
}

impl Effect {
    pub fn render(session: &Session) -> Self {
        Effect::Render {
            frame: RenderFrame::from_session(session),
        }
    }

    pub fn phase_changed(session: &Session) -> Self {
        Effect::PhaseChanged {
            session_id: session.id.clone(),
            phase: session.phase,
        }
    }

    pub fn commit(session: Session) -> Self {
        Effect::Commit {
            session: Box::new(session),
        }
    }

    pub fn close_channel(session_id: &SessionId, linger: Duration) -> Self {
        Effect::CloseChannel {
            session_id: session_id.clone(),
            linger,
        }
    }
}
