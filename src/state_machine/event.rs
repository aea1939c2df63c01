//! Events that drive the session controller

use super::state::SessionId;
use crate::history::CommitOutcome;
use crate::protocol::Envelope;
use chrono::{DateTime, Utc};

/// A decoded envelope stamped with its arrival time at the channel boundary
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub envelope: Envelope,
    pub received_at: DateTime<Utc>,
}

impl Inbound {
    pub fn now(envelope: Envelope) -> Self {
        Self {
            envelope,
            received_at: Utc::now(),
        }
    }
}

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // User events
    Submit {
        session_id: SessionId,
        question: String,
        dataset: String,
    },
    Cancel,
    ClearHistory,

    // Channel events
    ChannelOpened {
        session_id: SessionId,
    },
    Inbound {
        session_id: SessionId,
        inbound: Inbound,
    },
    ChannelError {
        session_id: SessionId,
        message: String,
    },
    ChannelClosed {
        session_id: SessionId,
        code: Option<u16>,
    },

    // Generated by effects
    CommitResolved {
        session_id: SessionId,
        outcome: CommitOutcome,
    },
    GraceElapsed {
        session_id: SessionId,
    },
}

impl Event {
    /// The session an event is addressed to, if any
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Event::Submit { session_id, .. }
            | Event::ChannelOpened { session_id }
            | Event::Inbound { session_id, .. }
            | Event::ChannelError { session_id, .. }
            | Event::ChannelClosed { session_id, .. }
            | Event::CommitResolved { session_id, .. }
            | Event::GraceElapsed { session_id } => Some(session_id),
            Event::Cancel | Event::ClearHistory => None,
        }
    }
}
