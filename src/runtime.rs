//! Runtime for driving conversation sessions
//!
//! One tokio task owns the controller state and processes events
//! run-to-completion. Channel I/O runs in a pump task per session that only
//! forwards decoded envelopes back into the queue.

mod channel;
mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use channel::WebSocketConnector;
pub use executor::SessionRuntime;
pub use traits::*;

use crate::history::{CommittedSession, ConversationLog};
use crate::render::{Notice, RenderDebouncer, RenderFrame};
use crate::state_machine::{ControllerContext, Event, Phase, SessionId, TransitionError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};

/// Events sent to subscribed clients
#[derive(Debug, Clone)]
pub enum ClientEvent {
    SessionStarted {
        session_id: SessionId,
        question: String,
    },
    PhaseChanged {
        session_id: SessionId,
        phase: Phase,
    },
    Committed {
        entry: Box<CommittedSession>,
    },
    Discarded {
        session_id: SessionId,
    },
    Notice {
        notice: Notice,
    },
    HistoryCleared,
    Error {
        message: String,
    },
}

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Session runtime has stopped")]
    Stopped,
    #[error(transparent)]
    Rejected(#[from] TransitionError),
}

/// Handle to interact with a running session runtime
#[derive(Clone)]
pub struct SessionHandle {
    event_tx: mpsc::Sender<Event>,
    broadcast_tx: broadcast::Sender<ClientEvent>,
    frames: watch::Receiver<RenderFrame>,
    log: ConversationLog,
}

impl SessionHandle {
    /// Start a new session for `question`, retiring any session still streaming
    pub async fn submit(&self, question: &str, dataset: &str) -> Result<SessionId, RuntimeError> {
        if question.trim().is_empty() {
            return Err(TransitionError::EmptyQuestion.into());
        }
        let session_id = SessionId::generate();
        self.send(Event::Submit {
            session_id: session_id.clone(),
            question: question.to_string(),
            dataset: dataset.to_string(),
        })
        .await?;
        Ok(session_id)
    }

    /// Stop the active session, keeping whatever was streamed so far
    pub async fn cancel(&self) -> Result<(), RuntimeError> {
        self.send(Event::Cancel).await
    }

    pub async fn clear_history(&self) -> Result<(), RuntimeError> {
        self.send(Event::ClearHistory).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.broadcast_tx.subscribe()
    }

    /// Debounced render frames of the active session
    pub fn frames(&self) -> watch::Receiver<RenderFrame> {
        self.frames.clone()
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    async fn send(&self, event: Event) -> Result<(), RuntimeError> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| RuntimeError::Stopped)
    }
}

/// Spawn a session runtime on the current tokio runtime
///
/// The runtime stops once every `SessionHandle` clone has been dropped.
pub fn start<C: ChannelConnector + 'static>(
    context: ControllerContext,
    connector: C,
    log: ConversationLog,
    debounce_window: Duration,
) -> SessionHandle {
    let (event_tx, event_rx) = mpsc::channel(32);
    let (broadcast_tx, _) = broadcast::channel(128);
    let debouncer = RenderDebouncer::spawn(debounce_window);
    let frames = debouncer.subscribe();

    let runtime = SessionRuntime::new(
        context,
        connector,
        log.clone(),
        debouncer,
        event_rx,
        &event_tx,
        broadcast_tx.clone(),
    );
    tokio::spawn(async move {
        runtime.run().await;
    });

    SessionHandle {
        event_tx,
        broadcast_tx,
        frames,
        log,
    }
}
