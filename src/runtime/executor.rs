//! Session runtime executor

use super::traits::{Channel, ChannelConnector, Frame};
use super::ClientEvent;
use crate::history::{CommitError, CommitOutcome, ConversationLog, HistoryCommitter};
use crate::protocol::{decode, OpenRequest};
use crate::render::{Notice, RenderDebouncer};
use crate::state_machine::{
    transition, ControllerContext, ControllerState, Effect, Event, Inbound, SessionId,
    TransitionError,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// The channel currently owned by the runtime
struct ActiveChannel {
    session_id: SessionId,
    cancel: CancellationToken,
}

/// Single-task owner of controller state, the open channel and the committer
pub struct SessionRuntime<C: ChannelConnector + 'static> {
    context: ControllerContext,
    state: ControllerState,
    connector: Arc<C>,
    committer: HistoryCommitter,
    log: ConversationLog,
    debouncer: RenderDebouncer,
    event_rx: mpsc::Receiver<Event>,
    /// Weak so that dropping every `SessionHandle` stops the runtime
    event_tx: mpsc::WeakSender<Event>,
    broadcast_tx: broadcast::Sender<ClientEvent>,
    channel: Option<ActiveChannel>,
}

impl<C: ChannelConnector + 'static> SessionRuntime<C> {
    pub fn new(
        context: ControllerContext,
        connector: C,
        log: ConversationLog,
        debouncer: RenderDebouncer,
        event_rx: mpsc::Receiver<Event>,
        event_tx: &mpsc::Sender<Event>,
        broadcast_tx: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            context,
            state: ControllerState::default(),
            connector: Arc::new(connector),
            committer: HistoryCommitter::new(log.clone()),
            log,
            debouncer,
            event_rx,
            event_tx: event_tx.downgrade(),
            broadcast_tx,
            channel: None,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(model = %self.context.model, persona = %self.context.persona, "Starting session runtime");

        while let Some(event) = self.event_rx.recv().await {
            self.process_event(event).await;
        }

        if let Some(active) = self.channel.take() {
            active.cancel.cancel();
        }
        self.debouncer.flush();
        tracing::info!("Session runtime stopped");
    }

    async fn process_event(&mut self, event: Event) {
        // Effects may generate follow-up events; handle them in order
        let mut events_to_process = VecDeque::from([event]);

        while let Some(current_event) = events_to_process.pop_front() {
            let result = match transition(&self.state, &self.context, current_event) {
                Ok(r) => r,
                Err(TransitionError::Stale(detail)) => {
                    tracing::debug!(%detail, "Ignoring stale event");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Event rejected");
                    let _ = self.broadcast_tx.send(ClientEvent::Error {
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            self.state = result.new_state;

            for effect in result.effects {
                if let Some(generated_event) = self.execute_effect(effect).await {
                    events_to_process.push_back(generated_event);
                }
            }
        }
    }

    async fn execute_effect(&mut self, effect: Effect) -> Option<Event> {
        match effect {
            Effect::OpenChannel {
                session_id,
                request,
            } => {
                self.open_channel(session_id, request);
                None
            }

            Effect::CloseChannel { session_id, linger } => {
                self.close_channel(&session_id, linger);
                None
            }

            Effect::Commit { session } => {
                let result = self.committer.commit(&session).await;
                match &result {
                    Ok(entry) => {
                        let _ = self.broadcast_tx.send(ClientEvent::Committed {
                            entry: Box::new(entry.clone()),
                        });
                    }
                    Err(CommitError::Rejected(rejected)) => {
                        tracing::debug!(session_id = %session.id, reason = %rejected, "Commit skipped");
                    }
                    Err(CommitError::History(e)) => {
                        tracing::error!(session_id = %session.id, error = %e, "Failed to persist session");
                    }
                }
                Some(Event::CommitResolved {
                    session_id: session.id,
                    outcome: CommitOutcome::from(&result),
                })
            }

            Effect::Discard { session_id } => {
                tracing::info!(session_id = %session_id, "Discarded session without an answer");
                let _ = self
                    .broadcast_tx
                    .send(ClientEvent::Discarded { session_id });
                None
            }

            Effect::Render { frame } => {
                self.debouncer.push(frame);
                None
            }

            Effect::ScheduleClear { session_id, delay } => {
                if let Some(event_tx) = self.event_tx.upgrade() {
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = event_tx.send(Event::GraceElapsed { session_id }).await;
                    });
                }
                None
            }

            Effect::ClearHistory => {
                match self.log.clear().await {
                    Ok(()) => {
                        let _ = self.broadcast_tx.send(ClientEvent::HistoryCleared);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to clear history");
                        let _ = self.broadcast_tx.send(ClientEvent::Notice {
                            notice: Notice::history_unavailable(&e.to_string()),
                        });
                    }
                }
                None
            }

            Effect::PhaseChanged { session_id, phase } => {
                tracing::debug!(session_id = %session_id, %phase, "Phase changed");
                let _ = self
                    .broadcast_tx
                    .send(ClientEvent::PhaseChanged { session_id, phase });
                None
            }

            Effect::Notify { notice } => {
                let _ = self.broadcast_tx.send(ClientEvent::Notice { notice });
                None
            }
        }
    }

    fn open_channel(&mut self, session_id: SessionId, request: OpenRequest) {
        // Only one channel at a time
        if let Some(previous) = self.channel.take() {
            tracing::debug!(session_id = %previous.session_id, "Cancelling previous channel");
            previous.cancel.cancel();
        }

        let Some(events) = self.event_tx.upgrade() else {
            return;
        };

        tracing::info!(session_id = %session_id, dataset = %request.dataset, "Opening channel");
        let _ = self.broadcast_tx.send(ClientEvent::SessionStarted {
            session_id: session_id.clone(),
            question: request.question.clone(),
        });

        let cancel = CancellationToken::new();
        self.channel = Some(ActiveChannel {
            session_id: session_id.clone(),
            cancel: cancel.clone(),
        });

        let connector = self.connector.clone();
        tokio::spawn(async move {
            pump_channel(connector, session_id, request, events, cancel).await;
        });
    }

    fn close_channel(&mut self, session_id: &SessionId, linger: Duration) {
        if !self
            .channel
            .as_ref()
            .is_some_and(|c| c.session_id == *session_id)
        {
            return;
        }
        let Some(active) = self.channel.take() else {
            return;
        };

        if linger.is_zero() {
            active.cancel.cancel();
        } else {
            tokio::spawn(async move {
                tokio::time::sleep(linger).await;
                active.cancel.cancel();
            });
        }
    }
}

/// Forward one channel's frames into the event queue until it ends or is cancelled
async fn pump_channel<C: ChannelConnector>(
    connector: Arc<C>,
    session_id: SessionId,
    request: OpenRequest,
    events: mpsc::Sender<Event>,
    cancel: CancellationToken,
) {
    let connected = tokio::select! {
        biased;
        () = cancel.cancelled() => return,
        result = connector.connect(&request) => result,
    };

    let mut channel: Box<dyn Channel> = match connected {
        Ok(channel) => channel,
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "Channel failed to open");
            let _ = events
                .send(Event::ChannelError {
                    session_id,
                    message: e.to_string(),
                })
                .await;
            return;
        }
    };

    if events
        .send(Event::ChannelOpened {
            session_id: session_id.clone(),
        })
        .await
        .is_err()
    {
        return;
    }

    loop {
        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                if let Err(e) = channel.close().await {
                    tracing::debug!(session_id = %session_id, error = %e, "Error while closing channel");
                }
                tracing::debug!(session_id = %session_id, "Channel closed");
                return;
            }
            frame = channel.next_frame() => frame,
        };

        let event = match frame {
            Ok(Frame::Text(text)) => match decode(&text) {
                Ok(envelope) => Event::Inbound {
                    session_id: session_id.clone(),
                    inbound: Inbound::now(envelope),
                },
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Dropping malformed envelope");
                    continue;
                }
            },
            Ok(Frame::Closed { code, reason }) => {
                tracing::info!(session_id = %session_id, ?code, ?reason, "Channel closed by peer");
                let _ = events.send(Event::ChannelClosed { session_id, code }).await;
                return;
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Channel error");
                let _ = events
                    .send(Event::ChannelError {
                        session_id,
                        message: e.to_string(),
                    })
                    .await;
                return;
            }
        };

        if events.send(event).await.is_err() {
            return;
        }
    }
}
