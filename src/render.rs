//! Render-facing view of the active session
//!
//! `RenderFrame` is what a renderer draws. `RenderDebouncer` coalesces
//! streaming frames on a short window so half-formed markup (a split table
//! row, a link missing its target) is not drawn, while terminal frames go
//! out immediately.

use crate::protocol::AgentResponse;
use crate::state_machine::{EndReason, Session, SessionId, ToolCall};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// Default coalescing window
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(32);

const WORKING_TEXT: &str = "Working on your request…";
const CONNECTION_LOST_TEXT: &str =
    "The connection ended unexpectedly, but tool results above may contain partial data.";

/// A renderable snapshot of the active session
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RenderFrame {
    /// `None` when no session is on screen
    pub session_id: Option<SessionId>,
    pub question: String,
    /// Answer text, or a placeholder when nothing has been streamed
    pub answer_text: String,
    pub reasoning_text: String,
    pub tool_calls: Vec<ToolCall>,
    pub stage: Option<String>,
    pub code: String,
    pub payload: Option<AgentResponse>,
    pub error: Option<String>,
    /// Whether the session is still receiving envelopes
    pub streaming: bool,
}

impl RenderFrame {
    /// Empty view shown between sessions
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn from_session(session: &Session) -> Self {
        let streaming = session.phase.is_live();
        Self {
            session_id: Some(session.id.clone()),
            question: session.question.clone(),
            answer_text: display_answer(session, streaming),
            reasoning_text: session.reasoning_text.clone(),
            tool_calls: session.tool_calls.clone(),
            stage: session.stage.clone(),
            code: session.code.clone(),
            payload: session.terminal_payload.clone(),
            error: session.error.clone(),
            streaming,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.session_id.is_none()
    }
}

/// Placeholders are display-only; the committed answer is never padded
fn display_answer(session: &Session, streaming: bool) -> String {
    if session.has_partial_answer() {
        return session.answer_text.clone();
    }

    let tools = session.tool_calls.len();
    match session.ended_by {
        _ if streaming && tools > 0 => WORKING_TEXT.to_string(),
        Some(EndReason::TransportError) => CONNECTION_LOST_TEXT.to_string(),
        Some(EndReason::Disconnected) if tools > 0 => {
            format!("Completed {tools} tool calls. Review the results above.")
        }
        _ => String::new(),
    }
}

// ============================================================================
// Notices
// ============================================================================

/// A dismissible user-facing notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub title: String,
    pub description: String,
    pub dismissible: bool,
}

impl Notice {
    pub fn connection_failed(detail: &str) -> Self {
        Self {
            title: "WebSocket Error".to_string(),
            description: format!("Connection failed. Please try again. ({detail})"),
            dismissible: true,
        }
    }

    pub fn history_unavailable(detail: &str) -> Self {
        Self {
            title: "History not saved".to_string(),
            description: format!("This answer could not be written to history: {detail}"),
            dismissible: true,
        }
    }
}

// ============================================================================
// Debouncer
// ============================================================================

enum Command {
    Push(RenderFrame),
    Flush,
}

/// Handle to the debouncer task
///
/// Dropping every handle stops the task after emitting any pending frame.
#[derive(Clone)]
pub struct RenderDebouncer {
    commands: mpsc::UnboundedSender<Command>,
    frames: watch::Receiver<RenderFrame>,
}

impl RenderDebouncer {
    /// Spawn the debouncer task on the current runtime
    pub fn spawn(window: Duration) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (out, frames) = watch::channel(RenderFrame::idle());
        tokio::spawn(run(window, rx, out));
        Self { commands, frames }
    }

    /// Offer a new frame. Streaming frames restart the window; any other
    /// frame is emitted at once and drops whatever was pending.
    pub fn push(&self, frame: RenderFrame) {
        // Closed only when the task has exited, and then nobody is watching
        let _ = self.commands.send(Command::Push(frame));
    }

    /// Emit the pending frame now, if any
    pub fn flush(&self) {
        let _ = self.commands.send(Command::Flush);
    }

    /// Receiver of emitted frames; starts at the idle frame
    pub fn subscribe(&self) -> watch::Receiver<RenderFrame> {
        self.frames.clone()
    }
}

async fn run(
    window: Duration,
    mut commands: mpsc::UnboundedReceiver<Command>,
    out: watch::Sender<RenderFrame>,
) {
    let mut pending: Option<RenderFrame> = None;
    let timer = tokio::time::sleep(window);
    tokio::pin!(timer);

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Push(frame)) if frame.streaming => {
                    pending = Some(frame);
                    timer.as_mut().reset(Instant::now() + window);
                }
                Some(Command::Push(frame)) => {
                    pending = None;
                    out.send_replace(frame);
                }
                Some(Command::Flush) => {
                    if let Some(frame) = pending.take() {
                        out.send_replace(frame);
                    }
                }
                None => {
                    if let Some(frame) = pending.take() {
                        out.send_replace(frame);
                    }
                    break;
                }
            },
            () = &mut timer, if pending.is_some() => {
                if let Some(frame) = pending.take() {
                    out.send_replace(frame);
                }
            }
        }
    }

    tracing::debug!("Render debouncer stopped");
}
