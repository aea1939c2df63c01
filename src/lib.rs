//! Safety Copilot streaming conversation client
//!
//! Opens one streaming channel per question to the analytics agent, folds
//! the typed progress envelopes it sends into an answer, debounces what is
//! shown while tokens arrive, and commits exactly one history entry per
//! question.

#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::module_name_repetitions
)]

pub mod config;
pub mod history;
pub mod protocol;
pub mod render;
pub mod runtime;
pub mod state_machine;

pub use config::ClientConfig;
pub use history::{CommittedSession, ConversationLog, InMemoryLogStore, LogStore, SqliteLogStore};
pub use render::{Notice, RenderFrame};
pub use runtime::{start, ClientEvent, RuntimeError, SessionHandle, WebSocketConnector};
pub use state_machine::{Phase, SessionId};
