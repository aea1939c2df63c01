//! Trait abstractions for runtime I/O
//!
//! These traits let the executor run against a scripted mock channel in
//! tests and a WebSocket in production.

use crate::protocol::OpenRequest;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// One unit read from a duplex channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A text message carrying one JSON envelope
    Text(String),
    /// The peer closed the channel
    Closed {
        code: Option<u16>,
        reason: Option<String>,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Invalid stream URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Failed to connect: {0}")]
    Connect(String),
    #[error("Transport error: {0}")]
    Transport(String),
}

/// An open duplex channel to the agent
#[async_trait]
pub trait Channel: Send {
    /// Wait for the next frame
    async fn next_frame(&mut self) -> Result<Frame, ChannelError>;

    /// Close the channel from our side
    async fn close(&mut self) -> Result<(), ChannelError>;
}

/// Factory for per-session channels
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self, request: &OpenRequest) -> Result<Box<dyn Channel>, ChannelError>;
}

#[async_trait]
impl<T: ChannelConnector + ?Sized> ChannelConnector for Arc<T> {
    async fn connect(&self, request: &OpenRequest) -> Result<Box<dyn Channel>, ChannelError> {
        (**self).connect(request).await
    }
}
