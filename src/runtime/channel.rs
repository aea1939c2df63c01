//! WebSocket channel to the agent streaming endpoint

use super::traits::{Channel, ChannelConnector, ChannelError, Frame};
use crate::protocol::OpenRequest;
use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const CLOSE_ACK_TIMEOUT: Duration = Duration::from_secs(1);

/// Opens one WebSocket per session against `{ws_base}/ws/agent/stream`
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    ws_base: String,
}

impl WebSocketConnector {
    pub fn new(ws_base: impl Into<String>) -> Self {
        Self {
            ws_base: ws_base.into(),
        }
    }
}

#[async_trait]
impl ChannelConnector for WebSocketConnector {
    async fn connect(&self, request: &OpenRequest) -> Result<Box<dyn Channel>, ChannelError> {
        let url = request.stream_url(&self.ws_base)?;
        tracing::debug!(host = ?url.host_str(), dataset = %request.dataset, "Opening agent stream");

        let (stream, response) = connect_async(url.as_str())
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))?;
        tracing::debug!(status = %response.status(), "Agent stream connected");

        Ok(Box::new(WebSocketChannel { stream }))
    }
}

struct WebSocketChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Channel for WebSocketChannel {
    async fn next_frame(&mut self) -> Result<Frame, ChannelError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Frame::Text(text)),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => return Ok(Frame::Text(text)),
                    Err(e) => tracing::warn!(error = %e, "Dropping non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    return Ok(Frame::Closed {
                        code: frame.as_ref().map(|f| u16::from(f.code)),
                        reason: frame.map(|f| f.reason.into_owned()),
                    });
                }
                // Ping/pong are answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(ChannelError::Transport(e.to_string())),
                None => {
                    return Ok(Frame::Closed {
                        code: None,
                        reason: None,
                    })
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        self.stream
            .close(None)
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        // Drain until the peer acknowledges, ignoring anything still in flight
        let drain = async {
            while let Some(Ok(message)) = self.stream.next().await {
                if message.is_close() {
                    break;
                }
            }
        };
        if tokio::time::timeout(CLOSE_ACK_TIMEOUT, drain).await.is_err() {
            tracing::debug!("Peer did not acknowledge close");
        }
        Ok(())
    }
}
