//! Channel open request

use serde::{Deserialize, Serialize};
use url::Url;

/// Path of the agent streaming endpoint, relative to the WebSocket base
const STREAM_PATH: &str = "/ws/agent/stream";

/// Connection parameters for one session's channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenRequest {
    pub question: String,
    pub dataset: String,
    pub model: String,
    pub persona: String,
}

impl OpenRequest {
    /// Build the stream URL with the request carried as query parameters
    pub fn stream_url(&self, ws_base: &str) -> Result<Url, url::ParseError> {
        let base = ws_base.trim_end_matches('/');
        Url::parse_with_params(
            &format!("{base}{STREAM_PATH}"),
            [
                ("question", self.question.as_str()),
                ("dataset", self.dataset.as_str()),
                ("model", self.model.as_str()),
                ("persona", self.persona.as_str()),
            ],
        )
    }
}

/// Derive the WebSocket base from the REST API base (`http` -> `ws`, `https` -> `wss`)
pub fn websocket_base(api_base: &str) -> String {
    if let Some(rest) = api_base.strip_prefix("http") {
        format!("ws{rest}")
    } else {
        api_base.to_string()
    }
}
