//! Client configuration from the environment

use crate::protocol::websocket_base;
use crate::render::DEFAULT_DEBOUNCE_WINDOW;
use crate::state_machine::state::{DEFAULT_CLEAR_GRACE, DEFAULT_CLOSE_LINGER};
use crate::state_machine::ControllerContext;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "http://localhost:8000";
pub const DEFAULT_DATASET: &str = "all";
pub const DEFAULT_MODEL: &str = "z-ai/glm-4.6";
pub const DEFAULT_PERSONA: &str = "default";

/// Dataset values the agent understands
pub const DATASETS: &[&str] = &["incident", "hazard", "audit", "inspection", "all"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// REST API base; the stream URL is derived from it
    pub api_base: String,
    pub dataset: String,
    pub model: String,
    pub persona: String,
    pub debounce_window: Duration,
    pub close_linger: Duration,
    pub clear_grace: Duration,
    pub db_path: PathBuf,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; missing or unparsable values use defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let millis = |key: &str, default: Duration| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map_or(default, Duration::from_millis)
        };

        let dataset = text("COPILOT_DATASET", DEFAULT_DATASET);
        let dataset = if DATASETS.contains(&dataset.as_str()) {
            dataset
        } else {
            tracing::warn!(%dataset, "Unknown dataset, using default");
            DEFAULT_DATASET.to_string()
        };

        let db_path = lookup("COPILOT_DB_PATH").map_or_else(
            || {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(format!("{home}/.safety-copilot/history.db"))
            },
            PathBuf::from,
        );

        Self {
            api_base: text("COPILOT_API_BASE", DEFAULT_API_BASE),
            dataset,
            model: text("COPILOT_MODEL", DEFAULT_MODEL),
            persona: text("COPILOT_PERSONA", DEFAULT_PERSONA),
            debounce_window: millis("COPILOT_DEBOUNCE_MS", DEFAULT_DEBOUNCE_WINDOW),
            close_linger: millis("COPILOT_CLOSE_LINGER_MS", DEFAULT_CLOSE_LINGER),
            clear_grace: millis("COPILOT_CLEAR_GRACE_MS", DEFAULT_CLEAR_GRACE),
            db_path,
        }
    }

    /// WebSocket base for the agent stream
    pub fn ws_base(&self) -> String {
        websocket_base(&self.api_base)
    }

    pub fn controller_context(&self) -> ControllerContext {
        ControllerContext::new(&self.model, &self.persona)
            .with_close_linger(self.close_linger)
            .with_clear_grace(self.clear_grace)
    }
}
