//! Server-to-client envelopes and their decoder
//!
//! The backend tags every message with a loosely-typed `type` string. The
//! decoder maps it onto the closed [`Envelope`] enum: known kinds with
//! missing fields and unknown kinds are both rejected with
//! [`MalformedEnvelope`] so new server kinds surface in the logs instead of
//! disappearing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Every `type` value the decoder accepts
const KNOWN_KINDS: &[&str] = &[
    "reasoning_token",
    "answer_token",
    "tool_call",
    "tool_result",
    "data_ready",
    "answer",
    "final_answer",
    "final",
    "answer_complete",
    "final_answer_complete",
    "complete",
    "stream_end",
    "error",
    "start",
    "progress",
    "code_chunk",
    "code_generated",
    "analysis_chunk",
    "thinking",
    "thinking_token",
    "reflection",
    "reflection_chunk",
    "verification",
    "chain_of_thought",
    "reasoning",
];

/// Decode failure at the channel boundary
#[derive(Debug, Error)]
pub enum MalformedEnvelope {
    #[error("envelope is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("envelope has no `type` discriminator")]
    MissingKind,
    #[error("unknown envelope kind `{0}`")]
    UnknownKind(String),
    #[error("`{kind}` envelope is malformed: {source}")]
    InvalidFields {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("`{kind}` envelope is missing `{field}`")]
    MissingField { kind: String, field: &'static str },
}

/// Structured result the agent attaches to `data_ready` and `complete`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value")]
pub struct AgentResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub result_preview: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    /// Charts, tables and anything else the renderer may understand
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AgentResponse {
    /// The human-readable answer carried by the payload, `answer` first
    pub fn answer_text(&self) -> Option<&str> {
        [self.answer.as_deref(), self.analysis.as_deref()]
            .into_iter()
            .flatten()
            .find(|text| !text.is_empty())
    }

    /// Build from an untyped payload
    ///
    /// Known fields of an unexpected type stay in `extra` rather than
    /// failing the whole envelope; nulls count as absent.
    pub fn from_value(value: Value) -> Self {
        let mut fields = match value {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => [("data".to_string(), other)].into_iter().collect(),
        };

        let result_preview = match fields.remove("result_preview") {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => Vec::new(),
            Some(other) => {
                fields.insert("result_preview".to_string(), other);
                Vec::new()
            }
        };

        Self {
            code: take_text(&mut fields, "code"),
            stdout: take_text(&mut fields, "stdout"),
            error: take_text(&mut fields, "error"),
            result_preview,
            analysis: take_text(&mut fields, "analysis"),
            answer: take_text(&mut fields, "answer"),
            extra: fields,
        }
    }
}

impl From<Value> for AgentResponse {
    fn from(value: Value) -> Self {
        Self::from_value(value)
    }
}

/// Strings pass through and scalars are rendered as text; anything else
/// is left in place
fn take_text(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    match fields.remove(key)? {
        Value::String(text) => Some(text),
        Value::Null => None,
        scalar @ (Value::Number(_) | Value::Bool(_)) => Some(scalar.to_string()),
        other => {
            fields.insert(key.to_string(), other);
            None
        }
    }
}

/// Display-only kinds the agent emits while it works
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    Thinking,
    ThinkingToken,
    Reflection,
    ReflectionChunk,
    Verification,
    ChainOfThought,
    Reasoning,
}

/// One decoded server message
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    ReasoningToken(String),
    AnswerToken(String),
    ToolInvoked { tool: String, arguments: Value },
    ToolResult { tool: String, result: Value },
    DataReady(AgentResponse),
    /// `answer` / `final_answer` / `final`
    AnswerFragment(String),
    /// `answer_complete` / `final_answer_complete`
    AnswerFinalized(String),
    /// `complete` / `stream_end`
    Terminal {
        payload: Option<AgentResponse>,
        /// Some servers put the answer at the top level instead of in `data`
        answer: Option<String>,
    },
    Error(String),
    /// `start` / `progress`
    Stage(String),
    CodeChunk(String),
    CodeGenerated(String),
    AnalysisChunk(String),
    Trace(TraceKind),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEnvelope {
    ReasoningToken {
        token: String,
    },
    AnswerToken {
        token: String,
    },
    ToolCall {
        tool: String,
        #[serde(default)]
        arguments: Value,
    },
    ToolResult {
        tool: String,
        #[serde(default)]
        result: Value,
    },
    DataReady {
        data: Value,
    },
    #[serde(alias = "final_answer", alias = "final")]
    Answer {
        content: String,
    },
    #[serde(alias = "final_answer_complete")]
    AnswerComplete {
        content: String,
    },
    #[serde(alias = "stream_end")]
    Complete {
        #[serde(default)]
        data: Value,
        #[serde(default)]
        answer: Value,
    },
    Error {
        message: String,
    },
    #[serde(alias = "progress")]
    Start {
        message: String,
    },
    CodeChunk {
        chunk: String,
    },
    CodeGenerated {
        code: String,
    },
    AnalysisChunk {
        chunk: String,
    },
    Thinking {},
    ThinkingToken {},
    Reflection {},
    ReflectionChunk {},
    Verification {},
    ChainOfThought {},
    Reasoning {},
}

/// Decode one raw text frame into an [`Envelope`]
pub fn decode(raw: &str) -> Result<Envelope, MalformedEnvelope> {
    let value: Value = serde_json::from_str(raw).map_err(MalformedEnvelope::InvalidJson)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(MalformedEnvelope::MissingKind)?
        .to_string();

    if !KNOWN_KINDS.contains(&kind.as_str()) {
        return Err(MalformedEnvelope::UnknownKind(kind));
    }

    let wire: WireEnvelope =
        serde_json::from_value(value).map_err(|source| MalformedEnvelope::InvalidFields {
            kind: kind.clone(),
            source,
        })?;

    let envelope = match wire {
        WireEnvelope::ReasoningToken { token } => {
            require_non_empty(&kind, "token", &token)?;
            Envelope::ReasoningToken(token)
        }
        WireEnvelope::AnswerToken { token } => {
            require_non_empty(&kind, "token", &token)?;
            Envelope::AnswerToken(token)
        }
        WireEnvelope::ToolCall { tool, arguments } => {
            require_non_empty(&kind, "tool", &tool)?;
            if arguments.is_null() {
                return Err(missing(&kind, "arguments"));
            }
            Envelope::ToolInvoked { tool, arguments }
        }
        WireEnvelope::ToolResult { tool, result } => {
            require_non_empty(&kind, "tool", &tool)?;
            if result.is_null() {
                return Err(missing(&kind, "result"));
            }
            Envelope::ToolResult {
                tool,
                result: parse_tool_result(result),
            }
        }
        WireEnvelope::DataReady { data } => {
            if data.is_null() {
                return Err(missing(&kind, "data"));
            }
            Envelope::DataReady(AgentResponse::from_value(data))
        }
        WireEnvelope::Answer { content } => {
            require_non_empty(&kind, "content", &content)?;
            Envelope::AnswerFragment(content)
        }
        WireEnvelope::AnswerComplete { content } => {
            require_non_empty(&kind, "content", &content)?;
            Envelope::AnswerFinalized(content)
        }
        // The payload is best-effort; a terminal envelope must never be lost to it
        WireEnvelope::Complete { data, answer } => Envelope::Terminal {
            payload: (!data.is_null()).then(|| AgentResponse::from_value(data)),
            answer: answer
                .as_str()
                .filter(|a| !a.is_empty())
                .map(str::to_string),
        },
        WireEnvelope::Error { message } => {
            require_non_empty(&kind, "message", &message)?;
            Envelope::Error(message)
        }
        WireEnvelope::Start { message } => Envelope::Stage(message),
        WireEnvelope::CodeChunk { chunk } => Envelope::CodeChunk(chunk),
        WireEnvelope::CodeGenerated { code } => Envelope::CodeGenerated(code),
        WireEnvelope::AnalysisChunk { chunk } => Envelope::AnalysisChunk(chunk),
        WireEnvelope::Thinking {} => Envelope::Trace(TraceKind::Thinking),
        WireEnvelope::ThinkingToken {} => Envelope::Trace(TraceKind::ThinkingToken),
        WireEnvelope::Reflection {} => Envelope::Trace(TraceKind::Reflection),
        WireEnvelope::ReflectionChunk {} => Envelope::Trace(TraceKind::ReflectionChunk),
        WireEnvelope::Verification {} => Envelope::Trace(TraceKind::Verification),
        WireEnvelope::ChainOfThought {} => Envelope::Trace(TraceKind::ChainOfThought),
        WireEnvelope::Reasoning {} => Envelope::Trace(TraceKind::Reasoning),
    };

    Ok(envelope)
}

fn missing(kind: &str, field: &'static str) -> MalformedEnvelope {
    MalformedEnvelope::MissingField {
        kind: kind.to_string(),
        field,
    }
}

fn require_non_empty(kind: &str, field: &'static str, value: &str) -> Result<(), MalformedEnvelope> {
    if value.is_empty() {
        Err(missing(kind, field))
    } else {
        Ok(())
    }
}

/// Tool results usually arrive as JSON encoded into a string
fn parse_tool_result(result: Value) -> Value {
    match result {
        Value::String(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        other => other,
    }
}
