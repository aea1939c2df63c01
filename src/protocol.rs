//! Wire protocol spoken with the streaming agent backend
//!
//! One duplex channel per question: the client opens it with an
//! [`OpenRequest`], the server answers with a sequence of JSON [`Envelope`]s.

pub mod envelope;
pub mod request;

pub use envelope::{decode, AgentResponse, Envelope, MalformedEnvelope, TraceKind};
pub use request::{websocket_base, OpenRequest};
