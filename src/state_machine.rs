//! Session controller state machine
//!
//! Pure state transitions in the Elm Architecture style. The runtime owns
//! the channel, the timers and the history committer; this module only
//! decides what should happen next.

pub mod accumulator;
mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use accumulator::apply;
pub use effect::Effect;
pub use event::{Event, Inbound};
pub use state::{
    ControllerContext, ControllerState, EndReason, Phase, Session, SessionId, ToolCall,
};
pub use transition::{transition, TransitionError, TransitionResult};
