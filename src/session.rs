//! Session controller
//!
//! Owns the transcript, the draft input and the set of open agent streams.
//! Operations are synchronous and return the effects the runtime must carry
//! out (open/close streams, run tools), following the Elm Architecture split
//! between pure state updates and I/O.

mod controller;
mod effect;
mod error;

#[cfg(test)]
mod proptests;

pub use controller::{EventOutcome, Session, SessionConfig, SessionStatus};
pub use effect::Effect;
pub use error::{ExecutionError, SessionError, TransportError};
