//! The transcript engine: it keeps the conversation, sends it to a model
//! provider, and merges the reply back, whether it arrives whole or in
//! fragments.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod engine;
mod model_client;
pub mod transcript;

pub use chatline_model::ReplyKind;
pub use engine::{Engine, EngineBuilder, SubmitError};
pub use transcript::{Change, Role, Transcript, Turn};
