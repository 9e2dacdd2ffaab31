//! An abstraction layer for the chat backends.
//!
//! This crate establishes an unified protocol for the transcript engine
//! to talk to various hosted LLMs, so that the engine can switch between
//! a backend that answers with one completed text and a backend that
//! streams the answer in fragments, without modifying the core codebase.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to.

#![deny(missing_docs)]

mod error;
mod provider;
mod request;
mod response;

pub use error::*;
pub use provider::*;
pub use request::*;
pub use response::*;
