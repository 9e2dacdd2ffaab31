//! A chat widget that talks to a hosted LLM.
//!
//! The crate includes a CLI tool for chatting in the terminal. And you can
//! also use it as a library to bring a chat box into your own host apps:
//! [`ChatWidget`] owns the draft input, the [`core::Engine`] inside it owns
//! the conversation.

#![deny(missing_docs)]

#[allow(unused_imports)]
#[macro_use]
extern crate tracing;

mod widget;

pub use widget::{ChatWidget, ChatWidgetBuilder};

/// Re-exports of [`chatline_core`] crate.
pub mod core {
    pub use chatline_core::*;
}

/// Re-exports of the bundled model providers.
pub mod providers {
    pub use chatline_gemini_model::{
        GeminiConfig, GeminiConfigBuilder, GeminiProvider,
    };
    pub use chatline_openai_model::{
        OpenAIConfig, OpenAIConfigBuilder, OpenAIProvider,
    };
}
