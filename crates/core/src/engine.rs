mod builder;
mod mailbox;
mod state;
#[cfg(test)]
mod tests;

use std::error::Error;
use std::fmt;

use chatline_model::ReplyKind;
use tokio::sync::{oneshot, watch};

use crate::transcript::Transcript;
pub use builder::EngineBuilder;
use mailbox::Mailbox;
use state::{Submit, TakeSnapshot};

/// The reason a submission was not accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SubmitError {
    /// The input is empty after trimming whitespaces.
    EmptyInput,
    /// Another submission is still waiting for its reply.
    Busy,
    /// The engine task is gone.
    EngineStopped,
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SubmitError::EmptyInput => "the input is empty",
            SubmitError::Busy => "a reply is still pending",
            SubmitError::EngineStopped => "the engine has stopped",
        })
    }
}

impl Error for SubmitError {}

/// The transcript engine, which owns the conversation and reconciles the
/// replies of a model provider into it.
///
/// All mutations of the transcript happen on one task, in the order they
/// were requested, so a reply is never interleaved with another
/// submission. The engine can be cloned cheaply, clones share the same
/// conversation.
///
/// Only one submission can be in flight. While it is pending, further
/// submissions are rejected rather than queued.
#[derive(Clone)]
pub struct Engine {
    mailbox: Mailbox,
    pending_rx: watch::Receiver<bool>,
    reply_kind: ReplyKind,
}

impl Engine {
    /// Submits a user input.
    ///
    /// This resolves as soon as the input is accepted or rejected, the
    /// reply keeps arriving afterwards. Use [`Engine::wait_settled`] or
    /// the `on_settled` callback to learn when it completes.
    ///
    /// Failures of the model provider are not reported here. They
    /// become an assistant turn telling what went wrong.
    pub async fn submit<S: Into<String>>(
        &self,
        text: S,
    ) -> Result<(), SubmitError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.mailbox
            .post(Submit {
                text: text.into(),
                ack: ack_tx,
            })
            .map_err(|_| SubmitError::EngineStopped)?;
        ack_rx.await.unwrap_or(Err(SubmitError::EngineStopped))
    }

    /// Returns a copy of the transcript as it is now.
    pub async fn snapshot(&self) -> Transcript {
        let (tx, rx) = oneshot::channel();
        self.mailbox
            .post(TakeSnapshot(tx))
            .expect("engine task has been dropped too early");
        rx.await.expect("engine task has been dropped too early")
    }

    /// Returns `true` while a submission is waiting for its reply.
    #[inline]
    pub fn is_pending(&self) -> bool {
        *self.pending_rx.borrow()
    }

    /// Returns a receiver that observes the pending flag.
    #[inline]
    pub fn subscribe_pending(&self) -> watch::Receiver<bool> {
        self.pending_rx.clone()
    }

    /// Waits until no submission is pending.
    pub async fn wait_settled(&self) {
        let mut pending_rx = self.pending_rx.clone();
        pending_rx.wait_for(|pending| !*pending).await.ok();
    }

    /// Returns the shape of replies produced by the model provider.
    #[inline]
    pub fn reply_kind(&self) -> ReplyKind {
        self.reply_kind
    }
}
