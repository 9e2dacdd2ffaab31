use chatline_model::ModelProvider;
use tokio::sync::watch;

use super::Engine;
use super::mailbox::spawn_engine;
use super::state::{ChangeFn, EngineState, NotifyFn};
use crate::model_client::ModelClient;
use crate::transcript::{Change, Transcript};

/// [`Engine`] builder.
pub struct EngineBuilder {
    model_client: ModelClient,
    on_change: Option<ChangeFn>,
    on_clear_draft: Option<NotifyFn>,
    on_settled: Option<NotifyFn>,
}

impl EngineBuilder {
    /// Creates a new builder with the specified model provider.
    #[inline]
    pub fn with_model_provider<P: ModelProvider + 'static>(
        provider: P,
    ) -> Self {
        Self {
            model_client: ModelClient::new(provider),
            on_change: None,
            on_clear_draft: None,
            on_settled: None,
        }
    }

    /// Attaches a callback to be invoked after every transcript mutation.
    ///
    /// The callback runs on the engine task and must not block.
    #[inline]
    pub fn on_change(
        mut self,
        on_change: impl Fn(&Change, &Transcript) + Send + Sync + 'static,
    ) -> Self {
        self.on_change = Some(Box::new(on_change));
        self
    }

    /// Attaches a callback to be invoked when the draft input should be
    /// cleared.
    ///
    /// Streaming providers clear the draft as soon as the input is
    /// dispatched, whole-response providers once the reply has settled.
    #[inline]
    pub fn on_clear_draft(
        mut self,
        on_clear_draft: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        self.on_clear_draft = Some(Box::new(on_clear_draft));
        self
    }

    /// Attaches a callback to be invoked when a submission has settled.
    #[inline]
    pub fn on_settled(
        mut self,
        on_settled: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        self.on_settled = Some(Box::new(on_settled));
        self
    }

    /// Builds the engine.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn build(self) -> Engine {
        let EngineBuilder {
            model_client,
            on_change,
            on_clear_draft,
            on_settled,
        } = self;

        let reply_kind = model_client.reply_kind();
        let (pending_tx, pending_rx) = watch::channel(false);
        let mut state = EngineState::new(model_client, pending_tx);
        state.on_change = on_change;
        state.on_clear_draft = on_clear_draft;
        state.on_settled = on_settled;

        Engine {
            mailbox: spawn_engine(state),
            pending_rx,
            reply_kind,
        }
    }
}
