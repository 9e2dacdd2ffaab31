use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chatline_core::{
    Change, Engine, EngineBuilder, ReplyKind, SubmitError, Transcript,
};
use chatline_model::ModelProvider;

type Draft = Arc<Mutex<String>>;

fn lock(draft: &Draft) -> MutexGuard<'_, String> {
    draft.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A chat widget builder.
///
/// See [`ChatWidget`].
pub struct ChatWidgetBuilder {
    engine_builder: EngineBuilder,
    draft: Draft,
}

impl ChatWidgetBuilder {
    /// Creates a widget builder with a specified model provider.
    pub fn with_model_provider<M: ModelProvider + 'static>(
        provider: M,
    ) -> Self {
        Self {
            engine_builder: EngineBuilder::with_model_provider(provider),
            draft: Draft::default(),
        }
    }

    /// Attaches a callback to be invoked after every transcript mutation.
    #[inline]
    pub fn on_change(
        mut self,
        on_change: impl Fn(&Change, &Transcript) + Send + Sync + 'static,
    ) -> Self {
        self.engine_builder = self.engine_builder.on_change(on_change);
        self
    }

    /// Attaches a callback to be invoked when a reply has settled.
    #[inline]
    pub fn on_settled(
        mut self,
        on_settled: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        self.engine_builder = self.engine_builder.on_settled(on_settled);
        self
    }

    /// Builds a new widget.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn build(self) -> ChatWidget {
        let draft = self.draft;
        let engine = self
            .engine_builder
            .on_clear_draft({
                let draft = Arc::clone(&draft);
                move || {
                    trace!("clearing draft");
                    lock(&draft).clear();
                }
            })
            .build();

        ChatWidget { engine, draft }
    }
}

/// A chat widget, like a window that displays messages and has an input
/// box.
///
/// The widget owns the draft of the input box. The conversation itself
/// lives in an [`Engine`], which decides when the draft gets cleared:
/// right after sending for streaming providers, and after the reply has
/// arrived for the others. A rejected send leaves the draft untouched.
pub struct ChatWidget {
    engine: Engine,
    draft: Draft,
}

impl ChatWidget {
    /// Replaces the content of the input box.
    pub fn set_draft<S: Into<String>>(&self, text: S) {
        *lock(&self.draft) = text.into();
    }

    /// Returns the content of the input box.
    pub fn draft(&self) -> String {
        lock(&self.draft).clone()
    }

    /// Sends the content of the input box.
    pub async fn send(&self) -> Result<(), SubmitError> {
        let text = self.draft();
        let result = self.engine.submit(text).await;
        if let Err(err) = &result {
            debug!("draft not sent: {err}");
        }
        result
    }

    /// Returns a copy of the conversation as it is now.
    #[inline]
    pub async fn transcript(&self) -> Transcript {
        self.engine.snapshot().await
    }

    /// Returns `true` while waiting for a reply.
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.engine.is_pending()
    }

    /// Waits until no reply is pending.
    #[inline]
    pub async fn wait_settled(&self) {
        self.engine.wait_settled().await;
    }

    /// Returns the shape of replies the widget is talking to.
    #[inline]
    pub fn reply_kind(&self) -> ReplyKind {
        self.engine.reply_kind()
    }

    /// Returns the underlying engine.
    #[inline]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }
}
