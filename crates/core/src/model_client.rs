use std::error::Error;
use std::fmt;
use std::future::poll_fn;
use std::pin::{Pin, pin};
use std::sync::Arc;

use chatline_model::{
    ErrorKind, ModelFinishReason, ModelProvider, ModelProviderError,
    ModelReply, ModelRequest, ModelResponse, ModelResponseEvent, ReplyKind,
};
use tracing::Instrument;

pub(crate) type SendRequestResult =
    Result<ModelClientResponse, Box<dyn ModelProviderError>>;
type BoxedSendRequestFuture =
    Pin<Box<dyn Future<Output = SendRequestResult> + Send>>;
#[rustfmt::skip]
type HandlerFn = Arc<
    dyn Fn(ModelRequest, Box<dyn Fn(String) + Send + 'static>)
        -> BoxedSendRequestFuture + Send + Sync
>;

/// A wrapper around a model provider that maintains an execution
/// environment for the provider and provides a type-erased interface
/// for the other modules.
#[derive(Clone)]
pub struct ModelClient {
    handler_fn: HandlerFn,
    reply_kind: ReplyKind,
}

impl ModelClient {
    #[inline]
    pub fn new<P: ModelProvider + 'static>(provider: P) -> Self {
        let reply_kind = provider.reply_kind();
        // We have to erase the type `P`, since `ModelClient` doesn't have a
        // generic parameter and we don't want it either.
        let handler_fn: HandlerFn = Arc::new(move |req, on_fragment| {
            let fut = provider.send_request(&req);
            Box::pin(
                async move {
                    trace!("got a request: {:?}", req);
                    let reply_or_err = fut.await;
                    handle_reply::<P>(reply_or_err, on_fragment).await
                }
                .instrument(trace_span!("model client req")),
            )
        });
        Self {
            handler_fn,
            reply_kind,
        }
    }

    #[inline]
    pub fn reply_kind(&self) -> ReplyKind {
        self.reply_kind
    }

    /// Sends a request and returns the completed reply.
    ///
    /// For streaming providers, `on_fragment` is called with every
    /// fragment in arrival order before this method returns. Whole
    /// replies never call it.
    #[inline]
    pub async fn send_request(
        &self,
        req: ModelRequest,
        on_fragment: impl Fn(String) + Send + 'static,
    ) -> SendRequestResult {
        (self.handler_fn)(req, Box::new(on_fragment)).await
    }
}

/// The provider panicked before producing a reply.
#[derive(Debug)]
pub struct ProviderCrashed;

impl fmt::Display for ProviderCrashed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("the model provider crashed")
    }
}

impl Error for ProviderCrashed {}

impl ModelProviderError for ProviderCrashed {
    #[inline]
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// A completely received reply from the model client.
#[derive(Clone, Debug)]
pub struct ModelClientResponse {
    /// The whole reply text.
    pub text: String,
    /// How many fragments were delivered through `on_fragment`.
    pub fragments: usize,
    /// The reason the model finished generating.
    pub finish_reason: Option<ModelFinishReason>,
}

async fn handle_reply<P: ModelProvider + 'static>(
    reply_or_err: Result<ModelReply<P::Response>, P::Error>,
    on_fragment: Box<dyn Fn(String) + Send + 'static>,
) -> SendRequestResult {
    let resp = match reply_or_err {
        Ok(ModelReply::Whole(text)) => {
            trace!("got a whole reply");
            return Ok(ModelClientResponse {
                text,
                fragments: 0,
                finish_reason: Some(ModelFinishReason::Stop),
            });
        }
        Ok(ModelReply::Streaming(resp)) => resp,
        Err(err) => {
            error!("got an error: {err:?}");
            return Err(Box::new(err));
        }
    };

    let mut text = String::new();
    let mut fragments = 0;
    let mut finish_reason = None;

    trace!("start receiving events");

    let mut pinned_resp = pin!(resp);
    loop {
        let event_or_err =
            poll_fn(|cx| pinned_resp.as_mut().poll_next_event(cx)).await;
        let event = match event_or_err {
            Ok(event) => event,
            Err(err) => {
                error!("got an error after {fragments} fragments: {err:?}");
                return Err(Box::new(err));
            }
        };

        let Some(event) = event else {
            break;
        };
        trace!("got an event: {event:?}");

        match event {
            ModelResponseEvent::MessageDelta(delta) => {
                text.push_str(&delta);
                fragments += 1;
                on_fragment(delta);
            }
            ModelResponseEvent::Completed(reason) => {
                finish_reason = Some(reason);
            }
        }
    }

    trace!("finished a request");

    Ok(ModelClientResponse {
        text,
        fragments,
        finish_reason,
    })
}
