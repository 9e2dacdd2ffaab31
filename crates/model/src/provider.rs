use std::error::Error;

use crate::error::ErrorKind;
use crate::request::ModelRequest;
use crate::response::ModelResponse;

/// The error type for a model provider.
pub trait ModelProviderError: Error + Send + Sync + 'static {
    /// Returns the kind of this error.
    fn kind(&self) -> ErrorKind;
}

/// The shape in which a provider delivers its replies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReplyKind {
    /// The reply arrives as one completed text.
    Whole,
    /// The reply arrives as a sequence of text fragments.
    Streaming,
}

/// A reply to a [`ModelRequest`].
#[derive(Debug)]
pub enum ModelReply<R> {
    /// The completed reply text.
    Whole(String),
    /// A response that yields the reply in fragments.
    Streaming(R),
}

/// A type that represents a model provider, which is an entry for
/// sending conversations to a backend and getting replies.
///
/// Once the provider is created, it should behave like a stateless object.
/// It can still have internal state, but callers should not rely on it,
/// and the provider should be prepared for being dropped anytime.
/// Credentials and model selection are part of the provider's own
/// configuration, never of the request.
pub trait ModelProvider: Send + Sync {
    /// The error type that may be returned by the provider.
    type Error: ModelProviderError;

    /// The streamed response type for this provider.
    type Response: ModelResponse<Error = Self::Error>;

    /// Returns the shape of replies this provider produces.
    ///
    /// Callers may use it before sending a request, so it must not
    /// change during the lifetime of the provider.
    fn reply_kind(&self) -> ReplyKind;

    /// Sends a request to the model.
    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<
        Output = Result<ModelReply<Self::Response>, Self::Error>,
    > + Send
    + 'static;
}
