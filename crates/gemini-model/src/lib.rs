//! A whole-response model provider for the Gemini API.
//!
//! Gemini is asked through `generateContent`, which answers with the
//! completed reply. No chat session is kept on the server, every request
//! carries the whole history again.

#[macro_use]
extern crate tracing;

mod config;
mod proto;

use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chatline_model::{
    ErrorKind, ModelProvider, ModelProviderError, ModelReply, ModelRequest,
    ModelResponse, ModelResponseEvent, ReplyKind,
};
use reqwest::{Client, StatusCode, header};

pub use config::{GeminiConfig, GeminiConfigBuilder};

/// Error type for [`GeminiProvider`].
#[derive(Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
}

impl Error {
    fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    /// Returns the error message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// The streamed response of [`GeminiProvider`], which never exists.
#[derive(Debug)]
pub enum NoResponse {}

impl ModelResponse for NoResponse {
    type Error = Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        match *self.get_mut() {}
    }
}

/// Gemini model provider.
#[derive(Clone, Debug)]
pub struct GeminiProvider {
    client: Client,
    config: Arc<GeminiConfig>,
}

impl GeminiProvider {
    /// Creates a new `GeminiProvider` with the given configuration.
    #[inline]
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            client: Client::new(),
            config: Arc::new(config),
        }
    }
}

impl ModelProvider for GeminiProvider {
    type Error = Error;
    type Response = NoResponse;

    #[inline]
    fn reply_kind(&self) -> ReplyKind {
        ReplyKind::Whole
    }

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<ModelReply<Self::Response>, Self::Error>>
    + Send
    + 'static {
        let gemini_req = proto::create_request(req);
        let resp_fut = self
            .client
            .post(self.config.generate_content_url())
            .header("x-goog-api-key", &self.config.api_key)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&gemini_req)
            .send();

        async move {
            let resp = resp_fut.await.map_err(|err| {
                Error::new(format!("{err}"), ErrorKind::Network)
            })?;

            let status = resp.status();
            let body = resp.text().await.map_err(|err| {
                Error::new(format!("{err}"), ErrorKind::Network)
            })?;
            trace!("got response body: {body}");

            if !status.is_success() {
                return Err(error_from_body(status, &body));
            }

            let gemini_resp =
                serde_json::from_str::<proto::GenerateContentResponse>(&body)
                    .map_err(|err| {
                        Error::new(format!("{err}"), ErrorKind::Other)
                    })?;
            proto::extract_reply(gemini_resp).map(ModelReply::Whole)
        }
    }
}

fn error_from_body(status: StatusCode, body: &str) -> Error {
    let Ok(resp) = serde_json::from_str::<proto::ErrorResponse>(body) else {
        return Error::new(
            format!("server responded with {status}"),
            error_kind_for_status(status),
        );
    };
    let kind = match resp.error.status.as_deref() {
        Some("UNAUTHENTICATED" | "PERMISSION_DENIED") => {
            ErrorKind::Authentication
        }
        Some("RESOURCE_EXHAUSTED") => ErrorKind::RateLimitExceeded,
        // Invalid keys are reported as bad arguments.
        _ if resp.error.message.contains("API key") => ErrorKind::Authentication,
        _ => error_kind_for_status(status),
    };
    Error::new(resp.error.message, kind)
}

fn error_kind_for_status(status: StatusCode) -> ErrorKind {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ErrorKind::Authentication
        }
        StatusCode::TOO_MANY_REQUESTS => ErrorKind::RateLimitExceeded,
        _ => ErrorKind::Other,
    }
}
