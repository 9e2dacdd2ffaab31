//! A local fake model for testing purpose.

mod preset;

use std::collections::VecDeque;
use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use chatline_model::{
    ErrorKind, ModelFinishReason, ModelMessage, ModelProvider,
    ModelProviderError, ModelReply, ModelRequest, ModelResponse,
    ModelResponseEvent, ReplyKind,
};
use tokio::time::{Sleep, sleep};

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

#[derive(Debug)]
pub struct TestModelResponse {
    events: VecDeque<PresetEvent>,
    completed: bool,
    delay: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl ModelResponse for TestModelResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.get_mut();

        if this.completed {
            // In case this method is called after completion.
            return Poll::Ready(Ok(None));
        }

        if let Some(sleep) = &mut this.sleep {
            ready!(sleep.as_mut().poll(cx));
            this.sleep = None;

            return match this.events.pop_front() {
                Some(PresetEvent::MessageDelta(delta)) => {
                    Poll::Ready(Ok(Some(ModelResponseEvent::MessageDelta(delta))))
                }
                Some(PresetEvent::Error(message)) => {
                    this.completed = true;
                    Poll::Ready(Err(Error {
                        message,
                        kind: ErrorKind::Network,
                    }))
                }
                None => {
                    this.completed = true;
                    Poll::Ready(Ok(Some(ModelResponseEvent::Completed(
                        ModelFinishReason::Stop,
                    ))))
                }
            };
        }
        this.sleep = Some(Box::pin(sleep(this.delay)));
        Pin::new(this).poll_next_event(cx)
    }
}

/// A local fake model for testing purpose.
///
/// Before sending requests, you need to setup the reply script, which is
/// how the model should respond to a request. The n-th reply in the script
/// answers a request whose history contains n user messages. If there are
/// no enough replies in the script, an error will be returned.
///
/// Every request sent is recorded, clones of the provider share the log.
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
#[derive(Clone)]
pub struct TestModelProvider {
    reply_kind: ReplyKind,
    script: Vec<PresetResponse>,
    delay: Option<Duration>,
    requests: Arc<Mutex<Vec<ModelRequest>>>,
}

impl TestModelProvider {
    /// Creates a provider that replies with the given shape.
    #[inline]
    pub fn new(reply_kind: ReplyKind) -> Self {
        Self {
            reply_kind,
            script: vec![],
            delay: None,
            requests: Default::default(),
        }
    }

    /// Creates a provider that streams its replies.
    #[inline]
    pub fn streaming() -> Self {
        Self::new(ReplyKind::Streaming)
    }

    /// Creates a provider that replies with completed texts.
    #[inline]
    pub fn whole() -> Self {
        Self::new(ReplyKind::Whole)
    }

    /// Appends a reply to the script, the n-th user turn gets the n-th
    /// reply.
    #[inline]
    pub fn add_reply(&mut self, preset: PresetResponse) {
        self.script.push(preset);
    }

    /// Sets the pause before each streamed event, or before the whole
    /// reply is delivered.
    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = Some(duration);
    }

    /// Returns the requests received so far.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    /// Returns how many requests have been received.
    #[inline]
    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    fn reply_for(
        &self,
        req: &ModelRequest,
    ) -> Result<ModelReply<TestModelResponse>, Error> {
        let user_turns = req
            .messages
            .iter()
            .filter(|msg| matches!(msg, ModelMessage::User(_)))
            .count();
        let Some(preset) = user_turns
            .checked_sub(1)
            .and_then(|idx| self.script.get(idx))
        else {
            return Err(Error {
                message: "no enough replies".to_owned(),
                kind: ErrorKind::Other,
            });
        };

        if let Some(message) = &preset.dispatch_error {
            return Err(Error {
                message: message.clone(),
                kind: ErrorKind::Authentication,
            });
        }

        match self.reply_kind {
            ReplyKind::Whole => {
                preset.whole_text().map(ModelReply::Whole).map_err(|message| {
                    Error {
                        message,
                        kind: ErrorKind::Other,
                    }
                })
            }
            ReplyKind::Streaming => Ok(ModelReply::Streaming(TestModelResponse {
                events: preset.events.iter().cloned().collect(),
                completed: false,
                delay: self.delay.unwrap_or(Duration::from_millis(1)),
                sleep: None,
            })),
        }
    }
}

impl ModelProvider for TestModelProvider {
    type Error = crate::Error;
    type Response = TestModelResponse;

    #[inline]
    fn reply_kind(&self) -> ReplyKind {
        self.reply_kind
    }

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<ModelReply<Self::Response>, Self::Error>>
    + Send
    + 'static {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(req.clone());
        }
        let reply = self.reply_for(req);
        // Streaming replies are paced per event instead.
        let delay = self
            .delay
            .filter(|_| self.reply_kind == ReplyKind::Whole);
        async move {
            if let Some(delay) = delay {
                sleep(delay).await;
            }
            reply
        }
    }
}
