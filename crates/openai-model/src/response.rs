use std::pin::Pin;
use std::task::{Context, Poll, ready};

use chatline_model::{
    ErrorKind, ModelFinishReason, ModelResponse, ModelResponseEvent,
};
use pin_project_lite::pin_project;

use crate::Error;
use crate::io::Sse;
use crate::proto::ChatCompletionChunk;

struct PartialState {
    sse: Sse,
    id: Option<String>,
    // This field will be cleared after the response returns the complete event.
    pending_finish_reason: Option<ModelFinishReason>,
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextEvent = Result<(Option<ModelResponseEvent>, PartialState), Error>;

pin_project! {
    pub struct OpenAIResponse {
        next_event_fut: Option<PinnedFuture<NextEvent>>,
    }
}

impl OpenAIResponse {
    #[inline]
    pub fn from_sse(sse: Sse) -> Self {
        let partial_state = PartialState {
            sse,
            id: None,
            pending_finish_reason: None,
        };
        let next_event_fut = async move { next_event(partial_state).await };
        Self {
            next_event_fut: Some(Box::pin(next_event_fut)),
        }
    }
}

impl ModelResponse for OpenAIResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.project();
        let Some(next_event_fut) = this.next_event_fut else {
            return Poll::Ready(Ok(None));
        };
        let (event, partial_state) =
            match ready!(next_event_fut.as_mut().poll(cx)) {
                Ok((Some(event), partial_state)) => (event, partial_state),
                Ok((None, _)) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Ok(None));
                }
                Err(err) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Err(err));
                }
            };

        // The stream may still have more data to pull, create a new future for
        // the next event.
        let next_event_fut = async move { next_event(partial_state).await };
        *this.next_event_fut = Some(Box::pin(next_event_fut));

        Poll::Ready(Ok(Some(event)))
    }
}

async fn next_event(
    mut partial_state: PartialState,
) -> Result<(Option<ModelResponseEvent>, PartialState), Error> {
    // A finish reason is always reported after the delta of the same chunk.
    if let Some(finish_reason) = partial_state.pending_finish_reason.take() {
        return Ok((
            Some(ModelResponseEvent::Completed(finish_reason)),
            partial_state,
        ));
    }

    loop {
        let sse_event = match partial_state.sse.next_event().await {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(err) => {
                return Err(Error::new(format!("{err:?}"), ErrorKind::Network));
            }
        };
        trace!("got sse event: {sse_event}");
        if sse_event == "[DONE]" {
            break;
        }

        let mut chunk = serde_json::from_str::<ChatCompletionChunk>(&sse_event)
            .map_err(|err| Error::new(format!("{err}"), ErrorKind::Other))?;
        if partial_state.id.get_or_insert_with(|| chunk.id.clone()) != &chunk.id
        {
            return Err(Error::new("chunk id mismatch", ErrorKind::Other));
        };

        // Chunks without choices only carry usage statistics.
        let Some(choice) = chunk.choices.pop() else {
            continue;
        };

        if let Some(finish_reason) = choice.finish_reason {
            partial_state.pending_finish_reason = Some(match &*finish_reason {
                "content_filter" => {
                    return Err(Error::new(
                        "the reply was blocked by the content filter",
                        ErrorKind::Moderated,
                    ));
                }
                "length" => ModelFinishReason::Length,
                _ => ModelFinishReason::Stop,
            });
        }

        if let Some(content) = choice.delta.content {
            return Ok((
                Some(ModelResponseEvent::MessageDelta(content)),
                partial_state,
            ));
        }

        if let Some(finish_reason) = partial_state.pending_finish_reason.take()
        {
            return Ok((
                Some(ModelResponseEvent::Completed(finish_reason)),
                partial_state,
            ));
        }
    }

    Ok((None, partial_state))
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use bytes::Bytes;
    use chatline_model::ModelProviderError;

    use super::*;
    use crate::Chunks;

    fn response_from(fixture: &'static [u8]) -> OpenAIResponse {
        let chunks =
            Chunks::from_vec_deque(vec![Bytes::from_static(fixture)].into());
        OpenAIResponse::from_sse(Sse::new(chunks))
    }

    #[tokio::test]
    async fn test_simple_events() {
        let mut resp = pin!(response_from(include_bytes!(
            "../fixtures/stream_response.txt"
        )));
        let mut events = vec![];
        while let Some(event) = poll_fn(|cx| resp.as_mut().poll_next_event(cx))
            .await
            .unwrap()
        {
            events.push(event);
        }
        assert_eq!(
            events,
            [
                ModelResponseEvent::MessageDelta("".to_owned()),
                ModelResponseEvent::MessageDelta("He".to_owned()),
                ModelResponseEvent::MessageDelta("llo".to_owned()),
                ModelResponseEvent::MessageDelta("!".to_owned()),
                ModelResponseEvent::Completed(ModelFinishReason::Stop),
            ]
        );

        // Exhausted responses keep reporting the end.
        let event = poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await;
        assert!(matches!(event, Ok(None)));
    }

    #[tokio::test]
    async fn test_content_filter() {
        let mut resp = pin!(response_from(include_bytes!(
            "../fixtures/filtered_response.txt"
        )));
        let first = poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await;
        assert_eq!(
            first.unwrap(),
            Some(ModelResponseEvent::MessageDelta("I can".to_owned()))
        );
        let err = poll_fn(|cx| resp.as_mut().poll_next_event(cx))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Moderated);
    }

    #[tokio::test]
    async fn test_broken_payload() {
        let mut resp = pin!(response_from(b"data: {not json}\n\n"));
        let result = poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await;
        assert!(result.is_err());
    }
}
