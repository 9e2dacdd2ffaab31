use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use chatline_model::{
    ModelMessage, ModelProvider, ModelReply, ModelRequest, ReplyKind,
};
use chatline_test_model::{
    Error as TestModelError, PresetResponse, TestModelProvider,
    TestModelResponse,
};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

use super::state::FragmentReceived;
use crate::{Engine, EngineBuilder, Role, SubmitError, Transcript};

type Log = Arc<Mutex<Vec<String>>>;

async fn settle(engine: &Engine) {
    timeout(Duration::from_secs(1), engine.wait_settled())
        .await
        .unwrap();
}

fn turns(transcript: &Transcript) -> Vec<(Role, &str)> {
    transcript
        .turns()
        .iter()
        .map(|turn| (turn.role(), turn.text()))
        .collect()
}

/// Builds an engine that logs every callback into the returned log.
fn logged_engine(provider: TestModelProvider) -> (Engine, Log) {
    let log = Log::default();
    let engine = EngineBuilder::with_model_provider(provider)
        .on_change({
            let log = Arc::clone(&log);
            move |change, _| log.lock().unwrap().push(format!("{change:?}"))
        })
        .on_clear_draft({
            let log = Arc::clone(&log);
            move || log.lock().unwrap().push("clear".to_owned())
        })
        .on_settled({
            let log = Arc::clone(&log);
            move || log.lock().unwrap().push("settled".to_owned())
        })
        .build();
    (engine, log)
}

#[tokio::test]
async fn test_whole_reply() {
    let mut provider = TestModelProvider::whole();
    provider.add_reply(PresetResponse::with_fragments(["Hello!"]));

    let engine = EngineBuilder::with_model_provider(provider).build();
    assert_eq!(engine.reply_kind(), ReplyKind::Whole);
    engine.submit("Hi").await.unwrap();
    settle(&engine).await;

    let transcript = engine.snapshot().await;
    assert_eq!(
        turns(&transcript),
        [(Role::User, "Hi"), (Role::Assistant, "Hello!")]
    );
    assert!(transcript.turns().iter().all(|turn| turn.is_frozen()));
    assert!(!engine.is_pending());
}

#[tokio::test]
async fn test_streaming_intermediate_states() {
    let mut provider = TestModelProvider::streaming();
    provider.add_reply(PresetResponse::with_fragments(["He", "llo", "!"]));

    let states = Arc::new(Mutex::new(Vec::new()));
    let engine = EngineBuilder::with_model_provider(provider)
        .on_change({
            let states = Arc::clone(&states);
            move |change, transcript| {
                let turn = transcript.get(change.index()).unwrap();
                if turn.role() == Role::Assistant && !turn.is_frozen() {
                    states.lock().unwrap().push(turn.text().to_owned());
                }
            }
        })
        .build();
    engine.submit("Hi").await.unwrap();
    settle(&engine).await;

    assert_eq!(*states.lock().unwrap(), ["He", "Hello", "Hello!"]);
    let transcript = engine.snapshot().await;
    assert_eq!(
        turns(&transcript),
        [(Role::User, "Hi"), (Role::Assistant, "Hello!")]
    );
    assert!(transcript.last().unwrap().is_frozen());
}

#[tokio::test]
async fn test_empty_fragments_are_skipped() {
    let mut provider = TestModelProvider::streaming();
    provider.add_reply(PresetResponse::with_fragments(["Hi", "", " there"]));

    let (engine, log) = logged_engine(provider);
    engine.submit("Hello").await.unwrap();
    settle(&engine).await;

    let transcript = engine.snapshot().await;
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript.turns()[1].text(), "Hi there");
    assert_eq!(
        *log.lock().unwrap(),
        ["Appended(0)", "clear", "Appended(1)", "Extended(1)", "Frozen(1)", "settled"]
    );
}

#[tokio::test]
async fn test_only_empty_fragments() {
    let mut provider = TestModelProvider::streaming();
    provider.add_reply(PresetResponse::with_fragments(["", ""]));

    let engine = EngineBuilder::with_model_provider(provider).build();
    engine.submit("Hi").await.unwrap();
    settle(&engine).await;

    let transcript = engine.snapshot().await;
    assert_eq!(turns(&transcript), [(Role::User, "Hi"), (Role::Assistant, "")]);
    assert!(transcript.roles_alternate());
}

#[tokio::test]
async fn test_empty_input_is_ignored() {
    let provider = TestModelProvider::streaming();
    let (engine, log) = logged_engine(provider.clone());

    assert_eq!(engine.submit("").await, Err(SubmitError::EmptyInput));
    assert_eq!(engine.submit(" \n\t ").await, Err(SubmitError::EmptyInput));

    assert!(engine.snapshot().await.is_empty());
    assert!(!engine.is_pending());
    assert_eq!(provider.request_count(), 0);
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_submit_while_pending_is_rejected() {
    let mut provider = TestModelProvider::streaming();
    provider.set_delay(Duration::from_millis(20));
    provider.add_reply(PresetResponse::with_fragments(["Hello", "!"]));

    let engine = EngineBuilder::with_model_provider(provider.clone()).build();
    engine.submit("Hi").await.unwrap();
    assert!(engine.is_pending());

    assert_eq!(engine.submit("Again").await, Err(SubmitError::Busy));
    settle(&engine).await;

    let transcript = engine.snapshot().await;
    assert_eq!(
        turns(&transcript),
        [(Role::User, "Hi"), (Role::Assistant, "Hello!")]
    );
    assert_eq!(provider.request_count(), 1);
}

async fn check_failure_recovery(mut provider: TestModelProvider) {
    provider.add_reply(PresetResponse::failing("invalid api key"));
    provider.add_reply(PresetResponse::with_fragments(["Hello", "!"]));

    let engine = EngineBuilder::with_model_provider(provider).build();
    engine.submit("Hi").await.unwrap();
    settle(&engine).await;

    let transcript = engine.snapshot().await;
    assert_eq!(
        turns(&transcript),
        [(Role::User, "Hi"), (Role::Assistant, "Error: invalid api key")]
    );

    engine.submit("Hi again").await.unwrap();
    settle(&engine).await;

    let transcript = engine.snapshot().await;
    assert_eq!(
        turns(&transcript),
        [
            (Role::User, "Hi"),
            (Role::Assistant, "Error: invalid api key"),
            (Role::User, "Hi again"),
            (Role::Assistant, "Hello!"),
        ]
    );
}

#[tokio::test]
async fn test_failure_recovery_whole() {
    check_failure_recovery(TestModelProvider::whole()).await;
}

#[tokio::test]
async fn test_failure_recovery_streaming() {
    check_failure_recovery(TestModelProvider::streaming()).await;
}

#[tokio::test]
async fn test_mid_stream_failure() {
    let mut provider = TestModelProvider::streaming();
    provider.add_reply(
        PresetResponse::with_fragments(["Hel", "lo"])
            .with_failure_after(1, "connection reset"),
    );

    let engine = EngineBuilder::with_model_provider(provider).build();
    engine.submit("Hi").await.unwrap();
    settle(&engine).await;

    let transcript = engine.snapshot().await;
    assert_eq!(
        turns(&transcript),
        [
            (Role::User, "Hi"),
            (Role::Assistant, "Hel\n\nError: connection reset"),
        ]
    );
    assert!(transcript.last().unwrap().is_frozen());
}

#[tokio::test]
async fn test_roles_alternate() {
    for kind in [ReplyKind::Whole, ReplyKind::Streaming] {
        let mut provider = TestModelProvider::new(kind);
        for round in 0..6 {
            let reply = match round % 3 {
                0 => PresetResponse::with_fragments(["Sure", ", ", "why not"]),
                1 => PresetResponse::failing("rate limited"),
                _ => PresetResponse::with_fragments(["a", "b"])
                    .with_failure_after(1, "reset"),
            };
            provider.add_reply(reply);
        }

        let engine = EngineBuilder::with_model_provider(provider).build();
        for round in 0..6 {
            engine.submit(format!("message {round}")).await.unwrap();
            settle(&engine).await;
        }

        let transcript = engine.snapshot().await;
        assert_eq!(transcript.len(), 12);
        assert!(transcript.roles_alternate());
        assert!(transcript.turns().iter().all(|turn| turn.is_frozen()));
    }
}

#[tokio::test]
async fn test_full_history_is_sent() {
    let mut provider = TestModelProvider::whole();
    provider.add_reply(PresetResponse::with_fragments(["Hello!"]));
    provider.add_reply(PresetResponse::with_fragments(["Bye!"]));

    let engine = EngineBuilder::with_model_provider(provider.clone()).build();
    engine.submit("Hi").await.unwrap();
    settle(&engine).await;
    engine.submit("Bye").await.unwrap();
    settle(&engine).await;

    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].messages, [ModelMessage::User("Hi".to_owned())]);
    assert_eq!(
        requests[1].messages,
        [
            ModelMessage::User("Hi".to_owned()),
            ModelMessage::Assistant("Hello!".to_owned()),
            ModelMessage::User("Bye".to_owned()),
        ]
    );
}

#[tokio::test]
async fn test_draft_clearing_point() {
    let mut provider = TestModelProvider::whole();
    provider.add_reply(PresetResponse::with_fragments(["Hello!"]));
    let (engine, log) = logged_engine(provider);
    engine.submit("Hi").await.unwrap();
    settle(&engine).await;
    assert_eq!(
        *log.lock().unwrap(),
        ["Appended(0)", "Appended(1)", "Frozen(1)", "clear", "settled"]
    );

    let mut provider = TestModelProvider::streaming();
    provider.set_delay(Duration::from_millis(50));
    provider.add_reply(PresetResponse::with_fragments(["Hello!"]));
    let (engine, log) = logged_engine(provider);
    engine.submit("Hi").await.unwrap();
    // The draft is cleared before any fragment arrives.
    assert_eq!(*log.lock().unwrap(), ["Appended(0)", "clear"]);
    settle(&engine).await;
    assert_eq!(
        *log.lock().unwrap(),
        ["Appended(0)", "clear", "Appended(1)", "Frozen(1)", "settled"]
    );
}

#[tokio::test]
async fn test_settled_reply_is_frozen() {
    let mut provider = TestModelProvider::streaming();
    provider.add_reply(PresetResponse::with_fragments(["Hello", "!"]));

    let (engine, log) = logged_engine(provider);
    engine.submit("Hi").await.unwrap();
    settle(&engine).await;
    let changes_before = log.lock().unwrap().len();

    // A fragment that shows up after settlement is dropped.
    engine
        .mailbox
        .post(FragmentReceived {
            submission: 1,
            fragment: " More".to_owned(),
        })
        .unwrap();

    let transcript = engine.snapshot().await;
    assert_eq!(transcript.turns()[1].text(), "Hello!");
    assert_eq!(log.lock().unwrap().len(), changes_before);
}

#[tokio::test]
async fn test_pending_watch() {
    let mut provider = TestModelProvider::streaming();
    provider.add_reply(PresetResponse::with_fragments(["Hello"]));

    let engine = EngineBuilder::with_model_provider(provider).build();
    let mut pending_rx = engine.subscribe_pending();
    assert!(!*pending_rx.borrow_and_update());

    engine.submit("Hi").await.unwrap();
    assert!(*pending_rx.borrow_and_update());
    timeout(Duration::from_secs(1), pending_rx.wait_for(|p| !*p))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_draft_cleared_before_pending_drops() {
    for kind in [ReplyKind::Whole, ReplyKind::Streaming] {
        let mut provider = TestModelProvider::new(kind);
        provider.add_reply(PresetResponse::with_fragments(["Hello!"]));

        let pending_rx = Arc::new(OnceLock::<watch::Receiver<bool>>::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let engine = EngineBuilder::with_model_provider(provider)
            .on_clear_draft({
                let pending_rx = Arc::clone(&pending_rx);
                let seen = Arc::clone(&seen);
                move || {
                    let pending = pending_rx.get().map(|rx| *rx.borrow());
                    seen.lock().unwrap().push(pending);
                }
            })
            .build();
        assert!(pending_rx.set(engine.subscribe_pending()).is_ok());

        engine.submit("Hi").await.unwrap();
        settle(&engine).await;
        // Nobody can send the same draft twice.
        assert_eq!(*seen.lock().unwrap(), [Some(true)], "{kind:?}");
    }
}

/// Replies like its inner provider, except that the first request
/// panics.
struct PanickingProvider(TestModelProvider);

impl ModelProvider for PanickingProvider {
    type Error = TestModelError;
    type Response = TestModelResponse;

    fn reply_kind(&self) -> ReplyKind {
        self.0.reply_kind()
    }

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<ModelReply<Self::Response>, Self::Error>>
    + Send
    + 'static {
        let first = self.0.request_count() == 0;
        let fut = self.0.send_request(req);
        async move {
            let reply = fut.await;
            if first {
                panic!("provider bug");
            }
            reply
        }
    }
}

#[tokio::test]
async fn test_provider_panic_settles() {
    for mut provider in
        [TestModelProvider::whole(), TestModelProvider::streaming()]
    {
        provider.add_reply(PresetResponse::with_fragments(["unused"]));
        provider.add_reply(PresetResponse::with_fragments(["Hello", "!"]));
        let kind = provider.reply_kind();

        let engine =
            EngineBuilder::with_model_provider(PanickingProvider(provider))
                .build();
        engine.submit("Hi").await.unwrap();
        settle(&engine).await;
        assert!(!engine.is_pending());

        engine.submit("Again").await.unwrap();
        settle(&engine).await;

        let transcript = engine.snapshot().await;
        assert_eq!(
            turns(&transcript),
            [
                (Role::User, "Hi"),
                (Role::Assistant, "Error: the model provider crashed"),
                (Role::User, "Again"),
                (Role::Assistant, "Hello!"),
            ],
            "{kind:?}"
        );
    }
}

#[tokio::test]
async fn test_reply_settles_after_engine_dropped() {
    let mut provider = TestModelProvider::streaming();
    provider.set_delay(Duration::from_millis(20));
    provider.add_reply(PresetResponse::with_fragments(["Hello", "!"]));

    let (engine, log) = logged_engine(provider);
    engine.submit("Hi").await.unwrap();
    drop(engine);

    timeout(Duration::from_secs(1), async {
        while log.lock().unwrap().last().map(String::as_str) != Some("settled")
        {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        [
            "Appended(0)",
            "clear",
            "Appended(1)",
            "Extended(1)",
            "Frozen(1)",
            "settled"
        ]
    );
}
