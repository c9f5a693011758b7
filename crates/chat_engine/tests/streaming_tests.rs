//! Tests for generation streaming: ordered fragment application, stopping,
//! and failure handling.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use futures::StreamExt;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use chat_engine::{
    ChatEngine, ChunkStream, ConversationMetadata, ConversationRecord, ConversationStore,
    EngineConfig, EngineError, EngineEvent, FinishReason, GenerationBackend, GenerationRequest,
    Message, NoopReauth, ReauthHandler, Role, StoreError,
};
use generation_client::GenerationError;

enum Script {
    Chunks(Vec<Result<Bytes, GenerationError>>),
    ChunksThenHang(Vec<Result<Bytes, GenerationError>>),
    FailToOpen(GenerationError),
}

#[derive(Default)]
struct ScriptedBackend {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedBackend {
    fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn recorded_requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn start_generation(
        &self,
        request: &GenerationRequest,
    ) -> generation_client::Result<ChunkStream> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .expect("backend called more times than scripted");
        match script {
            Script::Chunks(chunks) => Ok(Box::pin(stream::iter(chunks))),
            Script::ChunksThenHang(chunks) => {
                Ok(Box::pin(stream::iter(chunks).chain(stream::pending())))
            }
            Script::FailToOpen(error) => Err(error),
        }
    }
}

struct NullStore;

#[async_trait]
impl ConversationStore for NullStore {
    async fn create(
        &self,
        _mode: &str,
        _messages: &[Message],
        _metadata: &ConversationMetadata,
        _grouping_id: Option<&str>,
    ) -> Result<Uuid, StoreError> {
        Ok(Uuid::new_v4())
    }

    async fn update(
        &self,
        _id: Uuid,
        _messages: &[Message],
        _metadata: &ConversationMetadata,
    ) -> Result<(), StoreError> {
        Ok(())
    }

    async fn fetch_by_id(&self, id: Uuid) -> Result<ConversationRecord, StoreError> {
        Err(StoreError::NotFound(id))
    }
}

#[derive(Default)]
struct CountingReauth {
    calls: AtomicUsize,
}

#[async_trait]
impl ReauthHandler for CountingReauth {
    async fn session_expired(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

fn frame(content: &str) -> Result<Bytes, GenerationError> {
    Ok(Bytes::from(format!(
        "data: {}\n",
        serde_json::json!({ "content": content })
    )))
}

fn raw(line: &str) -> Result<Bytes, GenerationError> {
    Ok(Bytes::from(format!("{line}\n")))
}

fn done() -> Result<Bytes, GenerationError> {
    Ok(Bytes::from_static(b"data: [DONE]\n"))
}

fn engine_with(backend: Arc<ScriptedBackend>) -> (ChatEngine, UnboundedReceiver<EngineEvent>) {
    ChatEngine::new(
        EngineConfig::new("tutor"),
        backend,
        Arc::new(NullStore),
        Arc::new(NoopReauth),
    )
}

async fn next_event(rx: &mut UnboundedReceiver<EngineEvent>) -> EngineEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for an engine event")
        .expect("event channel closed")
}

async fn wait_until_finished(rx: &mut UnboundedReceiver<EngineEvent>) -> FinishReason {
    loop {
        if let EngineEvent::StreamFinished { reason, .. } = next_event(rx).await {
            return reason;
        }
    }
}

#[tokio::test]
async fn test_send_streams_fragments_in_order() {
    let backend = Arc::new(ScriptedBackend::new(vec![Script::Chunks(vec![
        frame("Hel"),
        frame("lo"),
        done(),
    ])]));
    let (engine, mut rx) = engine_with(backend.clone());

    engine.send_message("What is 2 + 4?").unwrap();

    // Placeholder appears immediately, before any fragment arrives.
    let snapshot = engine.snapshot();
    assert!(snapshot.is_loading);
    assert_eq!(snapshot.messages.len(), 2);
    assert_eq!(snapshot.messages[0].role, Role::User);
    assert_eq!(snapshot.messages[1].role, Role::Assistant);
    assert_eq!(snapshot.messages[1].content, "");

    assert!(matches!(
        next_event(&mut rx).await,
        EngineEvent::StreamStarted { .. }
    ));
    match next_event(&mut rx).await {
        EngineEvent::ContentDelta {
            delta, accumulated, ..
        } => {
            assert_eq!(delta, "Hel");
            assert_eq!(accumulated, "Hel");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    match next_event(&mut rx).await {
        EngineEvent::ContentDelta {
            delta, accumulated, ..
        } => {
            assert_eq!(delta, "lo");
            assert_eq!(accumulated, "Hello");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    match next_event(&mut rx).await {
        EngineEvent::StreamFinished { reason, .. } => {
            assert_eq!(reason, FinishReason::Completed);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let snapshot = engine.snapshot();
    assert!(!snapshot.is_loading);
    assert_eq!(snapshot.messages[1].content, "Hello");
    assert!(snapshot.error.is_none());
    assert!(snapshot.can_regenerate);
}

#[tokio::test]
async fn test_request_carries_history_but_not_placeholder() {
    let backend = Arc::new(ScriptedBackend::new(vec![Script::Chunks(vec![
        frame("Sure."),
        done(),
    ])]));
    let (engine, mut rx) = engine_with(backend.clone());

    engine.send_message("Help me factor x^2-9").unwrap();
    wait_until_finished(&mut rx).await;

    let requests = backend.recorded_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].mode, "tutor");
    assert_eq!(requests[0].messages.len(), 1);
    assert_eq!(requests[0].messages[0].role, Role::User);
    assert_eq!(requests[0].messages[0].content, "Help me factor x^2-9");
}

#[tokio::test]
async fn test_second_send_while_streaming_is_rejected() {
    let backend = Arc::new(ScriptedBackend::new(vec![Script::ChunksThenHang(vec![
        frame("thinking"),
    ])]));
    let (engine, mut rx) = engine_with(backend);

    engine.send_message("first").unwrap();
    assert!(matches!(
        engine.send_message("second"),
        Err(EngineError::Busy)
    ));

    // The rejected send must not have touched the conversation.
    assert_eq!(engine.snapshot().messages.len(), 2);

    engine.stop_generation();
    assert_eq!(wait_until_finished(&mut rx).await, FinishReason::Cancelled);
}

#[tokio::test]
async fn test_stop_keeps_partial_content_without_error() {
    let backend = Arc::new(ScriptedBackend::new(vec![Script::ChunksThenHang(vec![
        frame("The answer starts"),
    ])]));
    let (engine, mut rx) = engine_with(backend);

    engine.send_message("Explain fractions").unwrap();

    // Wait for the fragment to land before stopping.
    loop {
        if let EngineEvent::ContentDelta { accumulated, .. } = next_event(&mut rx).await {
            assert_eq!(accumulated, "The answer starts");
            break;
        }
    }
    engine.stop_generation();
    assert_eq!(wait_until_finished(&mut rx).await, FinishReason::Cancelled);

    let snapshot = engine.snapshot();
    assert!(!snapshot.is_loading);
    assert!(snapshot.error.is_none());
    assert_eq!(snapshot.messages.len(), 2);
    assert_eq!(snapshot.messages[1].content, "The answer starts");
}

#[tokio::test]
async fn test_stop_when_idle_is_a_no_op() {
    let backend = Arc::new(ScriptedBackend::new(vec![]));
    let (engine, _rx) = engine_with(backend);

    engine.stop_generation();
    assert!(!engine.snapshot().is_loading);
}

#[tokio::test]
async fn test_transport_error_removes_placeholder_and_sets_error() {
    let backend = Arc::new(ScriptedBackend::new(vec![Script::Chunks(vec![
        frame("part"),
        Err(GenerationError::MalformedFrame("broken pipe".to_string())),
    ])]));
    let (engine, mut rx) = engine_with(backend);

    engine.send_message("hello").unwrap();

    let mut saw_error_event = false;
    loop {
        match next_event(&mut rx).await {
            EngineEvent::Error(info) => {
                assert_eq!(info.code, "transport_error");
                saw_error_event = true;
            }
            EngineEvent::StreamFinished { reason, .. } => {
                assert_eq!(reason, FinishReason::Failed);
                break;
            }
            _ => {}
        }
    }
    assert!(saw_error_event);

    let snapshot = engine.snapshot();
    assert!(!snapshot.is_loading);
    // Only the user turn survives; the partial draft is gone.
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.messages[0].role, Role::User);
    assert_eq!(snapshot.error.as_ref().unwrap().code, "transport_error");
}

#[tokio::test]
async fn test_malformed_frame_fails_the_stream() {
    let backend = Arc::new(ScriptedBackend::new(vec![Script::Chunks(vec![
        raw("data: {not json}"),
        done(),
    ])]));
    let (engine, mut rx) = engine_with(backend);

    engine.send_message("hello").unwrap();
    assert_eq!(wait_until_finished(&mut rx).await, FinishReason::Failed);

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.error.as_ref().unwrap().code, "transport_error");
}

#[tokio::test]
async fn test_service_error_is_surfaced_verbatim() {
    let backend = Arc::new(ScriptedBackend::new(vec![Script::FailToOpen(
        GenerationError::Api {
            code: "quota_exhausted".to_string(),
            message: "monthly generation quota used up".to_string(),
            details: Some(serde_json::json!({"quota": 500})),
        },
    )]));
    let (engine, mut rx) = engine_with(backend);

    engine.send_message("hello").unwrap();

    loop {
        match next_event(&mut rx).await {
            EngineEvent::Error(info) => {
                assert_eq!(info.code, "quota_exhausted");
                assert_eq!(info.message, "monthly generation quota used up");
                assert_eq!(info.details, Some(serde_json::json!({"quota": 500})));
                break;
            }
            EngineEvent::StreamFinished { .. } => panic!("finished before the error event"),
            _ => {}
        }
    }

    let error = engine.snapshot().error.unwrap();
    assert_eq!(error.code, "quota_exhausted");
}

#[tokio::test]
async fn test_send_clears_previous_error() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        Script::FailToOpen(GenerationError::Api {
            code: "service_down".to_string(),
            message: "try later".to_string(),
            details: None,
        }),
        Script::Chunks(vec![frame("recovered"), done()]),
    ]));
    let (engine, mut rx) = engine_with(backend);

    engine.send_message("first try").unwrap();
    assert_eq!(wait_until_finished(&mut rx).await, FinishReason::Failed);
    assert!(engine.snapshot().error.is_some());

    engine.send_message("second try").unwrap();
    assert!(engine.snapshot().error.is_none());
    assert_eq!(wait_until_finished(&mut rx).await, FinishReason::Completed);

    // The first user turn survived the failed attempt.
    let snapshot = engine.snapshot();
    assert_eq!(snapshot.messages.len(), 3);
    assert_eq!(snapshot.messages[2].content, "recovered");
}

#[tokio::test]
async fn test_metadata_fragments_merge_into_draft() {
    let backend = Arc::new(ScriptedBackend::new(vec![Script::Chunks(vec![
        raw(r#"data: {"content":"Try","metadata":{"difficulty":"easy","step":1}}"#),
        raw(r#"data: {"metadata":{"difficulty":"hard"}}"#),
        raw(r#"data: {"content":" this","consumed_units":42}"#),
        done(),
    ])]));
    let (engine, mut rx) = engine_with(backend);

    engine.send_message("give me a problem").unwrap();
    match wait_until_finished(&mut rx).await {
        FinishReason::Completed => {}
        other => panic!("unexpected finish reason: {other:?}"),
    }

    let snapshot = engine.snapshot();
    let reply = &snapshot.messages[1];
    assert_eq!(reply.content, "Try this");
    let metadata = reply.metadata.as_ref().unwrap();
    // Later fragment values win whole for the same key.
    assert_eq!(
        metadata.get("difficulty"),
        Some(&serde_json::json!("hard"))
    );
    assert_eq!(metadata.get("step"), Some(&serde_json::json!(1)));
    assert_eq!(metadata.consumed_units(), Some(42));
}

#[tokio::test]
async fn test_finished_event_reports_consumed_units() {
    let backend = Arc::new(ScriptedBackend::new(vec![Script::Chunks(vec![
        raw(r#"data: {"content":"ok","consumed_units":7}"#),
        done(),
    ])]));
    let (engine, mut rx) = engine_with(backend);

    engine.send_message("short one").unwrap();
    loop {
        if let EngineEvent::StreamFinished {
            reason,
            consumed_units,
            ..
        } = next_event(&mut rx).await
        {
            assert_eq!(reason, FinishReason::Completed);
            assert_eq!(consumed_units, Some(7));
            break;
        }
    }
}

#[tokio::test]
async fn test_stream_end_without_done_marker_completes() {
    let backend = Arc::new(ScriptedBackend::new(vec![Script::Chunks(vec![frame(
        "All done",
    )])]));
    let (engine, mut rx) = engine_with(backend);

    engine.send_message("hello").unwrap();
    assert_eq!(wait_until_finished(&mut rx).await, FinishReason::Completed);

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.messages[1].content, "All done");
    assert!(snapshot.error.is_none());
}

#[tokio::test]
async fn test_expired_session_hands_off_to_reauth() {
    let backend = Arc::new(ScriptedBackend::new(vec![Script::FailToOpen(
        GenerationError::AuthExpired,
    )]));
    let reauth = Arc::new(CountingReauth::default());
    let (engine, mut rx) = ChatEngine::new(
        EngineConfig::new("tutor"),
        backend,
        Arc::new(NullStore),
        reauth.clone(),
    );

    engine.send_message("hello").unwrap();

    // No Error event: expiry goes to the re-auth flow, not the chat surface.
    assert!(matches!(
        next_event(&mut rx).await,
        EngineEvent::StreamStarted { .. }
    ));
    match next_event(&mut rx).await {
        EngineEvent::StreamFinished { reason, .. } => {
            assert_eq!(reason, FinishReason::Failed);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let snapshot = engine.snapshot();
    assert!(snapshot.error.is_none());
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(reauth.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_operations_after_shutdown_are_rejected() {
    let backend = Arc::new(ScriptedBackend::new(vec![]));
    let (engine, _rx) = engine_with(backend);

    engine.shutdown();
    assert!(matches!(
        engine.send_message("too late"),
        Err(EngineError::Terminated)
    ));
    assert!(matches!(
        engine.regenerate_last_message(),
        Err(EngineError::Terminated)
    ));
}
