//! Tests for engine module

use super::*;
use crate::cursor::{ConcurrentCursor, Cursor, CursorConfig, CursorLifecycle, FinalStateCursor};
use crate::decode::{DpathExtractor, RecordSelector};
use crate::error::{Error, Result};
use crate::error_handler::DefaultErrorHandler;
use crate::http::{HttpClient, HttpClientConfig, HttpRequester, InjectInto, RequestOption, RequestOptions};
use crate::interpolation::InterpolatedString;
use crate::message::{InMemoryMessageRepository, Message, MessageRepository, StreamStatus};
use crate::partition::{ListPartitionRouter, PartitionRouter, SliceStream};
use crate::record::Record;
use crate::retriever::SimpleRetriever;
use crate::slice::StreamSlice;
use crate::state::State;
use crate::stream::DeclarativeStream;
use crate::types::JsonValue;
use futures::stream::{self, StreamExt};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_test::assert_pending;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// Helpers
// ============================================================================

/// Cursor wrapper remembering which slices were closed
#[derive(Debug)]
struct RecordingCursor {
    inner: Arc<dyn Cursor>,
    closed: Mutex<Vec<StreamSlice>>,
}

impl RecordingCursor {
    fn new(inner: Arc<dyn Cursor>) -> Self {
        Self {
            inner,
            closed: Mutex::default(),
        }
    }

    fn closed(&self) -> Vec<StreamSlice> {
        self.closed.lock().unwrap().clone()
    }
}

impl Cursor for RecordingCursor {
    fn state(&self) -> JsonValue {
        self.inner.state()
    }

    fn set_initial_state(&self, state: &JsonValue) -> Result<()> {
        self.inner.set_initial_state(state)
    }

    fn stream_slices<'a>(&'a self, router: &'a dyn PartitionRouter) -> SliceStream<'a> {
        self.inner.stream_slices(router)
    }

    fn observe(&self, record: &Record) {
        self.inner.observe(record);
    }

    fn close_partition(&self, slice: &StreamSlice) -> Result<()> {
        self.closed.lock().unwrap().push(slice.clone());
        self.inner.close_partition(slice)
    }

    fn ensure_at_least_one_state_emitted(&self) {
        self.inner.ensure_at_least_one_state_emitted();
    }

    fn should_be_synced(&self, record: &Record) -> bool {
        self.inner.should_be_synced(record)
    }

    fn request_options(&self, slice: &StreamSlice) -> RequestOptions {
        self.inner.request_options(slice)
    }

    fn lifecycle(&self) -> CursorLifecycle {
        self.inner.lifecycle()
    }
}

/// Router whose partition generation fails
#[derive(Debug)]
struct FailingRouter;

impl PartitionRouter for FailingRouter {
    fn stream_slices(&self) -> SliceStream<'_> {
        stream::once(async { Err(Error::partition("items", "parent lookup failed")) }).boxed()
    }
}

fn accounts(values: &[&str]) -> Arc<dyn PartitionRouter> {
    Arc::new(
        ListPartitionRouter::new(
            values.iter().map(|v| json!(v)).collect(),
            "account",
            Arc::new(json!({})),
        )
        .with_request_option(RequestOption::new(InjectInto::RequestParameter, "account").unwrap()),
    )
}

fn items_stream(
    base: &str,
    router: Arc<dyn PartitionRouter>,
    cursor: Arc<dyn Cursor>,
    repository: Arc<dyn MessageRepository>,
) -> Arc<DeclarativeStream> {
    let config = Arc::new(json!({}));
    let params = Arc::new(json!({}));
    let requester = HttpRequester::new(
        "items",
        InterpolatedString::new(base).unwrap(),
        InterpolatedString::new("/items").unwrap(),
        Arc::new(HttpClient::new(HttpClientConfig::default()).unwrap()),
        Arc::new(DefaultErrorHandler::new().with_max_retries(0)),
        Arc::clone(&config),
        Arc::clone(&params),
    );
    let extractor = DpathExtractor::new(&["data".to_string()], &config, &params).unwrap();
    let retriever = SimpleRetriever::new(
        "items",
        Arc::new(requester),
        RecordSelector::new(Arc::new(extractor)),
        config,
        params,
    )
    .with_partition_router(Arc::clone(&router))
    .with_cursor(Arc::clone(&cursor));
    Arc::new(DeclarativeStream::new("items", retriever, router, cursor, repository))
}

fn updated_at_cursor(repository: Arc<dyn MessageRepository>) -> Arc<ConcurrentCursor> {
    Arc::new(ConcurrentCursor::new(
        "items",
        CursorConfig::new("updated_at"),
        repository,
    ))
}

async fn mount_account(server: &MockServer, account: &str, body: JsonValue) {
    Mock::given(method("GET"))
        .and(path("/items"))
        .and(query_param("account", account))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

async fn drain(mut messages: MessageStream) -> (Vec<Message>, Option<Error>) {
    let mut out = Vec::new();
    while let Some(item) = messages.next().await {
        match item {
            Ok(message) => out.push(message),
            Err(error) => return (out, Some(error)),
        }
    }
    (out, None)
}

fn statuses(messages: &[Message]) -> Vec<StreamStatus> {
    messages
        .iter()
        .filter_map(|m| match m {
            Message::Trace { trace } => trace.stream_status.as_ref().map(|s| s.status),
            _ => None,
        })
        .collect()
}

fn stream_state(message: &Message) -> Option<&JsonValue> {
    match message {
        Message::State { state } => state.stream.as_ref().map(|s| &s.stream_state),
        _ => None,
    }
}

// ============================================================================
// Read Tests
// ============================================================================

#[tokio::test]
async fn test_read_emits_records_then_checkpoints() {
    let server = MockServer::start().await;
    mount_account(
        &server,
        "a",
        json!({"data": [
            {"id": 1, "updated_at": "2024-01-01T00:00:00Z"},
            {"id": 2, "updated_at": "2024-01-03T00:00:00Z"}
        ]}),
    )
    .await;
    mount_account(
        &server,
        "b",
        json!({"data": [{"id": 3, "updated_at": "2024-01-02T00:00:00Z"}]}),
    )
    .await;

    let repository: Arc<dyn MessageRepository> = Arc::new(InMemoryMessageRepository::default());
    let cursor = updated_at_cursor(Arc::clone(&repository));
    let stream = items_stream(&server.uri(), accounts(&["a", "b"]), cursor, Arc::clone(&repository));

    let (messages, error) = drain(ConcurrentSource::new(2, repository).read(vec![stream])).await;
    assert!(error.is_none());

    assert_eq!(
        statuses(&messages),
        vec![StreamStatus::Started, StreamStatus::Running, StreamStatus::Complete]
    );
    assert_eq!(messages.iter().filter(|m| m.is_record()).count(), 3);

    // A checkpoint never covers a value that was not emitted before it
    let mut max_emitted = String::new();
    for message in &messages {
        if let Message::Record { record } = message {
            let value = record.data["updated_at"].as_str().unwrap().to_string();
            max_emitted = max_emitted.max(value);
        }
        if let Some(state) = stream_state(message) {
            if let Some(value) = state["updated_at"].as_str() {
                assert!(value <= max_emitted.as_str(), "{value} checkpointed before emitted");
            }
        }
    }

    let final_state = messages.iter().rev().find_map(stream_state).unwrap();
    assert_eq!(final_state, &json!({"updated_at": "2024-01-03T00:00:00Z"}));
    assert!(matches!(messages.last(), Some(Message::Trace { .. })));
}

#[tokio::test]
async fn test_failed_partition_is_never_closed() {
    let server = MockServer::start().await;
    mount_account(&server, "a", json!({"data": [{"id": 1, "updated_at": "2024-01-01T00:00:00Z"}]})).await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .and(query_param("account", "b"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&server)
        .await;

    let repository: Arc<dyn MessageRepository> = Arc::new(InMemoryMessageRepository::default());
    let cursor = Arc::new(RecordingCursor::new(updated_at_cursor(Arc::clone(&repository))));
    let stream = items_stream(
        &server.uri(),
        accounts(&["a", "b"]),
        cursor.clone(),
        Arc::clone(&repository),
    );

    let (messages, error) = drain(ConcurrentSource::new(2, repository).read(vec![stream])).await;

    assert!(error.is_some());
    assert!(cursor
        .closed()
        .iter()
        .all(|slice| slice.partition().get("account") != Some(&json!("b"))));
    assert_eq!(statuses(&messages).last(), Some(&StreamStatus::Incomplete));
    assert!(messages.iter().any(|m| matches!(
        m,
        Message::Trace { trace } if trace.error.is_some()
    )));
}

#[tokio::test]
async fn test_stream_without_partitions_emits_final_state() {
    let repository: Arc<dyn MessageRepository> = Arc::new(InMemoryMessageRepository::default());
    let cursor = Arc::new(FinalStateCursor::new("items", Arc::clone(&repository)));
    let stream = items_stream("http://localhost:1", accounts(&[]), cursor, Arc::clone(&repository));

    let (messages, error) = drain(ConcurrentSource::new(1, repository).read(vec![stream])).await;

    assert!(error.is_none());
    assert_eq!(messages.len(), 3);
    assert_eq!(
        stream_state(&messages[1]),
        Some(&json!({"__ab_no_cursor_state_message": true}))
    );
    assert_eq!(
        statuses(&messages),
        vec![StreamStatus::Started, StreamStatus::Complete]
    );
}

#[tokio::test]
async fn test_generation_error_surfaces_to_reader() {
    let repository: Arc<dyn MessageRepository> = Arc::new(InMemoryMessageRepository::default());
    let cursor = Arc::new(FinalStateCursor::new("items", Arc::clone(&repository)));
    let stream = items_stream(
        "http://localhost:1",
        Arc::new(FailingRouter),
        cursor,
        Arc::clone(&repository),
    );

    let (messages, error) = drain(ConcurrentSource::new(1, repository).read(vec![stream])).await;

    assert!(matches!(error, Some(Error::Partition { .. })));
    assert!(!messages.iter().any(Message::is_state));
    assert_eq!(
        statuses(&messages),
        vec![StreamStatus::Started, StreamStatus::Incomplete]
    );
}

#[tokio::test]
async fn test_small_queue_single_worker_reads_everything() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [
            {"id": 1, "updated_at": "2024-01-01T00:00:00Z"},
            {"id": 2, "updated_at": "2024-01-02T00:00:00Z"}
        ]})))
        .mount(&server)
        .await;

    let repository: Arc<dyn MessageRepository> = Arc::new(InMemoryMessageRepository::default());
    let cursor = updated_at_cursor(Arc::clone(&repository));
    let stream = items_stream(
        &server.uri(),
        accounts(&["a", "b", "c", "d", "e"]),
        cursor,
        Arc::clone(&repository),
    );

    let source = ConcurrentSource::new(1, repository).with_max_queue_size(1);
    let (messages, error) = drain(source.read(vec![stream])).await;

    assert!(error.is_none());
    assert_eq!(messages.iter().filter(|m| m.is_record()).count(), 10);
    // One checkpoint per partition plus the final state
    assert_eq!(messages.iter().filter(|m| m.is_state()).count(), 6);
}

#[tokio::test]
async fn test_reads_multiple_streams() {
    let server = MockServer::start().await;
    mount_account(&server, "a", json!({"data": [{"id": 1}]})).await;

    let repository: Arc<dyn MessageRepository> = Arc::new(InMemoryMessageRepository::default());
    let first = items_stream(
        &server.uri(),
        accounts(&["a"]),
        Arc::new(FinalStateCursor::new("items", Arc::clone(&repository))),
        Arc::clone(&repository),
    );
    let empty = Arc::new(DeclarativeStream::new(
        "empty",
        SimpleRetriever::new(
            "empty",
            Arc::new(HttpRequester::new(
                "empty",
                InterpolatedString::new(server.uri()).unwrap(),
                InterpolatedString::new("/empty").unwrap(),
                Arc::new(HttpClient::new(HttpClientConfig::default()).unwrap()),
                Arc::new(DefaultErrorHandler::new()),
                Arc::new(json!({})),
                Arc::new(json!({})),
            )),
            RecordSelector::new(Arc::new(DpathExtractor::default())),
            Arc::new(json!({})),
            Arc::new(json!({})),
        ),
        accounts(&[]),
        Arc::new(FinalStateCursor::new("empty", Arc::clone(&repository))),
        Arc::clone(&repository),
    ));

    let (messages, error) =
        drain(ConcurrentSource::new(2, repository).read(vec![first, empty])).await;

    assert!(error.is_none());
    let completed: Vec<&str> = messages
        .iter()
        .filter(|m| matches!(m, Message::Trace { trace } if trace.stream_status.as_ref().is_some_and(|s| s.status == StreamStatus::Complete)))
        .filter_map(|m| m.stream_name())
        .collect();
    assert_eq!(completed.len(), 2);
    assert!(completed.contains(&"items") && completed.contains(&"empty"));
}

#[tokio::test]
async fn test_apply_state_restores_cursors() {
    let repository: Arc<dyn MessageRepository> = Arc::new(InMemoryMessageRepository::default());
    let cursor = updated_at_cursor(Arc::clone(&repository));
    let stream = items_stream("http://localhost:1", accounts(&[]), cursor.clone(), repository);

    let state = State::from_value(json!({"items": {"updated_at": "2024-02-01"}})).unwrap();
    ConcurrentSource::apply_state(&[stream], &state).unwrap();

    assert_eq!(cursor.state(), json!({"updated_at": "2024-02-01"}));
}

#[tokio::test]
async fn test_apply_state_rejects_malformed_state() {
    let repository: Arc<dyn MessageRepository> = Arc::new(InMemoryMessageRepository::default());
    let cursor = updated_at_cursor(Arc::clone(&repository));
    let stream = items_stream("http://localhost:1", accounts(&[]), cursor, repository);

    let state = State::from_value(json!({"items": 42})).unwrap();
    let result = ConcurrentSource::apply_state(&[stream], &state);

    assert!(matches!(result, Err(Error::StreamFailed { .. })));
}

// ============================================================================
// Backpressure Tests
// ============================================================================

#[test]
fn test_enqueuer_waits_for_queue_space_and_drops_nothing() {
    let repository: Arc<dyn MessageRepository> = Arc::new(InMemoryMessageRepository::default());
    let cursor = Arc::new(FinalStateCursor::new("items", Arc::clone(&repository)));
    let stream = items_stream(
        "http://localhost:1",
        accounts(&["a", "b", "c", "d"]),
        cursor,
        repository,
    );
    let (sender, mut receiver) = mpsc::channel(2);
    let enqueuer = PartitionEnqueuer::new(sender);

    let mut task = tokio_test::task::spawn(enqueuer.generate_partitions(stream));
    assert_pending!(task.poll());

    let mut items = Vec::new();
    while let Ok(item) = receiver.try_recv() {
        items.push(item);
    }
    assert_eq!(items.len(), 2);
    assert!(task.is_woken());

    loop {
        let done = task.poll().is_ready();
        while let Ok(item) = receiver.try_recv() {
            items.push(item);
        }
        if done {
            break;
        }
    }

    let partitions: Vec<JsonValue> = items
        .iter()
        .filter_map(|item| match item {
            QueueItem::Partition(p) => p.slice().partition().get("account").cloned(),
            _ => None,
        })
        .collect();
    assert_eq!(partitions, vec![json!("a"), json!("b"), json!("c"), json!("d")]);
    assert!(matches!(
        items.last(),
        Some(QueueItem::PartitionGenerationCompleted { stream }) if stream == "items"
    ));
}
