//! Tests for cursor module

use super::*;
use crate::error::{Error, Result};
use crate::message::{InMemoryMessageRepository, Message, MessageRepository};
use crate::pagination::PaginationStopCondition;
use crate::partition::{
    ListPartitionRouter, ParentStream, ParentStreamConfig, RecordStream, SinglePartitionRouter,
    SubstreamPartitionRouter,
};
use crate::record::Record;
use crate::slice::StreamSlice;
use crate::types::{JsonObject, JsonValue};
use chrono::{Duration, TimeZone, Utc};
use futures::future;
use futures::stream::{self, StreamExt, TryStreamExt};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::{Arc, Mutex};
use test_case::test_case;

fn obj(value: JsonValue) -> JsonObject {
    value.as_object().cloned().unwrap()
}

fn repository() -> Arc<InMemoryMessageRepository> {
    Arc::new(InMemoryMessageRepository::default())
}

fn emitted_states(repository: &InMemoryMessageRepository) -> Vec<JsonValue> {
    repository
        .consume_queue()
        .into_iter()
        .filter_map(|message| match message {
            Message::State { state } => state.stream.map(|s| s.stream_state),
            _ => None,
        })
        .collect()
}

fn record(data: JsonValue, slice: &StreamSlice) -> Record {
    Record::new("events", data, Some(slice.clone()))
}

// ============================================================================
// Merge Tests
// ============================================================================

#[test_case(json!({"ts": 5}), json!({"ts": 3}), json!({"ts": 5}) ; "previous larger")]
#[test_case(json!({"ts": 3}), json!({"ts": 5}), json!({"ts": 5}) ; "candidate larger")]
#[test_case(json!({"ts": 5}), json!({}), json!({"ts": 5}) ; "empty candidate")]
#[test_case(json!({}), json!({"ts": 1}), json!({"ts": 1}) ; "no previous")]
#[test_case(json!({"ts": "2024-02-01"}), json!({"ts": ""}), json!({"ts": "2024-02-01"}) ; "falsy candidate dropped")]
#[test_case(
    json!({"ts": "2024-01-02T00:00:00Z"}),
    json!({"ts": "2024-01-01T23:00:00-05:00"}),
    json!({"ts": "2024-01-01T23:00:00-05:00"}) ;
    "datetimes compare as instants"
)]
fn test_merge_state(previous: JsonValue, candidate: JsonValue, expected: JsonValue) {
    let merged = merge_state(&obj(previous), &obj(candidate));
    assert_eq!(JsonValue::Object(merged), expected);
}

// ============================================================================
// ConcurrentCursor Tests
// ============================================================================

#[test]
fn test_close_partition_emits_max_observed_value() {
    let repo = repository();
    let cursor = ConcurrentCursor::new("events", CursorConfig::new("updated_at"), repo.clone());
    let slice = StreamSlice::empty();
    assert_eq!(cursor.lifecycle(), CursorLifecycle::NotStarted);

    cursor.observe(&record(json!({"updated_at": "2024-01-03"}), &slice));
    cursor.observe(&record(json!({"updated_at": "2024-01-05"}), &slice));
    cursor.observe(&record(json!({"updated_at": "2024-01-04"}), &slice));
    assert_eq!(cursor.lifecycle(), CursorLifecycle::PartitionInProgress);

    cursor.close_partition(&slice).unwrap();
    assert_eq!(cursor.lifecycle(), CursorLifecycle::PartitionClosed);
    assert_eq!(emitted_states(&repo), vec![json!({"updated_at": "2024-01-05"})]);
}

#[test]
fn test_close_never_moves_watermark_backwards() {
    let repo = repository();
    let cursor = ConcurrentCursor::new("events", CursorConfig::new("id"), repo.clone());
    cursor.set_initial_state(&json!({"id": 100})).unwrap();

    let slice = StreamSlice::empty();
    cursor.observe(&record(json!({"id": 42}), &slice));
    cursor.close_partition(&slice).unwrap();

    assert_eq!(cursor.state(), json!({"id": 100}));
}

#[test]
fn test_unclosed_partition_emits_nothing() {
    let repo = repository();
    let cursor = ConcurrentCursor::new("events", CursorConfig::new("id"), repo.clone());
    let slice = StreamSlice::empty();
    cursor.observe(&record(json!({"id": 1}), &slice));

    assert!(repo.is_empty());
    assert_eq!(cursor.state(), json!({}));
}

#[test]
fn test_ensure_state_emitted_without_slices() {
    let repo = repository();
    let cursor = ConcurrentCursor::new("events", CursorConfig::new("id"), repo.clone());
    cursor.ensure_at_least_one_state_emitted();

    assert_eq!(cursor.lifecycle(), CursorLifecycle::SyncComplete);
    assert_eq!(emitted_states(&repo), vec![json!({})]);
}

#[test]
fn test_set_initial_state_rejects_non_object() {
    let cursor = ConcurrentCursor::new("events", CursorConfig::new("id"), repository());
    assert!(cursor.set_initial_state(&json!([1, 2])).is_err());
}

#[test]
fn test_should_be_synced_against_initial_watermark() {
    let cursor = ConcurrentCursor::new("events", CursorConfig::new("id"), repository());
    cursor.set_initial_state(&json!({"id": 10})).unwrap();
    let slice = StreamSlice::empty();

    assert!(cursor.should_be_synced(&record(json!({"id": 11}), &slice)));
    assert!(cursor.should_be_synced(&record(json!({"id": 10}), &slice)));
    assert!(!cursor.should_be_synced(&record(json!({"id": 9}), &slice)));
    assert!(cursor.should_be_synced(&record(json!({"name": "no cursor"}), &slice)));
}

#[test]
fn test_stop_condition_wraps_cursor() {
    let cursor = Arc::new(ConcurrentCursor::new("events", CursorConfig::new("id"), repository()));
    cursor.set_initial_state(&json!({"id": 10})).unwrap();
    let condition = CursorStopCondition::new(cursor);
    let slice = StreamSlice::empty();

    assert!(condition.is_met(&record(json!({"id": 3}), &slice)));
    assert!(!condition.is_met(&record(json!({"id": 30}), &slice)));
}

// ============================================================================
// Datetime Window Tests
// ============================================================================

fn daily_window() -> DatetimeWindow {
    DatetimeWindow::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        Arc::new(json!({})),
    )
    .with_end(Utc.with_ymd_and_hms(2024, 1, 3, 12, 0, 0).unwrap())
    .with_step(Duration::days(1), Duration::seconds(1))
    .with_format("%Y-%m-%dT%H:%M:%SZ")
}

#[test]
fn test_window_slices() {
    let slices = daily_window().slices(None, Utc::now());
    let values: Vec<JsonValue> = slices.into_iter().map(JsonValue::Object).collect();
    assert_eq!(
        values,
        vec![
            json!({"start_time": "2024-01-01T00:00:00Z", "end_time": "2024-01-01T23:59:59Z"}),
            json!({"start_time": "2024-01-02T00:00:00Z", "end_time": "2024-01-02T23:59:59Z"}),
            json!({"start_time": "2024-01-03T00:00:00Z", "end_time": "2024-01-03T12:00:00Z"}),
        ]
    );
}

#[test]
fn test_window_starts_from_state_minus_lookback() {
    let window = daily_window().with_lookback(Duration::hours(12));
    let watermark = json!("2024-01-03T06:00:00Z");
    let slices = window.slices(Some(&watermark), Utc::now());
    assert_eq!(slices.len(), 1);
    assert_eq!(slices[0].get("start_time"), Some(&json!("2024-01-02T18:00:00Z")));
}

#[test]
fn test_window_without_step_is_single_slice() {
    let window = DatetimeWindow::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        Arc::new(json!({})),
    )
    .with_end(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
    assert_eq!(window.slices(None, Utc::now()).len(), 1);
}

#[tokio::test]
async fn test_windowed_cursor_slices_and_request_options() {
    let window = daily_window()
        .with_start_time_option(
            crate::http::RequestOption::new(crate::http::InjectInto::RequestParameter, "since")
                .unwrap(),
        );
    let cursor = ConcurrentCursor::new(
        "events",
        CursorConfig::new("updated_at").with_window(window),
        repository(),
    );

    let slices: Vec<StreamSlice> = cursor
        .stream_slices(&SinglePartitionRouter)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(slices.len(), 3);
    assert!(slices[0].partition().is_empty());

    let options = cursor.request_options(&slices[1]);
    assert_eq!(options.params.get("since"), Some(&json!("2024-01-02T00:00:00Z")));
}

#[test]
fn test_windowed_should_be_synced() {
    let cursor = ConcurrentCursor::new(
        "events",
        CursorConfig::new("updated_at").with_window(daily_window()),
        repository(),
    );
    let slice = StreamSlice::empty();
    assert!(cursor.should_be_synced(&record(json!({"updated_at": "2024-01-02T10:00:00Z"}), &slice)));
    assert!(!cursor.should_be_synced(&record(json!({"updated_at": "2023-12-31T10:00:00Z"}), &slice)));
    assert!(!cursor.should_be_synced(&record(json!({"updated_at": "2024-02-01T00:00:00Z"}), &slice)));
}

#[tokio::test]
async fn test_window_watermark_waits_for_earlier_windows() {
    let repo = repository();
    let cursor = ConcurrentCursor::new(
        "events",
        CursorConfig::new("updated_at").with_window(daily_window()),
        repo.clone(),
    );
    let slices: Vec<StreamSlice> = cursor
        .stream_slices(&SinglePartitionRouter)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(slices.len(), 3);

    cursor.observe(&record(json!({"updated_at": "2024-01-03T10:00:00Z"}), &slices[2]));
    cursor.close_partition(&slices[2]).unwrap();
    assert_eq!(cursor.state(), json!({}));

    // A sync resumed from this checkpoint still reads every window
    let resumed = ConcurrentCursor::new(
        "events",
        CursorConfig::new("updated_at").with_window(daily_window()),
        repository(),
    );
    resumed.set_initial_state(&cursor.state()).unwrap();
    assert_eq!(resumed.cursor_slices().len(), 3);

    cursor.observe(&record(json!({"updated_at": "2024-01-01T05:00:00Z"}), &slices[0]));
    cursor.close_partition(&slices[0]).unwrap();
    assert_eq!(cursor.state(), json!({"updated_at": "2024-01-01T05:00:00Z"}));

    cursor.close_partition(&slices[1]).unwrap();
    assert_eq!(cursor.state(), json!({"updated_at": "2024-01-03T10:00:00Z"}));
    assert_eq!(
        emitted_states(&repo),
        vec![
            json!({}),
            json!({"updated_at": "2024-01-01T05:00:00Z"}),
            json!({"updated_at": "2024-01-03T10:00:00Z"}),
        ]
    );
}

#[test]
fn test_concurrent_closes_keep_watermark_monotonic() {
    let repo = repository();
    let cursor = ConcurrentCursor::new("events", CursorConfig::new("id"), repo.clone());
    let slices: Vec<StreamSlice> = (1..=64)
        .map(|n| StreamSlice::from_partition(obj(json!({"n": n}))))
        .collect();

    std::thread::scope(|scope| {
        for chunk in slices.chunks(8) {
            let cursor = &cursor;
            scope.spawn(move || {
                for slice in chunk {
                    let n = slice.partition()["n"].clone();
                    cursor.observe(&record(json!({"id": n}), slice));
                    cursor.close_partition(slice).unwrap();
                }
            });
        }
    });

    assert_eq!(cursor.state(), json!({"id": 64}));
    let ids: Vec<u64> = emitted_states(&repo)
        .iter()
        .map(|state| state["id"].as_u64().unwrap())
        .collect();
    assert_eq!(ids.len(), 64);
    assert!(ids.windows(2).all(|pair| pair[0] <= pair[1]));
}

// ============================================================================
// PerPartitionCursor Tests
// ============================================================================

fn list_router(values: &[&str]) -> Arc<ListPartitionRouter> {
    Arc::new(ListPartitionRouter::new(
        values.iter().map(|v| json!(v)).collect(),
        "account",
        Arc::new(json!({})),
    ))
}

#[tokio::test]
async fn test_per_partition_states_layout() {
    let repo = repository();
    let router = list_router(&["a", "b"]);
    let cursor = PerPartitionCursor::new(
        "events",
        CursorConfig::new("updated_at"),
        router.clone(),
        repo.clone(),
    );

    let slices: Vec<StreamSlice> = cursor
        .stream_slices(router.as_ref())
        .try_collect()
        .await
        .unwrap();
    assert_eq!(slices.len(), 2);

    cursor.observe(&record(json!({"updated_at": "2024-01-02"}), &slices[0]));
    cursor.observe(&record(json!({"updated_at": "2024-01-05"}), &slices[1]));
    cursor.close_partition(&slices[0]).unwrap();
    cursor.close_partition(&slices[1]).unwrap();

    assert_eq!(
        cursor.state(),
        json!({
            "use_global_cursor": false,
            "states": [
                {"partition": {"account": "a"}, "cursor": {"updated_at": "2024-01-02"}},
                {"partition": {"account": "b"}, "cursor": {"updated_at": "2024-01-05"}}
            ],
            "state": {"updated_at": "2024-01-05"}
        })
    );
    assert_eq!(emitted_states(&repo).len(), 2);
}

#[tokio::test]
async fn test_per_partition_restores_state() {
    let router = list_router(&["a", "b"]);
    let cursor = PerPartitionCursor::new(
        "events",
        CursorConfig::new("id"),
        router.clone(),
        repository(),
    );
    cursor
        .set_initial_state(&json!({
            "states": [{"partition": {"account": "a"}, "cursor": {"id": 50}}],
            "state": {"id": 20}
        }))
        .unwrap();

    let slices: Vec<StreamSlice> = cursor
        .stream_slices(router.as_ref())
        .try_collect()
        .await
        .unwrap();

    assert!(!cursor.should_be_synced(&record(json!({"id": 40}), &slices[0])));
    assert!(cursor.should_be_synced(&record(json!({"id": 40}), &slices[1])));
}

#[tokio::test]
async fn test_per_partition_switches_to_global_cursor() {
    let router = list_router(&["a", "b", "c"]);
    let cursor = PerPartitionCursor::new(
        "events",
        CursorConfig::new("id"),
        router.clone(),
        repository(),
    )
    .with_max_partitions(2);

    let slices: Vec<StreamSlice> = cursor
        .stream_slices(router.as_ref())
        .try_collect()
        .await
        .unwrap();
    assert!(cursor.use_global_cursor());

    for (i, slice) in slices.iter().enumerate() {
        cursor.observe(&record(json!({"id": i + 1}), slice));
        cursor.close_partition(slice).unwrap();
    }

    let state = cursor.state();
    assert_eq!(state["use_global_cursor"], json!(true));
    assert!(state.get("states").is_none());
    assert_eq!(state["state"], json!({"id": 3}));
}

#[test]
fn test_per_partition_close_unknown_partition_fails() {
    let router = list_router(&["a"]);
    let cursor = PerPartitionCursor::new("events", CursorConfig::new("id"), router, repository());
    let slice = StreamSlice::from_partition(obj(json!({"account": "zzz"})));
    assert!(cursor.close_partition(&slice).is_err());
}

#[tokio::test]
async fn test_per_partition_slice_state_is_partition_cursor() {
    let router = list_router(&["a", "b"]);
    let cursor = PerPartitionCursor::new(
        "events",
        CursorConfig::new("id"),
        router.clone(),
        repository(),
    );
    cursor
        .set_initial_state(&json!({
            "states": [{"partition": {"account": "a"}, "cursor": {"id": 50}}],
            "state": {"id": 20}
        }))
        .unwrap();

    let slices: Vec<StreamSlice> = cursor
        .stream_slices(router.as_ref())
        .try_collect()
        .await
        .unwrap();

    assert_eq!(cursor.slice_state(&slices[0]), json!({"id": 50}));
    assert_eq!(cursor.slice_state(&slices[1]), json!({"id": 20}));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_per_partition_concurrent_closes() {
    let values: Vec<String> = (1..=32).map(|n| format!("p{n}")).collect();
    let refs: Vec<&str> = values.iter().map(String::as_str).collect();
    let router = list_router(&refs);
    let repo = repository();
    let cursor = PerPartitionCursor::new(
        "events",
        CursorConfig::new("id"),
        router.clone(),
        repo.clone(),
    );
    let slices: Vec<StreamSlice> = cursor
        .stream_slices(router.as_ref())
        .try_collect()
        .await
        .unwrap();

    std::thread::scope(|scope| {
        for (chunk_index, chunk) in slices.chunks(4).enumerate() {
            let cursor = &cursor;
            scope.spawn(move || {
                for (i, slice) in chunk.iter().enumerate() {
                    let id = chunk_index * 4 + i + 1;
                    cursor.observe(&record(json!({"id": id}), slice));
                    cursor.close_partition(slice).unwrap();
                }
            });
        }
    });

    let state = cursor.state();
    assert_eq!(state["state"], json!({"id": 32}));
    assert_eq!(state["states"].as_array().map(Vec::len), Some(32));

    let globals: Vec<u64> = emitted_states(&repo)
        .iter()
        .map(|state| state["state"]["id"].as_u64().unwrap())
        .collect();
    assert_eq!(globals.len(), 32);
    assert!(globals.windows(2).all(|pair| pair[0] <= pair[1]));
}

/// Parent whose watermark moves once its last record was consumed
#[derive(Debug)]
struct ProjectsParent {
    state: Mutex<JsonValue>,
}

impl ProjectsParent {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(json!({})),
        })
    }
}

impl ParentStream for ProjectsParent {
    fn name(&self) -> &str {
        "projects"
    }

    fn read_records(&self) -> RecordStream<'_> {
        let records = vec![
            json!({"id": 1, "updated_at": 1}),
            json!({"id": 2, "updated_at": 2}),
        ];
        let close = stream::once(future::lazy(move |_| {
            *self.state.lock().unwrap() = json!({"updated_at": 2});
            Ok::<_, Error>(None)
        }));
        stream::iter(
            records
                .into_iter()
                .map(|data| Ok::<_, Error>(Some(Record::new("projects", data, None)))),
        )
        .chain(close)
        .try_filter_map(|record| future::ready(Ok(record)))
        .boxed()
    }

    fn state(&self) -> JsonValue {
        self.state.lock().unwrap().clone()
    }

    fn set_initial_state(&self, state: &JsonValue) -> Result<()> {
        *self.state.lock().unwrap() = state.clone();
        Ok(())
    }
}

#[tokio::test]
async fn test_parent_state_waits_for_child_partitions() {
    let parent = ProjectsParent::new();
    let router = Arc::new(SubstreamPartitionRouter::new(
        vec![ParentStreamConfig::new(parent.clone(), "id", "project_id")
            .with_incremental_dependency(true)],
        Arc::new(json!({})),
    ));
    let cursor = PerPartitionCursor::new(
        "tasks",
        CursorConfig::new("updated_at"),
        router.clone(),
        repository(),
    );

    let slices: Vec<StreamSlice> = cursor
        .stream_slices(router.as_ref())
        .try_collect()
        .await
        .unwrap();
    assert_eq!(slices.len(), 2);
    assert_eq!(parent.state(), json!({"updated_at": 2}));

    cursor.observe(&record(json!({"updated_at": 5}), &slices[0]));
    cursor.close_partition(&slices[0]).unwrap();
    assert_eq!(cursor.state()["parent_state"], json!({"projects": {}}));

    cursor.close_partition(&slices[1]).unwrap();
    assert_eq!(
        cursor.state()["parent_state"],
        json!({"projects": {"updated_at": 2}})
    );
}

// ============================================================================
// FinalStateCursor Tests
// ============================================================================

#[tokio::test]
async fn test_final_state_cursor() {
    let repo = repository();
    let cursor = FinalStateCursor::new("users", repo.clone());
    let slices: Vec<StreamSlice> = cursor
        .stream_slices(&SinglePartitionRouter)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(slices, vec![StreamSlice::empty()]);

    cursor.close_partition(&slices[0]).unwrap();
    assert!(repo.is_empty());

    cursor.ensure_at_least_one_state_emitted();
    assert_eq!(
        emitted_states(&repo),
        vec![json!({"__ab_no_cursor_state_message": true})]
    );
}
