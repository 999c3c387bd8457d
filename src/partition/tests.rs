//! Tests for partition module

use super::*;
use crate::error::Result;
use crate::http::{InjectInto, RequestOption};
use crate::record::Record;
use crate::slice::StreamSlice;
use crate::types::JsonValue;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Parent stream serving fixed records and counting reads
#[derive(Debug)]
struct StaticParent {
    name: String,
    records: Vec<Record>,
    reads: AtomicUsize,
    state: Mutex<JsonValue>,
}

impl StaticParent {
    fn new(name: &str, records: Vec<JsonValue>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            records: records
                .into_iter()
                .map(|data| Record::new(name, data, None))
                .collect(),
            reads: AtomicUsize::new(0),
            state: Mutex::new(json!({})),
        })
    }

    fn with_records(name: &str, records: Vec<Record>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            records,
            reads: AtomicUsize::new(0),
            state: Mutex::new(json!({})),
        })
    }
}

impl ParentStream for StaticParent {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_records(&self) -> RecordStream<'_> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        stream::iter(self.records.clone().into_iter().map(Ok)).boxed()
    }

    fn state(&self) -> JsonValue {
        self.state.lock().unwrap().clone()
    }

    fn set_initial_state(&self, state: &JsonValue) -> Result<()> {
        *self.state.lock().unwrap() = state.clone();
        Ok(())
    }
}

async fn collect(router: &dyn PartitionRouter) -> Vec<JsonValue> {
    router
        .stream_slices()
        .map_ok(|slice| slice.to_value())
        .try_collect()
        .await
        .unwrap()
}

// ============================================================================
// Single / List Router Tests
// ============================================================================

#[tokio::test]
async fn test_single_partition_router() {
    let router = SinglePartitionRouter;
    let slices: Vec<StreamSlice> = router.stream_slices().try_collect().await.unwrap();
    assert_eq!(slices, vec![StreamSlice::empty()]);
    assert!(router.get_stream_state().is_none());
    assert!(router.set_initial_state(&json!({"x": 1})).is_ok());
}

#[tokio::test]
async fn test_list_router_slices_and_options() {
    let router = ListPartitionRouter::new(
        vec![json!("us"), json!("eu")],
        "region",
        Arc::new(json!({})),
    )
    .with_request_option(RequestOption::new(InjectInto::RequestParameter, "region").unwrap());

    assert_eq!(
        collect(&router).await,
        vec![json!({"region": "us"}), json!({"region": "eu"})]
    );

    let slice = StreamSlice::from_partition(json!({"region": "eu"}).as_object().cloned().unwrap());
    let options = router.request_options(&slice);
    assert_eq!(options.params.get("region"), Some(&json!("eu")));
}

// ============================================================================
// Substream Router Tests
// ============================================================================

#[tokio::test]
async fn test_substream_slices_from_parent_records() {
    let parent = StaticParent::new(
        "surveys",
        vec![json!({"id": "s1"}), json!({"id": "s2"}), json!({"id": "s1"}), json!({"name": "x"})],
    );
    let router = SubstreamPartitionRouter::new(
        vec![ParentStreamConfig::new(parent.clone(), "id", "survey_id")],
        Arc::new(json!({})),
    );

    assert_eq!(
        collect(&router).await,
        vec![json!({"survey_id": "s1"}), json!({"survey_id": "s2"})]
    );
    assert_eq!(parent.reads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_substream_ids_from_config_skip_parent() {
    let parent = StaticParent::new("surveys", vec![json!({"id": "other"})]);
    let router = SubstreamPartitionRouter::new(
        vec![ParentStreamConfig::new(parent.clone(), "id", "survey_id")],
        Arc::new(json!({"survey_ids": ["s1", "s2"]})),
    )
    .with_ids_from_config(IdsFromConfig {
        config_path: "survey_ids".into(),
        partition_field: "survey_id".into(),
    });

    assert_eq!(
        collect(&router).await,
        vec![json!({"survey_id": "s1"}), json!({"survey_id": "s2"})]
    );
    assert_eq!(parent.reads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_substream_empty_config_ids_read_parent() {
    let parent = StaticParent::new("surveys", vec![json!({"id": "p1"})]);
    let router = SubstreamPartitionRouter::new(
        vec![ParentStreamConfig::new(parent.clone(), "id", "survey_id")],
        Arc::new(json!({"survey_ids": []})),
    )
    .with_ids_from_config(IdsFromConfig {
        config_path: "survey_ids".into(),
        partition_field: "survey_id".into(),
    });

    assert_eq!(collect(&router).await, vec![json!({"survey_id": "p1"})]);
    assert_eq!(parent.reads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_substream_nested_parent_adds_parent_slice() {
    let grandparent_slice =
        StreamSlice::from_partition(json!({"survey_id": "s1"}).as_object().cloned().unwrap());
    let parent = StaticParent::with_records(
        "questions",
        vec![Record::new(
            "questions",
            json!({"id": "q1", "title": "Why?"}),
            Some(grandparent_slice),
        )],
    );
    let router = SubstreamPartitionRouter::new(
        vec![ParentStreamConfig::new(parent, "id", "question_id")
            .with_extra_fields(vec!["title".into()])],
        Arc::new(json!({})),
    );

    let slices: Vec<StreamSlice> = router.stream_slices().try_collect().await.unwrap();
    assert_eq!(
        slices[0].to_value(),
        json!({"question_id": "q1", "parent_slice": {"survey_id": "s1"}})
    );
    assert_eq!(slices[0].extra_fields().get("title"), Some(&json!("Why?")));
}

#[tokio::test]
async fn test_substream_nested_parent_key() {
    let parent = StaticParent::new("accounts", vec![json!({"owner": {"id": 9}})]);
    let router = SubstreamPartitionRouter::new(
        vec![ParentStreamConfig::new(parent, "owner.id", "owner_id")
            .with_request_option(RequestOption::new(InjectInto::Header, "X-Owner").unwrap())],
        Arc::new(json!({})),
    );

    let slices: Vec<StreamSlice> = router.stream_slices().try_collect().await.unwrap();
    assert_eq!(slices[0].to_value(), json!({"owner_id": 9}));
    let options = router.request_options(&slices[0]);
    assert_eq!(options.headers.get("X-Owner"), Some(&json!("9")));
}

#[test]
fn test_substream_parent_state_round_trip() {
    let parent = StaticParent::new("surveys", vec![]);
    let router = SubstreamPartitionRouter::new(
        vec![ParentStreamConfig::new(parent.clone(), "id", "survey_id")
            .with_incremental_dependency(true)],
        Arc::new(json!({})),
    );

    router
        .set_initial_state(&json!({"parent_state": {"surveys": {"updated_at": "2024-01-01"}}}))
        .unwrap();
    assert_eq!(
        router.get_stream_state(),
        Some(json!({"surveys": {"updated_at": "2024-01-01"}}))
    );
}

#[test]
fn test_substream_without_incremental_dependency_has_no_state() {
    let parent = StaticParent::new("surveys", vec![]);
    let router = SubstreamPartitionRouter::new(
        vec![ParentStreamConfig::new(parent, "id", "survey_id")],
        Arc::new(json!({})),
    );
    assert!(router.get_stream_state().is_none());
}
