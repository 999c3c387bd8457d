//! Tests for manifest loader module

use super::*;
use crate::error_handler::HttpOutcome;
use crate::interpolation::InterpolationContext;
use crate::message::NoopMessageRepository;
use crate::partition::ParentStream;
use crate::record::Record;
use crate::slice::StreamSlice;
use crate::types::{FailureType, Method, SyncMode};
use futures::TryStreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn noop() -> Arc<NoopMessageRepository> {
    Arc::new(NoopMessageRepository)
}

// ============================================================================
// Basic Loading Tests
// ============================================================================

#[test]
fn test_load_minimal_manifest() {
    let yaml = r#"
streams:
  - name: users
    retriever:
      requester:
        url_base: https://api.example.com
        path: /users
"#;

    let def = load_manifest_from_str(yaml).unwrap();
    assert_eq!(def.version, "0.1.0");
    assert_eq!(def.streams.len(), 1);

    let stream = &def.streams[0];
    assert_eq!(stream.name, "users");
    assert_eq!(stream.primary_key, PrimaryKey::None);
    assert_eq!(stream.retriever.requester.path, "/users");
    assert_eq!(stream.retriever.requester.http_method, Method::GET);
    assert!(stream.retriever.paginator.is_none());
    assert!(stream.retriever.partition_router.is_none());
    assert!(matches!(stream.retriever.decoder, DecoderDefinition::Json));
    assert!(!stream.retriever.ignore_stream_slicer_parameters_on_paginated_requests);
    assert!(stream.incremental_sync.is_none());
}

#[test]
fn test_load_manifest_from_json() {
    let manifest = json!({
        "version": "1.2.0",
        "streams": [{
            "name": "users",
            "primary_key": ["org", "id"],
            "retriever": {"requester": {"url_base": "https://api.example.com"}}
        }]
    });

    let def = load_manifest_from_str(&manifest.to_string()).unwrap();
    assert_eq!(def.version, "1.2.0");
    assert_eq!(def.streams[0].primary_key.fields(), vec!["org", "id"]);
}

#[test]
fn test_load_manifest_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "streams:\n  - name: users\n    primary_key: id\n    retriever:\n      requester:\n        url_base: https://api.example.com"
    )
    .unwrap();

    let def = load_manifest(file.path()).unwrap();
    assert_eq!(def.streams[0].primary_key, PrimaryKey::Single("id".into()));
}

#[test]
fn test_load_manifest_missing_file() {
    let err = load_manifest("/nonexistent/manifest.yaml").unwrap_err();
    assert!(err.to_string().contains("Failed to read manifest file"));
}

#[test]
fn test_load_manifest_with_engine_settings() {
    let yaml = r#"
concurrency_level:
  default_concurrency: "{{ config['workers'] }}"
  max_concurrency: 8
http:
  timeout_seconds: 10
  max_retries: 2
  rate_limit:
    requests_per_second: 5
streams:
  - name: users
    retriever:
      requester:
        url_base: https://api.example.com
"#;

    let def = load_manifest_from_str(yaml).unwrap();
    assert_eq!(def.concurrency_level.max_concurrency, Some(8));
    assert_eq!(def.concurrency_level.resolve(&json!({"workers": 20})).unwrap(), 8);
    assert_eq!(def.http.timeout_seconds, 10);
    assert_eq!(def.http.max_retries, 2);
    assert!(def.http.rate_limit.is_some());
}

// ============================================================================
// Component Definition Tests
// ============================================================================

#[test]
fn test_load_full_retriever() {
    let yaml = r#"
streams:
  - name: orders
    $parameters:
      resource: orders
    retriever:
      requester:
        url_base: "{{ config['base'] }}"
        path: "/{{ parameters['resource'] }}"
        http_method: POST
        request_parameters:
          limit: "100"
        request_headers:
          X-Team: "{{ config['team'] }}"
        request_body_json:
          filter: active
        error_handler:
          type: composite_error_handler
          error_handlers:
            - type: default_error_handler
              max_retries: 3
              max_time: 60
              backoff_strategies:
                - type: wait_time_from_header
                  header: Retry-After
                - type: constant_backoff_strategy
                  backoff_time_in_seconds: 2
              response_filters:
                - http_codes: [404]
                  action: IGNORE
                - error_message_contains: quota
                  action: FAIL
                  failure_type: config_error
      record_selector:
        extractor:
          field_path: [data, items]
        record_filter:
          condition: "{{ record['status'] != 'deleted' }}"
      decoder:
        type: gzip
        decoder:
          type: jsonl
      paginator:
        type: default_paginator
        pagination_strategy:
          type: cursor_pagination
          cursor_value: "{{ response['next'] }}"
          stop_condition: "{{ not response['has_more'] }}"
          page_size: 50
        page_token_option:
          inject_into: request_parameter
          field_name: cursor
        page_size_option:
          inject_into: request_parameter
          field_name: limit
      ignore_stream_slicer_parameters_on_paginated_requests: true
"#;

    let def = load_manifest_from_str(yaml).unwrap();
    let stream = &def.streams[0];
    assert_eq!(stream.parameters["resource"], json!("orders"));

    let requester = &stream.retriever.requester;
    assert_eq!(requester.http_method, Method::POST);
    assert_eq!(requester.request_parameters["limit"], json!("100"));
    assert_eq!(requester.request_body_json, Some(json!({"filter": "active"})));

    let Some(ErrorHandlerDefinition::CompositeErrorHandler { ref error_handlers }) =
        requester.error_handler
    else {
        panic!("Expected composite error handler");
    };
    let ErrorHandlerDefinition::DefaultErrorHandler {
        max_retries,
        max_time,
        ref backoff_strategies,
        ref response_filters,
    } = error_handlers[0]
    else {
        panic!("Expected default error handler");
    };
    assert_eq!(max_retries, Some(3));
    assert_eq!(max_time, Some(60));
    assert_eq!(backoff_strategies.len(), 2);
    assert_eq!(response_filters[1].failure_type, Some(FailureType::ConfigError));

    assert_eq!(
        stream.retriever.record_selector.extractor.field_path,
        vec!["data", "items"]
    );
    assert!(matches!(
        stream.retriever.decoder,
        DecoderDefinition::Gzip { ref decoder } if matches!(**decoder, DecoderDefinition::Jsonl)
    ));
    assert!(matches!(
        stream.retriever.paginator,
        Some(PaginatorDefinition::DefaultPaginator {
            pagination_strategy: PaginationStrategyDefinition::CursorPagination { page_size: Some(50), .. },
            ..
        })
    ));
    assert!(stream.retriever.ignore_stream_slicer_parameters_on_paginated_requests);
}

#[test]
fn test_load_incremental_substream() {
    let yaml = r#"
streams:
  - name: projects
    retriever:
      requester:
        url_base: https://api.example.com
        path: /projects
  - name: tasks
    retriever:
      requester:
        url_base: https://api.example.com
        path: "/projects/{{ stream_partition['project_id'] }}/tasks"
      partition_router:
        type: substream_partition_router
        parent_stream_configs:
          - stream: projects
            parent_key: id
            partition_field: project_id
            incremental_dependency: true
    incremental_sync:
      cursor_field: updated_at
      start_datetime: "{{ config['start_date'] }}"
      datetime_format: "%Y-%m-%d"
      step: P1D
      cursor_granularity: P1D
      start_time_option:
        inject_into: request_parameter
        field_name: since
"#;

    let def = load_manifest_from_str(yaml).unwrap();
    let tasks = def.stream("tasks").unwrap();
    assert_eq!(tasks.parent_names(), vec!["projects"]);

    let incremental = tasks.incremental_sync.as_ref().unwrap();
    assert_eq!(incremental.cursor_field, "updated_at");
    assert_eq!(incremental.step.as_deref(), Some("P1D"));
    assert!(!incremental.is_data_feed);
}

#[test]
fn test_load_list_router_values() {
    let yaml = r#"
streams:
  - name: literal
    retriever:
      requester:
        url_base: https://api.example.com
      partition_router:
        type: list_partition_router
        values: [a, b]
        cursor_field: section
  - name: templated
    retriever:
      requester:
        url_base: https://api.example.com
      partition_router:
        type: list_partition_router
        values: "{{ config['sections'] }}"
        cursor_field: section
"#;

    let def = load_manifest_from_str(yaml).unwrap();
    let values: Vec<_> = def
        .streams
        .iter()
        .map(|s| match s.retriever.partition_router {
            Some(PartitionRouterDefinition::ListPartitionRouter { ref values, .. }) => {
                values.clone()
            }
            _ => panic!("Expected list router"),
        })
        .collect();
    assert_eq!(values[0], ListValues::Literal(vec![json!("a"), json!("b")]));
    assert_eq!(
        values[1],
        ListValues::Interpolated("{{ config['sections'] }}".into())
    );
}

// ============================================================================
// Validation Tests
// ============================================================================

#[test]
fn test_validate_no_streams() {
    let err = load_manifest_from_str("streams: []").unwrap_err();
    assert!(err.to_string().contains("at least one stream"));
}

#[test]
fn test_validate_duplicate_names() {
    let yaml = r#"
streams:
  - name: users
    retriever:
      requester:
        url_base: https://api.example.com
  - name: users
    retriever:
      requester:
        url_base: https://api.example.com
"#;

    let err = load_manifest_from_str(yaml).unwrap_err();
    assert!(err.to_string().contains("Duplicate stream names"));
}

#[test]
fn test_validate_empty_stream_name() {
    let yaml = r#"
streams:
  - name: ""
    retriever:
      requester:
        url_base: https://api.example.com
"#;

    let err = load_manifest_from_str(yaml).unwrap_err();
    assert!(err.to_string().contains("Stream name cannot be empty"));
}

#[test]
fn test_validate_unknown_parent() {
    let yaml = r#"
streams:
  - name: tasks
    retriever:
      requester:
        url_base: https://api.example.com
      partition_router:
        type: substream_partition_router
        parent_stream_configs:
          - stream: projects
            parent_key: id
            partition_field: project_id
"#;

    let err = load_manifest_from_str(yaml).unwrap_err();
    assert!(err.to_string().contains("unknown parent stream 'projects'"));
}

#[test]
fn test_validate_parent_cycle() {
    let yaml = r#"
streams:
  - name: a
    retriever:
      requester:
        url_base: https://api.example.com
      partition_router:
        type: substream_partition_router
        parent_stream_configs:
          - {stream: b, parent_key: id, partition_field: b_id}
  - name: b
    retriever:
      requester:
        url_base: https://api.example.com
      partition_router:
        type: substream_partition_router
        parent_stream_configs:
          - {stream: a, parent_key: id, partition_field: a_id}
"#;

    let err = load_manifest_from_str(yaml).unwrap_err();
    assert!(err.to_string().contains("cycle"));
}

#[test]
fn test_validate_step_without_granularity() {
    let yaml = r#"
streams:
  - name: events
    retriever:
      requester:
        url_base: https://api.example.com
    incremental_sync:
      cursor_field: created
      start_datetime: "2024-01-01T00:00:00Z"
      step: P1D
"#;

    let err = load_manifest_from_str(yaml).unwrap_err();
    assert!(err.to_string().contains("step and cursor_granularity"));
}

#[test]
fn test_validate_unknown_component_type() {
    let yaml = r#"
streams:
  - name: users
    retriever:
      requester:
        url_base: https://api.example.com
      paginator:
        type: telepathic_paginator
"#;

    let err = load_manifest_from_str(yaml).unwrap_err();
    assert!(err.to_string().contains("Failed to parse manifest"));
}

// ============================================================================
// Component Factory Tests
// ============================================================================

#[tokio::test]
async fn test_factory_builds_streams() {
    let yaml = r#"
streams:
  - name: users
    primary_key: id
    retriever:
      requester:
        url_base: https://api.example.com
    incremental_sync:
      cursor_field: updated_at
  - name: teams
    retriever:
      requester:
        url_base: https://api.example.com
"#;

    let def = load_manifest_from_str(yaml).unwrap();
    let factory = ComponentFactory::new(&def, json!({}), noop()).unwrap();
    let streams = factory.create_streams().unwrap();

    let names: Vec<_> = streams.iter().map(|s| s.name()).collect();
    assert_eq!(names, vec!["users", "teams"]);
    assert_eq!(streams[0].primary_key(), ["id".to_string()]);
    assert_eq!(streams[0].cursor_field(), Some("updated_at"));
    assert_eq!(
        streams[0].supported_sync_modes(),
        vec![SyncMode::FullRefresh, SyncMode::Incremental]
    );
    assert_eq!(streams[1].supported_sync_modes(), vec![SyncMode::FullRefresh]);
}

#[tokio::test]
async fn test_factory_concurrency_from_config() {
    let yaml = r#"
concurrency_level:
  default_concurrency: "{{ config['workers'] }}"
  max_concurrency: 4
streams:
  - name: users
    retriever:
      requester:
        url_base: https://api.example.com
"#;

    let def = load_manifest_from_str(yaml).unwrap();
    let factory = ComponentFactory::new(&def, json!({"workers": 3}), noop()).unwrap();
    assert_eq!(factory.create_source().unwrap().concurrency(), 3);
}

#[tokio::test]
async fn test_factory_rejects_non_list_values() {
    let yaml = r#"
streams:
  - name: sections
    retriever:
      requester:
        url_base: https://api.example.com
      partition_router:
        type: list_partition_router
        values: "{{ config['sections'] }}"
        cursor_field: section
"#;

    let def = load_manifest_from_str(yaml).unwrap();
    let factory = ComponentFactory::new(&def, json!({"sections": "a,b"}), noop()).unwrap();
    assert!(factory.create_streams().is_err());
}

#[tokio::test]
async fn test_factory_rejects_option_without_field_name() {
    let yaml = r#"
streams:
  - name: users
    retriever:
      requester:
        url_base: https://api.example.com
      paginator:
        type: default_paginator
        pagination_strategy:
          type: offset_increment
          page_size: 10
        page_size_option:
          inject_into: request_parameter
"#;

    let def = load_manifest_from_str(yaml).unwrap();
    let factory = ComponentFactory::new(&def, json!({}), noop()).unwrap();
    let err = factory.create_streams().unwrap_err();
    assert!(err.to_string().contains("field_name"));
}

const TEMPLATED_BACKOFF: &str = r#"
streams:
  - name: users
    retriever:
      requester:
        url_base: https://api.example.com
        error_handler:
          type: default_error_handler
          backoff_strategies:
            - type: exponential_backoff_strategy
              factor: "{{ config['backoff_factor'] }}"
            - type: constant_backoff_strategy
              backoff_time_in_seconds: 3
"#;

#[test]
fn test_backoff_factor_from_config() {
    let def = load_manifest_from_str(TEMPLATED_BACKOFF).unwrap();
    let Some(ErrorHandlerDefinition::DefaultErrorHandler {
        ref backoff_strategies,
        ..
    }) = def.streams[0].retriever.requester.error_handler
    else {
        panic!("Expected default error handler");
    };
    assert!(matches!(
        backoff_strategies[1],
        BackoffStrategyDefinition::ConstantBackoffStrategy {
            backoff_time_in_seconds: NumberOrTemplate::Number(n)
        } if n == 3.0
    ));

    let config = json!({"backoff_factor": 0.5});
    let ctx = InterpolationContext::new(&config);
    let strategy = factory::create_backoff_strategy(&backoff_strategies[0], &ctx).unwrap();
    let wait = strategy
        .backoff_time(&HttpOutcome::Transport("connection reset"), Some(2))
        .unwrap();
    assert_eq!(wait, Some(Duration::from_secs(2)));

    let factory = ComponentFactory::new(&def, config, noop()).unwrap();
    assert_eq!(factory.create_streams().unwrap().len(), 1);
}

#[test]
fn test_backoff_factor_must_be_numeric() {
    let def = load_manifest_from_str(TEMPLATED_BACKOFF).unwrap();
    let factory = ComponentFactory::new(&def, json!({"backoff_factor": "soon"}), noop()).unwrap();
    let err = factory.create_streams().unwrap_err();
    assert!(err.to_string().contains("factor"));
}

#[tokio::test]
async fn test_factory_stream_reads_paginated_partitions() {
    let server = MockServer::start().await;
    for section in ["a", "b"] {
        Mock::given(method("GET"))
            .and(path("/items"))
            .and(query_param("section", section))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": format!("{section}1")}, {"id": format!("{section}2")}]
            })))
            .mount(&server)
            .await;
    }

    let yaml = r#"
streams:
  - name: items
    retriever:
      requester:
        url_base: "{{ config['base'] }}"
        path: /items
      record_selector:
        extractor:
          field_path: [data]
      partition_router:
        type: list_partition_router
        values: "{{ config['sections'] }}"
        cursor_field: section
        request_option:
          inject_into: request_parameter
          field_name: section
      paginator:
        type: default_paginator
        pagination_strategy:
          type: offset_increment
          page_size: 5
        page_size_option:
          inject_into: request_parameter
          field_name: limit
"#;

    let def = load_manifest_from_str(yaml).unwrap();
    let config = json!({"base": server.uri(), "sections": ["a", "b"]});
    let factory = ComponentFactory::new(&def, config, noop()).unwrap();
    let stream = factory.create_streams().unwrap().remove(0);

    let slices: Vec<StreamSlice> = stream.generate_partitions().try_collect().await.unwrap();
    assert_eq!(slices.len(), 2);

    let records: Vec<Record> = stream
        .read_partition(slices[1].clone())
        .try_collect()
        .await
        .unwrap();
    let ids: Vec<_> = records.iter().map(|r| r.data["id"].clone()).collect();
    assert_eq!(ids, vec![json!("b1"), json!("b2")]);
}

#[tokio::test]
async fn test_factory_substream_reads_parent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/projects"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}, {"id": 2}])))
        .mount(&server)
        .await;
    for id in [1, 2] {
        Mock::given(method("GET"))
            .and(path(format!("/projects/{id}/tasks")))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{"task": id * 10}])),
            )
            .mount(&server)
            .await;
    }

    let yaml = r#"
streams:
  - name: projects
    retriever:
      requester:
        url_base: "{{ config['base'] }}"
        path: /projects
  - name: tasks
    retriever:
      requester:
        url_base: "{{ config['base'] }}"
        path: "/projects/{{ stream_partition['project_id'] }}/tasks"
      partition_router:
        type: substream_partition_router
        parent_stream_configs:
          - stream: projects
            parent_key: id
            partition_field: project_id
"#;

    let def = load_manifest_from_str(yaml).unwrap();
    let factory = ComponentFactory::new(&def, json!({"base": server.uri()}), noop()).unwrap();
    let tasks = factory.create_streams().unwrap().remove(1);

    let records: Vec<Record> = ParentStream::read_records(tasks.as_ref())
        .try_collect()
        .await
        .unwrap();
    let values: Vec<_> = records.iter().map(|r| r.data["task"].clone()).collect();
    assert_eq!(values, vec![json!(10), json!(20)]);
    assert_eq!(
        records[0].associated_slice.as_ref().unwrap().partition()["project_id"],
        json!(1)
    );
}
