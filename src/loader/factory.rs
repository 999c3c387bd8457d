//! Component factory
//!
//! Builds runtime components from manifest definitions. Parent streams are
//! built once per child that reads them, with their own cursor and a
//! repository that drops messages, so only the child's state reaches the
//! output.

use crate::config::ConcurrencyConfig;
use crate::cursor::{
    ConcurrentCursor, Cursor, CursorConfig, CursorStopCondition, DatetimeWindow,
    FinalStateCursor, PerPartitionCursor,
};
use crate::datetime::{parse_datetime, parse_duration, parse_with_format};
use crate::decode::{
    Decoder, DpathExtractor, GzipDecoder, JsonDecoder, JsonlDecoder, RecordFilter, RecordSelector,
};
use crate::engine::ConcurrentSource;
use crate::error::{Error, Result};
use crate::error_handler::{
    BackoffStrategy, CompositeErrorHandler, DefaultErrorHandler, ErrorHandler, HttpResponseFilter,
};
use crate::http::{
    HttpClient, HttpRequester, InjectInto, InterpolatedRequestOptionsProvider, RequestOption,
};
use crate::interpolation::{
    self, InterpolatedBoolean, InterpolatedMapping, InterpolatedString, InterpolatedValue,
    InterpolationContext,
};
use crate::loader::types::{
    BackoffStrategyDefinition, DecoderDefinition, ErrorHandlerDefinition,
    IncrementalSyncDefinition, ListValues, ManifestDefinition, NumberOrTemplate,
    PaginationStrategyDefinition,
    PaginatorDefinition, PartitionRouterDefinition, RequestOptionDefinition,
    ResponseFilterDefinition, StreamDefinition,
};
use crate::message::{MessageRepository, NoopMessageRepository};
use crate::pagination::{
    CursorPagination, DefaultPaginator, NoPagination, OffsetIncrement, PageIncrement,
    PaginationStrategy, Paginator, StopConditionPaginationStrategyDecorator,
};
use crate::partition::{
    IdsFromConfig, ListPartitionRouter, ParentStreamConfig, PartitionRouter,
    SinglePartitionRouter, SubstreamPartitionRouter,
};
use crate::retriever::SimpleRetriever;
use crate::stream::DeclarativeStream;
use crate::types::JsonValue;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Builds streams and the concurrent source for one manifest and user config
#[derive(Debug)]
pub struct ComponentFactory<'a> {
    manifest: &'a ManifestDefinition,
    config: Arc<JsonValue>,
    repository: Arc<dyn MessageRepository>,
    client: Arc<HttpClient>,
}

impl<'a> ComponentFactory<'a> {
    /// `repository` receives the state and log messages of top-level streams
    pub fn new(
        manifest: &'a ManifestDefinition,
        config: JsonValue,
        repository: Arc<dyn MessageRepository>,
    ) -> Result<Self> {
        let client = HttpClient::new(manifest.http.client_config())?;
        Ok(Self {
            manifest,
            config: Arc::new(config),
            repository,
            client: Arc::new(client),
        })
    }

    /// Every stream of the manifest, in declaration order
    pub fn create_streams(&self) -> Result<Vec<Arc<DeclarativeStream>>> {
        self.manifest
            .streams
            .iter()
            .map(|def| {
                self.create_stream(def, Arc::clone(&self.repository))
                    .map(Arc::new)
            })
            .collect()
    }

    /// Source reading the manifest's streams with its concurrency settings
    pub fn create_source(&self) -> Result<ConcurrentSource> {
        self.create_source_with(&self.manifest.concurrency_level)
    }

    pub fn create_source_with(&self, concurrency: &ConcurrencyConfig) -> Result<ConcurrentSource> {
        ConcurrentSource::from_config(concurrency, &self.config, Arc::clone(&self.repository))
    }

    // ========================================================================
    // Streams
    // ========================================================================

    fn create_stream(
        &self,
        def: &StreamDefinition,
        repository: Arc<dyn MessageRepository>,
    ) -> Result<DeclarativeStream> {
        debug!(stream = %def.name, "Building stream");
        let parameters = Arc::new(JsonValue::Object(def.parameters.clone()));
        let retriever_def = &def.retriever;

        let router = self.create_partition_router(def)?;
        let cursor = self.create_cursor(def, &router, &repository)?;
        let decoder = create_decoder(&retriever_def.decoder);
        let paginator = self.create_paginator(def, &decoder, &cursor, &parameters)?;
        let requester = self.create_requester(def, &parameters)?;

        let selector_def = &retriever_def.record_selector;
        let extractor = DpathExtractor::new(
            &selector_def.extractor.field_path,
            &self.config,
            &parameters,
        )?;
        let mut selector = RecordSelector::new(Arc::new(extractor));
        if let Some(ref filter) = selector_def.record_filter {
            selector = selector.with_filter(RecordFilter::new(filter.condition.as_str())?);
        }

        let mut retriever = SimpleRetriever::new(
            &def.name,
            Arc::new(requester),
            selector,
            Arc::clone(&self.config),
            parameters,
        )
        .with_decoder(decoder)
        .with_paginator(paginator)
        .with_partition_router(Arc::clone(&router))
        .with_ignore_stream_slicer_parameters_on_paginated_requests(
            retriever_def.ignore_stream_slicer_parameters_on_paginated_requests,
        );
        if def.incremental_sync.is_some() {
            retriever = retriever.with_cursor(Arc::clone(&cursor));
        }

        let mut stream = DeclarativeStream::new(&def.name, retriever, router, cursor, repository)
            .with_primary_key(def.primary_key.fields());
        if let Some(ref incremental) = def.incremental_sync {
            stream = stream.with_cursor_field(&incremental.cursor_field);
        }
        Ok(stream)
    }

    fn create_requester(
        &self,
        def: &StreamDefinition,
        parameters: &Arc<JsonValue>,
    ) -> Result<HttpRequester> {
        let requester_def = &def.retriever.requester;
        let error_handler: Arc<dyn ErrorHandler> = match requester_def.error_handler {
            Some(ref handler) => Arc::from(self.create_error_handler(handler)?),
            None => Arc::new(
                DefaultErrorHandler::new().with_max_retries(self.manifest.http.max_retries),
            ),
        };

        let options = InterpolatedRequestOptionsProvider {
            request_parameters: InterpolatedMapping::new(&requester_def.request_parameters)?,
            request_headers: InterpolatedMapping::new(&requester_def.request_headers)?,
            request_body_json: requester_def
                .request_body_json
                .as_ref()
                .map(InterpolatedValue::new)
                .transpose()?,
        };

        Ok(HttpRequester::new(
            &def.name,
            InterpolatedString::new(requester_def.url_base.as_str())?,
            InterpolatedString::new(requester_def.path.as_str())?,
            Arc::clone(&self.client),
            error_handler,
            Arc::clone(&self.config),
            Arc::clone(parameters),
        )
        .with_method(requester_def.http_method)
        .with_options_provider(options))
    }

    // ========================================================================
    // Partition routing and cursors
    // ========================================================================

    fn create_partition_router(&self, def: &StreamDefinition) -> Result<Arc<dyn PartitionRouter>> {
        let Some(ref router_def) = def.retriever.partition_router else {
            return Ok(Arc::new(SinglePartitionRouter));
        };

        match router_def {
            PartitionRouterDefinition::ListPartitionRouter {
                values,
                cursor_field,
                request_option,
            } => {
                let values = self.list_values(&def.name, values)?;
                let mut router =
                    ListPartitionRouter::new(values, cursor_field, Arc::clone(&self.config));
                if let Some(option) = request_option {
                    router = router.with_request_option(create_request_option(option)?);
                }
                Ok(Arc::new(router))
            }
            PartitionRouterDefinition::SubstreamPartitionRouter {
                parent_stream_configs,
                ids_from_config,
            } => {
                let parents = parent_stream_configs
                    .iter()
                    .map(|parent| {
                        let parent_def = self.manifest.stream(&parent.stream).ok_or_else(|| {
                            Error::config(format!(
                                "Stream '{}' references unknown parent stream '{}'",
                                def.name, parent.stream
                            ))
                        })?;
                        let stream =
                            self.create_stream(parent_def, Arc::new(NoopMessageRepository))?;
                        let mut config = ParentStreamConfig::new(
                            Arc::new(stream),
                            &parent.parent_key,
                            &parent.partition_field,
                        )
                        .with_incremental_dependency(parent.incremental_dependency)
                        .with_extra_fields(parent.extra_fields.clone());
                        if let Some(ref option) = parent.request_option {
                            config = config.with_request_option(create_request_option(option)?);
                        }
                        Ok(config)
                    })
                    .collect::<Result<Vec<_>>>()?;

                let mut router = SubstreamPartitionRouter::new(parents, Arc::clone(&self.config));
                if let Some(ids) = ids_from_config {
                    router = router.with_ids_from_config(IdsFromConfig {
                        config_path: ids.config_path.clone(),
                        partition_field: ids.partition_field.clone(),
                    });
                }
                Ok(Arc::new(router))
            }
        }
    }

    /// Literal values, or a template evaluated against the config
    fn list_values(&self, stream: &str, values: &ListValues) -> Result<Vec<JsonValue>> {
        match values {
            ListValues::Literal(values) => Ok(values.clone()),
            ListValues::Interpolated(template) => {
                let ctx = InterpolationContext::new(&self.config);
                match interpolation::eval(&JsonValue::String(template.clone()), &ctx)? {
                    JsonValue::Array(values) => Ok(values),
                    other => Err(Error::invalid_value(
                        "values",
                        format!("stream '{stream}': expected a list, got {other}"),
                    )),
                }
            }
        }
    }

    fn create_cursor(
        &self,
        def: &StreamDefinition,
        router: &Arc<dyn PartitionRouter>,
        repository: &Arc<dyn MessageRepository>,
    ) -> Result<Arc<dyn Cursor>> {
        let Some(ref incremental) = def.incremental_sync else {
            return Ok(Arc::new(FinalStateCursor::new(
                &def.name,
                Arc::clone(repository),
            )));
        };

        let mut config = CursorConfig::new(&incremental.cursor_field);
        if let Some(window) = self.create_window(incremental)? {
            config = config.with_window(window);
        }

        if def.retriever.partition_router.is_none() {
            return Ok(Arc::new(ConcurrentCursor::new(
                &def.name,
                config,
                Arc::clone(repository),
            )));
        }
        let mut cursor = PerPartitionCursor::new(
            &def.name,
            config,
            Arc::clone(router),
            Arc::clone(repository),
        );
        if let Some(max_partitions) = incremental.max_partitions {
            cursor = cursor.with_max_partitions(max_partitions);
        }
        Ok(Arc::new(cursor))
    }

    fn create_window(&self, def: &IncrementalSyncDefinition) -> Result<Option<DatetimeWindow>> {
        let Some(ref start) = def.start_datetime else {
            return Ok(None);
        };

        let start = self.eval_datetime(start, def.datetime_format.as_deref())?;
        let mut window = DatetimeWindow::new(start, Arc::clone(&self.config));
        if let Some(ref end) = def.end_datetime {
            window = window.with_end(self.eval_datetime(end, def.datetime_format.as_deref())?);
        }
        if let (Some(step), Some(granularity)) = (&def.step, &def.cursor_granularity) {
            window = window.with_step(parse_duration(step)?, parse_duration(granularity)?);
        }
        if let Some(ref lookback) = def.lookback_window {
            window = window.with_lookback(parse_duration(lookback)?);
        }
        if let Some(ref format) = def.datetime_format {
            window = window.with_format(format);
        }
        if let Some(ref option) = def.start_time_option {
            window = window.with_start_time_option(create_request_option(option)?);
        }
        if let Some(ref option) = def.end_time_option {
            window = window.with_end_time_option(create_request_option(option)?);
        }
        Ok(Some(window))
    }

    fn eval_datetime(&self, template: &str, format: Option<&str>) -> Result<DateTime<Utc>> {
        let ctx = InterpolationContext::new(&self.config);
        let value = InterpolatedString::new(template)?.eval_string(&ctx);
        match format {
            Some(format) => parse_with_format(&value, format).or_else(|_| parse_datetime(&value)),
            None => parse_datetime(&value),
        }
    }

    // ========================================================================
    // Pagination
    // ========================================================================

    fn create_paginator(
        &self,
        def: &StreamDefinition,
        decoder: &Arc<dyn Decoder>,
        cursor: &Arc<dyn Cursor>,
        parameters: &Arc<JsonValue>,
    ) -> Result<Arc<dyn Paginator>> {
        let Some(PaginatorDefinition::DefaultPaginator {
            ref pagination_strategy,
            ref page_token_option,
            ref page_size_option,
        }) = def.retriever.paginator
        else {
            return Ok(Arc::new(NoPagination));
        };

        let mut strategy = self.create_pagination_strategy(pagination_strategy, decoder, parameters)?;
        if def.incremental_sync.as_ref().is_some_and(|i| i.is_data_feed) {
            strategy = Box::new(StopConditionPaginationStrategyDecorator::new(
                strategy,
                Arc::new(CursorStopCondition::new(Arc::clone(cursor))),
            ));
        }

        let mut paginator =
            DefaultPaginator::new(strategy, Arc::clone(&self.config), Arc::clone(parameters));
        if let Some(option) = page_token_option {
            paginator = paginator.with_page_token_option(create_request_option(option)?);
        }
        if let Some(option) = page_size_option {
            paginator = paginator.with_page_size_option(create_request_option(option)?);
        }
        Ok(Arc::new(paginator))
    }

    fn create_pagination_strategy(
        &self,
        def: &PaginationStrategyDefinition,
        decoder: &Arc<dyn Decoder>,
        parameters: &Arc<JsonValue>,
    ) -> Result<Box<dyn PaginationStrategy>> {
        Ok(match def {
            PaginationStrategyDefinition::PageIncrement {
                page_size,
                start_from_page,
                inject_on_first_request,
                total_pages_path,
            } => {
                let mut strategy = PageIncrement::new(*page_size, *start_from_page)
                    .with_inject_on_first_request(*inject_on_first_request);
                if let Some(path) = total_pages_path {
                    strategy = strategy.with_total_pages_path(path.clone(), Arc::clone(decoder));
                }
                Box::new(strategy)
            }
            PaginationStrategyDefinition::OffsetIncrement {
                page_size,
                inject_on_first_request,
            } => Box::new(
                OffsetIncrement::new(*page_size)
                    .with_inject_on_first_request(*inject_on_first_request),
            ),
            PaginationStrategyDefinition::CursorPagination {
                cursor_value,
                stop_condition,
                page_size,
            } => {
                let mut strategy = CursorPagination::new(
                    InterpolatedString::new(cursor_value.as_str())?,
                    Arc::clone(decoder),
                    Arc::clone(&self.config),
                    Arc::clone(parameters),
                );
                if let Some(condition) = stop_condition {
                    strategy =
                        strategy.with_stop_condition(InterpolatedBoolean::new(condition.as_str())?);
                }
                if let Some(size) = page_size {
                    strategy = strategy.with_page_size(*size);
                }
                Box::new(strategy)
            }
        })
    }

    // ========================================================================
    // Error handling
    // ========================================================================

    fn create_error_handler(&self, def: &ErrorHandlerDefinition) -> Result<Box<dyn ErrorHandler>> {
        match def {
            ErrorHandlerDefinition::DefaultErrorHandler {
                max_retries,
                max_time,
                backoff_strategies,
                response_filters,
            } => {
                let mut handler = DefaultErrorHandler::new()
                    .with_max_retries(max_retries.unwrap_or(self.manifest.http.max_retries));
                if let Some(seconds) = max_time {
                    handler = handler.with_max_time(Duration::from_secs(*seconds));
                }
                let ctx = InterpolationContext::new(&self.config);
                for strategy in backoff_strategies {
                    handler = handler.with_backoff(create_backoff_strategy(strategy, &ctx)?);
                }
                for filter in response_filters {
                    handler = handler.with_filter(self.create_response_filter(filter)?);
                }
                Ok(Box::new(handler))
            }
            ErrorHandlerDefinition::CompositeErrorHandler { error_handlers } => {
                let handlers = error_handlers
                    .iter()
                    .map(|h| self.create_error_handler(h))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Box::new(CompositeErrorHandler::new(handlers)))
            }
        }
    }

    fn create_response_filter(&self, def: &ResponseFilterDefinition) -> Result<HttpResponseFilter> {
        let mut filter =
            HttpResponseFilter::new(Arc::clone(&self.config)).with_http_codes(def.http_codes.clone());
        if let Some(action) = def.action {
            filter = filter.with_action(action);
        }
        if let Some(failure_type) = def.failure_type {
            filter = filter.with_failure_type(failure_type);
        }
        if let Some(ref needle) = def.error_message_contains {
            filter = filter.with_error_message_contains(needle);
        }
        if let Some(ref predicate) = def.predicate {
            filter = filter.with_predicate(InterpolatedBoolean::new(predicate.as_str())?);
        }
        if let Some(ref message) = def.error_message {
            filter = filter.with_error_message(InterpolatedString::new(message.as_str())?);
        }
        Ok(filter)
    }
}

/// Numeric setting, evaluating templates against the config
fn eval_number(value: &NumberOrTemplate, field: &str, ctx: &InterpolationContext<'_>) -> Result<f64> {
    match value {
        NumberOrTemplate::Number(n) => Ok(*n),
        NumberOrTemplate::Template(template) => {
            InterpolatedString::new(template.as_str())?.eval_f64(ctx, field)
        }
    }
}

pub(crate) fn create_backoff_strategy(
    def: &BackoffStrategyDefinition,
    ctx: &InterpolationContext<'_>,
) -> Result<BackoffStrategy> {
    Ok(match def {
        BackoffStrategyDefinition::ExponentialBackoffStrategy { factor } => {
            BackoffStrategy::Exponential {
                factor: eval_number(factor, "factor", ctx)?,
            }
        }
        BackoffStrategyDefinition::ConstantBackoffStrategy {
            backoff_time_in_seconds,
        } => BackoffStrategy::Constant {
            backoff_time_in_seconds: eval_number(
                backoff_time_in_seconds,
                "backoff_time_in_seconds",
                ctx,
            )?,
        },
        BackoffStrategyDefinition::WaitTimeFromHeader {
            header,
            regex,
            max_waiting_time_in_seconds,
        } => BackoffStrategy::WaitTimeFromHeader {
            header: header.clone(),
            regex: BackoffStrategy::compile_regex(regex.as_deref())?,
            max_waiting_time_in_seconds: *max_waiting_time_in_seconds,
        },
        BackoffStrategyDefinition::WaitUntilTimeFromHeader {
            header,
            regex,
            min_wait,
        } => BackoffStrategy::WaitUntilTimeFromHeader {
            header: header.clone(),
            regex: BackoffStrategy::compile_regex(regex.as_deref())?,
            min_wait: *min_wait,
        },
    })
}

fn create_decoder(def: &DecoderDefinition) -> Arc<dyn Decoder> {
    match def {
        DecoderDefinition::Json => Arc::new(JsonDecoder::new()),
        DecoderDefinition::Jsonl => Arc::new(JsonlDecoder::new()),
        DecoderDefinition::Gzip { decoder } => Arc::new(GzipDecoder::new(create_decoder(decoder))),
    }
}

fn create_request_option(def: &RequestOptionDefinition) -> Result<RequestOption> {
    match (def.inject_into, &def.field_name) {
        (InjectInto::Path, _) => Ok(RequestOption::path()),
        (inject_into, Some(field_name)) => RequestOption::new(inject_into, field_name.as_str()),
        (inject_into, None) => Err(Error::invalid_value(
            "field_name",
            format!("required when injecting into {inject_into:?}"),
        )),
    }
}
