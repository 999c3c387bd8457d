//! Retriever reading a slice page by page

use crate::cursor::Cursor;
use crate::decode::{Decoder, JsonDecoder, RecordSelector};
use crate::error::{Error, Result};
use crate::http::{RequestInput, RequestOptions, Requester};
use crate::interpolation::InterpolationContext;
use crate::pagination::{NoPagination, PageInput, Paginator};
use crate::partition::{PartitionRouter, RecordStream, SinglePartitionRouter};
use crate::record::Record;
use crate::slice::StreamSlice;
use crate::types::JsonValue;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::debug;

/// Token and position of the page to request next
#[derive(Debug, Clone)]
struct PageStep {
    token: Option<JsonValue>,
    first: bool,
}

/// Records of one page plus the token of the following page
#[derive(Debug)]
struct Page {
    records: Vec<Record>,
    next_token: Option<JsonValue>,
}

/// Retriever driving requester, decoder, selector and paginator
#[derive(Debug)]
pub struct SimpleRetriever {
    name: String,
    requester: Arc<dyn Requester>,
    record_selector: RecordSelector,
    decoder: Arc<dyn Decoder>,
    paginator: Arc<dyn Paginator>,
    router: Arc<dyn PartitionRouter>,
    cursor: Option<Arc<dyn Cursor>>,
    ignore_stream_slicer_parameters_on_paginated_requests: bool,
    config: Arc<JsonValue>,
    parameters: Arc<JsonValue>,
}

impl SimpleRetriever {
    /// Create a retriever reading JSON, without pagination or partitions
    pub fn new(
        name: impl Into<String>,
        requester: Arc<dyn Requester>,
        record_selector: RecordSelector,
        config: Arc<JsonValue>,
        parameters: Arc<JsonValue>,
    ) -> Self {
        Self {
            name: name.into(),
            requester,
            record_selector,
            decoder: Arc::new(JsonDecoder::new()),
            paginator: Arc::new(NoPagination),
            router: Arc::new(SinglePartitionRouter),
            cursor: None,
            ignore_stream_slicer_parameters_on_paginated_requests: false,
            config,
            parameters,
        }
    }

    #[must_use]
    pub fn with_decoder(mut self, decoder: Arc<dyn Decoder>) -> Self {
        self.decoder = decoder;
        self
    }

    #[must_use]
    pub fn with_paginator(mut self, paginator: Arc<dyn Paginator>) -> Self {
        self.paginator = paginator;
        self
    }

    #[must_use]
    pub fn with_partition_router(mut self, router: Arc<dyn PartitionRouter>) -> Self {
        self.router = router;
        self
    }

    /// Cursor observing every record and contributing range options
    #[must_use]
    pub fn with_cursor(mut self, cursor: Arc<dyn Cursor>) -> Self {
        self.cursor = Some(cursor);
        self
    }

    /// Send only paginator options on pages after the first
    #[must_use]
    pub fn with_ignore_stream_slicer_parameters_on_paginated_requests(mut self, ignore: bool) -> Self {
        self.ignore_stream_slicer_parameters_on_paginated_requests = ignore;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Options for one request, later sources winning:
    /// router < paginator < cursor. The requester's own options sit below
    /// all of them and are merged when the request is built.
    pub fn request_options(
        &self,
        slice: &StreamSlice,
        token: Option<&JsonValue>,
        first_page: bool,
    ) -> RequestOptions {
        let include_slicer =
            first_page || !self.ignore_stream_slicer_parameters_on_paginated_requests;
        let mut options = RequestOptions::new();
        if include_slicer {
            options.merge(self.router.request_options(slice));
        }
        options.merge(self.paginator.request_options(token));
        if include_slicer {
            if let Some(cursor) = &self.cursor {
                options.merge(cursor.request_options(slice));
            }
        }
        options
    }

    /// Lazily read every page of a slice
    ///
    /// The stream ends when the paginator returns no token or the error
    /// handler ignores a response. It cannot be restarted.
    pub fn read_records(&self, slice: StreamSlice, stream_state: JsonValue) -> RecordStream<'_> {
        let slice = Arc::new(slice);
        let stream_state = Arc::new(stream_state);
        let start = PageStep {
            token: self.paginator.initial_token(),
            first: true,
        };

        stream::try_unfold(Some(start), move |step| {
            let slice = Arc::clone(&slice);
            let stream_state = Arc::clone(&stream_state);
            async move {
                let Some(step) = step else {
                    return Ok::<_, Error>(None);
                };
                let Some(page) = self.read_page(&slice, &stream_state, &step).await? else {
                    return Ok::<_, Error>(None);
                };
                let next = page.next_token.map(|token| PageStep {
                    token: Some(token),
                    first: false,
                });
                Ok(Some((stream::iter(page.records.into_iter().map(Ok)), next)))
            }
        })
        .try_flatten()
        .boxed()
    }

    async fn read_page(
        &self,
        slice: &StreamSlice,
        stream_state: &JsonValue,
        step: &PageStep,
    ) -> Result<Option<Page>> {
        let token = step.token.as_ref();
        let options = self.request_options(slice, token, step.first);
        let input = RequestInput {
            stream_state,
            slice,
            next_page_token: token,
        };
        let Some(response) = self.requester.send_request(input, options).await? else {
            debug!(stream = %self.name, slice = ?slice, "Response ignored, ending slice");
            return Ok(None);
        };

        let documents = self.decoder.decode(&response)?;
        let ctx = InterpolationContext::new(&self.config)
            .with_parameters(&self.parameters)
            .with_stream_state(stream_state)
            .with_slice(slice)
            .with_next_page_token(token);

        let mut records = Vec::new();
        for document in &documents {
            for data in self.record_selector.select_records(document, &ctx)? {
                let mut record = Record::new(&self.name, data, Some(slice.clone()));
                if let Some(cursor) = &self.cursor {
                    record.eligible = cursor.should_be_synced(&record);
                    cursor.observe(&record);
                }
                records.push(record);
            }
        }

        let next_token = self.paginator.next_page_token(
            &PageInput::new(&response)
                .with_last_page_size(records.len())
                .with_last_record(records.last())
                .with_previous_token(token),
        )?;
        debug!(
            stream = %self.name,
            records = records.len(),
            has_next = next_token.is_some(),
            "Read page"
        );

        Ok(Some(Page {
            records,
            next_token,
        }))
    }
}
