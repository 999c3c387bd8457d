//! Datetime windows for incremental cursors

use crate::datetime::{format_datetime, parse_datetime, parse_with_format, to_iso};
use crate::http::{RequestOption, RequestOptions};
use crate::interpolation::InterpolationContext;
use crate::slice::StreamSlice;
use crate::types::{JsonObject, JsonValue};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Cursor slice key holding the window start
pub const START_KEY: &str = "start_time";
/// Cursor slice key holding the window end
pub const END_KEY: &str = "end_time";

/// Splits `[start, end]` into windows of `step`
///
/// Windows are inclusive on both ends and `cursor_granularity` apart, so
/// `P1D` steps with `PT1S` granularity give `00:00:00..23:59:59` windows.
#[derive(Debug, Clone)]
pub struct DatetimeWindow {
    pub start_datetime: DateTime<Utc>,
    /// `None` reads up to the time slices are generated
    pub end_datetime: Option<DateTime<Utc>>,
    /// `None` reads everything in a single window
    pub step: Option<Duration>,
    pub cursor_granularity: Duration,
    /// Re-read this far behind the state watermark
    pub lookback_window: Option<Duration>,
    pub datetime_format: Option<String>,
    pub start_time_option: Option<RequestOption>,
    pub end_time_option: Option<RequestOption>,
    config: Arc<JsonValue>,
}

impl DatetimeWindow {
    pub fn new(start_datetime: DateTime<Utc>, config: Arc<JsonValue>) -> Self {
        Self {
            start_datetime,
            end_datetime: None,
            step: None,
            cursor_granularity: Duration::zero(),
            lookback_window: None,
            datetime_format: None,
            start_time_option: None,
            end_time_option: None,
            config,
        }
    }

    #[must_use]
    pub fn with_end(mut self, end: DateTime<Utc>) -> Self {
        self.end_datetime = Some(end);
        self
    }

    #[must_use]
    pub fn with_step(mut self, step: Duration, granularity: Duration) -> Self {
        self.step = Some(step);
        self.cursor_granularity = granularity;
        self
    }

    #[must_use]
    pub fn with_lookback(mut self, lookback: Duration) -> Self {
        self.lookback_window = Some(lookback);
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.datetime_format = Some(format.into());
        self
    }

    #[must_use]
    pub fn with_start_time_option(mut self, option: RequestOption) -> Self {
        self.start_time_option = Some(option);
        self
    }

    #[must_use]
    pub fn with_end_time_option(mut self, option: RequestOption) -> Self {
        self.end_time_option = Some(option);
        self
    }

    pub fn format(&self, dt: DateTime<Utc>) -> String {
        match self.datetime_format {
            Some(ref fmt) => format_datetime(dt, fmt),
            None => to_iso(dt),
        }
    }

    /// Parse a cursor value; numbers are epoch seconds
    pub fn parse(&self, value: &JsonValue) -> Option<DateTime<Utc>> {
        let text = match value {
            JsonValue::String(s) => s.clone(),
            JsonValue::Number(n) => n.to_string(),
            _ => return None,
        };
        self.datetime_format
            .as_deref()
            .and_then(|fmt| parse_with_format(&text, fmt).ok())
            .or_else(|| parse_datetime(&text).ok())
    }

    /// First instant to read given the state watermark
    pub fn effective_start(&self, watermark: Option<&JsonValue>) -> DateTime<Utc> {
        let from_state = watermark
            .and_then(|v| self.parse(v))
            .map(|dt| dt - self.lookback_window.unwrap_or_else(Duration::zero));
        match from_state {
            Some(dt) if dt > self.start_datetime => dt,
            _ => self.start_datetime,
        }
    }

    /// Cursor slices covering `[effective_start, end]`
    pub fn slices(&self, watermark: Option<&JsonValue>, now: DateTime<Utc>) -> Vec<JsonObject> {
        let start = self.effective_start(watermark);
        let end = self.end_datetime.unwrap_or(now);
        if start > end {
            return Vec::new();
        }

        let Some(step) = self.step.filter(|s| *s > Duration::zero()) else {
            return vec![self.window(start, end)];
        };

        let mut windows = Vec::new();
        let mut current = start;
        while current <= end {
            let window_end = (current + step - self.cursor_granularity).min(end);
            windows.push(self.window(current, window_end));
            if window_end >= end {
                break;
            }
            let next = window_end + self.cursor_granularity;
            current = if next > current { next } else { current + step };
        }
        windows
    }

    fn window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> JsonObject {
        let mut window = JsonObject::new();
        window.insert(START_KEY.into(), JsonValue::String(self.format(start)));
        window.insert(END_KEY.into(), JsonValue::String(self.format(end)));
        window
    }

    /// Whether a cursor value lies within `[lower, end_datetime]`
    pub fn contains(&self, value: &JsonValue, lower: DateTime<Utc>) -> bool {
        let Some(dt) = self.parse(value) else {
            return true;
        };
        dt >= lower && self.end_datetime.map_or(true, |end| dt <= end)
    }

    /// Inject a slice's window bounds
    pub fn request_options(&self, slice: &StreamSlice) -> RequestOptions {
        let ctx = InterpolationContext::new(&self.config).with_slice(slice);
        let mut options = RequestOptions::new();
        let bounds = [
            (&self.start_time_option, START_KEY),
            (&self.end_time_option, END_KEY),
        ];
        for (option, key) in bounds {
            if let (Some(option), Some(value)) = (option, slice.cursor_slice().get(key)) {
                option.inject(value, &mut options, &ctx);
            }
        }
        options
    }
}
