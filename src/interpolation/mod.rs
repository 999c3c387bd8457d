//! Interpolation module
//!
//! Manifest strings may embed `{{ expression }}` segments. Expressions read
//! from a closed set of context names (`config`, `parameters`, `stream_state`,
//! `stream_slice`, `stream_partition`, `stream_interval`, `record`,
//! `headers`, `response`, `last_record`, `last_records`, `last_page_size`,
//! `next_page_token`) and support attribute and index access, arithmetic,
//! comparisons, boolean logic, filters (`| default(...)`) and a small set of
//! macros such as `now_utc()` and `day_delta(n)`.
//!
//! # Overview
//!
//! Templates are parsed when a component is built. Evaluation is permissive:
//! unresolved names and type mismatches yield `null`, which renders as an
//! empty string and counts as false. A template consisting of a single
//! expression keeps the type of its value.

mod context;
mod eval;
mod interpolated;
mod parser;

pub use context::InterpolationContext;
pub use eval::{compare, is_truthy, render};
pub use interpolated::{
    eval, has_templates, is_false_value, InterpolatedBoolean, InterpolatedMapping,
    InterpolatedString, InterpolatedValue, FALSE_STRINGS,
};
pub use parser::{parse_expression, BinaryOp, Expr};
