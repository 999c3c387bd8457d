//! Interpolated manifest values
//!
//! Templates are parsed once, when the component is built, so syntax errors
//! surface as configuration errors before any request is made.

use super::context::InterpolationContext;
use super::eval::{evaluate, is_truthy, render};
use super::parser::{parse_expression, Expr};
use crate::error::{Error, Result};
use crate::types::{JsonObject, JsonValue};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

/// Quick check for `{{ ... }}` segments
static TEMPLATE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{.*?\}\}").expect("static regex"));

/// String forms a boolean condition treats as false
pub const FALSE_STRINGS: [&str; 8] = ["False", "false", "{}", "[]", "()", "", "0", "0.0"];

/// Check if a string contains template segments
pub fn has_templates(s: &str) -> bool {
    TEMPLATE_REGEX.is_match(s)
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
enum Template {
    /// No `{{ }}` at all
    Static(String),
    /// Exactly one `{{ expr }}` and nothing else: keeps the value's type
    Single(Expr),
    /// Text mixed with expressions: renders to a string
    Mixed(Vec<Segment>),
}

fn parse_template(src: &str) -> Result<Template> {
    if !src.contains("{{") {
        return Ok(Template::Static(src.to_string()));
    }

    let mut segments = Vec::new();
    let mut rest = src;
    while let Some(start) = rest.find("{{") {
        if start > 0 {
            segments.push(Segment::Text(rest[..start].to_string()));
        }
        let body_start = start + 2;
        let end = find_close(&rest[body_start..])
            .ok_or_else(|| Error::template(format!("Unclosed '{{{{' in template '{src}'")))?;
        let body = &rest[body_start..body_start + end];
        segments.push(Segment::Expr(parse_expression(body.trim())?));
        rest = &rest[body_start + end + 2..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Text(rest.to_string()));
    }

    if let [Segment::Expr(expr)] = segments.as_slice() {
        return Ok(Template::Single(expr.clone()));
    }
    Ok(Template::Mixed(segments))
}

/// Offset of the `}}` closing an expression, skipping quoted strings
fn find_close(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(_) if b == b'\\' => i += 1,
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if b == b'}' && bytes.get(i + 1) == Some(&b'}') => {
                // `}}}` closes after an inner dict literal
                if bytes.get(i + 2) == Some(&b'}') {
                    i += 1;
                    continue;
                }
                return Some(i);
            }
            None => {}
        }
        i += 1;
    }
    None
}

// ============================================================================
// InterpolatedString
// ============================================================================

/// A manifest string that may contain `{{ ... }}` expressions
#[derive(Clone, PartialEq)]
pub struct InterpolatedString {
    source: String,
    template: Template,
}

impl InterpolatedString {
    /// Parse a template
    pub fn new(source: impl Into<String>) -> Result<Self> {
        let source = source.into();
        let template = parse_template(&source)?;
        Ok(Self { source, template })
    }

    /// The raw template text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether evaluation can depend on the context
    pub fn is_static(&self) -> bool {
        matches!(self.template, Template::Static(_))
    }

    /// Evaluate to a value; a lone expression keeps its type
    pub fn eval(&self, ctx: &InterpolationContext<'_>) -> JsonValue {
        match &self.template {
            Template::Static(s) => JsonValue::String(s.clone()),
            Template::Single(expr) => evaluate(expr, ctx).into_owned(),
            Template::Mixed(segments) => {
                let mut out = String::new();
                for segment in segments {
                    match segment {
                        Segment::Text(text) => out.push_str(text),
                        Segment::Expr(expr) => out.push_str(&render(&evaluate(expr, ctx))),
                    }
                }
                JsonValue::String(out)
            }
        }
    }

    /// Evaluate and render as a string (null renders empty)
    pub fn eval_string(&self, ctx: &InterpolationContext<'_>) -> String {
        render(&self.eval(ctx))
    }

    /// Evaluate, treating a null or empty result as absent
    pub fn eval_optional(&self, ctx: &InterpolationContext<'_>) -> Option<JsonValue> {
        let value = self.eval(ctx);
        match &value {
            JsonValue::Null => None,
            JsonValue::String(s) if s.is_empty() => None,
            _ => Some(value),
        }
    }

    /// Evaluate and convert to a number, failing on anything non-numeric
    pub fn eval_f64(&self, ctx: &InterpolationContext<'_>, field: &str) -> Result<f64> {
        let value = self.eval(ctx);
        let parsed = match &value {
            JsonValue::Number(n) => n.as_f64(),
            JsonValue::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        parsed.ok_or_else(|| {
            Error::invalid_value(
                field,
                format!("'{}' evaluated to non-numeric value {value}", self.source),
            )
        })
    }

    /// Evaluate and convert to a non-negative integer, failing on anything else
    pub fn eval_u64(&self, ctx: &InterpolationContext<'_>, field: &str) -> Result<u64> {
        let value = self.eval(ctx);
        let parsed = match &value {
            JsonValue::Number(n) => n.as_u64(),
            JsonValue::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        };
        parsed.ok_or_else(|| {
            Error::invalid_value(
                field,
                format!("'{}' evaluated to non-integer value {value}", self.source),
            )
        })
    }
}

impl fmt::Debug for InterpolatedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("InterpolatedString")
            .field(&self.source)
            .finish()
    }
}

// ============================================================================
// InterpolatedBoolean
// ============================================================================

/// A condition evaluated with the fixed false-value set
#[derive(Debug, Clone, PartialEq)]
pub struct InterpolatedBoolean {
    condition: InterpolatedString,
}

impl InterpolatedBoolean {
    /// Parse a condition template
    pub fn new(condition: impl Into<String>) -> Result<Self> {
        Ok(Self {
            condition: InterpolatedString::new(condition)?,
        })
    }

    pub fn source(&self) -> &str {
        self.condition.source()
    }

    /// Evaluate the condition
    pub fn eval(&self, ctx: &InterpolationContext<'_>) -> bool {
        !is_false_value(&self.condition.eval(ctx))
    }
}

/// Membership in the false-value set:
/// `"False" "false" "{}" "[]" "()" "" "0" "0.0"`, `{}`, `false`, `[]`, `0`, `0.0`, null
pub fn is_false_value(value: &JsonValue) -> bool {
    match value {
        JsonValue::String(s) => FALSE_STRINGS.contains(&s.as_str()),
        other => !is_truthy(other),
    }
}

// ============================================================================
// InterpolatedValue / InterpolatedMapping
// ============================================================================

/// Any manifest value with templates parsed in every nested string
#[derive(Debug, Clone, PartialEq)]
pub enum InterpolatedValue {
    String(InterpolatedString),
    Mapping(InterpolatedMapping),
    List(Vec<InterpolatedValue>),
    Other(JsonValue),
}

impl InterpolatedValue {
    /// Parse every string inside `value`
    pub fn new(value: &JsonValue) -> Result<Self> {
        Ok(match value {
            JsonValue::String(s) => Self::String(InterpolatedString::new(s.clone())?),
            JsonValue::Object(map) => Self::Mapping(InterpolatedMapping::new(map)?),
            JsonValue::Array(items) => Self::List(
                items
                    .iter()
                    .map(Self::new)
                    .collect::<Result<Vec<_>>>()?,
            ),
            other => Self::Other(other.clone()),
        })
    }

    /// Evaluate recursively; non-strings pass through unchanged
    pub fn eval(&self, ctx: &InterpolationContext<'_>) -> JsonValue {
        match self {
            Self::String(s) => s.eval(ctx),
            Self::Mapping(m) => JsonValue::Object(m.eval(ctx)),
            Self::List(items) => JsonValue::Array(items.iter().map(|i| i.eval(ctx)).collect()),
            Self::Other(v) => v.clone(),
        }
    }
}

/// A mapping whose keys and values are interpolated independently
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InterpolatedMapping {
    entries: Vec<(InterpolatedString, InterpolatedValue)>,
}

impl InterpolatedMapping {
    /// Parse all keys and values
    pub fn new(mapping: &JsonObject) -> Result<Self> {
        let entries = mapping
            .iter()
            .map(|(k, v)| Ok((InterpolatedString::new(k.clone())?, InterpolatedValue::new(v)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }

    /// Parse from a JSON value that must be an object (null is empty)
    pub fn from_value(value: &JsonValue) -> Result<Self> {
        match value {
            JsonValue::Null => Ok(Self::default()),
            JsonValue::Object(map) => Self::new(map),
            other => Err(Error::config(format!("Expected a mapping, got {other}"))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evaluate, dropping entries whose value evaluates to null
    pub fn eval(&self, ctx: &InterpolationContext<'_>) -> JsonObject {
        let mut out = JsonObject::new();
        for (key, value) in &self.entries {
            let value = value.eval(ctx);
            if value.is_null() {
                continue;
            }
            out.insert(key.eval_string(ctx), value);
        }
        out
    }
}

/// Evaluate any value against a context: strings are rendered, mappings
/// and lists recursively, everything else passes through
pub fn eval(input: &JsonValue, ctx: &InterpolationContext<'_>) -> Result<JsonValue> {
    Ok(InterpolatedValue::new(input)?.eval(ctx))
}
