//! Expression evaluation
//!
//! Evaluation never fails: unknown names, missing keys, type mismatches and
//! unknown functions all produce `null`, which is falsy and renders as an
//! empty string.

use super::context::InterpolationContext;
use super::parser::{BinaryOp, Expr};
use crate::datetime::{self, format_datetime, parse_datetime, to_iso};
use crate::types::{JsonObject, JsonValue};
use chrono::{Duration, Utc};
use std::borrow::Cow;
use std::cmp::Ordering;

/// Evaluate an expression against a context
pub fn evaluate<'a>(expr: &Expr, ctx: &InterpolationContext<'a>) -> Cow<'a, JsonValue> {
    match expr {
        Expr::Literal(value) => Cow::Owned(value.clone()),
        Expr::Name(name) => ctx.resolve(name).unwrap_or(Cow::Owned(JsonValue::Null)),
        Expr::Attr(base, name) => project(evaluate(base, ctx), &Key::Field(name)),
        Expr::Index(base, index) => {
            let base = evaluate(base, ctx);
            match evaluate(index, ctx).as_ref() {
                JsonValue::String(field) => project(base, &Key::Field(field)),
                JsonValue::Number(n) => match n.as_i64() {
                    Some(i) => project(base, &Key::Position(i)),
                    None => null(),
                },
                _ => null(),
            }
        }
        Expr::Method(receiver, name, args) => {
            let receiver = evaluate(receiver, ctx);
            let args = evaluate_all(args, ctx);
            Cow::Owned(call_method(&receiver, name, &args))
        }
        Expr::Call(name, args) => Cow::Owned(call_macro(name, &evaluate_all(args, ctx))),
        Expr::Filter(value, name, args) => {
            let value = evaluate(value, ctx);
            let args = evaluate_all(args, ctx);
            Cow::Owned(apply_filter(&value, name, &args))
        }
        Expr::Neg(inner) => Cow::Owned(match number(&evaluate(inner, ctx)) {
            Some(Num::Int(i)) => i.checked_neg().map_or(JsonValue::Null, JsonValue::from),
            Some(Num::Float(f)) => float(-f),
            None => JsonValue::Null,
        }),
        Expr::Not(inner) => Cow::Owned(JsonValue::Bool(!is_truthy(&evaluate(inner, ctx)))),
        Expr::And(left, right) => {
            let left = evaluate(left, ctx);
            if is_truthy(&left) {
                evaluate(right, ctx)
            } else {
                left
            }
        }
        Expr::Or(left, right) => {
            let left = evaluate(left, ctx);
            if is_truthy(&left) {
                left
            } else {
                evaluate(right, ctx)
            }
        }
        Expr::Conditional {
            condition,
            then,
            otherwise,
        } => {
            if is_truthy(&evaluate(condition, ctx)) {
                evaluate(then, ctx)
            } else {
                otherwise
                    .as_ref()
                    .map_or_else(null, |expr| evaluate(expr, ctx))
            }
        }
        Expr::Test {
            expr,
            test,
            negated,
        } => {
            let value = evaluate(expr, ctx);
            let result = match test.as_str() {
                "none" => value.is_null(),
                "defined" => !value.is_null(),
                "string" => value.is_string(),
                "number" => value.is_number(),
                _ => false,
            };
            Cow::Owned(JsonValue::Bool(result != *negated))
        }
        Expr::Binary(op, left, right) => {
            let left = evaluate(left, ctx);
            let right = evaluate(right, ctx);
            Cow::Owned(binary(*op, &left, &right))
        }
        Expr::List(items) => Cow::Owned(JsonValue::Array(evaluate_all(items, ctx))),
        Expr::Dict(entries) => {
            let mut map = JsonObject::new();
            for (key, value) in entries {
                let key = render(&evaluate(key, ctx));
                map.insert(key, evaluate(value, ctx).into_owned());
            }
            Cow::Owned(JsonValue::Object(map))
        }
    }
}

fn evaluate_all(exprs: &[Expr], ctx: &InterpolationContext<'_>) -> Vec<JsonValue> {
    exprs
        .iter()
        .map(|e| evaluate(e, ctx).into_owned())
        .collect()
}

fn null<'a>() -> Cow<'a, JsonValue> {
    Cow::Owned(JsonValue::Null)
}

// ============================================================================
// Lookups
// ============================================================================

enum Key<'k> {
    Field(&'k str),
    Position(i64),
}

fn lookup<'v>(value: &'v JsonValue, key: &Key<'_>) -> Option<&'v JsonValue> {
    match (value, key) {
        (JsonValue::Object(map), Key::Field(field)) => map.get(*field),
        (JsonValue::Object(map), Key::Position(i)) => map.get(&i.to_string()),
        (JsonValue::Array(items), Key::Position(i)) => {
            let len = items.len() as i64;
            let idx = if *i < 0 { len + i } else { *i };
            if idx < 0 {
                None
            } else {
                items.get(idx as usize)
            }
        }
        (JsonValue::Array(items), Key::Field(field)) => {
            field.parse::<usize>().ok().and_then(|i| items.get(i))
        }
        _ => None,
    }
}

fn project<'a>(base: Cow<'a, JsonValue>, key: &Key<'_>) -> Cow<'a, JsonValue> {
    match base {
        Cow::Borrowed(value) => lookup(value, key).map_or_else(null, Cow::Borrowed),
        Cow::Owned(value) => Cow::Owned(lookup(&value, key).cloned().unwrap_or(JsonValue::Null)),
    }
}

// ============================================================================
// Truthiness and rendering
// ============================================================================

/// Truthiness: null, false, 0, empty strings and containers are falsy
pub fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(items) => !items.is_empty(),
        JsonValue::Object(map) => !map.is_empty(),
    }
}

/// Render a value for string interpolation
pub fn render(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Null => String::new(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

// ============================================================================
// Numbers and comparison
// ============================================================================

#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

fn number(value: &JsonValue) -> Option<Num> {
    match value {
        JsonValue::Number(n) => n
            .as_i64()
            .map(Num::Int)
            .or_else(|| n.as_f64().map(Num::Float)),
        JsonValue::Bool(b) => Some(Num::Int(i64::from(*b))),
        _ => None,
    }
}

fn float(f: f64) -> JsonValue {
    serde_json::Number::from_f64(f).map_or(JsonValue::Null, JsonValue::Number)
}

fn arithmetic(
    left: Num,
    right: Num,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> JsonValue {
    match (left, right) {
        (Num::Int(a), Num::Int(b)) => int_op(a, b).map_or_else(
            || float(float_op(a as f64, b as f64)),
            JsonValue::from,
        ),
        _ => float(float_op(left.as_f64(), right.as_f64())),
    }
}

/// Ordering between two values of comparable types
pub fn compare(left: &JsonValue, right: &JsonValue) -> Option<Ordering> {
    match (left, right) {
        (JsonValue::String(a), JsonValue::String(b)) => Some(a.cmp(b)),
        (JsonValue::Bool(a), JsonValue::Bool(b)) => Some(a.cmp(b)),
        _ => {
            let (a, b) = (number(left)?, number(right)?);
            a.as_f64().partial_cmp(&b.as_f64())
        }
    }
}

fn loosely_equal(left: &JsonValue, right: &JsonValue) -> bool {
    match (number(left), number(right)) {
        (Some(a), Some(b)) if left.is_number() && right.is_number() => {
            (a.as_f64() - b.as_f64()).abs() < f64::EPSILON
        }
        _ => left == right,
    }
}

fn contains(container: &JsonValue, item: &JsonValue) -> bool {
    match container {
        JsonValue::String(s) => item.as_str().is_some_and(|needle| s.contains(needle)),
        JsonValue::Array(items) => items.iter().any(|v| loosely_equal(v, item)),
        JsonValue::Object(map) => map.contains_key(&render(item)),
        _ => false,
    }
}

fn binary(op: BinaryOp, left: &JsonValue, right: &JsonValue) -> JsonValue {
    match op {
        BinaryOp::Concat => JsonValue::String(render(left) + &render(right)),
        BinaryOp::Eq => JsonValue::Bool(loosely_equal(left, right)),
        BinaryOp::Ne => JsonValue::Bool(!loosely_equal(left, right)),
        BinaryOp::Lt => JsonValue::Bool(compare(left, right) == Some(Ordering::Less)),
        BinaryOp::Le => JsonValue::Bool(matches!(
            compare(left, right),
            Some(Ordering::Less | Ordering::Equal)
        )),
        BinaryOp::Gt => JsonValue::Bool(compare(left, right) == Some(Ordering::Greater)),
        BinaryOp::Ge => JsonValue::Bool(matches!(
            compare(left, right),
            Some(Ordering::Greater | Ordering::Equal)
        )),
        BinaryOp::In => JsonValue::Bool(contains(right, left)),
        BinaryOp::NotIn => JsonValue::Bool(!contains(right, left)),
        BinaryOp::Add => match (left, right) {
            (JsonValue::String(a), JsonValue::String(b)) => JsonValue::String(format!("{a}{b}")),
            (JsonValue::Array(a), JsonValue::Array(b)) => {
                JsonValue::Array(a.iter().chain(b.iter()).cloned().collect())
            }
            _ => match (number(left), number(right)) {
                (Some(a), Some(b)) => arithmetic(a, b, i64::checked_add, |x, y| x + y),
                _ => JsonValue::Null,
            },
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            let (Some(a), Some(b)) = (number(left), number(right)) else {
                return JsonValue::Null;
            };
            match op {
                BinaryOp::Sub => arithmetic(a, b, i64::checked_sub, |x, y| x - y),
                BinaryOp::Mul => arithmetic(a, b, i64::checked_mul, |x, y| x * y),
                BinaryOp::Div if b.as_f64() == 0.0 => JsonValue::Null,
                BinaryOp::Div => float(a.as_f64() / b.as_f64()),
                BinaryOp::Mod if b.as_f64() == 0.0 => JsonValue::Null,
                _ => arithmetic(a, b, i64::checked_rem_euclid, f64::rem_euclid),
            }
        }
    }
}

// ============================================================================
// Conversions shared by filters, methods and macros
// ============================================================================

fn to_int(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::String(s) => s
            .trim()
            .parse::<i64>()
            .map(JsonValue::from)
            .or_else(|_| s.trim().parse::<f64>().map(|f| JsonValue::from(f.trunc() as i64)))
            .unwrap_or(JsonValue::Null),
        other => match number(other) {
            Some(Num::Int(i)) => JsonValue::from(i),
            Some(Num::Float(f)) => JsonValue::from(f.trunc() as i64),
            None => JsonValue::Null,
        },
    }
}

fn to_float(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::String(s) => s.trim().parse::<f64>().map_or(JsonValue::Null, float),
        other => number(other).map_or(JsonValue::Null, |n| float(n.as_f64())),
    }
}

fn length(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::String(s) => JsonValue::from(s.chars().count()),
        JsonValue::Array(items) => JsonValue::from(items.len()),
        JsonValue::Object(map) => JsonValue::from(map.len()),
        _ => JsonValue::Null,
    }
}

fn datetime_of(value: &JsonValue) -> Option<chrono::DateTime<Utc>> {
    match value {
        JsonValue::String(s) => parse_datetime(s).ok(),
        JsonValue::Number(n) => n
            .as_f64()
            .and_then(|secs| chrono::DateTime::from_timestamp(secs as i64, 0)),
        _ => None,
    }
}

fn string_arg(args: &[JsonValue], idx: usize) -> Option<&str> {
    args.get(idx).and_then(JsonValue::as_str)
}

fn extreme(args: &[JsonValue], wanted: Ordering) -> JsonValue {
    let items: Vec<&JsonValue> = match args {
        [JsonValue::Array(items)] => items.iter().collect(),
        _ => args.iter().collect(),
    };
    items
        .into_iter()
        .filter(|v| !v.is_null())
        .fold(None::<&JsonValue>, |best, v| match best {
            Some(b) if compare(v, b) != Some(wanted) => Some(b),
            _ => Some(v),
        })
        .cloned()
        .unwrap_or(JsonValue::Null)
}

// ============================================================================
// Filters, methods, macros
// ============================================================================

fn apply_filter(value: &JsonValue, name: &str, args: &[JsonValue]) -> JsonValue {
    match name {
        "default" | "d" => {
            let use_on_falsy = args.get(1).is_some_and(is_truthy);
            let missing = value.is_null() || (use_on_falsy && !is_truthy(value));
            if missing {
                args.first().cloned().unwrap_or(JsonValue::Null)
            } else {
                value.clone()
            }
        }
        "int" => to_int(value),
        "float" => to_float(value),
        "string" => JsonValue::String(render(value)),
        "bool" => JsonValue::Bool(is_truthy(value)),
        "length" | "count" => length(value),
        "lower" => JsonValue::String(render(value).to_lowercase()),
        "upper" => JsonValue::String(render(value).to_uppercase()),
        "trim" => JsonValue::String(render(value).trim().to_string()),
        "first" => match value {
            JsonValue::Array(items) => items.first().cloned().unwrap_or(JsonValue::Null),
            _ => JsonValue::Null,
        },
        "last" => match value {
            JsonValue::Array(items) => items.last().cloned().unwrap_or(JsonValue::Null),
            _ => JsonValue::Null,
        },
        "join" => match value {
            JsonValue::Array(items) => {
                let sep = string_arg(args, 0).unwrap_or("");
                JsonValue::String(items.iter().map(render).collect::<Vec<_>>().join(sep))
            }
            _ => JsonValue::Null,
        },
        "tojson" => JsonValue::String(serde_json::to_string(value).unwrap_or_default()),
        "abs" => match number(value) {
            Some(Num::Int(i)) => JsonValue::from(i.abs()),
            Some(Num::Float(f)) => float(f.abs()),
            None => JsonValue::Null,
        },
        "round" => number(value).map_or(JsonValue::Null, |n| {
            let digits = args.first().and_then(JsonValue::as_i64).unwrap_or(0);
            let factor = 10f64.powi(digits as i32);
            float((n.as_f64() * factor).round() / factor)
        }),
        "replace" => match (string_arg(args, 0), string_arg(args, 1)) {
            (Some(from), Some(to)) => JsonValue::String(render(value).replace(from, to)),
            _ => JsonValue::Null,
        },
        _ => JsonValue::Null,
    }
}

fn call_method(receiver: &JsonValue, name: &str, args: &[JsonValue]) -> JsonValue {
    match (receiver, name) {
        (JsonValue::Object(map), "get") => string_arg(args, 0)
            .and_then(|key| map.get(key))
            .filter(|v| !v.is_null())
            .cloned()
            .or_else(|| args.get(1).cloned())
            .unwrap_or(JsonValue::Null),
        (JsonValue::Object(map), "keys") => {
            JsonValue::Array(map.keys().cloned().map(JsonValue::String).collect())
        }
        (JsonValue::Object(map), "values") => JsonValue::Array(map.values().cloned().collect()),
        (JsonValue::Object(map), "items") => JsonValue::Array(
            map.iter()
                .map(|(k, v)| JsonValue::Array(vec![JsonValue::String(k.clone()), v.clone()]))
                .collect(),
        ),
        (JsonValue::String(s), "strip") => JsonValue::String(s.trim().to_string()),
        (JsonValue::String(s), "lower") => JsonValue::String(s.to_lowercase()),
        (JsonValue::String(s), "upper") => JsonValue::String(s.to_uppercase()),
        (JsonValue::String(s), "startswith") => {
            JsonValue::Bool(string_arg(args, 0).is_some_and(|p| s.starts_with(p)))
        }
        (JsonValue::String(s), "endswith") => {
            JsonValue::Bool(string_arg(args, 0).is_some_and(|p| s.ends_with(p)))
        }
        (JsonValue::String(s), "split") => {
            let parts: Vec<JsonValue> = match string_arg(args, 0) {
                Some(sep) => s.split(sep).map(|p| JsonValue::String(p.into())).collect(),
                None => s
                    .split_whitespace()
                    .map(|p| JsonValue::String(p.into()))
                    .collect(),
            };
            JsonValue::Array(parts)
        }
        (JsonValue::String(s), "replace") => match (string_arg(args, 0), string_arg(args, 1)) {
            (Some(from), Some(to)) => JsonValue::String(s.replace(from, to)),
            _ => JsonValue::Null,
        },
        (value, "strftime") => match (datetime_of(value), string_arg(args, 0)) {
            (Some(dt), Some(fmt)) => JsonValue::String(format_datetime(dt, fmt)),
            _ => JsonValue::Null,
        },
        (value, "isoformat") => datetime_of(value).map_or(JsonValue::Null, |dt| to_iso(dt).into()),
        (value, "timestamp") => {
            datetime_of(value).map_or(JsonValue::Null, |dt| JsonValue::from(dt.timestamp()))
        }
        _ => JsonValue::Null,
    }
}

fn call_macro(name: &str, args: &[JsonValue]) -> JsonValue {
    match name {
        "now_utc" => JsonValue::String(to_iso(Utc::now())),
        "today_utc" => JsonValue::String(Utc::now().format("%Y-%m-%d").to_string()),
        "day_delta" => {
            let days = args.first().and_then(JsonValue::as_f64).unwrap_or(0.0);
            let fmt = string_arg(args, 1).unwrap_or("%Y-%m-%dT%H:%M:%S.%f%z");
            let dt = Utc::now() + Duration::milliseconds((days * 86_400_000.0) as i64);
            JsonValue::String(format_datetime(dt, fmt))
        }
        "max" => extreme(args, Ordering::Greater),
        "min" => extreme(args, Ordering::Less),
        "timestamp" => args
            .first()
            .and_then(datetime_of)
            .map_or(JsonValue::Null, |dt| JsonValue::from(dt.timestamp())),
        "format_datetime" => match (args.first().and_then(datetime_of), string_arg(args, 1)) {
            (Some(dt), Some(fmt)) => JsonValue::String(format_datetime(dt, fmt)),
            _ => JsonValue::Null,
        },
        "str_to_datetime" => string_arg(args, 0)
            .and_then(|s| datetime::parse_datetime(s).ok())
            .map_or(JsonValue::Null, |dt| JsonValue::String(to_iso(dt))),
        "int" => args.first().map_or(JsonValue::Null, to_int),
        "float" => args.first().map_or(JsonValue::Null, to_float),
        "str" => args.first().map_or(JsonValue::Null, |v| JsonValue::String(render(v))),
        "len" => args.first().map_or(JsonValue::Null, length),
        _ => JsonValue::Null,
    }
}
