//! Value and column encoding for PostgREST filter clauses

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::fmt;

/// Characters that break PostgREST's nested filter grammar unless quoted
const RESERVED: &[char] = &[',', '.', ':', '(', ')', '"', '\\'];

/// A scalar value that can appear on the right-hand side of a filter
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FilterValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl FilterValue {
    /// Whether the value renders as free-form text and may need quoting
    pub fn is_textual(&self) -> bool {
        matches!(self, FilterValue::Text(_) | FilterValue::Timestamp(_))
    }

    /// Whether the value is numeric (int or float)
    pub fn is_numeric(&self) -> bool {
        matches!(self, FilterValue::Int(_) | FilterValue::Float(_))
    }

    /// Human-readable name of the value's type class, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            FilterValue::Null => "null",
            FilterValue::Bool(_) => "boolean",
            FilterValue::Int(_) | FilterValue::Float(_) => "number",
            FilterValue::Text(_) => "text",
            FilterValue::Timestamp(_) => "timestamp",
        }
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Null => f.write_str("null"),
            FilterValue::Bool(b) => write!(f, "{}", b),
            FilterValue::Int(i) => write!(f, "{}", i),
            FilterValue::Float(n) => write!(f, "{}", n),
            FilterValue::Text(s) => f.write_str(s),
            FilterValue::Timestamp(ts) => {
                f.write_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
        }
    }
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for FilterValue {
            fn from(value: $t) -> Self {
                FilterValue::Int(value as i64)
            }
        })*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

// 64bit を超えうる整数。i64 に収まらない値は同じ数字列のテキストとして送る
macro_rules! impl_from_wide_int {
    ($($t:ty),*) => {
        $(impl From<$t> for FilterValue {
            fn from(value: $t) -> Self {
                i64::try_from(value)
                    .map(FilterValue::Int)
                    .unwrap_or_else(|_| FilterValue::Text(value.to_string()))
            }
        })*
    };
}

impl_from_wide_int!(u64, usize, isize);

impl From<f32> for FilterValue {
    fn from(value: f32) -> Self {
        FilterValue::Float(value as f64)
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        FilterValue::Float(value)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Bool(value)
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::Text(value)
    }
}

impl From<&String> for FilterValue {
    fn from(value: &String) -> Self {
        FilterValue::Text(value.clone())
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(value: DateTime<Utc>) -> Self {
        FilterValue::Timestamp(value)
    }
}

impl<T: Into<FilterValue>> From<Option<T>> for FilterValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FilterValue::Null)
    }
}

/// Render a value for inclusion in a filter clause.
///
/// When `may_quote` is set (nested context) and the value is textual and
/// contains any of `, . : ( ) " \`, it is wrapped in double quotes with `\`
/// and `"` backslash-escaped. The result is always percent-encoded.
pub fn encode_value(value: &FilterValue, may_quote: bool) -> String {
    let text = value.to_string();
    if may_quote && value.is_textual() && needs_quoting(&text) {
        urlencoding::encode(&quote(&text)).into_owned()
    } else {
        urlencoding::encode(&text).into_owned()
    }
}

/// Render a column name for inclusion in a filter clause.
///
/// `or` and `and` collide with the logical operator keys and are wrapped in
/// literal quotes; everything else goes through the quoting encoder.
pub fn encode_column(name: &str) -> String {
    match name {
        "or" | "and" => format!("\"{}\"", name),
        _ => encode_value(&FilterValue::Text(name.to_string()), true),
    }
}

fn needs_quoting(text: &str) -> bool {
    text.contains(RESERVED)
}

fn quote(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for c in text.chars() {
        if c == '\\' || c == '"' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}
