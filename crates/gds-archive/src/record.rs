//! Archive records and the delimited row format used in bulk-load files.
//!
//! Rows are comma separated and newline terminated. `\N` is SQL NULL, and
//! backslash escapes the delimiter, line breaks, NUL, tab and itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp layout written into bulk-load rows.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Field delimiter.
pub const FIELD_SEPARATOR: char = ',';

/// Marker for a NULL field.
pub const NULL_MARKER: &str = "\\N";

/// One column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Time(DateTime<Utc>),
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::UInt(v)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::UInt(u64::from(v))
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(v: Vec<u8>) -> Self {
        FieldValue::Bytes(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        FieldValue::Time(v)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(FieldValue::Null, Into::into)
    }
}

impl FieldValue {
    /// Append this value to a row buffer, escaped.
    fn write_to(&self, out: &mut String) {
        match self {
            FieldValue::Null => out.push_str(NULL_MARKER),
            FieldValue::Bool(b) => out.push(if *b { '1' } else { '0' }),
            FieldValue::Int(v) => out.push_str(&v.to_string()),
            FieldValue::UInt(v) => out.push_str(&v.to_string()),
            FieldValue::Float(v) if v.is_finite() => out.push_str(&v.to_string()),
            FieldValue::Float(_) => out.push_str(NULL_MARKER),
            FieldValue::Text(s) => escape_into(s, out),
            FieldValue::Bytes(b) => out.push_str(&hex::encode(b)),
            FieldValue::Time(t) => out.push_str(&t.format(TIME_FORMAT).to_string()),
        }
    }
}

/// A record bound for one archive table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Column values in table column order.
    pub values: Vec<FieldValue>,
    /// Event time, tracked for the session span.
    pub event_time: Option<DateTime<Utc>>,
    /// Channel samples rolled into this row (aggregate tables only).
    pub aggregate_count: u32,
}

impl Record {
    pub fn new(values: Vec<FieldValue>) -> Self {
        Record {
            values,
            event_time: None,
            aggregate_count: 0,
        }
    }

    pub fn with_event_time(mut self, time: DateTime<Utc>) -> Self {
        self.event_time = Some(time);
        self
    }

    pub fn with_aggregate_count(mut self, count: u32) -> Self {
        self.aggregate_count = count;
        self
    }

    /// Render as one newline-terminated bulk-load row.
    pub fn to_row(&self) -> String {
        let mut out = String::with_capacity(self.values.len() * 12);
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                out.push(FIELD_SEPARATOR);
            }
            value.write_to(&mut out);
        }
        out.push('\n');
        out
    }
}

fn escape_into(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            _ => out.push(c),
        }
    }
}

/// Split one row (without its terminator) into fields; `None` is NULL.
pub fn split_row(line: &str) -> Vec<Option<String>> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut escaped_null = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('N') if current.is_empty() && matches!(chars.peek(), None | Some(',')) => {
                    escaped_null = true;
                }
                Some('n') => current.push('\n'),
                Some('r') => current.push('\r'),
                Some('t') => current.push('\t'),
                Some('0') => current.push('\0'),
                Some(other) => current.push(other),
                None => current.push('\\'),
            },
            FIELD_SEPARATOR => {
                fields.push(finish_field(&mut current, &mut escaped_null));
            }
            _ => current.push(c),
        }
    }
    fields.push(finish_field(&mut current, &mut escaped_null));
    fields
}

fn finish_field(current: &mut String, escaped_null: &mut bool) -> Option<String> {
    let field = if *escaped_null {
        None
    } else {
        Some(std::mem::take(current))
    };
    current.clear();
    *escaped_null = false;
    field
}
