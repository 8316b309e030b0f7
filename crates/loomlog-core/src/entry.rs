//! Keyed log records and their dynamically typed field values.
//!
//! A [`LogEntry`] maps field names to [`FieldValue`]s. Standard fields carry
//! a leading `@` so they never collide with fields parsed out of log lines.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};

/// The human-readable message of a log entry.
pub const MESSAGE_FIELD: &str = "@message";
/// Timestamp parsed from the log line itself.
pub const TIMESTAMP_FIELD: &str = "@timestamp";
/// Severity level of the entry.
pub const LEVEL_FIELD: &str = "@level";
/// Module or subsystem that produced the entry.
pub const MODULE_FIELD: &str = "@module";
/// Caller location that produced the entry.
pub const CALLER_FIELD: &str = "@caller";
/// Dot-separated stream tags attached by the `tag` transformation.
pub const TAG_FIELD: &str = "@tag";
/// Wall-clock time at which a source read the entry.
pub const READ_TIMESTAMP_FIELD: &str = "@read_timestamp";
/// Zero-based line number at which a source read the entry.
pub const READ_LINE_FIELD: &str = "@read_line_number";

/// A dynamically typed field value.
///
/// `Json` is the opaque arm: nested arrays and objects from structured input
/// pass through it unchanged.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// UTF-8 text.
    String(String),
    /// Signed 64-bit integer.
    Int(i64),
    /// Unsigned 64-bit integer.
    Uint(u64),
    /// 64-bit float.
    Float(f64),
    /// Boolean.
    Bool(bool),
    /// Instant in UTC.
    Time(DateTime<Utc>),
    /// Opaque structured data.
    Json(serde_json::Value),
}

impl FieldValue {
    /// Maps a parsed JSON value into a typed field value.
    ///
    /// Scalars get a typed arm; arrays, objects, and null stay opaque.
    #[must_use]
    pub fn from_json(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Self::Uint(u)
                } else {
                    Self::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            other => Self::Json(other),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Int(i) => write!(f, "{i}"),
            Self::Uint(u) => write!(f, "{u}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Time(t) => f.write_str(&t.to_rfc3339()),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::String(s) => serializer.serialize_str(s),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Uint(u) => serializer.serialize_u64(*u),
            Self::Float(x) => serializer.serialize_f64(*x),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Time(t) => serializer.serialize_str(&t.to_rfc3339()),
            Self::Json(v) => v.serialize(serializer),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        Self::Uint(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Time(value)
    }
}

/// A single record flowing through a pipeline.
///
/// Keys are unique; insertion order is irrelevant. Entries serialize to a
/// JSON object with one member per field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogEntry {
    fields: BTreeMap<String, FieldValue>,
}

impl LogEntry {
    /// Creates an empty entry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an entry from one raw input line.
    ///
    /// A line that parses as a JSON object becomes a structured entry with
    /// one field per top-level member. Any other line becomes an
    /// unstructured entry whose [`MESSAGE_FIELD`] holds the whole line.
    #[must_use]
    pub fn from_line(line: &str) -> Self {
        if let Ok(serde_json::Value::Object(members)) = serde_json::from_str(line) {
            let mut entry = Self::new();
            for (name, value) in members {
                entry.insert(name, FieldValue::from_json(value));
            }
            return entry;
        }
        let mut entry = Self::new();
        entry.insert(MESSAGE_FIELD, line);
        entry
    }

    /// Sets a field, replacing any previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Returns the raw value of a field.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Removes a field, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.fields.remove(name)
    }

    /// Returns true if the field is present.
    #[must_use]
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Number of fields in the entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the entry has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates over `(name, value)` pairs.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Reads a field as a 64-bit float.
    ///
    /// Narrower numeric values widen; a stored string is parsed.
    #[must_use]
    pub fn as_float(&self, name: &str) -> Option<f64> {
        match self.fields.get(name)? {
            FieldValue::Float(x) => Some(*x),
            #[allow(clippy::cast_precision_loss)]
            FieldValue::Int(i) => Some(*i as f64),
            #[allow(clippy::cast_precision_loss)]
            FieldValue::Uint(u) => Some(*u as f64),
            FieldValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Reads a field as a signed 64-bit integer.
    #[must_use]
    pub fn as_int(&self, name: &str) -> Option<i64> {
        match self.fields.get(name)? {
            FieldValue::Int(i) => Some(*i),
            FieldValue::Uint(u) => i64::try_from(*u).ok(),
            FieldValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Reads a field as an unsigned 64-bit integer.
    #[must_use]
    pub fn as_uint(&self, name: &str) -> Option<u64> {
        match self.fields.get(name)? {
            FieldValue::Uint(u) => Some(*u),
            FieldValue::Int(i) => u64::try_from(*i).ok(),
            FieldValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Reads a field as text. Total over every value kind: non-string
    /// values render to their printed representation. `None` only when the
    /// field is missing.
    #[must_use]
    pub fn as_string(&self, name: &str) -> Option<String> {
        self.fields.get(name).map(|value| match value {
            FieldValue::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Reads a field as a UTC instant.
    ///
    /// A stored string is tried against each supplied chrono format string
    /// in order; with no formats, RFC 3339 is assumed. Results are
    /// normalized to UTC.
    #[must_use]
    pub fn as_time(&self, name: &str, layouts: &[&str]) -> Option<DateTime<Utc>> {
        match self.fields.get(name)? {
            FieldValue::Time(t) => Some(*t),
            FieldValue::String(s) => {
                if layouts.is_empty() {
                    return DateTime::parse_from_rfc3339(s)
                        .map(|t| t.with_timezone(&Utc))
                        .ok();
                }
                for layout in layouts {
                    if let Ok(t) = DateTime::parse_from_str(s, layout) {
                        return Some(t.with_timezone(&Utc));
                    }
                    if let Ok(t) = NaiveDateTime::parse_from_str(s, layout) {
                        return Some(t.and_utc());
                    }
                }
                None
            }
            _ => None,
        }
    }

    /// Appends a tag to [`TAG_FIELD`], dot-separated when tags are already
    /// present.
    pub fn tag(&mut self, tag: &str) {
        let value = match self.as_string(TAG_FIELD) {
            Some(existing) if !existing.is_empty() => format!("{existing}.{tag}"),
            _ => tag.to_string(),
        };
        self.insert(TAG_FIELD, value);
    }

    /// Returns true if [`TAG_FIELD`] contains `tag` as one of its
    /// dot-separated components, compared case-insensitively.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.as_string(TAG_FIELD)
            .is_some_and(|tags| tags.split('.').any(|t| t.eq_ignore_ascii_case(tag)))
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for LogEntry {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut entry = Self::new();
        for (name, value) in iter {
            entry.insert(name, value);
        }
        entry
    }
}

impl Serialize for LogEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
