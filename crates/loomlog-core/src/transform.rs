//! Per-field value transforms and field renames.

use std::collections::HashMap;
use std::sync::Arc;

use crate::entry::{FieldValue, LogEntry};

type TransformFn = Arc<dyn Fn(FieldValue) -> FieldValue + Send + Sync>;

/// Per-field value transform functions.
///
/// Adding a second transform for a field composes it after the existing
/// one. A transform runs only when its field is present.
#[derive(Clone, Default)]
pub struct TransformSpec {
    transforms: HashMap<String, Vec<TransformFn>>,
}

impl TransformSpec {
    /// Creates an empty spec.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a transform for `field`, composed after any existing ones.
    #[must_use]
    pub fn transform<F>(mut self, field: impl Into<String>, func: F) -> Self
    where
        F: Fn(FieldValue) -> FieldValue + Send + Sync + 'static,
    {
        self.transforms
            .entry(field.into())
            .or_default()
            .push(Arc::new(func));
        self
    }

    /// Applies every matching transform to the entry in place.
    pub fn apply(&self, entry: &mut LogEntry) {
        for (field, funcs) in &self.transforms {
            let Some(value) = entry.get(field).cloned() else {
                continue;
            };
            let transformed = funcs.iter().fold(value, |value, func| func(value));
            entry.insert(field.clone(), transformed);
        }
    }
}

impl std::fmt::Debug for TransformSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformSpec")
            .field("fields", &self.transforms.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Field renames applied per entry.
#[derive(Debug, Clone, Default)]
pub struct ReassignSpec {
    moves: Vec<(String, String)>,
}

impl ReassignSpec {
    /// Creates an empty spec.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves `source` to `target`, dropping `source`.
    #[must_use]
    pub fn moved(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.moves.push((source.into(), target.into()));
        self
    }

    /// Applies every move to the entry in place. Missing source fields are
    /// skipped.
    pub fn apply(&self, entry: &mut LogEntry) {
        for (source, target) in &self.moves {
            if let Some(value) = entry.remove(source) {
                entry.insert(target.clone(), value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transforms_compose_per_field() {
        let spec = TransformSpec::new()
            .transform("n", |value| match value {
                FieldValue::Int(i) => FieldValue::Int(i + 1),
                other => other,
            })
            .transform("n", |value| match value {
                FieldValue::Int(i) => FieldValue::Int(i * 10),
                other => other,
            });
        let mut entry: LogEntry = [("n", FieldValue::Int(4))].into_iter().collect();
        spec.apply(&mut entry);
        assert_eq!(entry.as_int("n"), Some(50));
    }

    #[test]
    fn transform_skips_missing_fields() {
        let spec = TransformSpec::new().transform("absent", |_| FieldValue::Bool(true));
        let mut entry = LogEntry::new();
        spec.apply(&mut entry);
        assert!(entry.is_empty());
    }

    #[test]
    fn reassign_moves_and_overwrites() {
        let spec = ReassignSpec::new().moved("a", "b");
        let mut entry: LogEntry = [
            ("a", FieldValue::from("moved")),
            ("b", FieldValue::from("overwritten")),
        ]
        .into_iter()
        .collect();
        spec.apply(&mut entry);
        assert!(!entry.has_field("a"));
        assert_eq!(entry.as_string("b").as_deref(), Some("moved"));
    }
}
