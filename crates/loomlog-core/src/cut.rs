//! Positional field splitting, in the spirit of the unix `cut` command.

use crate::entry::{FieldValue, LogEntry, MESSAGE_FIELD};
use crate::error::StreamError;

/// Describes how to split one string field into named fields.
///
/// The source field (default [`MESSAGE_FIELD`]) is split on the delimiter
/// (default one space). Mappings copy positional pieces into named output
/// fields; a negative index counts from the end, so `-1` is the last
/// piece. Pieces left unmapped are joined back together with single spaces
/// and written to the source field, or discarded when
/// [`remove_source`](Self::remove_source) is set.
///
/// With no mappings, every piece is mapped under its positional index as a
/// decimal field name and the remainder is empty.
#[derive(Debug, Clone)]
pub struct CutSpec {
    field: String,
    delimiter: String,
    mappings: Vec<(String, i64)>,
    remove_source: bool,
}

impl Default for CutSpec {
    fn default() -> Self {
        Self {
            field: MESSAGE_FIELD.to_string(),
            delimiter: " ".to_string(),
            mappings: Vec::new(),
            remove_source: false,
        }
    }
}

impl CutSpec {
    /// Creates a spec with the default field, delimiter, and numbering.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the field to split.
    #[must_use]
    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }

    /// Sets the split delimiter.
    #[must_use]
    pub fn delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    /// Maps the piece at `index` into the output field `name`. Later
    /// mappings may override earlier ones for the same piece.
    #[must_use]
    pub fn map(mut self, name: impl Into<String>, index: i64) -> Self {
        self.mappings.push((name.into(), index));
        self
    }

    /// Discards the source field after a successful split.
    #[must_use]
    pub fn remove_source(mut self) -> Self {
        self.remove_source = true;
        self
    }

    /// Applies the spec to one entry in place.
    ///
    /// A missing source field is a silent no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::NotACutString`] when the source field is
    /// present but not a string.
    pub fn apply(&self, entry: &mut LogEntry) -> Result<(), StreamError> {
        let Some(value) = entry.get(&self.field) else {
            return Ok(());
        };
        let FieldValue::String(text) = value else {
            return Err(StreamError::NotACutString(self.field.clone()));
        };

        let pieces: Vec<String> = text
            .split(self.delimiter.as_str())
            .map(str::to_string)
            .collect();
        let mut mapped = vec![false; pieces.len()];

        if self.mappings.is_empty() {
            for (index, piece) in pieces.iter().enumerate() {
                entry.insert(index.to_string(), piece.clone());
                mapped[index] = true;
            }
        } else {
            for (name, index) in &self.mappings {
                if let Some(resolved) = resolve_index(*index, pieces.len()) {
                    entry.insert(name.clone(), pieces[resolved].clone());
                    mapped[resolved] = true;
                }
            }
        }

        if self.remove_source {
            entry.remove(&self.field);
        } else {
            let remainder = pieces
                .iter()
                .zip(&mapped)
                .filter(|(_, used)| !**used)
                .map(|(piece, _)| piece.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            entry.insert(self.field.clone(), remainder);
        }
        Ok(())
    }
}

/// Resolves a possibly negative piece index against the piece count.
/// Out-of-range indices resolve to nothing and the mapping is skipped.
fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let resolved = if index >= 0 {
        usize::try_from(index).ok()?
    } else {
        let back = usize::try_from(index.checked_neg()?).ok()?;
        len.checked_sub(back)?
    };
    (resolved < len).then_some(resolved)
}
