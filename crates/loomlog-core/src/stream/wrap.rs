//! Single-input stream wrappers: filter, concat, cancellable, tag, cut,
//! transform, and reassign.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::cut::CutSpec;
use crate::entry::LogEntry;
use crate::error::StreamError;
use crate::stream::{drain, BoxedStream, EntryStream};
use crate::transform::{ReassignSpec, TransformSpec};

struct FilterStream<F> {
    inner: BoxedStream,
    keep: F,
}

#[async_trait]
impl<F> EntryStream for FilterStream<F>
where
    F: FnMut(&LogEntry, u64) -> bool + Send,
{
    async fn next_entry(&mut self) -> Result<(LogEntry, u64), StreamError> {
        loop {
            let (entry, offset) = self.inner.next_entry().await?;
            if (self.keep)(&entry, offset) {
                return Ok((entry, offset));
            }
        }
    }
}

/// Forwards only the entries for which `keep` returns true. Errors from
/// the underlying stream pass through regardless of the predicate.
#[must_use]
pub fn filter<F>(stream: BoxedStream, keep: F) -> BoxedStream
where
    F: FnMut(&LogEntry, u64) -> bool + Send + 'static,
{
    Box::new(FilterStream {
        inner: stream,
        keep,
    })
}

struct ConcatStream {
    base: Option<BoxedStream>,
    next: BoxedStream,
    yielded: u64,
}

#[async_trait]
impl EntryStream for ConcatStream {
    async fn next_entry(&mut self) -> Result<(LogEntry, u64), StreamError> {
        if let Some(base) = self.base.as_mut() {
            match base.next_entry().await {
                Ok((entry, offset)) => {
                    self.yielded += 1;
                    return Ok((entry, offset));
                }
                Err(err) if err.is_end() => self.base = None,
                Err(err) => return Err(err),
            }
        }
        let (entry, offset) = self.next.next_entry().await?;
        Ok((entry, offset + self.yielded))
    }
}

/// Yields all of `base` then all of `next`, with offsets continuing across
/// the boundary.
#[must_use]
pub fn concat(base: BoxedStream, next: BoxedStream) -> BoxedStream {
    Box::new(ConcatStream {
        base: Some(base),
        next,
        yielded: 0,
    })
}

struct CancellableStream {
    token: CancellationToken,
    inner: Option<BoxedStream>,
}

impl CancellableStream {
    fn cancel(&mut self) -> StreamError {
        if let Some(stream) = self.inner.take() {
            drain(stream);
        }
        StreamError::EndOfStream
    }
}

#[async_trait]
impl EntryStream for CancellableStream {
    async fn next_entry(&mut self) -> Result<(LogEntry, u64), StreamError> {
        if self.token.is_cancelled() {
            return Err(self.cancel());
        }
        let Some(stream) = self.inner.as_mut() else {
            return Err(StreamError::EndOfStream);
        };
        let result = tokio::select! {
            biased;
            () = self.token.cancelled() => None,
            result = stream.next_entry() => Some(result),
        };
        match result {
            Some(result) => result,
            None => Err(self.cancel()),
        }
    }
}

/// Wraps a stream whose source is not cancellation-aware. Once `token`
/// fires, `next_entry` returns the end signal and the underlying stream is
/// drained exactly once.
#[must_use]
pub fn cancellable(token: CancellationToken, stream: BoxedStream) -> BoxedStream {
    Box::new(CancellableStream {
        token,
        inner: Some(stream),
    })
}

struct TagStream {
    inner: BoxedStream,
    tag: String,
}

#[async_trait]
impl EntryStream for TagStream {
    async fn next_entry(&mut self) -> Result<(LogEntry, u64), StreamError> {
        let (mut entry, offset) = self.inner.next_entry().await?;
        entry.tag(&self.tag);
        Ok((entry, offset))
    }
}

/// Applies [`LogEntry::tag`] to every passing entry.
#[must_use]
pub fn tagged(stream: BoxedStream, tag: impl Into<String>) -> BoxedStream {
    Box::new(TagStream {
        inner: stream,
        tag: tag.into(),
    })
}

struct CutStream {
    inner: BoxedStream,
    spec: CutSpec,
}

#[async_trait]
impl EntryStream for CutStream {
    async fn next_entry(&mut self) -> Result<(LogEntry, u64), StreamError> {
        let (mut entry, offset) = self.inner.next_entry().await?;
        self.spec.apply(&mut entry)?;
        Ok((entry, offset))
    }
}

/// Applies a [`CutSpec`] to every passing entry.
#[must_use]
pub fn cutter(stream: BoxedStream, spec: CutSpec) -> BoxedStream {
    Box::new(CutStream {
        inner: stream,
        spec,
    })
}

struct TransformStream {
    inner: BoxedStream,
    spec: TransformSpec,
}

#[async_trait]
impl EntryStream for TransformStream {
    async fn next_entry(&mut self) -> Result<(LogEntry, u64), StreamError> {
        let (mut entry, offset) = self.inner.next_entry().await?;
        self.spec.apply(&mut entry);
        Ok((entry, offset))
    }
}

/// Applies a [`TransformSpec`] to every passing entry.
#[must_use]
pub fn transformer(stream: BoxedStream, spec: TransformSpec) -> BoxedStream {
    Box::new(TransformStream {
        inner: stream,
        spec,
    })
}

struct ReassignStream {
    inner: BoxedStream,
    spec: ReassignSpec,
}

#[async_trait]
impl EntryStream for ReassignStream {
    async fn next_entry(&mut self) -> Result<(LogEntry, u64), StreamError> {
        let (mut entry, offset) = self.inner.next_entry().await?;
        self.spec.apply(&mut entry);
        Ok((entry, offset))
    }
}

/// Applies a [`ReassignSpec`] to every passing entry.
#[must_use]
pub fn reassigner(stream: BoxedStream, spec: ReassignSpec) -> BoxedStream {
    Box::new(ReassignStream {
        inner: stream,
        spec,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{FieldValue, MESSAGE_FIELD, TAG_FIELD};
    use crate::stream::from_slice;
    use std::time::Duration;

    fn keyed(keys: &[&str]) -> Vec<LogEntry> {
        keys.iter()
            .map(|k| [(*k, FieldValue::from(*k))].into_iter().collect())
            .collect()
    }

    #[tokio::test]
    async fn filter_keeps_matching_entries() {
        let mut stream = filter(from_slice(keyed(&["A", "B", "C"])), |entry, _| {
            entry.has_field("C")
        });
        let (entry, _) = stream.next_entry().await.expect("entry");
        assert_eq!(entry.as_string("C").as_deref(), Some("C"));
        assert!(stream.next_entry().await.expect_err("done").is_end());
    }

    #[tokio::test]
    async fn concat_offsets_are_continuous() {
        let mut stream = concat(from_slice(keyed(&["A", "B"])), from_slice(keyed(&["C"])));
        let (entry, offset) = stream.next_entry().await.expect("entry");
        assert!(entry.has_field("A"));
        assert_eq!(offset, 0);
        let (_, offset) = stream.next_entry().await.expect("entry");
        assert_eq!(offset, 1);
        let (entry, offset) = stream.next_entry().await.expect("entry");
        assert!(entry.has_field("C"));
        assert_eq!(offset, 2);
        assert!(stream.next_entry().await.expect_err("done").is_end());
    }

    #[tokio::test]
    async fn cancellable_returns_end_after_cancel() {
        let token = CancellationToken::new();
        let mut stream = cancellable(token.clone(), from_slice(keyed(&["A", "B", "C"])));

        let (entry, _) = stream.next_entry().await.expect("entry");
        assert!(entry.has_field("A"));

        token.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(stream.next_entry().await.expect_err("cancelled").is_end());
        // Subsequent calls keep returning the end signal.
        assert!(stream.next_entry().await.expect_err("cancelled").is_end());
    }

    #[tokio::test]
    async fn tagged_appends_the_tag() {
        let mut entry = LogEntry::from_line("hello");
        entry.tag("first");
        let mut stream = tagged(from_slice(vec![entry]), "second");
        let (entry, _) = stream.next_entry().await.expect("entry");
        assert_eq!(entry.as_string(TAG_FIELD).as_deref(), Some("first.second"));
    }

    #[tokio::test]
    async fn transformer_applies_spec() {
        let spec = TransformSpec::new().transform(MESSAGE_FIELD, |value| match value {
            FieldValue::String(s) => FieldValue::String(s.to_uppercase()),
            other => other,
        });
        let mut stream = transformer(from_slice(vec![LogEntry::from_line("hello")]), spec);
        let (entry, _) = stream.next_entry().await.expect("entry");
        assert_eq!(entry.as_string(MESSAGE_FIELD).as_deref(), Some("HELLO"));
    }

    #[tokio::test]
    async fn reassigner_moves_fields() {
        let spec = ReassignSpec::new().moved("old", "new");
        let entry: LogEntry = [("old", FieldValue::from("value"))].into_iter().collect();
        let mut stream = reassigner(from_slice(vec![entry]), spec);
        let (entry, _) = stream.next_entry().await.expect("entry");
        assert!(!entry.has_field("old"));
        assert_eq!(entry.as_string("new").as_deref(), Some("value"));
    }
}
