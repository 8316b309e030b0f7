//! Lazy, single-consumer streams of log entries.
//!
//! An [`EntryStream`] yields `(entry, offset)` pairs until it returns
//! [`StreamError::EndOfStream`]. Offsets are zero-based within that
//! stream's own view; wrappers may restart them. Streams are single
//! consumer: reading from a stream after handing it to a combinator is a
//! programmer error.
//!
//! Combinators that need concurrency ([`merge`], [`dupe`], [`fanout`])
//! spawn exactly one detached forwarder task each and communicate over
//! bounded channels, so an unread branch applies natural backpressure
//! upstream.

mod combine;
mod join;
mod wrap;

pub use combine::{as_channel, dupe, fanout, merge};
pub use join::{compile_start_patterns, joiner};
pub use wrap::{cancellable, concat, cutter, filter, reassigner, tagged, transformer};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::entry::LogEntry;
use crate::error::StreamError;

/// Capacity of the channels connecting forwarder tasks. One slot is the
/// closest bounded equivalent of a rendezvous hand-off.
pub(crate) const CHANNEL_CAPACITY: usize = 1;

/// A pull-based lazy stream of `(entry, offset)` pairs.
#[async_trait]
pub trait EntryStream: Send {
    /// Returns the next entry and its zero-based offset, or
    /// [`StreamError::EndOfStream`] once the stream is exhausted.
    async fn next_entry(&mut self) -> Result<(LogEntry, u64), StreamError>;
}

/// The boxed stream type passed between pipeline stages.
pub type BoxedStream = Box<dyn EntryStream>;

/// Wraps an ordered sequence of entries; offsets run `0..len`.
pub struct SliceStream {
    entries: Vec<LogEntry>,
    next: usize,
}

#[async_trait]
impl EntryStream for SliceStream {
    async fn next_entry(&mut self) -> Result<(LogEntry, u64), StreamError> {
        if self.next >= self.entries.len() {
            return Err(StreamError::EndOfStream);
        }
        let offset = self.next as u64;
        let entry = self.entries[self.next].clone();
        self.next += 1;
        Ok((entry, offset))
    }
}

/// Builds a stream over an in-memory sequence of entries.
#[must_use]
pub fn from_slice(entries: Vec<LogEntry>) -> BoxedStream {
    Box::new(SliceStream { entries, next: 0 })
}

/// Returns a stream that is immediately exhausted.
#[must_use]
pub fn empty() -> BoxedStream {
    from_slice(Vec::new())
}

/// Wraps an entry channel; offsets count deliveries from zero.
pub struct ChannelStream {
    rx: mpsc::Receiver<LogEntry>,
    next: u64,
}

impl ChannelStream {
    /// Creates a stream reading from `rx`.
    #[must_use]
    pub fn new(rx: mpsc::Receiver<LogEntry>) -> Self {
        Self { rx, next: 0 }
    }
}

#[async_trait]
impl EntryStream for ChannelStream {
    async fn next_entry(&mut self) -> Result<(LogEntry, u64), StreamError> {
        match self.rx.recv().await {
            Some(entry) => {
                let offset = self.next;
                self.next += 1;
                Ok((entry, offset))
            }
            None => Err(StreamError::EndOfStream),
        }
    }
}

/// Builds a stream over a channel of entries.
#[must_use]
pub fn from_channel(rx: mpsc::Receiver<LogEntry>) -> BoxedStream {
    Box::new(ChannelStream::new(rx))
}

/// Consumes a stream, invoking `visit` for every entry.
///
/// End-of-stream from the source converts to `Ok(())`. When `visit`
/// returns the end signal, the remaining entries are drained in the
/// background and iteration ends cleanly. Any other `visit` error is
/// propagated after a single drain; any other source error is propagated
/// as-is.
///
/// # Errors
///
/// Returns the first non-end error from the source or from `visit`.
pub async fn iterate<F>(mut stream: BoxedStream, mut visit: F) -> Result<(), StreamError>
where
    F: FnMut(LogEntry, u64) -> Result<(), StreamError> + Send,
{
    loop {
        match stream.next_entry().await {
            Ok((entry, offset)) => {
                if let Err(err) = visit(entry, offset) {
                    drain(stream);
                    if err.is_end() {
                        return Ok(());
                    }
                    return Err(err);
                }
            }
            Err(err) if err.is_end() => return Ok(()),
            Err(err) => return Err(err),
        }
    }
}

/// Consumes and discards the remainder of a stream on a detached task.
///
/// Safe to call on an already exhausted stream. Draining keeps upstream
/// forwarder tasks from blocking on a hand-off nobody will take.
pub fn drain(mut stream: BoxedStream) {
    tokio::spawn(async move { while stream.next_entry().await.is_ok() {} });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::MESSAGE_FIELD;

    fn test_entries() -> Vec<LogEntry> {
        ["A", "B", "C"]
            .iter()
            .map(|m| LogEntry::from_line(m))
            .collect()
    }

    #[tokio::test]
    async fn slice_stream_next() {
        let mut stream = from_slice(test_entries());
        for (i, expected) in ["A", "B", "C"].iter().enumerate() {
            let (entry, offset) = stream.next_entry().await.expect("entry");
            assert_eq!(offset, i as u64);
            assert_eq!(entry.as_string(MESSAGE_FIELD).as_deref(), Some(*expected));
        }
        let err = stream.next_entry().await.expect_err("exhausted");
        assert!(err.is_end());
    }

    #[tokio::test]
    async fn channel_stream_next() {
        let (tx, rx) = mpsc::channel(4);
        for entry in test_entries() {
            tx.send(entry).await.expect("buffered send");
        }
        drop(tx);

        let mut stream = from_channel(rx);
        for i in 0..3u64 {
            let (_, offset) = stream.next_entry().await.expect("entry");
            assert_eq!(offset, i);
        }
        assert!(stream.next_entry().await.expect_err("closed").is_end());
    }

    #[tokio::test]
    async fn iterate_counts_all_entries() {
        let mut count = 0;
        iterate(from_slice(test_entries()), |_, _| {
            count += 1;
            Ok(())
        })
        .await
        .expect("clean iteration");
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn iterate_stops_cleanly_on_end_signal() {
        let mut seen = 0;
        iterate(from_slice(test_entries()), |_, _| {
            seen += 1;
            if seen == 2 {
                return Err(StreamError::EndOfStream);
            }
            Ok(())
        })
        .await
        .expect("end signal converts to success");
        assert_eq!(seen, 2);
    }

    #[tokio::test]
    async fn iterate_propagates_callback_errors() {
        let err = iterate(from_slice(test_entries()), |_, _| {
            Err(StreamError::Failed("boom".into()))
        })
        .await
        .expect_err("callback error propagates");
        assert!(matches!(err, StreamError::Failed(_)));
    }

    #[tokio::test]
    async fn empty_stream_ends_immediately() {
        assert!(empty().next_entry().await.expect_err("empty").is_end());
    }
}
