//! Coalescing of multi-line log records.

use async_trait::async_trait;
use regex::Regex;

use crate::entry::{LogEntry, MESSAGE_FIELD};
use crate::error::StreamError;
use crate::stream::{BoxedStream, EntryStream};

/// Compiles join start patterns, splitting off the ones that fail.
///
/// Returns the compiled patterns and the source strings that did not
/// compile; callers decide how to report the latter.
#[must_use]
pub fn compile_start_patterns(patterns: &[String]) -> (Vec<Regex>, Vec<String>) {
    let mut compiled = Vec::with_capacity(patterns.len());
    let mut rejected = Vec::new();
    for pattern in patterns {
        match Regex::new(pattern) {
            Ok(regex) => compiled.push(regex),
            Err(_) => rejected.push(pattern.clone()),
        }
    }
    (compiled, rejected)
}

/// Joins runs of entries into single multi-line records.
///
/// An entry whose message matches a start pattern opens a new record; the
/// messages of following non-matching entries are appended with `\n`
/// separators (their other fields are dropped). An entry arriving when no
/// record is open always opens one, matching or not. A record still open
/// when the stream ends is emitted once before the end signal.
#[must_use]
pub fn joiner(stream: BoxedStream, start_patterns: Vec<Regex>) -> BoxedStream {
    Box::new(JoinStream {
        inner: stream,
        start_patterns,
        pending: None,
    })
}

struct JoinStream {
    inner: BoxedStream,
    start_patterns: Vec<Regex>,
    pending: Option<Pending>,
}

struct Pending {
    entry: LogEntry,
    offset: u64,
    message: String,
}

impl JoinStream {
    fn is_start(&self, entry: &LogEntry) -> bool {
        let Some(message) = entry.as_string(MESSAGE_FIELD) else {
            return false;
        };
        self.start_patterns.iter().any(|p| p.is_match(&message))
    }

    fn open(&mut self, entry: LogEntry, offset: u64) {
        let message = entry.as_string(MESSAGE_FIELD).unwrap_or_default();
        self.pending = Some(Pending {
            entry,
            offset,
            message,
        });
    }

    fn seal(pending: Pending) -> (LogEntry, u64) {
        let Pending {
            mut entry,
            offset,
            message,
        } = pending;
        entry.insert(MESSAGE_FIELD, message);
        (entry, offset)
    }
}

#[async_trait]
impl EntryStream for JoinStream {
    async fn next_entry(&mut self) -> Result<(LogEntry, u64), StreamError> {
        loop {
            match self.inner.next_entry().await {
                Ok((entry, offset)) => {
                    let Some(mut pending) = self.pending.take() else {
                        self.open(entry, offset);
                        continue;
                    };
                    if self.is_start(&entry) {
                        let finished = Self::seal(pending);
                        self.open(entry, offset);
                        return Ok(finished);
                    }
                    if let Some(message) = entry.as_string(MESSAGE_FIELD) {
                        pending.message.push('\n');
                        pending.message.push_str(&message);
                    }
                    self.pending = Some(pending);
                }
                Err(err) => {
                    if let Some(pending) = self.pending.take() {
                        return Ok(Self::seal(pending));
                    }
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::from_slice;

    fn patterns(sources: &[&str]) -> Vec<Regex> {
        let strings: Vec<String> = sources.iter().map(|s| (*s).to_string()).collect();
        let (compiled, rejected) = compile_start_patterns(&strings);
        assert!(rejected.is_empty());
        compiled
    }

    fn lines(messages: &[&str]) -> Vec<LogEntry> {
        messages.iter().map(|m| LogEntry::from_line(m)).collect()
    }

    #[tokio::test]
    async fn joins_continuation_lines_into_the_start_entry() {
        let mut stream = joiner(
            from_slice(lines(&["start entry", "another entry", "start complete"])),
            patterns(&["^start"]),
        );

        let (first, offset) = stream.next_entry().await.expect("first record");
        assert_eq!(
            first.as_string(MESSAGE_FIELD).as_deref(),
            Some("start entry\nanother entry")
        );
        assert_eq!(offset, 0);

        let (second, _) = stream.next_entry().await.expect("second record");
        assert_eq!(
            second.as_string(MESSAGE_FIELD).as_deref(),
            Some("start complete")
        );

        assert!(stream.next_entry().await.expect_err("done").is_end());
    }

    #[tokio::test]
    async fn midstream_first_entry_opens_a_record() {
        let mut stream = joiner(
            from_slice(lines(&["another entry", "start complete"])),
            patterns(&["^start"]),
        );

        let (first, _) = stream.next_entry().await.expect("first record");
        assert_eq!(
            first.as_string(MESSAGE_FIELD).as_deref(),
            Some("another entry")
        );

        let (second, _) = stream.next_entry().await.expect("second record");
        assert_eq!(
            second.as_string(MESSAGE_FIELD).as_deref(),
            Some("start complete")
        );

        assert!(stream.next_entry().await.expect_err("done").is_end());
    }

    #[tokio::test]
    async fn pending_record_flushes_at_end() {
        let mut stream = joiner(from_slice(lines(&["start only"])), patterns(&["^start"]));

        let (only, _) = stream.next_entry().await.expect("flushed record");
        assert_eq!(only.as_string(MESSAGE_FIELD).as_deref(), Some("start only"));
        assert!(stream.next_entry().await.expect_err("done").is_end());
    }

    #[tokio::test]
    async fn continuation_fields_are_dropped() {
        let mut continuation = LogEntry::from_line("tail line");
        continuation.insert("extra", "kept nowhere");
        let mut stream = joiner(
            from_slice(vec![LogEntry::from_line("start line"), continuation]),
            patterns(&["^start"]),
        );

        let (record, _) = stream.next_entry().await.expect("joined record");
        assert_eq!(
            record.as_string(MESSAGE_FIELD).as_deref(),
            Some("start line\ntail line")
        );
        assert!(!record.has_field("extra"));
    }

    #[test]
    fn invalid_patterns_are_rejected() {
        let (compiled, rejected) =
            compile_start_patterns(&["^ok".to_string(), "(broken".to_string()]);
        assert_eq!(compiled.len(), 1);
        assert_eq!(rejected, vec!["(broken".to_string()]);
    }
}
