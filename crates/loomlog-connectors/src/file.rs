//! File source, tail source, and file sink.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use loomlog_core::entry::{READ_LINE_FIELD, READ_TIMESTAMP_FIELD};
use loomlog_core::stream::{drain, from_channel};
use loomlog_core::{BoxedStream, FieldValue, LogEntry};
use loomlog_dsl::Arg;
use loomlog_runtime::{require_string_arg, Plugin, Registry, RuntimeError, SinkFactory, SourceFactory};

use crate::jsonl::write_json_lines;

/// How often the tail source polls for appended lines.
const TAIL_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Registers `file.File` (source and sink) and `file.Tail`.
#[derive(Debug, Default)]
pub struct FilePlugin;

impl FilePlugin {
    /// Creates the plugin.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Plugin for FilePlugin {
    fn id(&self) -> &str {
        "file"
    }

    fn register(&self, registry: &mut Registry) {
        registry.register_source("file", "File", Arc::new(FileSource));
        registry.document_source(
            "file",
            "File",
            "file.File FILE_NAME\n\n\
             Reads each line of FILE_NAME, emitting a log entry for every one.\n\
             A line holding a JSON object becomes a structured entry with read-timing fields added.\n\
             Any other line becomes an entry whose \"@message\" field holds the original line.",
        );
        registry.register_source("file", "Tail", Arc::new(TailSource));
        registry.document_source(
            "file",
            "Tail",
            "file.Tail FILE_NAME\n\n\
             Watches FILE_NAME for appended lines, producing a new log entry for each one.\n\
             Structured and unstructured lines are handled like the file.File source.",
        );
        registry.register_sink("file", "File", Arc::new(FileSink));
        registry.document_sink(
            "file",
            "File",
            "file.File FILE_NAME [FILE_MODE]\n\n\
             Appends each log entry as a JSON document on its own line to FILE_NAME, creating it if needed.\n\
             FILE_MODE is an octal permission string like \"644\" used when the file is created;\n\
             an invalid mode fails the sink, and an existing file keeps its permissions.\n\
             Without FILE_MODE, \"600\" is assumed.",
        );
    }
}

/// Stamps read-time fields and converts one raw line into an entry.
fn line_entry(line: &str, number: u64) -> LogEntry {
    let mut entry = LogEntry::from_line(line);
    entry.insert(READ_TIMESTAMP_FIELD, FieldValue::Time(Utc::now()));
    entry.insert(READ_LINE_FIELD, FieldValue::Uint(number));
    entry
}

struct FileSource;

#[async_trait]
impl SourceFactory for FileSource {
    async fn create(
        &self,
        ctx: CancellationToken,
        args: &[Arg],
    ) -> Result<BoxedStream, RuntimeError> {
        let path = PathBuf::from(require_string_arg(args, 0, "file name")?);
        let file = File::open(&path).await?;
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            let mut lines = BufReader::new(file).lines();
            let mut number: u64 = 0;
            loop {
                tokio::select! {
                    biased;
                    () = ctx.cancelled() => break,
                    line = lines.next_line() => {
                        let Ok(Some(line)) = line else { break };
                        if tx.send(line_entry(&line, number)).await.is_err() {
                            break;
                        }
                        number += 1;
                    }
                }
            }
        });
        Ok(from_channel(rx))
    }
}

struct TailSource;

#[async_trait]
impl SourceFactory for TailSource {
    async fn create(
        &self,
        ctx: CancellationToken,
        args: &[Arg],
    ) -> Result<BoxedStream, RuntimeError> {
        let path = PathBuf::from(require_string_arg(args, 0, "file name")?);
        // The file must exist before the tail starts.
        let file = File::open(&path).await?;
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            let mut lines = BufReader::new(file).lines();
            let mut number: u64 = 0;
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        tokio::select! {
                            biased;
                            () = ctx.cancelled() => break,
                            sent = tx.send(line_entry(&line, number)) => {
                                if sent.is_err() {
                                    break;
                                }
                                number += 1;
                            }
                        }
                    }
                    // At the end of the file: wait for appends or cancellation.
                    Ok(None) => {
                        tokio::select! {
                            biased;
                            () = ctx.cancelled() => break,
                            () = tokio::time::sleep(TAIL_POLL_INTERVAL) => {}
                        }
                    }
                    Err(error) => {
                        tracing::warn!(error = %error, "Tail read failed");
                        break;
                    }
                }
            }
        });
        Ok(from_channel(rx))
    }
}

struct FileSink;

#[async_trait]
impl SinkFactory for FileSink {
    async fn run(
        &self,
        ctx: CancellationToken,
        stream: BoxedStream,
        args: &[Arg],
    ) -> Result<(), RuntimeError> {
        let path = match require_string_arg(args, 0, "file name") {
            Ok(path) => PathBuf::from(path),
            Err(err) => {
                drain(stream);
                return Err(err);
            }
        };
        let mode = match parse_mode(args) {
            Ok(mode) => mode,
            Err(err) => {
                drain(stream);
                return Err(err);
            }
        };

        let mut options = OpenOptions::new();
        options.append(true).create(true);
        apply_mode(&mut options, mode);
        let mut file = match options.open(&path).await {
            Ok(file) => file,
            Err(err) => {
                drain(stream);
                return Err(err.into());
            }
        };
        write_json_lines(&ctx, stream, &mut file).await
    }
}

/// Parses the optional octal permission argument; `0o600` when absent.
fn parse_mode(args: &[Arg]) -> Result<u32, RuntimeError> {
    let Some(arg) = args.get(1) else {
        return Ok(0o600);
    };
    arg.as_str()
        .and_then(|text| u32::from_str_radix(text, 8).ok())
        .ok_or_else(|| RuntimeError::Argument("invalid file permission argument".to_string()))
}

#[cfg(unix)]
fn apply_mode(options: &mut OpenOptions, mode: u32) {
    options.mode(mode);
}

#[cfg(not(unix))]
fn apply_mode(_options: &mut OpenOptions, _mode: u32) {}

#[cfg(test)]
mod tests {
    use super::*;
    use loomlog_core::entry::MESSAGE_FIELD;

    fn string_arg(text: &str) -> Arg {
        Arg {
            meta: loomlog_dsl::NodeMeta {
                line: 1,
                pos: 0,
                text: format!("\"{text}\""),
            },
            value: loomlog_dsl::ArgValue::String(text.to_string()),
        }
    }

    async fn collect(mut stream: BoxedStream) -> Vec<LogEntry> {
        let mut entries = Vec::new();
        while let Ok((entry, _)) = stream.next_entry().await {
            entries.push(entry);
        }
        entries
    }

    #[tokio::test]
    async fn file_source_reads_and_stamps_lines() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("data.txt");
        tokio::fs::write(&path, "A\nB\nC\n").await.expect("fixture");

        let args = [string_arg(path.to_str().expect("utf-8 path"))];
        let stream = FileSource
            .create(CancellationToken::new(), &args)
            .await
            .expect("source opens");
        let entries = collect(stream).await;

        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].as_string(MESSAGE_FIELD).as_deref(), Some("A"));
        assert_eq!(entries[2].as_string(MESSAGE_FIELD).as_deref(), Some("C"));
        assert_eq!(entries[0].as_uint(READ_LINE_FIELD), Some(0));
        assert_eq!(entries[2].as_uint(READ_LINE_FIELD), Some(2));
        assert!(entries[0].has_field(READ_TIMESTAMP_FIELD));
    }

    #[tokio::test]
    async fn file_source_parses_structured_lines() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("data.json");
        tokio::fs::write(&path, "{\"level\":\"info\",\"count\":2}\nplain\n")
            .await
            .expect("fixture");

        let args = [string_arg(path.to_str().expect("utf-8 path"))];
        let stream = FileSource
            .create(CancellationToken::new(), &args)
            .await
            .expect("source opens");
        let entries = collect(stream).await;

        assert_eq!(entries[0].as_string("level").as_deref(), Some("info"));
        assert_eq!(entries[0].as_int("count"), Some(2));
        assert!(!entries[0].has_field(MESSAGE_FIELD));
        assert_eq!(entries[1].as_string(MESSAGE_FIELD).as_deref(), Some("plain"));
    }

    #[tokio::test]
    async fn file_source_requires_a_path_argument() {
        let err = match FileSource.create(CancellationToken::new(), &[]).await {
            Err(err) => err,
            Ok(_) => panic!("missing argument"),
        };
        assert!(matches!(err, RuntimeError::Argument(_)));
    }

    #[tokio::test]
    async fn missing_file_fails_at_creation() {
        let args = [string_arg("/definitely/not/here.txt")];
        let err = match FileSource.create(CancellationToken::new(), &args).await {
            Err(err) => err,
            Ok(_) => panic!("missing file"),
        };
        assert!(matches!(err, RuntimeError::Io(_)));
    }

    #[tokio::test]
    async fn tail_source_sees_appended_lines() {
        use tokio::io::AsyncWriteExt;

        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("tail.log");
        tokio::fs::write(&path, "first\n").await.expect("fixture");

        let token = CancellationToken::new();
        let args = [string_arg(path.to_str().expect("utf-8 path"))];
        let mut stream = TailSource
            .create(token.clone(), &args)
            .await
            .expect("tail opens");

        let (entry, _) = tokio::time::timeout(Duration::from_secs(5), stream.next_entry())
            .await
            .expect("existing line arrives")
            .expect("entry");
        assert_eq!(entry.as_string(MESSAGE_FIELD).as_deref(), Some("first"));

        let mut file = OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .expect("reopen for append");
        file.write_all(b"second\n").await.expect("append");
        file.flush().await.expect("flush");

        let (entry, _) = tokio::time::timeout(Duration::from_secs(5), stream.next_entry())
            .await
            .expect("appended line arrives")
            .expect("entry");
        assert_eq!(entry.as_string(MESSAGE_FIELD).as_deref(), Some("second"));

        token.cancel();
        let ended = tokio::time::timeout(Duration::from_secs(5), stream.next_entry())
            .await
            .expect("tail terminates after cancellation");
        assert!(ended.is_err());
    }

    #[tokio::test]
    async fn file_sink_writes_json_lines() {
        use loomlog_core::stream::from_slice;

        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("out.json");
        let entries: Vec<LogEntry> = ["A", "B"].iter().map(|m| LogEntry::from_line(m)).collect();

        let args = [string_arg(path.to_str().expect("utf-8 path"))];
        FileSink
            .run(CancellationToken::new(), from_slice(entries), &args)
            .await
            .expect("sink runs");

        let written = tokio::fs::read_to_string(&path).await.expect("output");
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).expect("valid JSON line");
        assert_eq!(first["@message"], "A");
    }

    #[tokio::test]
    async fn file_sink_rejects_a_bad_mode() {
        use loomlog_core::stream::empty;

        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("out.json");
        let args = [
            string_arg(path.to_str().expect("utf-8 path")),
            string_arg("not-octal"),
        ];
        let err = FileSink
            .run(CancellationToken::new(), empty(), &args)
            .await
            .expect_err("invalid mode");
        assert!(matches!(err, RuntimeError::Argument(_)));
    }
}
