//! Standard-stream source and sinks.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use loomlog_core::stream::from_channel;
use loomlog_core::{BoxedStream, LogEntry};
use loomlog_dsl::Arg;
use loomlog_runtime::{Plugin, Registry, RuntimeError, SinkFactory, SourceFactory};

use crate::jsonl::write_json_lines;

/// Registers `std.In`, `std.Out`, and `std.Err`.
#[derive(Debug, Default)]
pub struct StdStreamPlugin;

impl StdStreamPlugin {
    /// Creates the plugin.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Plugin for StdStreamPlugin {
    fn id(&self) -> &str {
        "std"
    }

    fn register(&self, registry: &mut Registry) {
        registry.register_source("std", "In", Arc::new(StdinSource));
        registry.document_source(
            "std",
            "In",
            "std.In\n\n\
             Reads each line of STDIN as a log entry. A line may hold a JSON object or be\n\
             completely unstructured.",
        );
        registry.register_sink("std", "Out", Arc::new(StdoutSink));
        registry.document_sink(
            "std",
            "Out",
            "std.Out\n\nWrites each log entry as a JSON line to STDOUT.",
        );
        registry.register_sink("std", "Err", Arc::new(StderrSink));
        registry.document_sink(
            "std",
            "Err",
            "std.Err\n\nWrites each log entry as a JSON line to STDERR.",
        );
    }
}

struct StdinSource;

#[async_trait]
impl SourceFactory for StdinSource {
    async fn create(
        &self,
        ctx: CancellationToken,
        _args: &[Arg],
    ) -> Result<BoxedStream, RuntimeError> {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                tokio::select! {
                    biased;
                    () = ctx.cancelled() => break,
                    line = lines.next_line() => {
                        let Ok(Some(line)) = line else { break };
                        if tx.send(LogEntry::from_line(&line)).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Ok(from_channel(rx))
    }
}

struct StdoutSink;

#[async_trait]
impl SinkFactory for StdoutSink {
    async fn run(
        &self,
        ctx: CancellationToken,
        stream: BoxedStream,
        _args: &[Arg],
    ) -> Result<(), RuntimeError> {
        let mut stdout = tokio::io::stdout();
        write_json_lines(&ctx, stream, &mut stdout).await
    }
}

struct StderrSink;

#[async_trait]
impl SinkFactory for StderrSink {
    async fn run(
        &self,
        ctx: CancellationToken,
        stream: BoxedStream,
        _args: &[Arg],
    ) -> Result<(), RuntimeError> {
        let mut stderr = tokio::io::stderr();
        write_json_lines(&ctx, stream, &mut stderr).await
    }
}
