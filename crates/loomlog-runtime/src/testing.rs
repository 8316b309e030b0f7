//! Test support: an in-memory plugin with a replay source and a
//! collecting sink.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use loomlog_core::stream::{drain, from_slice};
use loomlog_core::{BoxedStream, LogEntry};
use loomlog_dsl::Arg;

use crate::error::RuntimeError;
use crate::registry::{Plugin, Registry, SinkFactory, SourceFactory};

/// Entries collected by the mock sink, shared with the test.
pub type Collected = Arc<Mutex<Vec<LogEntry>>>;

/// Plugin exposing `mock.Static` (replays fixed entries) and
/// `mock.Collect` (gathers entries into a shared vector).
pub struct MockPlugin {
    entries: Vec<LogEntry>,
    collected: Collected,
    stop_error: Option<String>,
}

impl MockPlugin {
    /// Builds the plugin with the entries `mock.Static` replays.
    #[must_use]
    pub fn new(entries: Vec<LogEntry>) -> Self {
        Self {
            entries,
            collected: Arc::new(Mutex::new(Vec::new())),
            stop_error: None,
        }
    }

    /// Makes [`Plugin::stopping`] fail with `message`.
    #[must_use]
    pub fn with_stop_error(mut self, message: impl Into<String>) -> Self {
        self.stop_error = Some(message.into());
        self
    }

    /// Handle to whatever `mock.Collect` has gathered.
    #[must_use]
    pub fn collected(&self) -> Collected {
        Arc::clone(&self.collected)
    }
}

impl Plugin for MockPlugin {
    fn id(&self) -> &str {
        "mock"
    }

    fn register(&self, registry: &mut Registry) {
        registry.register_source(
            "mock",
            "Static",
            Arc::new(StaticSource {
                entries: self.entries.clone(),
            }),
        );
        registry.document_source("mock", "Static", "mock.Static\n\nReplays fixed entries.");
        registry.register_sink(
            "mock",
            "Collect",
            Arc::new(CollectingSink {
                collected: Arc::clone(&self.collected),
            }),
        );
        registry.document_sink(
            "mock",
            "Collect",
            "mock.Collect\n\nGathers entries for assertions.",
        );
    }

    fn stopping(&self) -> Result<(), RuntimeError> {
        match &self.stop_error {
            Some(message) => Err(RuntimeError::Plugin(message.clone())),
            None => Ok(()),
        }
    }
}

struct StaticSource {
    entries: Vec<LogEntry>,
}

#[async_trait]
impl SourceFactory for StaticSource {
    async fn create(
        &self,
        _ctx: CancellationToken,
        _args: &[Arg],
    ) -> Result<BoxedStream, RuntimeError> {
        Ok(from_slice(self.entries.clone()))
    }
}

struct CollectingSink {
    collected: Collected,
}

#[async_trait]
impl SinkFactory for CollectingSink {
    async fn run(
        &self,
        ctx: CancellationToken,
        mut stream: BoxedStream,
        _args: &[Arg],
    ) -> Result<(), RuntimeError> {
        loop {
            if ctx.is_cancelled() {
                drain(stream);
                return Ok(());
            }
            match stream.next_entry().await {
                Ok((entry, _)) => self.collected.lock().await.push(entry),
                Err(err) if err.is_end() => return Ok(()),
                Err(err) => {
                    drain(stream);
                    return Err(RuntimeError::Plugin(err.to_string()));
                }
            }
        }
    }
}
