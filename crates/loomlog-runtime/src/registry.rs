//! Plugin registry: `(qualifier, class)` to source/sink factories, plus
//! the documentation listing the CLI prints.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use loomlog_core::BoxedStream;
use loomlog_dsl::Arg;

use crate::error::RuntimeError;

/// Builds a stream from script arguments.
///
/// Factories receive the runtime's cancellation token; sources that open
/// external resources must close them on end-of-input or cancellation.
#[async_trait]
pub trait SourceFactory: Send + Sync {
    /// Creates the stream, or fails with an argument or I/O error.
    async fn create(
        &self,
        ctx: CancellationToken,
        args: &[Arg],
    ) -> Result<BoxedStream, RuntimeError>;
}

/// Consumes a stream to completion.
///
/// A sink must release its resources on error paths and drain the stream
/// it was handed so upstream producers never block on a dead hand-off.
#[async_trait]
pub trait SinkFactory: Send + Sync {
    /// Runs the sink until the stream ends, cancellation fires, or an
    /// error occurs.
    async fn run(
        &self,
        ctx: CancellationToken,
        stream: BoxedStream,
        args: &[Arg],
    ) -> Result<(), RuntimeError>;
}

/// A source/sink provider wired into the runtime at start.
pub trait Plugin: Send + Sync {
    /// Unique identifier for diagnostics.
    fn id(&self) -> &str;

    /// Called during [`Runtime::start`](crate::Runtime::start) to register
    /// factories and documentation.
    fn register(&self, registry: &mut Registry);

    /// Called after all source and sink operations, while the runtime
    /// shuts down.
    ///
    /// # Errors
    ///
    /// The first stopping error across plugins is returned from
    /// [`Runtime::stop`](crate::Runtime::stop).
    fn stopping(&self) -> Result<(), RuntimeError> {
        Ok(())
    }
}

/// Maps `(qualifier, class)` pairs to factories and documentation.
#[derive(Default)]
pub struct Registry {
    sources: BTreeMap<String, BTreeMap<String, Arc<dyn SourceFactory>>>,
    sources_doc: BTreeMap<String, BTreeMap<String, String>>,
    sinks: BTreeMap<String, BTreeMap<String, Arc<dyn SinkFactory>>>,
    sinks_doc: BTreeMap<String, BTreeMap<String, String>>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a source factory for `qualifier.class`.
    pub fn register_source(
        &mut self,
        qualifier: impl Into<String>,
        class: impl Into<String>,
        factory: Arc<dyn SourceFactory>,
    ) {
        self.sources
            .entry(qualifier.into())
            .or_default()
            .insert(class.into(), factory);
    }

    /// Attaches usage documentation to a source class.
    pub fn document_source(
        &mut self,
        qualifier: impl Into<String>,
        class: impl Into<String>,
        doc: impl Into<String>,
    ) {
        self.sources_doc
            .entry(qualifier.into())
            .or_default()
            .insert(class.into(), doc.into());
    }

    /// Looks up a source factory.
    #[must_use]
    pub fn source(&self, qualifier: &str, class: &str) -> Option<Arc<dyn SourceFactory>> {
        self.sources.get(qualifier)?.get(class).map(Arc::clone)
    }

    /// Registers a sink factory for `qualifier.class`.
    pub fn register_sink(
        &mut self,
        qualifier: impl Into<String>,
        class: impl Into<String>,
        factory: Arc<dyn SinkFactory>,
    ) {
        self.sinks
            .entry(qualifier.into())
            .or_default()
            .insert(class.into(), factory);
    }

    /// Attaches usage documentation to a sink class.
    pub fn document_sink(
        &mut self,
        qualifier: impl Into<String>,
        class: impl Into<String>,
        doc: impl Into<String>,
    ) {
        self.sinks_doc
            .entry(qualifier.into())
            .or_default()
            .insert(class.into(), doc.into());
    }

    /// Looks up a sink factory.
    #[must_use]
    pub fn sink(&self, qualifier: &str, class: &str) -> Option<Arc<dyn SinkFactory>> {
        self.sinks.get(qualifier)?.get(class).map(Arc::clone)
    }

    /// Renders the documentation for every registered source and sink.
    ///
    /// Sources come before sinks; entries are alphabetized by qualifier
    /// then class and indented two spaces. An empty group renders `None`.
    #[must_use]
    pub fn all_docs(&self) -> String {
        let mut out = String::from("Sources:\n");
        out.push_str(&indent(&group_docs(&self.sources, &self.sources_doc)));
        out.push_str("Sinks:\n");
        out.push_str(&indent(&group_docs(&self.sinks, &self.sinks_doc)));
        out
    }
}

/// Joins the documentation of one factory group, defaulting undocumented
/// entries to their `qualifier.class` name.
fn group_docs<T>(
    group: &BTreeMap<String, BTreeMap<String, T>>,
    docs: &BTreeMap<String, BTreeMap<String, String>>,
) -> String {
    if group.is_empty() {
        return "None\n".to_string();
    }
    let mut out = String::new();
    for (qualifier, classes) in group {
        for class in classes.keys() {
            let default_doc = format!("{qualifier}.{class}");
            let doc = docs
                .get(qualifier)
                .and_then(|d| d.get(class))
                .map_or(default_doc.as_str(), String::as_str);
            out.push_str(doc);
            if !doc.ends_with('\n') {
                out.push('\n');
            }
            out.push('\n');
        }
    }
    out
}

/// Prefixes every non-empty line with two spaces.
fn indent(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        if line != "\n" {
            out.push_str("  ");
        }
        out.push_str(line);
    }
    out
}

/// Returns the required string argument at `index`.
///
/// # Errors
///
/// Returns [`RuntimeError::Argument`] when the argument is missing or not
/// a string.
pub fn require_string_arg<'a>(
    args: &'a [Arg],
    index: usize,
    what: &str,
) -> Result<&'a str, RuntimeError> {
    args.get(index)
        .and_then(Arg::as_str)
        .ok_or_else(|| RuntimeError::Argument(format!("requires a {what} string argument")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use loomlog_core::stream::empty;

    struct NullSource;

    #[async_trait]
    impl SourceFactory for NullSource {
        async fn create(
            &self,
            _ctx: CancellationToken,
            _args: &[Arg],
        ) -> Result<BoxedStream, RuntimeError> {
            Ok(empty())
        }
    }

    struct NullSink;

    #[async_trait]
    impl SinkFactory for NullSink {
        async fn run(
            &self,
            _ctx: CancellationToken,
            _stream: BoxedStream,
            _args: &[Arg],
        ) -> Result<(), RuntimeError> {
            Ok(())
        }
    }

    #[test]
    fn lookups_miss_for_unknown_pairs() {
        let mut registry = Registry::new();
        registry.register_source("file", "File", Arc::new(NullSource));
        assert!(registry.source("file", "File").is_some());
        assert!(registry.source("file", "Tail").is_none());
        assert!(registry.source("net", "File").is_none());
        assert!(registry.sink("file", "File").is_none());
    }

    #[test]
    fn all_docs_renders_none_for_empty_groups() {
        let registry = Registry::new();
        assert_eq!(registry.all_docs(), "Sources:\n  None\nSinks:\n  None\n");
    }

    #[test]
    fn all_docs_sorts_and_indents() {
        let mut registry = Registry::new();
        registry.register_source("file", "Tail", Arc::new(NullSource));
        registry.register_source("file", "File", Arc::new(NullSource));
        registry.register_source("db", "Table", Arc::new(NullSource));
        registry.document_source("file", "File", "file.File FILE\n\nReads a file.");
        registry.register_sink("std", "Out", Arc::new(NullSink));

        let docs = registry.all_docs();
        let db = docs.find("db.Table").expect("db source listed");
        let file = docs.find("file.File FILE").expect("documented source");
        let tail = docs.find("file.Tail").expect("default doc");
        assert!(db < file && file < tail, "qualifiers and classes sorted");
        assert!(docs.contains("  file.File FILE\n"), "two-space indent");
        assert!(docs.contains("  Reads a file.\n"));
        assert!(docs.contains("Sinks:\n  std.Out\n"));
    }
}
