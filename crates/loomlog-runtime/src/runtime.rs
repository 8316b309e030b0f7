//! Script execution: lifecycle state machine, identifier table, and the
//! wiring of AST nodes to streams and plugin factories.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use loomlog_core::stream;
use loomlog_core::{BoxedStream, CutSpec};
use loomlog_dsl::{AstNode, ClassRef, SinkNode, SourceNode};

use crate::error::RuntimeError;
use crate::registry::{Plugin, Registry};

/// Runtime lifecycle states.
///
/// Guarded transitions are `Created → Started → Stopping → Done`;
/// `Executing` is set for the duration of an execute call for
/// diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Built, not yet started.
    Created,
    /// Plugins registered; scripts may execute.
    Started,
    /// Inside an execute call.
    Executing,
    /// Stop in progress.
    Stopping,
    /// Stopped.
    Done,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "Created",
            Self::Started => "Started",
            Self::Executing => "Executing",
            Self::Stopping => "Stopping",
            Self::Done => "Done",
        };
        f.write_str(name)
    }
}

/// Executes parsed scripts against a plugin registry.
///
/// The identifier table is a pair of parallel vectors (`streams`,
/// `consumed`) plus an id→index map. Slots are append-only and keep their
/// index for the life of the runtime; in-place transformations (`tag`,
/// `cut`, `join`, `append` target) replace the stream at its slot.
/// Consumption is monotonic.
pub struct Runtime {
    registry: Registry,
    plugins: Vec<Arc<dyn Plugin>>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    streams: Vec<Option<BoxedStream>>,
    consumed: Vec<bool>,
    ids: HashMap<String, usize>,
    state: State,
    dry: bool,
}

impl Runtime {
    /// Builds a runtime over the given plugins. Nothing is registered
    /// until [`start`](Self::start).
    #[must_use]
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self {
            registry: Registry::new(),
            plugins,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            streams: Vec::new(),
            consumed: Vec::new(),
            ids: HashMap::new(),
            state: State::Created,
            dry: false,
        }
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// The registry, for documentation listings.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// True if `id` names a slot in the identifier table.
    #[must_use]
    pub fn is_defined(&self, id: &str) -> bool {
        self.ids.contains_key(id)
    }

    /// True if `id` has been consumed. Unknown identifiers read as not
    /// consumed.
    #[must_use]
    pub fn is_consumed(&self, id: &str) -> bool {
        self.ids
            .get(id)
            .is_some_and(|&index| self.consumed[index])
    }

    /// Registers every plugin and transitions to `Started`.
    ///
    /// The runtime's cancellation handle becomes a child of `parent`, so
    /// cancelling `parent` cancels every source and sink the runtime
    /// hands it to.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InvalidState`] unless the runtime is in
    /// `Created`.
    pub fn start(&mut self, parent: &CancellationToken) -> Result<(), RuntimeError> {
        self.check_state(State::Created, "start")?;
        tracing::debug!("Starting runtime");
        self.cancel = parent.child_token();
        for plugin in &self.plugins {
            tracing::debug!(plugin = plugin.id(), "Registering plugin");
            plugin.register(&mut self.registry);
        }
        self.state = State::Started;
        tracing::info!(plugins = self.plugins.len(), "Runtime started");
        Ok(())
    }

    /// Cancels the context, drains async sinks, and stops every plugin.
    ///
    /// Plugin stop errors are collected; the first is returned after all
    /// plugins were given the chance to stop.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InvalidState`] unless the runtime is in
    /// `Started`, otherwise the first plugin stop error.
    pub async fn stop(&mut self) -> Result<(), RuntimeError> {
        self.check_state(State::Started, "stop")?;
        self.state = State::Stopping;
        tracing::debug!("Cancelling runtime context");
        self.cancel.cancel();
        tracing::debug!("Waiting for async sinks to settle");
        self.tracker.close();
        self.tracker.wait().await;
        let mut first_error = None;
        for plugin in &self.plugins {
            tracing::debug!(plugin = plugin.id(), "Stopping plugin");
            if let Err(error) = plugin.stopping() {
                tracing::error!(plugin = plugin.id(), error = %error, "Plugin failed to stop");
                if first_error.is_none() {
                    first_error = Some(error);
                }
            }
        }
        self.state = State::Done;
        tracing::info!("Runtime stopped");
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Parses and executes a script.
    ///
    /// # Errors
    ///
    /// Returns parse errors, state errors, and the errors of
    /// [`execute`](Self::execute).
    pub async fn execute_string(&mut self, script: &str) -> Result<(), RuntimeError> {
        let nodes = loomlog_dsl::parse_string(script).await?;
        self.execute(&nodes).await
    }

    /// Executes parsed AST nodes in order.
    ///
    /// A synchronous sink error aborts the remainder of the batch; async
    /// sink errors are logged, not surfaced.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InvalidState`] unless the runtime is in
    /// `Started`, otherwise the first execution error.
    pub async fn execute(&mut self, nodes: &[AstNode]) -> Result<(), RuntimeError> {
        self.check_state(State::Started, "execute")?;
        if nodes.is_empty() {
            return Ok(());
        }
        self.state = State::Executing;
        let result = self.execute_nodes(nodes).await;
        self.state = State::Started;
        result
    }

    /// Validates and bookkeeps the nodes without invoking any factories
    /// or building any streams. Identifier slots are filled with
    /// placeholders and consumption flags are updated as in a real run.
    ///
    /// # Errors
    ///
    /// Same errors as [`execute`](Self::execute), minus anything a
    /// factory would raise.
    pub async fn dry_run(&mut self, nodes: &[AstNode]) -> Result<(), RuntimeError> {
        self.check_state(State::Started, "dry run")?;
        self.state = State::Executing;
        self.dry = true;
        let result = self.execute_nodes(nodes).await;
        self.dry = false;
        self.state = State::Started;
        result
    }

    async fn execute_nodes(&mut self, nodes: &[AstNode]) -> Result<(), RuntimeError> {
        for node in nodes {
            match node {
                AstNode::Eol(_) => {}
                AstNode::Source(source) => self.run_source(source).await?,
                AstNode::Sink(sink) => self.run_sink(sink).await?,
                AstNode::Merge(merge) => {
                    self.validate_existing_id(&merge.source_a)?;
                    self.validate_existing_id(&merge.source_b)?;
                    self.validate_new_id(&merge.id)?;
                    self.mark_consumed(&merge.source_a)?;
                    self.mark_consumed(&merge.source_b)?;
                    if self.dry {
                        tracing::info!(
                            a = %merge.source_a,
                            b = %merge.source_b,
                            id = %merge.id,
                            "Dry run: would merge streams"
                        );
                        self.add_stream(&merge.id, None);
                        continue;
                    }
                    let a = self.take_stream(&merge.source_a)?;
                    let b = self.take_stream(&merge.source_b)?;
                    self.add_stream(&merge.id, Some(stream::merge(a, b)));
                }
                AstNode::Dupe(dupe) => {
                    self.validate_existing_id(&dupe.source)?;
                    self.validate_new_id(&dupe.target_a)?;
                    self.validate_new_id(&dupe.target_b)?;
                    self.mark_consumed(&dupe.source)?;
                    if self.dry {
                        tracing::info!(
                            source = %dupe.source,
                            a = %dupe.target_a,
                            b = %dupe.target_b,
                            "Dry run: would duplicate the stream"
                        );
                        self.add_stream(&dupe.target_a, None);
                        self.add_stream(&dupe.target_b, None);
                        continue;
                    }
                    let source = self.take_stream(&dupe.source)?;
                    let (a, b) = stream::dupe(source);
                    self.add_stream(&dupe.target_a, Some(a));
                    self.add_stream(&dupe.target_b, Some(b));
                }
                AstNode::Append(append) => {
                    self.validate_existing_id(&append.source)?;
                    self.validate_existing_id(&append.target)?;
                    self.mark_consumed(&append.source)?;
                    if self.dry {
                        tracing::info!(
                            source = %append.source,
                            target = %append.target,
                            "Dry run: would append the stream"
                        );
                        continue;
                    }
                    let source = self.take_stream(&append.source)?;
                    let target = self.take_stream(&append.target)?;
                    self.replace_stream(&append.target, stream::concat(target, source))?;
                }
                AstNode::Cut(cut) => {
                    self.validate_existing_id(&cut.source)?;
                    if self.dry {
                        tracing::info!(
                            source = %cut.source,
                            delimiter = %cut.delimiter,
                            fields = cut.field_sets.len(),
                            "Dry run: would cut the stream"
                        );
                        continue;
                    }
                    let mut spec = CutSpec::new().delimiter(cut.delimiter.clone());
                    for (field, index) in &cut.field_sets {
                        spec = spec.map(field.clone(), *index);
                    }
                    let source = self.take_stream(&cut.source)?;
                    self.replace_stream(&cut.source, stream::cutter(source, spec))?;
                }
                AstNode::Fanout(fanout) => {
                    self.validate_existing_id(&fanout.source)?;
                    self.validate_new_id(&fanout.target_a)?;
                    self.validate_new_id(&fanout.target_b)?;
                    self.mark_consumed(&fanout.source)?;
                    if self.dry {
                        tracing::info!(
                            source = %fanout.source,
                            a = %fanout.target_a,
                            b = %fanout.target_b,
                            "Dry run: would fan the stream out"
                        );
                        self.add_stream(&fanout.target_a, None);
                        self.add_stream(&fanout.target_b, None);
                        continue;
                    }
                    let source = self.take_stream(&fanout.source)?;
                    let (a, b) = stream::fanout(source);
                    self.add_stream(&fanout.target_a, Some(a));
                    self.add_stream(&fanout.target_b, Some(b));
                }
                AstNode::Tag(tag) => {
                    self.validate_existing_id(&tag.source)?;
                    if self.dry {
                        tracing::info!(
                            source = %tag.source,
                            tag = %tag.tag,
                            "Dry run: would tag the stream"
                        );
                        continue;
                    }
                    let source = self.take_stream(&tag.source)?;
                    self.replace_stream(&tag.source, stream::tagged(source, tag.tag.clone()))?;
                }
                AstNode::Join(join) => {
                    self.validate_existing_id(&join.source)?;
                    if self.dry {
                        tracing::info!(
                            source = %join.source,
                            patterns = join.patterns.len(),
                            "Dry run: would join the stream"
                        );
                        continue;
                    }
                    let (patterns, rejected) = stream::compile_start_patterns(&join.patterns);
                    for pattern in rejected {
                        tracing::warn!(
                            source = %join.source,
                            pattern = %pattern,
                            "Dropping join pattern that failed to compile"
                        );
                    }
                    let source = self.take_stream(&join.source)?;
                    self.replace_stream(&join.source, stream::joiner(source, patterns))?;
                }
            }
        }
        Ok(())
    }

    async fn run_source(&mut self, source: &SourceNode) -> Result<(), RuntimeError> {
        self.validate_new_id(&source.id)?;
        let factory = self
            .registry
            .source(&source.class.qualifier, &source.class.class)
            .ok_or_else(|| unknown_source(&source.class))?;
        if self.dry {
            tracing::info!(
                id = %source.id,
                class = %source.class.qualified(),
                "Dry run: would create the source"
            );
            self.add_stream(&source.id, None);
            return Ok(());
        }
        tracing::debug!(id = %source.id, class = %source.class.qualified(), "Creating source");
        let stream = factory.create(self.cancel.clone(), &source.args).await?;
        self.add_stream(&source.id, Some(stream));
        Ok(())
    }

    async fn run_sink(&mut self, sink: &SinkNode) -> Result<(), RuntimeError> {
        self.validate_existing_id(&sink.source)?;
        let factory = self
            .registry
            .sink(&sink.class.qualifier, &sink.class.class)
            .ok_or_else(|| unknown_sink(&sink.class))?;
        self.mark_consumed(&sink.source)?;
        if self.dry {
            tracing::info!(
                source = %sink.source,
                class = %sink.class.qualified(),
                is_async = sink.is_async(),
                "Dry run: sink would consume the stream"
            );
            return Ok(());
        }
        let stream = self.take_stream(&sink.source)?;
        let token = self.cancel.clone();
        if sink.is_async() {
            let name = sink.sink_id.clone().unwrap_or_default();
            let args = sink.args.to_vec();
            tracing::debug!(sink = %name, class = %sink.class.qualified(), "Spawning async sink");
            self.tracker.spawn(async move {
                if let Err(error) = factory.run(token, stream, &args).await {
                    tracing::error!(sink = %name, error = %error, "Async sink failed");
                }
            });
            return Ok(());
        }
        tracing::debug!(class = %sink.class.qualified(), "Running sink");
        factory.run(token, stream, &sink.args).await
    }

    fn check_state(&self, want: State, operation: &'static str) -> Result<(), RuntimeError> {
        if self.state == want {
            Ok(())
        } else {
            Err(RuntimeError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn validate_new_id(&self, id: &str) -> Result<(), RuntimeError> {
        if id.trim().is_empty() {
            return Err(RuntimeError::EmptyId);
        }
        if self.ids.contains_key(id) {
            return Err(RuntimeError::AlreadyDefined(id.to_string()));
        }
        Ok(())
    }

    fn validate_existing_id(&self, id: &str) -> Result<(), RuntimeError> {
        if id.trim().is_empty() {
            return Err(RuntimeError::EmptyId);
        }
        let Some(&index) = self.ids.get(id) else {
            return Err(RuntimeError::Undefined(id.to_string()));
        };
        if self.consumed[index] {
            return Err(RuntimeError::Consumed(id.to_string()));
        }
        Ok(())
    }

    fn index_of(&self, id: &str) -> Result<usize, RuntimeError> {
        self.ids
            .get(id)
            .copied()
            .ok_or_else(|| RuntimeError::Undefined(id.to_string()))
    }

    fn add_stream(&mut self, id: &str, stream: Option<BoxedStream>) {
        let index = self.streams.len();
        self.streams.push(stream);
        self.consumed.push(false);
        self.ids.insert(id.to_string(), index);
    }

    fn replace_stream(&mut self, id: &str, stream: BoxedStream) -> Result<(), RuntimeError> {
        let index = self.index_of(id)?;
        self.streams[index] = Some(stream);
        Ok(())
    }

    fn take_stream(&mut self, id: &str) -> Result<BoxedStream, RuntimeError> {
        let index = self.index_of(id)?;
        self.streams[index]
            .take()
            .ok_or_else(|| RuntimeError::StreamUnavailable(id.to_string()))
    }

    fn mark_consumed(&mut self, id: &str) -> Result<(), RuntimeError> {
        let index = self.index_of(id)?;
        self.consumed[index] = true;
        Ok(())
    }
}

fn unknown_source(class: &ClassRef) -> RuntimeError {
    RuntimeError::UnknownSourceClass(class.qualified())
}

fn unknown_sink(class: &ClassRef) -> RuntimeError {
    RuntimeError::UnknownSinkClass(class.qualified())
}
