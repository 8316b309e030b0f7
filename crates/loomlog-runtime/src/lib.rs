//! # loomlog runtime
//!
//! Executes parsed pipeline scripts: resolves AST nodes against a plugin
//! registry, manages the identifier table with linear-consumption
//! semantics, dispatches synchronous and asynchronous sinks, and
//! coordinates startup, cancellation, and shutdown.
//!
//! # Lifecycle
//!
//! ```text
//! Created ──start──► Started ──stop──► Stopping ──► Done
//!                      │  ▲
//!                   execute / dry_run
//! ```
//!
//! `stop` cancels the runtime's `CancellationToken` (handed to every
//! source and sink factory), waits for the async-sink task tracker to
//! drain, then calls `stopping` on each plugin, returning the first
//! error.

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

mod error;
mod registry;
mod runtime;
pub mod testing;

pub use error::RuntimeError;
pub use registry::{require_string_arg, Plugin, Registry, SinkFactory, SourceFactory};
pub use runtime::{Runtime, State};
