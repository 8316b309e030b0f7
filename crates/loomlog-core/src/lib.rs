//! # loomlog core
//!
//! Log entries and the lazy entry-stream algebra that loomlog pipelines
//! are built from.
//!
//! # Architecture
//!
//! ```text
//! sources ──► EntryStream ──► combinators (merge/dupe/fanout/…) ──► sinks
//! ```
//!
//! Streams are pull-based and single-consumer. Combinators that need
//! concurrency spawn one detached tokio task each and hand entries over
//! bounded channels, so an unread branch backpressures its producer
//! instead of buffering without bound.

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod cut;
pub mod entry;
pub mod error;
pub mod stream;
pub mod transform;

pub use cut::CutSpec;
pub use entry::{FieldValue, LogEntry};
pub use error::StreamError;
pub use stream::{BoxedStream, EntryStream};
pub use transform::{ReassignSpec, TransformSpec};
