//! # loomlog connectors
//!
//! Source and sink plugins for files and the standard streams:
//!
//! - `file.File` source — reads every line of a file
//! - `file.Tail` source — follows a file for appended lines
//! - `file.File` sink — appends entries as JSON lines
//! - `std.In` source, `std.Out` / `std.Err` sinks
//!
//! Sources stamp `@read_timestamp` and `@read_line_number`, parse JSON
//! object lines into structured entries, and watch the runtime's
//! cancellation token. Sinks drain their stream on error paths so
//! upstream producers never block on a dead hand-off.

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

mod file;
mod jsonl;
mod stdstream;

pub use file::FilePlugin;
pub use stdstream::StdStreamPlugin;
