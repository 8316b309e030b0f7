//! Error type for the runtime and its plugins.

use crate::runtime::State;

/// Errors from script execution and runtime lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Script parse failure.
    #[error(transparent)]
    Parse(#[from] loomlog_dsl::ParseError),

    /// A lifecycle operation was attempted in the wrong state.
    #[error("invalid state for {operation} operation: {state}")]
    InvalidState {
        /// The attempted operation.
        operation: &'static str,
        /// The state the runtime was in.
        state: State,
    },

    /// An identifier was blank.
    #[error("empty identifier")]
    EmptyId,

    /// An identifier was used without a prior definition.
    #[error("undefined identifier: {0}")]
    Undefined(String),

    /// An identifier was introduced twice.
    #[error("identifier is already in use: {0}")]
    AlreadyDefined(String),

    /// A consuming operation named an already consumed identifier.
    #[error("identifier has been consumed: {0}")]
    Consumed(String),

    /// No source factory is registered for the `qualifier.class` pair.
    #[error("unknown source class: {0}")]
    UnknownSourceClass(String),

    /// No sink factory is registered for the `qualifier.class` pair.
    #[error("unknown sink class: {0}")]
    UnknownSinkClass(String),

    /// A plugin rejected its argument list.
    #[error("argument error: {0}")]
    Argument(String),

    /// The slot for an identifier holds no stream. Happens when a dry-run
    /// placeholder is executed against.
    #[error("stream for '{0}' is not available")]
    StreamUnavailable(String),

    /// I/O failure inside a plugin.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Plugin-specific failure.
    #[error("plugin error: {0}")]
    Plugin(String),
}
