//! Error type for entry streams.

/// Errors surfaced by [`EntryStream::next_entry`](crate::stream::EntryStream::next_entry).
///
/// `EndOfStream` is the normal termination signal; everything else is a
/// transport or programmer error.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// Normal end of the stream.
    #[error("end of stream")]
    EndOfStream,

    /// The cut source field is present but not a string.
    #[error("field '{0}' is not a cuttable string")]
    NotACutString(String),

    /// Stream-level failure raised by a wrapper or a consumer callback.
    #[error("stream failed: {0}")]
    Failed(String),
}

impl StreamError {
    /// Returns true for the normal end-of-stream signal.
    #[must_use]
    pub fn is_end(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }
}
