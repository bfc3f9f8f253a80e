//! Error types for playback and stream handling

/// Error type for playback engine operations
#[derive(thiserror::Error, Debug)]
pub enum ReplayerError {
    /// Header magic, version or layout checks failed
    #[error("bad format: {0}")]
    BadFormat(String),

    /// A buffer could not be obtained at any acceptable size
    #[error("allocation failure: {0}")]
    Alloc(String),

    /// The source ran out of bytes where more were expected
    #[error("source exhausted")]
    SourceExhausted,

    /// A seek was requested that the source cannot service
    #[error("seek to {0} unsupported by source")]
    SeekUnsupported(u32),

    /// Streaming decompression failed
    #[error("decompression error: {0}")]
    Decompression(String),

    /// IO error from the underlying reader
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for ReplayerError {
    fn from(s: String) -> Self {
        ReplayerError::Other(s)
    }
}

impl From<&str> for ReplayerError {
    fn from(s: &str) -> Self {
        ReplayerError::Other(s.to_string())
    }
}

/// Result type for playback engine operations
pub type Result<T> = std::result::Result<T, ReplayerError>;
