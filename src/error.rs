//! Error types for kaibox

use thiserror::Error;

/// Result type alias for kaibox operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for kaibox
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A box declares a size that does not fit its enclosing range
    #[error("malformed box '{kind}' at offset {offset}: {reason}")]
    MalformedBox {
        kind: String,
        offset: u64,
        reason: String,
    },

    /// Fewer than a full box header remains in the enclosing range
    #[error("truncated box at offset {offset}: {remaining} bytes remain")]
    TruncatedBox { offset: u64, remaining: usize },

    /// Strict parsing hit a box type it does not recognise
    #[error("unknown box type '{kind}' at offset {offset}")]
    UnknownContainer { kind: String, offset: u64 },

    /// File extension or content is not a format this crate reads
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A `.stem.m4a` file is missing its karaoke payload
    #[error("missing karaoke payload in {path}")]
    MissingKaraokePayload { path: String },

    /// Two lines of the same singer overlap in time
    #[error("lines {first} and {second} of singer '{singer_id}' overlap")]
    OverlappingLines {
        singer_id: String,
        first: usize,
        second: usize,
    },

    /// Line timing is not monotone or a line ends before it starts
    #[error("non-monotonic timing for singer '{singer_id}' at line {line}")]
    NonMonotonicTiming { singer_id: String, line: usize },

    /// A payload timestamp lies beyond the media duration
    #[error("timestamp {timestamp_sec}s exceeds media duration {duration_sec}s")]
    TimestampBeyondDuration {
        timestamp_sec: f64,
        duration_sec: f64,
    },

    /// A word's timing lies outside its enclosing line
    #[error("word {word} of line {line} lies outside the line's time range")]
    WordOutOfLine { line: usize, word: usize },

    /// A chunk offset table entry does not point at the expected chunk bytes
    #[error("chunk offset mismatch: track {track}, chunk {chunk}")]
    ChunkOffsetMismatch { track: u32, chunk: usize },

    /// Post-save verification failed; the previous file state may have been restored
    #[error("post-write validation failed ({reason}); original restored: {restored}")]
    PostWriteValidationFailed { reason: String, restored: bool },

    /// The external audio encoder exited abnormally
    #[error("external encoder failed: {stderr}")]
    ExternalEncoderFailed { stderr: String },

    /// An encode job was cancelled while the encoder subprocess was running
    #[error("encode cancelled")]
    CancelledDuringEncode,

    /// Payload bytes do not decode as the expected schema
    #[error("payload error: {0}")]
    Payload(String),
}

impl Error {
    /// Create a malformed-box error
    pub fn malformed(kind: impl Into<String>, offset: u64, reason: impl Into<String>) -> Self {
        Error::MalformedBox {
            kind: kind.into(),
            offset,
            reason: reason.into(),
        }
    }

    /// Create a payload error
    pub fn payload<S: Into<String>>(msg: S) -> Self {
        Error::Payload(msg.into())
    }

    /// Create an unsupported-format error
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        Error::UnsupportedFormat(msg.into())
    }

    /// True for errors a user can fix by editing the song rather than the file
    pub fn is_semantic(&self) -> bool {
        matches!(
            self,
            Error::OverlappingLines { .. }
                | Error::NonMonotonicTiming { .. }
                | Error::TimestampBeyondDuration { .. }
                | Error::WordOutOfLine { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Payload(e.to_string())
    }
}
