//! Error types
//!
//! Each subsystem has its own error enum; [`Error`] wraps them for the
//! connection-level handlers.

use std::fmt;
use std::io;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// Transport or filesystem error
    Io(io::Error),
    /// Malformed wire input
    Codec(CodecError),
    /// Malformed request line
    Request(RequestError),
    /// Two submitters disagree about the same game
    Diverged(DivergenceError),
    /// Archive or metadata failure
    Storage(StorageError),
    /// Operation did not complete in time
    Timeout,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Codec(e) => write!(f, "Codec error: {}", e),
            Error::Request(e) => write!(f, "Request error: {}", e),
            Error::Diverged(e) => write!(f, "Replay stream diverged: {}", e),
            Error::Storage(e) => write!(f, "Storage error: {}", e),
            Error::Timeout => write!(f, "Operation timed out"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Codec(e) => Some(e),
            Error::Request(e) => Some(e),
            Error::Diverged(e) => Some(e),
            Error::Storage(e) => Some(e),
            Error::Timeout => None,
        }
    }
}

impl Error {
    /// Whether this error is an ordinary peer disconnect
    pub fn is_disconnect(&self) -> bool {
        match self {
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        Error::Codec(e)
    }
}

impl From<RequestError> for Error {
    fn from(e: RequestError) -> Self {
        Error::Request(e)
    }
}

impl From<DivergenceError> for Error {
    fn from(e: DivergenceError) -> Self {
        Error::Diverged(e)
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Error::Storage(e)
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}

/// Wire decoding errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended before a complete value was read
    TruncatedStream,
    /// Lua value tag outside 0..=4
    UnknownLuaType(u8),
    /// Command stream opcode outside 0..=23
    UnknownOpcode(u8),
    /// Lua tables nested beyond the decoder limit
    NestingTooDeep,
    /// Header still incomplete after this many bytes
    HeaderTooLarge(usize),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::TruncatedStream => write!(f, "Truncated stream"),
            CodecError::UnknownLuaType(t) => write!(f, "Unknown lua type id: {}", t),
            CodecError::UnknownOpcode(op) => write!(f, "Unknown command stream opcode: {}", op),
            CodecError::NestingTooDeep => write!(f, "Lua table nesting too deep"),
            CodecError::HeaderTooLarge(n) => write!(f, "Replay header exceeds {} bytes", n),
        }
    }
}

impl std::error::Error for CodecError {}

/// Request line errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// First character is neither `P` nor `G`
    UnknownMethod(String),
    /// POST path with an extension we do not ingest
    UnknownReplayFormat(String),
    /// Path without an integer game id segment
    InvalidPath(String),
    /// GET for a game with no live aggregator
    UnknownReplay(u64),
    /// No terminating NUL within the allowed length
    RequestTooLong,
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::UnknownMethod(line) => write!(f, "Unknown method: {}", line),
            RequestError::UnknownReplayFormat(path) => {
                write!(f, "Unknown replay format: {}", path)
            }
            RequestError::InvalidPath(path) => write!(f, "Invalid replay path: {}", path),
            RequestError::UnknownReplay(id) => write!(f, "Unknown replay: {}", id),
            RequestError::RequestTooLong => write!(f, "Request line too long"),
        }
    }
}

impl std::error::Error for RequestError {}

/// Divergence between two submitters of the same game
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DivergenceError {
    /// Header bytes differ from the recorded header
    Header,
    /// Step operations differ from the recorded step
    Step { tick: u32 },
    /// Step skips ahead of the recorded timeline
    TickGap { expected: u32, got: u32 },
}

impl fmt::Display for DivergenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DivergenceError::Header => write!(f, "header difference"),
            DivergenceError::Step { tick } => write!(f, "step difference at tick {}", tick),
            DivergenceError::TickGap { expected, got } => {
                write!(f, "tick gap: expected at most {}, got {}", expected, got)
            }
        }
    }
}

impl std::error::Error for DivergenceError {}

/// Archive and metadata store errors
#[derive(Debug)]
pub enum StorageError {
    /// Filesystem error
    Io(io::Error),
    /// Metadata (de)serialization error
    Json(serde_json::Error),
    /// External metadata store failure
    Metadata(String),
    /// No metadata in memory, in a sidecar, or in a pending blob
    MissingMetadata(u64),
    /// Archive blob could not be decoded
    Corrupt(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Io(e) => write!(f, "I/O error: {}", e),
            StorageError::Json(e) => write!(f, "JSON error: {}", e),
            StorageError::Metadata(msg) => write!(f, "Metadata store error: {}", msg),
            StorageError::MissingMetadata(id) => write!(f, "No metadata for replay {}", id),
            StorageError::Corrupt(msg) => write!(f, "Corrupt archive: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io(e) => Some(e),
            StorageError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(e: io::Error) -> Self {
        StorageError::Io(e)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Json(e)
    }
}
