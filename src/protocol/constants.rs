//! Wire protocol constants

/// Length of an operation frame header (opcode + u16 length)
pub const OPERATION_HEADER_SIZE: usize = 3;

/// Byte following an army entry that is consumed and ignored when present
pub const ARMY_TRAILER_MARKER: u8 = 0xFF;

/// Request method byte for submitting a replay stream
pub const METHOD_POST: u8 = b'P';

/// Request method byte for watching a replay stream
pub const METHOD_GET: u8 = b'G';

/// Extension of a regular submitted replay
pub const EXT_FAF_REPLAY: &str = "fafreplay";

/// Extension of a galactic war submitted replay
pub const EXT_GALACTIC_WAR_REPLAY: &str = "gwreplay";

/// Extension of the raw capture while staging
pub const EXT_RAW_CAPTURE: &str = "scfareplay";

/// Extension of the metadata sidecar while staging
pub const EXT_SIDECAR: &str = "json";

/// Extension of the final archive blob
pub const EXT_ARCHIVE: &str = "fafreplay";

/// Steps a live viewer trails behind the head of an unfinished game
pub const DEFAULT_LIVE_DELAY_STEPS: u32 = 3000;

/// Default replay server port
pub const DEFAULT_PORT: u16 = 15000;
