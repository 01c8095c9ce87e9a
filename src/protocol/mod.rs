//! Replay command stream wire protocol
//!
//! A submitted stream is a header block followed by operation frames:
//! ```text
//! +--------+----------+----------+-----+----------+
//! | Header | Op frame | Op frame | ... | EndGame  |
//! +--------+----------+----------+-----+----------+
//! ```
//! Frames are grouped into steps; an `Advance` or `SingleStep` operation
//! closes the current step and `EndGame` closes the last one.
//!
//! Decoding is stateless: each reader works on any [`bytes::Buf`] and fails
//! with [`CodecError::TruncatedStream`](crate::error::CodecError) when more
//! input is needed.

pub mod constants;
pub mod header;
pub mod operation;
pub mod step;

pub use header::{read_header, split_header, ArmyEntry, ReplayHeader};
pub use operation::{frame_len, read_operation, Opcode, Operation};
pub use step::ReplayStep;
