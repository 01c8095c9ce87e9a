//! Command stream operations
//!
//! Every simulation command travels as one frame:
//! ```text
//! +-----------+---------------------+-------------+
//! | Opcode(1) | TotalLen(2, LE)     | Payload(N)  |
//! +-----------+---------------------+-------------+
//! TotalLen = N + 3
//! ```

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::constants::OPERATION_HEADER_SIZE;
use crate::error::CodecError;

/// Command stream opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Advance = 0,
    SetCommandSource = 1,
    CommandSourceTerminated = 2,
    VerifyChecksum = 3,
    RequestPause = 4,
    Resume = 5,
    SingleStep = 6,
    CreateUnit = 7,
    CreateProp = 8,
    DestroyEntity = 9,
    WarpEntity = 10,
    ProcessInfoPair = 11,
    IssueCommand = 12,
    IssueFactoryCommand = 13,
    IncreaseCommandCount = 14,
    DecreaseCommandCount = 15,
    SetCommandTarget = 16,
    SetCommandType = 17,
    SetCommandCells = 18,
    RemoveCommandFromQueue = 19,
    DebugCommand = 20,
    ExecuteLuaInSim = 21,
    LuaSimCallback = 22,
    EndGame = 23,
}

impl Opcode {
    pub fn from_u8(b: u8) -> Option<Self> {
        use Opcode::*;
        let op = match b {
            0 => Advance,
            1 => SetCommandSource,
            2 => CommandSourceTerminated,
            3 => VerifyChecksum,
            4 => RequestPause,
            5 => Resume,
            6 => SingleStep,
            7 => CreateUnit,
            8 => CreateProp,
            9 => DestroyEntity,
            10 => WarpEntity,
            11 => ProcessInfoPair,
            12 => IssueCommand,
            13 => IssueFactoryCommand,
            14 => IncreaseCommandCount,
            15 => DecreaseCommandCount,
            16 => SetCommandTarget,
            17 => SetCommandType,
            18 => SetCommandCells,
            19 => RemoveCommandFromQueue,
            20 => DebugCommand,
            21 => ExecuteLuaInSim,
            22 => LuaSimCallback,
            23 => EndGame,
            _ => return None,
        };
        Some(op)
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Operations that close the current step
    pub fn flushes_step(self) -> bool {
        matches!(self, Opcode::Advance | Opcode::SingleStep)
    }

    /// The end-of-game operation
    pub fn is_terminal(self) -> bool {
        self == Opcode::EndGame
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CMDST_{:?}", self)
    }
}

/// One decoded command stream operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub opcode: Opcode,
    pub payload: Bytes,
}

impl Operation {
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            payload: payload.into(),
        }
    }

    /// Size of this operation on the wire
    pub fn encoded_len(&self) -> usize {
        OPERATION_HEADER_SIZE + self.payload.len()
    }

    /// Append the wire form of this operation
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.opcode.as_u8());
        dst.put_u16_le(self.encoded_len() as u16);
        dst.put_slice(&self.payload);
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ( ", self.opcode)?;
        for b in self.payload.iter() {
            write!(f, "{:02x}", b)?;
        }
        write!(f, " )")
    }
}

/// Total frame length announced by the frame header at the front of `src`
///
/// Returns `None` until the 3 header bytes are available. Lengths below the
/// header size mean an empty payload.
pub fn frame_len(src: &[u8]) -> Option<usize> {
    if src.len() < OPERATION_HEADER_SIZE {
        return None;
    }
    let total = u16::from_le_bytes([src[1], src[2]]) as usize;
    Some(total.max(OPERATION_HEADER_SIZE))
}

/// Decode one operation frame
pub fn read_operation<B: Buf>(buf: &mut B) -> Result<Operation, CodecError> {
    if buf.remaining() < OPERATION_HEADER_SIZE {
        return Err(CodecError::TruncatedStream);
    }
    let op = buf.get_u8();
    let total = buf.get_u16_le() as usize;
    let payload_len = total.saturating_sub(OPERATION_HEADER_SIZE);
    if buf.remaining() < payload_len {
        return Err(CodecError::TruncatedStream);
    }
    let opcode = Opcode::from_u8(op).ok_or(CodecError::UnknownOpcode(op))?;
    let payload = buf.copy_to_bytes(payload_len);
    Ok(Operation { opcode, payload })
}
