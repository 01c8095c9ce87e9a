//! Replay steps
//!
//! A step is the group of operations the simulation executed in one tick.
//! Its wire bytes are encoded once at construction and shared by every
//! viewer and the archive writer.

use std::fmt;

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};

use super::operation::Operation;

/// One simulation tick worth of operations
#[derive(Debug, Clone)]
pub struct ReplayStep {
    /// Tick number, starting at 1
    pub tick: u32,
    /// When the step was assembled
    pub timestamp: DateTime<Utc>,
    /// Operations in wire order
    pub operations: Vec<Operation>,
    /// Whether the last operation ends the game
    pub is_terminal: bool,
    /// Concatenated wire form of `operations`
    data: Bytes,
}

impl ReplayStep {
    /// Close a buffer of operations into a step
    pub fn new(tick: u32, operations: Vec<Operation>) -> Self {
        let is_terminal = operations
            .last()
            .is_some_and(|op| op.opcode.is_terminal());

        let mut buf = BytesMut::with_capacity(operations.iter().map(Operation::encoded_len).sum());
        for op in &operations {
            op.encode(&mut buf);
        }

        Self {
            tick,
            timestamp: Utc::now(),
            operations,
            is_terminal,
            data: buf.freeze(),
        }
    }

    /// Wire bytes of this step (cheap to clone)
    pub fn to_bytes(&self) -> Bytes {
        self.data.clone()
    }

    /// Operation-by-operation comparison for divergence logs
    ///
    /// One row per index of the longer step, marked `==` or `!=`.
    pub fn diff(&self, other: &ReplayStep) -> Vec<String> {
        let rows = self.operations.len().max(other.operations.len());
        let show = |op: Option<&Operation>| op.map_or_else(|| "None".to_string(), |o| o.to_string());

        (0..rows)
            .map(|i| {
                let a = self.operations.get(i);
                let b = other.operations.get(i);
                let marker = if a == b { "==" } else { "!=" };
                format!("{:4x}: {:>30} {} {:>30}", i, show(a), marker, show(b))
            })
            .collect()
    }
}

impl PartialEq for ReplayStep {
    fn eq(&self, other: &Self) -> bool {
        self.tick == other.tick && self.operations == other.operations
    }
}

impl Eq for ReplayStep {}

impl fmt::Display for ReplayStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Step(#{}, {} ops)", self.tick, self.operations.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::operation::Opcode;

    fn op(opcode: Opcode, payload: &'static [u8]) -> Operation {
        Operation::new(opcode, Bytes::from_static(payload))
    }

    #[test]
    fn test_terminal_detection() {
        let step = ReplayStep::new(1, vec![op(Opcode::IssueCommand, b"x"), op(Opcode::Advance, b"")]);
        assert!(!step.is_terminal);

        let step = ReplayStep::new(2, vec![op(Opcode::Advance, b""), op(Opcode::EndGame, b"")]);
        assert!(step.is_terminal);

        // An end-of-game earlier in the step does not count
        let step = ReplayStep::new(3, vec![op(Opcode::EndGame, b""), op(Opcode::Advance, b"")]);
        assert!(!step.is_terminal);
    }

    #[test]
    fn test_bytes_concatenate_frames() {
        let step = ReplayStep::new(
            1,
            vec![op(Opcode::VerifyChecksum, &[0xAA]), op(Opcode::Advance, &[1, 0, 0, 0])],
        );
        assert_eq!(&step.to_bytes()[..], &[3, 4, 0, 0xAA, 0, 7, 0, 1, 0, 0, 0]);
    }

    #[test]
    fn test_equality_ignores_timestamp() {
        let a = ReplayStep::new(5, vec![op(Opcode::Advance, b"\x01")]);
        let mut b = ReplayStep::new(5, vec![op(Opcode::Advance, b"\x01")]);
        b.timestamp = a.timestamp - chrono::Duration::seconds(30);
        assert_eq!(a, b);

        let c = ReplayStep::new(6, vec![op(Opcode::Advance, b"\x01")]);
        assert_ne!(a, c);
    }

    #[test]
    fn test_diff_rows() {
        let a = ReplayStep::new(
            4,
            vec![op(Opcode::IssueCommand, &[1]), op(Opcode::Advance, b"")],
        );
        let b = ReplayStep::new(4, vec![op(Opcode::IssueCommand, &[2])]);

        let rows = a.diff(&b);
        assert_eq!(rows.len(), 2);
        assert!(rows[0].contains("!="));
        assert!(rows[1].contains("None"));

        let same = a.diff(&a);
        assert!(same.iter().all(|row| row.contains("==")));
    }
}
