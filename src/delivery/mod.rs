//! Delivery actors
//!
//! A delivery actor consumes an aggregator's timeline: the header once, then
//! every step in order. [`LiveViewer`] writes to a viewer's socket with a
//! live delay; [`ArchiveWriter`] writes the capture file and hands the game
//! to the persistence pipeline when it ends.

pub mod archive;
pub mod live;

use std::future::Future;
use std::io;

use bytes::Bytes;

pub use archive::ArchiveWriter;
pub use live::LiveViewer;

/// How an actor is paced against the head of the timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryKind {
    /// Trails an unfinished game by the live delay
    Live,
    /// Receives every step as soon as it is recorded
    Archive,
}

/// Consumer of a game's timeline
///
/// `sent_tick` starts at -1; sending the header makes it 0 and every step
/// adds one, so it always equals the last tick delivered.
pub trait DeliveryActor: Send {
    /// Connection or task id
    fn id(&self) -> u64;

    fn kind(&self) -> DeliveryKind;

    /// Last tick delivered, -1 before the header
    fn sent_tick(&self) -> i64;

    /// Deliver the header or one step
    fn send(&mut self, data: Bytes) -> impl Future<Output = io::Result<()>> + Send;

    /// Called once after the final step of a completed game
    fn finish(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}
