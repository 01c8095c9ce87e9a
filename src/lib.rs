//! Live replay relay and archiver
//!
//! Game clients submit the command stream of a running match over TCP.
//! Submissions for the same game are merged into one validated timeline,
//! relayed to viewers with a configurable delay, and archived once the game
//! ends.
//!
//! # Example
//!
//! ```no_run
//! use live_replay_server::{MemoryMetadataStore, ReplayServer, ReplayServerConfig};
//!
//! # async fn run() -> live_replay_server::Result<()> {
//! let server = ReplayServer::new(ReplayServerConfig::default(), MemoryMetadataStore::new());
//! server.run().await
//! # }
//! ```

pub mod delivery;
pub mod error;
pub mod lua;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod storage;

pub use error::{Error, Result};
pub use registry::{AggregatorConfig, AggregatorRegistry, StreamAggregator};
pub use server::{ReplayServer, ReplayServerConfig};
pub use storage::{GameInfo, MemoryMetadataStore, PersistencePipeline, ReplayMetadataStore};
