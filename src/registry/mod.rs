//! Live game registry
//!
//! Every connection that names the same game id shares one aggregator.
//!
//! ```text
//!                        Arc<AggregatorRegistry>
//!                   ┌──────────────────────────────┐
//!                   │ HashMap<game id,             │
//!                   │   Weak<StreamAggregator>>    │
//!                   └──────────────┬───────────────┘
//!                                  │
//!      ┌───────────────────────────┼──────────────────────────┐
//!      │                           │                          │
//!      ▼                           ▼                          ▼
//! [StepAssembler]  push_step  [StreamAggregator]  stream_to  [LiveViewer]
//! [StepAssembler] ──────────► header + steps    ─────────►  [ArchiveWriter]
//! ```
//!
//! Step wire bytes are `bytes::Bytes`, so every viewer and the archive
//! writer share one allocation per step.

pub mod aggregator;
pub mod config;
pub mod store;

pub use aggregator::{AggregatorStats, IngestionGuard, StepOutcome, StreamAggregator};
pub use config::AggregatorConfig;
pub use store::AggregatorRegistry;
