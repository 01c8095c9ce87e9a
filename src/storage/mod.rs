//! Replay archival
//!
//! A finished capture moves through three places on disk:
//!
//! ```text
//!   ArchiveWriter                PersistencePipeline
//!   ┌──────────────┐  finish()  ┌───────────────┐  encode  ┌──────────────────┐
//!   │ streaming/   │ ─────────► │ pending/      │ ───────► │ root/d4/d3/d2/d1 │
//!   │  id.scfareplay│           │  id.scfareplay│          │  id.fafreplay    │
//!   │  id.json     │            │  id.json      │          └──────────────────┘
//!   └──────────────┘            │  id.fafreplay │
//!                               └───────────────┘
//! ```

pub mod archive;
pub mod layout;
pub mod metadata;
pub mod pipeline;

pub use archive::{decode_archive, encode_archive, read_archive_info, ArchiveEncoding};
pub use layout::{shard_components, VaultLayout};
pub use metadata::{GameInfo, MemoryMetadataStore, ReplayMetadataStore};
pub use pipeline::{PersistOutcome, PersistencePipeline};
