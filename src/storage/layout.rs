//! On-disk vault layout
//!
//! ```text
//! streaming/<id>.scfareplay   raw capture while the game runs
//! streaming/<id>.json         metadata sidecar, rewritten periodically
//! pending/<id>.scfareplay     capture handed to the pipeline
//! pending/<id>.json
//! pending/<id>.fafreplay      encoded archive awaiting its final move
//! <root>/<d4>/<d3>/<d2>/<d1>/<id>.fafreplay
//! ```
//! `dN = (id / 100^N) % 100`; the lowest two decimal digits of the id are
//! not a directory level.

use std::path::{Path, PathBuf};

use crate::protocol::constants::{EXT_ARCHIVE, EXT_RAW_CAPTURE, EXT_SIDECAR};

/// Fan-out of each shard level
pub const SHARD_FANOUT: u64 = 100;

/// Number of shard directory levels
pub const SHARD_DEPTH: u32 = 4;

/// Directory layout of the replay vault
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultLayout {
    /// Root of the sharded final archive tree
    pub root: PathBuf,
    /// Live captures
    pub streaming_dir: PathBuf,
    /// Captures being converted
    pub pending_dir: PathBuf,
}

impl Default for VaultLayout {
    fn default() -> Self {
        Self::under("vault")
    }
}

impl VaultLayout {
    /// Standard layout below one base directory
    pub fn under(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self {
            root: base.join("replay_vault"),
            streaming_dir: base.join("streaming"),
            pending_dir: base.join("pending"),
        }
    }

    /// Create the staging directories
    pub async fn ensure(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::create_dir_all(&self.streaming_dir).await?;
        tokio::fs::create_dir_all(&self.pending_dir).await?;
        Ok(())
    }

    pub fn streaming_capture(&self, game_id: u64) -> PathBuf {
        file_in(&self.streaming_dir, game_id, EXT_RAW_CAPTURE)
    }

    pub fn streaming_sidecar(&self, game_id: u64) -> PathBuf {
        file_in(&self.streaming_dir, game_id, EXT_SIDECAR)
    }

    pub fn pending_capture(&self, game_id: u64) -> PathBuf {
        file_in(&self.pending_dir, game_id, EXT_RAW_CAPTURE)
    }

    pub fn pending_sidecar(&self, game_id: u64) -> PathBuf {
        file_in(&self.pending_dir, game_id, EXT_SIDECAR)
    }

    pub fn pending_archive(&self, game_id: u64) -> PathBuf {
        file_in(&self.pending_dir, game_id, EXT_ARCHIVE)
    }

    /// Sharded directory holding the final archive
    pub fn shard_dir(&self, game_id: u64) -> PathBuf {
        shard_components(game_id)
            .iter()
            .fold(self.root.clone(), |dir, c| dir.join(c.to_string()))
    }

    pub fn final_archive(&self, game_id: u64) -> PathBuf {
        file_in(&self.shard_dir(game_id), game_id, EXT_ARCHIVE)
    }
}

/// Shard directory components, outermost first
pub fn shard_components(game_id: u64) -> [u64; SHARD_DEPTH as usize] {
    let mut components = [0; SHARD_DEPTH as usize];
    for (i, level) in (1..=SHARD_DEPTH).rev().enumerate() {
        components[i] = (game_id / SHARD_FANOUT.pow(level)) % SHARD_FANOUT;
    }
    components
}

fn file_in(dir: &Path, game_id: u64, ext: &str) -> PathBuf {
    dir.join(format!("{}.{}", game_id, ext))
}
