//! Persistence pipeline
//!
//! Turns a finished capture into a permanent archive. Every stage leaves
//! enough on disk for a later run to pick up where a crash interrupted it,
//! so `persist` is safe to call again for the same game:
//!
//! 1. final archive exists: done
//! 2. staging capture or sidecar exists: move what is left to `pending/`
//! 3. no pending blob: enrich metadata, encode the blob, drop the inputs
//! 4. record the replay in the metadata store
//! 5. move the blob to its sharded final path
//!
//! Stages 3-5 are not one transaction. A crash between 4 and 5 repeats the
//! insert on retry, which an upserting store absorbs.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::archive::{encode_archive, read_archive_info, ArchiveEncoding};
use super::layout::VaultLayout;
use super::metadata::{GameInfo, ReplayMetadataStore};
use crate::error::StorageError;

/// Result of a `persist` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    /// A previous run already produced the final archive
    AlreadyArchived(PathBuf),
    /// This run produced the final archive
    Archived(PathBuf),
}

/// Staged capture-to-archive conversion
pub struct PersistencePipeline<S> {
    layout: VaultLayout,
    store: Arc<S>,
    encoding: ArchiveEncoding,
}

impl<S: ReplayMetadataStore> PersistencePipeline<S> {
    /// Create a pipeline writing the default encoding
    pub fn new(layout: VaultLayout, store: Arc<S>) -> Self {
        Self {
            layout,
            store,
            encoding: ArchiveEncoding::default(),
        }
    }

    /// Set the archive body encoding
    pub fn encoding(mut self, encoding: ArchiveEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn layout(&self) -> &VaultLayout {
        &self.layout
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Convert the capture of `game_id` into its final archive
    ///
    /// `info` is the in-memory metadata when the caller has it; otherwise it
    /// is recovered from the sidecar or the pending blob.
    pub async fn persist(
        &self,
        game_id: u64,
        info: Option<GameInfo>,
    ) -> Result<PersistOutcome, StorageError> {
        tracing::info!(game_id = game_id, "Persisting replay");

        let final_path = self.layout.final_archive(game_id);
        if tokio::fs::try_exists(&final_path).await? {
            tracing::debug!(path = %final_path.display(), "Archive already exists");
            self.remove_partials(game_id).await?;
            return Ok(PersistOutcome::AlreadyArchived(final_path));
        }

        let mut info = info;

        // streaming/ -> pending/, resuming a move a crash cut in half
        let staged_capture = self.layout.streaming_capture(game_id);
        let staged_sidecar = self.layout.streaming_sidecar(game_id);
        let capture_staged = tokio::fs::try_exists(&staged_capture).await?;
        let sidecar_staged = tokio::fs::try_exists(&staged_sidecar).await?;
        if capture_staged || sidecar_staged {
            match &info {
                Some(current) => write_sidecar(&staged_sidecar, current).await?,
                None if sidecar_staged => info = Some(read_sidecar(&staged_sidecar).await?),
                None => {}
            }

            tokio::fs::create_dir_all(&self.layout.pending_dir).await?;
            if capture_staged {
                tokio::fs::rename(&staged_capture, self.layout.pending_capture(game_id)).await?;
            }
            if tokio::fs::try_exists(&staged_sidecar).await? {
                tokio::fs::rename(&staged_sidecar, self.layout.pending_sidecar(game_id)).await?;
            }
            tracing::debug!(game_id = game_id, "Moved capture to pending");
        }

        let pending_archive = self.layout.pending_archive(game_id);
        if !tokio::fs::try_exists(&pending_archive).await? {
            let current = self.build_archive(game_id, info.take()).await?;
            info = Some(current);
        } else {
            // Inputs left behind by a crash right after encoding
            remove_if_exists(&self.layout.pending_capture(game_id)).await?;
            remove_if_exists(&self.layout.pending_sidecar(game_id)).await?;
        }

        let info = match info {
            Some(info) => info,
            None => read_archive_info(&tokio::fs::read(&pending_archive).await?)?,
        };

        self.store.insert_replay(&info).await?;

        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&pending_archive, &final_path).await?;
        self.remove_partials(game_id).await?;

        tracing::info!(
            game_id = game_id,
            ticks = info.ticks,
            desynced = info.desynced,
            path = %final_path.display(),
            "Replay archived"
        );

        Ok(PersistOutcome::Archived(final_path))
    }

    /// Games with capture files left in `streaming/` or `pending/`
    ///
    /// Callers must not pass games that are still being recorded to
    /// [`persist_all`](Self::persist_all).
    pub async fn leftover_games(&self) -> io::Result<Vec<u64>> {
        let mut games = BTreeSet::new();
        for dir in [&self.layout.streaming_dir, &self.layout.pending_dir] {
            let mut entries = match tokio::fs::read_dir(dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name();
                let game_id = name
                    .to_str()
                    .and_then(|name| name.split('.').next())
                    .and_then(|id| id.parse::<u64>().ok());
                if let Some(game_id) = game_id {
                    games.insert(game_id);
                }
            }
        }
        Ok(games.into_iter().collect())
    }

    /// Persist each game, logging failures, and return how many succeeded
    pub async fn persist_all(&self, game_ids: impl IntoIterator<Item = u64>) -> usize {
        let mut archived = 0;
        for game_id in game_ids {
            match self.persist(game_id, None).await {
                Ok(_) => archived += 1,
                Err(e) => {
                    tracing::error!(game_id = game_id, error = %e, "Replay recovery failed");
                }
            }
        }
        archived
    }

    /// Finish every conversion interrupted by an earlier run
    pub async fn recover(&self) -> io::Result<usize> {
        let games = self.leftover_games().await?;
        if !games.is_empty() {
            tracing::info!(games = games.len(), "Recovering interrupted replays");
        }
        Ok(self.persist_all(games).await)
    }

    async fn remove_partials(&self, game_id: u64) -> io::Result<()> {
        remove_if_exists(&partial_path(&self.layout.streaming_sidecar(game_id))).await?;
        remove_if_exists(&partial_path(&self.layout.pending_sidecar(game_id))).await?;
        remove_if_exists(&partial_path(&self.layout.pending_archive(game_id))).await
    }

    /// Stage 3: enrich metadata and encode the pending blob
    async fn build_archive(
        &self,
        game_id: u64,
        info: Option<GameInfo>,
    ) -> Result<GameInfo, StorageError> {
        let sidecar = self.layout.pending_sidecar(game_id);
        let capture_path = self.layout.pending_capture(game_id);

        let mut info = match info {
            Some(info) => info,
            None => match read_sidecar(&sidecar).await {
                Err(StorageError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(StorageError::MissingMetadata(game_id));
                }
                other => other?,
            },
        };

        if info.needs_enrichment() {
            match self.store.get_game_info(game_id).await {
                Ok(Some(ext)) => {
                    info.merge_enrichment(ext);
                    write_sidecar(&sidecar, &info).await?;
                }
                Ok(None) => {
                    tracing::debug!(game_id = game_id, "No game info in metadata store");
                }
                Err(e) => {
                    tracing::warn!(game_id = game_id, error = %e, "Game info lookup failed");
                }
            }
        }

        let capture = tokio::fs::read(&capture_path).await?;
        let encoding = self.encoding;
        let meta = info.clone();
        let blob = tokio::task::spawn_blocking(move || encode_archive(&meta, &capture, encoding))
            .await
            .map_err(|e| StorageError::Io(io::Error::other(e)))??;

        // Write-then-rename so a retry never trusts a half-written blob
        let pending_archive = self.layout.pending_archive(game_id);
        let partial = partial_path(&pending_archive);
        tokio::fs::write(&partial, &blob).await?;
        tokio::fs::rename(&partial, &pending_archive).await?;

        remove_if_exists(&sidecar).await?;
        remove_if_exists(&capture_path).await?;

        tracing::debug!(
            game_id = game_id,
            bytes = blob.len(),
            "Archive blob created"
        );

        Ok(info)
    }
}

/// Read a JSON metadata sidecar
pub async fn read_sidecar(path: &Path) -> Result<GameInfo, StorageError> {
    let data = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&data)?)
}

/// Write a JSON metadata sidecar
///
/// The previous sidecar stays intact until the new one is complete.
pub async fn write_sidecar(path: &Path, info: &GameInfo) -> Result<(), StorageError> {
    let data = serde_json::to_vec(info)?;
    let partial = partial_path(path);
    tokio::fs::write(&partial, data).await?;
    tokio::fs::rename(&partial, path).await?;
    Ok(())
}

/// `<path>.partial`, where a file is written before being renamed into place
fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

async fn remove_if_exists(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::archive::decode_archive;
    use crate::storage::metadata::MemoryMetadataStore;

    struct Fixture {
        _dir: tempfile::TempDir,
        layout: VaultLayout,
        store: Arc<MemoryMetadataStore>,
    }

    impl Fixture {
        async fn new(store: MemoryMetadataStore) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let layout = VaultLayout::under(dir.path());
            layout.ensure().await.unwrap();
            Self {
                _dir: dir,
                layout,
                store: Arc::new(store),
            }
        }

        fn pipeline(&self) -> PersistencePipeline<MemoryMetadataStore> {
            PersistencePipeline::new(self.layout.clone(), Arc::clone(&self.store))
        }

        async fn stage(&self, info: &GameInfo, capture: &[u8]) {
            tokio::fs::write(self.layout.streaming_capture(info.game_id), capture)
                .await
                .unwrap();
            write_sidecar(&self.layout.streaming_sidecar(info.game_id), info)
                .await
                .unwrap();
        }
    }

    fn finished(game_id: u64) -> GameInfo {
        let mut info = GameInfo::new(game_id);
        info.ticks = 321;
        info.complete = true;
        info.desynced = true;
        info
    }

    fn lobby(game_id: u64) -> GameInfo {
        let mut info = GameInfo::new(game_id);
        info.featured_mod = Some("faf".into());
        info.title = Some("Setons 4v4".into());
        info
    }

    #[tokio::test]
    async fn test_persist_from_staging() {
        let fx = Fixture::new(MemoryMetadataStore::new().with_game(lobby(123456789))).await;
        let info = finished(123456789);
        fx.stage(&info, b"capture bytes").await;

        let outcome = fx.pipeline().persist(123456789, None).await.unwrap();
        let final_path = fx.layout.final_archive(123456789);
        assert_eq!(outcome, PersistOutcome::Archived(final_path.clone()));
        assert!(final_path.ends_with("1/23/45/67/123456789.fafreplay"));

        let blob = tokio::fs::read(&final_path).await.unwrap();
        let (archived, capture) = decode_archive(&blob, ArchiveEncoding::Legacy).unwrap();
        assert_eq!(capture, b"capture bytes");
        assert_eq!(archived.game_id, 123456789);
        assert_eq!(archived.ticks, 321);
        assert!(archived.desynced);
        assert_eq!(archived.featured_mod.as_deref(), Some("faf"));

        // Staging and pending are cleaned up
        for path in [
            fx.layout.streaming_capture(123456789),
            fx.layout.streaming_sidecar(123456789),
            fx.layout.pending_capture(123456789),
            fx.layout.pending_sidecar(123456789),
            fx.layout.pending_archive(123456789),
        ] {
            assert!(!path.exists(), "{} left behind", path.display());
        }

        assert_eq!(fx.store.replay(123456789).map(|r| r.ticks), Some(321));
    }

    #[tokio::test]
    async fn test_persist_twice_is_idempotent() {
        let fx = Fixture::new(MemoryMetadataStore::new()).await;
        let info = finished(4242);
        fx.stage(&info, b"abc").await;

        let pipeline = fx.pipeline();
        let first = pipeline.persist(4242, Some(info.clone())).await.unwrap();
        let second = pipeline.persist(4242, Some(info)).await.unwrap();

        let final_path = fx.layout.final_archive(4242);
        assert_eq!(first, PersistOutcome::Archived(final_path.clone()));
        assert_eq!(second, PersistOutcome::AlreadyArchived(final_path));
        assert_eq!(fx.store.replay_count(), 1);
        // The second call stops at the existing archive
        assert_eq!(fx.store.insert_calls(), 1);
    }

    #[tokio::test]
    async fn test_resume_after_crash_before_final_move() {
        let fx = Fixture::new(MemoryMetadataStore::new()).await;
        let info = finished(777);

        // Blob already encoded, inputs not yet removed, sidecar gone from memory
        let blob = encode_archive(&info, b"frames", ArchiveEncoding::Legacy).unwrap();
        tokio::fs::write(fx.layout.pending_archive(777), &blob).await.unwrap();
        tokio::fs::write(fx.layout.pending_capture(777), b"frames").await.unwrap();

        let outcome = fx.pipeline().persist(777, None).await.unwrap();
        assert!(matches!(outcome, PersistOutcome::Archived(_)));
        assert!(!fx.layout.pending_capture(777).exists());
        assert_eq!(fx.store.replay(777).map(|r| r.ticks), Some(321));
    }

    #[tokio::test]
    async fn test_resume_from_pending_inputs() {
        let fx = Fixture::new(MemoryMetadataStore::new()).await;
        let info = finished(31337);
        tokio::fs::write(fx.layout.pending_capture(31337), b"xyz").await.unwrap();
        write_sidecar(&fx.layout.pending_sidecar(31337), &info).await.unwrap();

        fx.pipeline().persist(31337, None).await.unwrap();

        let blob = tokio::fs::read(fx.layout.final_archive(31337)).await.unwrap();
        let (archived, capture) = decode_archive(&blob, ArchiveEncoding::Legacy).unwrap();
        assert_eq!(capture, b"xyz");
        assert_eq!(archived, info);
    }

    #[tokio::test]
    async fn test_resume_after_crash_between_moves() {
        let fx = Fixture::new(MemoryMetadataStore::new()).await;
        let info = finished(9001);

        // Capture already moved, sidecar still in streaming/
        tokio::fs::write(fx.layout.pending_capture(9001), b"moved").await.unwrap();
        write_sidecar(&fx.layout.streaming_sidecar(9001), &info).await.unwrap();

        fx.pipeline().persist(9001, None).await.unwrap();

        let blob = tokio::fs::read(fx.layout.final_archive(9001)).await.unwrap();
        let (archived, capture) = decode_archive(&blob, ArchiveEncoding::Legacy).unwrap();
        assert_eq!(capture, b"moved");
        assert_eq!(archived, info);
        assert!(!fx.layout.streaming_sidecar(9001).exists());
        assert!(!fx.layout.pending_sidecar(9001).exists());
    }

    #[tokio::test]
    async fn test_torn_sidecar_write_keeps_previous() {
        let fx = Fixture::new(MemoryMetadataStore::new()).await;
        let info = finished(9002);
        fx.stage(&info, b"frames").await;

        // A checkpoint that died halfway through writing
        let sidecar = fx.layout.streaming_sidecar(9002);
        let torn = partial_path(&sidecar);
        tokio::fs::write(&torn, b"{\"uid\":9002,\"sta").await.unwrap();

        fx.pipeline().persist(9002, None).await.unwrap();

        assert_eq!(fx.store.replay(9002).map(|r| r.ticks), Some(321));
        assert!(!torn.exists());
    }

    #[tokio::test]
    async fn test_write_sidecar_replaces_in_one_step() {
        let fx = Fixture::new(MemoryMetadataStore::new()).await;
        let path = fx.layout.streaming_sidecar(12);

        write_sidecar(&path, &GameInfo::new(12)).await.unwrap();
        write_sidecar(&path, &finished(12)).await.unwrap();

        assert_eq!(read_sidecar(&path).await.unwrap().ticks, 321);
        assert!(!partial_path(&path).exists());
    }

    #[tokio::test]
    async fn test_recover_leftovers() {
        let fx = Fixture::new(MemoryMetadataStore::new()).await;
        fx.stage(&finished(10), b"streaming").await;
        tokio::fs::write(fx.layout.pending_capture(20), b"pending").await.unwrap();
        write_sidecar(&fx.layout.pending_sidecar(20), &finished(20)).await.unwrap();
        // No metadata anywhere, so this one cannot be archived
        tokio::fs::write(fx.layout.streaming_capture(30), b"orphan").await.unwrap();

        let pipeline = fx.pipeline();
        assert_eq!(pipeline.leftover_games().await.unwrap(), vec![10, 20, 30]);
        assert_eq!(pipeline.recover().await.unwrap(), 2);

        assert!(fx.layout.final_archive(10).exists());
        assert!(fx.layout.final_archive(20).exists());
        assert!(!fx.layout.final_archive(30).exists());
        assert!(fx.layout.pending_capture(30).exists());
        assert_eq!(pipeline.leftover_games().await.unwrap(), vec![30]);
    }

    #[tokio::test]
    async fn test_in_memory_metadata_overwrites_sidecar() {
        let fx = Fixture::new(MemoryMetadataStore::new()).await;
        let mut stale = finished(55);
        stale.ticks = 10;
        fx.stage(&stale, b"data").await;

        let fresh = finished(55);
        fx.pipeline().persist(55, Some(fresh)).await.unwrap();

        assert_eq!(fx.store.replay(55).map(|r| r.ticks), Some(321));
    }

    #[tokio::test]
    async fn test_nothing_to_persist() {
        let fx = Fixture::new(MemoryMetadataStore::new()).await;
        let result = fx.pipeline().persist(1, None).await;
        assert!(matches!(result, Err(StorageError::MissingMetadata(1))));
        assert_eq!(fx.store.insert_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_capture_is_an_error() {
        let fx = Fixture::new(MemoryMetadataStore::new()).await;
        let result = fx.pipeline().persist(2, Some(finished(2))).await;
        assert!(matches!(result, Err(StorageError::Io(_))));
        assert!(!fx.layout.final_archive(2).exists());
    }

    #[tokio::test]
    async fn test_raw_encoding_pipeline() {
        let fx = Fixture::new(MemoryMetadataStore::new()).await;
        let info = finished(8);
        fx.stage(&info, b"raw").await;

        fx.pipeline()
            .encoding(ArchiveEncoding::Raw)
            .persist(8, None)
            .await
            .unwrap();

        let blob = tokio::fs::read(fx.layout.final_archive(8)).await.unwrap();
        let (_, capture) = decode_archive(&blob, ArchiveEncoding::Raw).unwrap();
        assert_eq!(capture, b"raw");
    }
}
