//! Capture writer
//!
//! Receives every step with no delay and appends it to the staging capture.
//! The file is opened on the first write, so a game that never produced a
//! header leaves nothing on disk and is not persisted. Persistence runs as
//! a detached task once the game completes.

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

use super::{DeliveryActor, DeliveryKind};
use crate::registry::StreamAggregator;
use crate::storage::pipeline::write_sidecar;
use crate::storage::{PersistencePipeline, ReplayMetadataStore};

/// Steps between capture flushes when not configured
pub const DEFAULT_FLUSH_INTERVAL: u32 = 100;

/// Writes a game's capture and persists it when the game ends
pub struct ArchiveWriter<S> {
    id: u64,
    aggregator: Arc<StreamAggregator>,
    pipeline: Arc<PersistencePipeline<S>>,
    flush_interval: u32,
    file: Option<BufWriter<File>>,
    sent_tick: i64,
    unflushed: u32,
}

impl<S: ReplayMetadataStore> ArchiveWriter<S> {
    pub fn new(
        id: u64,
        aggregator: Arc<StreamAggregator>,
        pipeline: Arc<PersistencePipeline<S>>,
    ) -> Self {
        Self {
            id,
            aggregator,
            pipeline,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            file: None,
            sent_tick: -1,
            unflushed: 0,
        }
    }

    /// Flush the capture and refresh the sidecar every `steps` steps
    pub fn flush_interval(mut self, steps: u32) -> Self {
        self.flush_interval = steps.max(1);
        self
    }

    /// Follow the aggregator until the game ends
    pub async fn run(mut self) -> crate::error::Result<()> {
        let aggregator = Arc::clone(&self.aggregator);
        aggregator.stream_to(&mut self).await
    }

    fn game_id(&self) -> u64 {
        self.aggregator.game_id()
    }

    async fn open(&mut self) -> io::Result<&mut BufWriter<File>> {
        if self.file.is_none() {
            let path = self.pipeline.layout().streaming_capture(self.game_id());
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let file = File::create(&path).await?;
            tracing::debug!(
                game_id = self.game_id(),
                path = %path.display(),
                "Capture file opened"
            );
            self.file = Some(BufWriter::new(file));
        }

        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("capture file not open"))
    }

    async fn checkpoint(&mut self) -> io::Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush().await?;
        }
        let path = self.pipeline.layout().streaming_sidecar(self.game_id());
        write_sidecar(&path, &self.aggregator.game_info())
            .await
            .map_err(io::Error::other)?;
        self.unflushed = 0;
        Ok(())
    }
}

impl<S: ReplayMetadataStore> DeliveryActor for ArchiveWriter<S> {
    fn id(&self) -> u64 {
        self.id
    }

    fn kind(&self) -> DeliveryKind {
        DeliveryKind::Archive
    }

    fn sent_tick(&self) -> i64 {
        self.sent_tick
    }

    async fn send(&mut self, data: Bytes) -> io::Result<()> {
        self.open().await?.write_all(&data).await?;
        self.sent_tick += 1;
        self.unflushed += 1;

        if self.unflushed >= self.flush_interval {
            self.checkpoint().await?;
        }
        Ok(())
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.checkpoint().await?;
        if let Some(mut file) = self.file.take() {
            file.shutdown().await?;
        }

        // Archive conversion runs detached from the game's lifetime
        let game_id = self.game_id();
        let info = self.aggregator.game_info();
        let pipeline = Arc::clone(&self.pipeline);
        tokio::spawn(async move {
            match pipeline.persist(game_id, Some(info)).await {
                Ok(outcome) => {
                    tracing::debug!(game_id = game_id, outcome = ?outcome, "Persistence finished");
                }
                Err(e) => {
                    // Inputs stay on disk for the next persist run
                    tracing::error!(game_id = game_id, error = %e, "Replay persistence failed");
                }
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Opcode, Operation, ReplayStep};
    use crate::registry::AggregatorConfig;
    use crate::storage::{decode_archive, ArchiveEncoding, MemoryMetadataStore, VaultLayout};
    use std::time::Duration;

    struct Fixture {
        _dir: tempfile::TempDir,
        pipeline: Arc<PersistencePipeline<MemoryMetadataStore>>,
        aggregator: Arc<StreamAggregator>,
    }

    fn fixture(game_id: u64) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let layout = VaultLayout::under(dir.path());
        let pipeline = Arc::new(PersistencePipeline::new(
            layout,
            Arc::new(MemoryMetadataStore::new()),
        ));
        let config = AggregatorConfig::default().poll_interval(Duration::from_millis(5));
        Fixture {
            _dir: dir,
            pipeline,
            aggregator: Arc::new(StreamAggregator::new(game_id, config)),
        }
    }

    fn step(tick: u32, opcode: Opcode) -> ReplayStep {
        ReplayStep::new(tick, vec![Operation::new(opcode, Bytes::from_static(&[1, 0, 0, 0]))])
    }

    #[tokio::test]
    async fn test_capture_archived_on_end() {
        let f = fixture(42);
        let raw = crate::protocol::header::fixtures::header_bytes("Setons");
        let (header, _) = crate::protocol::split_header(&raw).unwrap();

        let guard = f.aggregator.attach_ingestion(1);
        f.aggregator.push_header(header, raw.clone()).unwrap();

        let writer = ArchiveWriter::new(9, Arc::clone(&f.aggregator), Arc::clone(&f.pipeline))
            .flush_interval(2);
        let task = tokio::spawn(writer.run());

        let mut expected = raw.to_vec();
        for tick in 1..=4 {
            let s = step(tick, Opcode::Advance);
            expected.extend_from_slice(&s.to_bytes());
            f.aggregator.push_step(1, s).unwrap();
        }
        let last = step(5, Opcode::EndGame);
        expected.extend_from_slice(&last.to_bytes());
        f.aggregator.push_step(1, last).unwrap();
        drop(guard);

        task.await.unwrap().unwrap();

        let layout = f.pipeline.layout();
        let final_path = layout.final_archive(42);
        for _ in 0..200 {
            if final_path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!layout.streaming_capture(42).exists());
        assert!(!layout.streaming_sidecar(42).exists());

        let blob = tokio::fs::read(&final_path).await.unwrap();
        let (info, capture) = decode_archive(&blob, ArchiveEncoding::Legacy).unwrap();
        assert_eq!(capture, expected);
        assert_eq!(info.ticks, 5);
        assert!(info.complete);
        assert_eq!(f.pipeline.store().replay_count(), 1);
    }

    #[tokio::test]
    async fn test_nothing_written_without_header() {
        let f = fixture(43);
        let guard = f.aggregator.attach_ingestion(1);
        let writer = ArchiveWriter::new(9, Arc::clone(&f.aggregator), Arc::clone(&f.pipeline));
        let task = tokio::spawn(writer.run());
        drop(guard);

        task.await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let layout = f.pipeline.layout();
        assert!(!layout.streaming_capture(43).exists());
        assert!(!layout.final_archive(43).exists());
        assert_eq!(f.pipeline.store().replay_count(), 0);
    }
}
