//! Live viewer connection

use std::io;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::{DeliveryActor, DeliveryKind};

/// Writes a game to a viewer's socket
pub struct LiveViewer<W> {
    id: u64,
    writer: W,
    sent_tick: i64,
    bytes_sent: u64,
}

impl<W: AsyncWrite + Unpin + Send> LiveViewer<W> {
    pub fn new(id: u64, writer: W) -> Self {
        Self {
            id,
            writer,
            sent_tick: -1,
            bytes_sent: 0,
        }
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: AsyncWrite + Unpin + Send> DeliveryActor for LiveViewer<W> {
    fn id(&self) -> u64 {
        self.id
    }

    fn kind(&self) -> DeliveryKind {
        DeliveryKind::Live
    }

    fn sent_tick(&self) -> i64 {
        self.sent_tick
    }

    async fn send(&mut self, data: Bytes) -> io::Result<()> {
        self.writer.write_all(&data).await?;
        self.writer.flush().await?;
        self.bytes_sent += data.len() as u64;
        self.sent_tick += 1;
        Ok(())
    }

    async fn finish(&mut self) -> io::Result<()> {
        tracing::debug!(
            session_id = self.id,
            ticks = self.sent_tick,
            bytes = self.bytes_sent,
            "Closing viewer stream"
        );
        self.writer.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_writes_in_order() {
        let writer = tokio_test::io::Builder::new()
            .write(b"header")
            .write(b"step1")
            .build();
        let mut viewer = LiveViewer::new(3, writer);
        assert_eq!(viewer.sent_tick(), -1);

        viewer.send(Bytes::from_static(b"header")).await.unwrap();
        assert_eq!(viewer.sent_tick(), 0);
        viewer.send(Bytes::from_static(b"step1")).await.unwrap();
        assert_eq!(viewer.sent_tick(), 1);
        assert_eq!(viewer.bytes_sent(), 11);
        assert_eq!(viewer.kind(), DeliveryKind::Live);
    }

    #[tokio::test]
    async fn test_write_error_propagates() {
        let writer = tokio_test::io::Builder::new()
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            .build();
        let mut viewer = LiveViewer::new(4, writer);
        let err = viewer.send(Bytes::from_static(b"header")).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(viewer.sent_tick(), -1);
    }
}
