//! Submitter ingestion
//!
//! Decodes one submitter's byte stream into a header and a sequence of
//! steps and forwards them to the game's aggregator.

use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{CodecError, Error, Result};
use crate::protocol::{frame_len, read_operation, split_header, Operation, ReplayHeader, ReplayStep};
use crate::registry::StreamAggregator;

/// Default read chunk size
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Default cap on the buffered, still incomplete header
pub const DEFAULT_MAX_HEADER_SIZE: usize = 4 * 1024 * 1024;

/// Ingestion actor for one submitter connection
pub struct StepAssembler<R> {
    id: u64,
    reader: R,
    buf: BytesMut,
    pending: Vec<Operation>,
    tick: u32,
    read_buffer_size: usize,
    max_header_size: usize,
    bytes_received: u64,
}

impl<R: AsyncRead + Unpin + Send> StepAssembler<R> {
    pub fn new(id: u64, reader: R) -> Self {
        Self {
            id,
            reader,
            buf: BytesMut::new(),
            pending: Vec::new(),
            tick: 0,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            bytes_received: 0,
        }
    }

    /// Start from bytes already read past the request line
    pub fn with_buffer(mut self, buf: BytesMut) -> Self {
        self.bytes_received += buf.len() as u64;
        self.buf = buf;
        self
    }

    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    pub fn max_header_size(mut self, size: usize) -> Self {
        self.max_header_size = size;
        self
    }

    /// Ingest the stream until end of game, disconnect, or error
    ///
    /// The assembler is attached to the aggregator for the whole call; when
    /// it was the last submitter of an unfinished game, detaching ends it.
    pub async fn run(mut self, aggregator: &Arc<StreamAggregator>) -> Result<()> {
        let _guard = aggregator.attach_ingestion(self.id);
        let result = self.ingest(aggregator).await;

        tracing::debug!(
            game_id = aggregator.game_id(),
            session_id = self.id,
            ticks = self.tick,
            bytes = self.bytes_received,
            "Ingestion stopped"
        );

        result
    }

    async fn ingest(&mut self, aggregator: &StreamAggregator) -> Result<()> {
        let (header, raw) = self.read_header().await?;
        tracing::debug!(
            game_id = aggregator.game_id(),
            session_id = self.id,
            armies = header.armies.len(),
            bytes = raw.len(),
            "Header decoded"
        );
        aggregator.push_header(header, raw)?;

        loop {
            let op = self.read_operation().await?;
            let opcode = op.opcode;
            self.pending.push(op);

            if opcode.flushes_step() || opcode.is_terminal() {
                self.tick += 1;
                let step = ReplayStep::new(self.tick, std::mem::take(&mut self.pending));
                aggregator.push_step(self.id, step)?;
            }

            if opcode.is_terminal() {
                tracing::info!(
                    game_id = aggregator.game_id(),
                    session_id = self.id,
                    ticks = self.tick,
                    "End of game received"
                );
                return Ok(());
            }
        }
    }

    async fn read_header(&mut self) -> Result<(ReplayHeader, Bytes)> {
        loop {
            match split_header(&self.buf) {
                Ok((header, len)) => {
                    let raw = self.buf.split_to(len).freeze();
                    return Ok((header, raw));
                }
                Err(CodecError::TruncatedStream) if self.buf.len() >= self.max_header_size => {
                    return Err(CodecError::HeaderTooLarge(self.max_header_size).into());
                }
                Err(CodecError::TruncatedStream) => self.fill().await?,
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn read_operation(&mut self) -> Result<Operation> {
        loop {
            if let Some(len) = frame_len(&self.buf) {
                if self.buf.len() >= len {
                    let mut frame = self.buf.split_to(len).freeze();
                    return Ok(read_operation(&mut frame)?);
                }
            }
            self.fill().await?;
        }
    }

    async fn fill(&mut self) -> Result<()> {
        self.buf.reserve(self.read_buffer_size);
        let n = self.reader.read_buf(&mut self.buf).await?;
        if n == 0 {
            if self.buf.is_empty() {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "submitter closed the stream",
                )));
            }
            return Err(CodecError::TruncatedStream.into());
        }
        self.bytes_received += n as u64;
        Ok(())
    }
}
