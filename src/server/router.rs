//! Per-connection dispatch
//!
//! Reads the request line and hands the connection to an ingestion actor
//! (POST) or a live viewer (GET). The first POST for a game id creates its
//! aggregator and starts the archive writer that follows it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite};

use super::config::ReplayServerConfig;
use super::request::{read_request_line, Method, ReplayRequest};
use crate::delivery::{ArchiveWriter, LiveViewer};
use crate::error::{Error, RequestError, Result};
use crate::registry::{AggregatorRegistry, StreamAggregator};
use crate::session::StepAssembler;
use crate::storage::{PersistencePipeline, ReplayMetadataStore};

/// Routes accepted connections to the right actor
pub struct ConnectionRouter<S> {
    config: ReplayServerConfig,
    registry: Arc<AggregatorRegistry>,
    pipeline: Arc<PersistencePipeline<S>>,
    next_id: AtomicU64,
}

impl<S: ReplayMetadataStore> ConnectionRouter<S> {
    pub fn new(
        config: ReplayServerConfig,
        registry: Arc<AggregatorRegistry>,
        pipeline: Arc<PersistencePipeline<S>>,
    ) -> Self {
        Self {
            config,
            registry,
            pipeline,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn registry(&self) -> &Arc<AggregatorRegistry> {
        &self.registry
    }

    pub fn pipeline(&self) -> &Arc<PersistencePipeline<S>> {
        &self.pipeline
    }

    /// Allocate a session id, unique across connections and archive writers
    pub fn next_session_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Serve one connection to completion
    pub async fn route<T>(&self, session_id: u64, mut socket: T) -> Result<()>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let (line, leftover) = tokio::time::timeout(
            self.config.request_timeout,
            read_request_line(&mut socket, self.config.max_request_line),
        )
        .await??;

        let request = ReplayRequest::parse(&line)?;
        tracing::info!(session_id = session_id, request = %request, "Request received");

        match request.method {
            Method::Post => self.ingest(session_id, &request, socket, leftover).await,
            Method::Get => self.watch(session_id, &request, socket).await,
        }
    }

    async fn ingest<T>(
        &self,
        session_id: u64,
        request: &ReplayRequest,
        socket: T,
        leftover: BytesMut,
    ) -> Result<()>
    where
        T: AsyncRead + Unpin + Send,
    {
        let aggregator = self.open_stream(request.game_id);
        tracing::info!(
            game_id = request.game_id,
            session_id = session_id,
            galactic_war = request.format.is_some_and(|f| f.is_galactic_war()),
            "Submitter attached"
        );

        StepAssembler::new(session_id, socket)
            .with_buffer(leftover)
            .read_buffer_size(self.config.read_buffer_size)
            .max_header_size(self.config.max_header_size)
            .run(&aggregator)
            .await
    }

    async fn watch<T>(&self, session_id: u64, request: &ReplayRequest, socket: T) -> Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        let aggregator = self
            .registry
            .get(request.game_id)
            .ok_or(RequestError::UnknownReplay(request.game_id))?;

        let mut viewer = LiveViewer::new(session_id, socket);
        let result = aggregator.stream_to(&mut viewer).await;

        tracing::info!(
            game_id = request.game_id,
            session_id = session_id,
            bytes = viewer.bytes_sent(),
            "Viewer detached"
        );
        result
    }

    /// Aggregator for a submitted game, starting its archive writer if new
    fn open_stream(&self, game_id: u64) -> Arc<StreamAggregator> {
        let (aggregator, created) = self.registry.get_or_create(game_id);
        if created {
            let writer = ArchiveWriter::new(
                self.next_session_id(),
                Arc::clone(&aggregator),
                Arc::clone(&self.pipeline),
            )
            .flush_interval(self.config.archive_flush_interval);

            tokio::spawn(async move {
                if let Err(e) = writer.run().await {
                    tracing::error!(game_id = game_id, error = %e, "Archive writer failed");
                }
            });
        }
        aggregator
    }
}

/// Log a finished connection's error at the level its kind deserves
pub fn log_connection_error(session_id: u64, error: &Error) {
    match error {
        e if e.is_disconnect() => {
            tracing::debug!(session_id = session_id, error = %e, "Peer disconnected");
        }
        Error::Request(e) => {
            tracing::warn!(session_id = session_id, error = %e, "Bad request");
        }
        Error::Codec(e) => {
            tracing::warn!(session_id = session_id, error = %e, "Malformed stream");
        }
        Error::Diverged(e) => {
            tracing::warn!(session_id = session_id, error = %e, "Closing desynced submitter");
        }
        Error::Timeout => {
            tracing::debug!(session_id = session_id, "Request line timed out");
        }
        e => {
            tracing::error!(session_id = session_id, error = %e, "Connection error");
        }
    }
}
