//! Replay server listener
//!
//! Handles the TCP accept loop and spawns one task per connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use super::router::{log_connection_error, ConnectionRouter};
use crate::error::Result;
use crate::registry::{AggregatorRegistry, AggregatorStats};
use crate::server::config::ReplayServerConfig;
use crate::storage::{PersistencePipeline, ReplayMetadataStore};

/// How often finished games are pruned from the registry
const PRUNE_INTERVAL: Duration = Duration::from_secs(30);

/// Live replay relay server
pub struct ReplayServer<S> {
    config: ReplayServerConfig,
    router: Arc<ConnectionRouter<S>>,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl<S: ReplayMetadataStore> ReplayServer<S> {
    /// Create a new server with the given configuration and metadata store
    pub fn new(config: ReplayServerConfig, store: S) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        let registry = Arc::new(AggregatorRegistry::with_config(config.aggregator.clone()));
        let pipeline = PersistencePipeline::new(config.vault.clone(), Arc::new(store))
            .encoding(config.archive_encoding);
        let router = ConnectionRouter::new(config.clone(), registry, Arc::new(pipeline));

        Self {
            config,
            router: Arc::new(router),
            connection_semaphore,
        }
    }

    /// Get a reference to the aggregator registry
    pub fn registry(&self) -> &Arc<AggregatorRegistry> {
        self.router.registry()
    }

    pub fn pipeline(&self) -> &Arc<PersistencePipeline<S>> {
        self.router.pipeline()
    }

    /// Number of games with a live aggregator
    pub fn active_games(&self) -> usize {
        self.registry().len()
    }

    /// Statistics of every live game
    pub fn stats(&self) -> Vec<AggregatorStats> {
        self.registry().stats()
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        self.pipeline().layout().ensure().await?;
        self.spawn_recovery().await?;
        tracing::info!(addr = %listener.local_addr()?, "Replay server listening");

        let prune_handle = self.registry().spawn_prune_task(PRUNE_INTERVAL);

        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&listener) => result,
        };

        // Stop pruning on shutdown
        prune_handle.abort();

        result
    }

    /// Archive captures an earlier run left behind
    ///
    /// The scan happens before any connection is accepted so that only
    /// leftovers are picked up, never a game this run is recording.
    async fn spawn_recovery(&self) -> Result<()> {
        let games = self.pipeline().leftover_games().await?;
        if games.is_empty() {
            return Ok(());
        }

        tracing::info!(games = games.len(), "Recovering interrupted replays");
        let pipeline = Arc::clone(self.pipeline());
        let registry = Arc::clone(self.registry());
        tokio::spawn(async move {
            // A resubmitted game is archived by its own writer
            let games = games
                .into_iter()
                .filter(move |game_id| registry.get(*game_id).is_none());
            let archived = pipeline.persist_all(games).await;
            tracing::info!(archived = archived, "Replay recovery finished");
        });
        Ok(())
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        let session_id = self.router.next_session_id();

        tracing::debug!(
            session_id = session_id,
            peer = %peer_addr,
            "New connection"
        );

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::error!(error = %e, "Failed to configure socket");
                return;
            }
        }

        let router = Arc::clone(&self.router);

        tokio::spawn(async move {
            let _permit = permit;

            if let Err(e) = router.route(session_id, socket).await {
                log_connection_error(session_id, &e);
            }

            tracing::debug!(session_id = session_id, peer = %peer_addr, "Connection closed");
        });
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}
