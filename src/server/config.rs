//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::delivery::archive::DEFAULT_FLUSH_INTERVAL;
use crate::protocol::constants::DEFAULT_PORT;
use crate::registry::AggregatorConfig;
use crate::session::assembler::{DEFAULT_MAX_HEADER_SIZE, DEFAULT_READ_BUFFER_SIZE};
use crate::storage::{ArchiveEncoding, VaultLayout};

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ReplayServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// The request line must arrive within this time
    pub request_timeout: Duration,

    /// Longest accepted request line, terminator excluded
    pub max_request_line: usize,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Application-level read buffer size for submitters
    pub read_buffer_size: usize,

    /// Largest replay header a submitter may send
    pub max_header_size: usize,

    /// Steps between capture flushes and sidecar refreshes
    pub archive_flush_interval: u32,

    /// Archive body encoding
    pub archive_encoding: ArchiveEncoding,

    /// Staging, pending and final archive directories
    pub vault: VaultLayout,

    /// Settings shared by every game's aggregator
    pub aggregator: AggregatorConfig,
}

impl Default for ReplayServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_connections: 0, // Unlimited
            request_timeout: Duration::from_secs(10),
            max_request_line: 1024,
            tcp_nodelay: true,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
            archive_flush_interval: DEFAULT_FLUSH_INTERVAL,
            archive_encoding: ArchiveEncoding::default(),
            vault: VaultLayout::default(),
            aggregator: AggregatorConfig::default(),
        }
    }
}

impl ReplayServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the request line timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the replay header size limit
    pub fn max_header_size(mut self, bytes: usize) -> Self {
        self.max_header_size = bytes;
        self
    }

    /// Set the vault directories
    pub fn vault(mut self, vault: VaultLayout) -> Self {
        self.vault = vault;
        self
    }

    /// Set the archive body encoding
    pub fn archive_encoding(mut self, encoding: ArchiveEncoding) -> Self {
        self.archive_encoding = encoding;
        self
    }

    /// Set the capture flush interval in steps
    pub fn archive_flush_interval(mut self, steps: u32) -> Self {
        self.archive_flush_interval = steps;
        self
    }

    /// Set the aggregator settings
    pub fn aggregator(mut self, config: AggregatorConfig) -> Self {
        self.aggregator = config;
        self
    }

    /// Set the live viewer delay
    pub fn live_delay_steps(mut self, steps: u32) -> Self {
        self.aggregator = self.aggregator.live_delay_steps(steps);
        self
    }
}
