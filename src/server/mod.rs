//! Replay server
//!
//! One TCP port serves both submitters (`P` requests) and viewers (`G`
//! requests). See [`request`] for the request line.

pub mod config;
pub mod listener;
pub mod request;
pub mod router;

pub use config::ReplayServerConfig;
pub use listener::ReplayServer;
pub use request::{Method, ReplayFormat, ReplayRequest};
pub use router::ConnectionRouter;
