//! Single-hop SSH port-forwarding tunnel.
//!
//! This module is organized into the following submodules:
//!
//! - `endpoint`: `[user@]host[:port]` addresses
//! - `config`: Tunnel configuration with environment variable support
//! - `error`: Error type and retry classification
//! - `auth`: Authentication strategies for the SSH hop
//! - `session`: russh client handler
//! - `transport`: Connector and session seams between the tunnel and SSH
//! - `client`: russh-backed connector and dial retry
//! - `tracker`: Connections registered for teardown
//! - `forward`: Per-connection forward workers
//! - `orchestrator`: Listener, accept loop and shutdown

pub mod auth;
pub(crate) mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub(crate) mod forward;
pub mod orchestrator;
pub(crate) mod session;
#[cfg(test)]
pub(crate) mod stub;
pub(crate) mod tracker;
pub mod transport;

pub use auth::{AgentAuth, AuthChain, AuthStrategy, KeyAuth};
pub use client::RusshConnector;
pub use config::TunnelConfig;
pub use endpoint::Endpoint;
pub use error::TunnelError;
pub use orchestrator::{Tunnel, TunnelState};
pub use session::SshClientHandler;
pub use tracker::{TeardownReport, TrackedCounts};
pub use transport::{BoxedStream, ChannelIo, ServerConnection, SshConnector};
