//! Error taxonomy for the tunnel and its retry classification.
//!
//! Errors fall into two groups:
//!
//! 1. **Caller-facing**: construction and listener errors (`MalformedEndpoint`,
//!    `Key`, `Config`, `Bind`, `Accept`, `AlreadyStarted`,
//!    `NotListening`). These are returned from constructors and from
//!    [`Tunnel::start`](super::Tunnel::start).
//!
//! 2. **Per-connection**: everything raised inside a forward worker (`Dial`,
//!    `Authentication`, `ChannelOpen`, `Relay`, `Close`, `AlreadyClosed`).
//!    These are logged and never leave the worker, so one bad connection
//!    cannot take down the tunnel.
//!
//! # Retry Classification
//!
//! Only `Dial` is retried. Authentication failures are permanent: repeating
//! rejected credentials never succeeds and may lock the account.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TunnelError {
    /// Address string could not be split into user, host and port.
    #[error("malformed endpoint {input:?}: {reason}")]
    MalformedEndpoint { input: String, reason: &'static str },

    /// The local listener could not be bound.
    #[error("failed to bind local listener on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// The listener broke while accepting.
    #[error("failed to accept local connection: {0}")]
    Accept(#[source] io::Error),

    /// The SSH server could not be reached or the handshake failed.
    #[error("failed to dial ssh server {server}: {reason}")]
    Dial { server: String, reason: String },

    /// The SSH server rejected every configured credential.
    #[error("ssh authentication to {server} as {user} failed: {reason}")]
    Authentication {
        server: String,
        user: String,
        reason: String,
    },

    /// The destination could not be reached through an established session.
    #[error("failed to open channel to {remote}: {reason}")]
    ChannelOpen { remote: String, reason: String },

    /// One direction of a relay failed mid-stream.
    #[error("relay {direction} failed: {source}")]
    Relay {
        direction: &'static str,
        #[source]
        source: io::Error,
    },

    /// Closing a connection failed for a reason other than it being closed.
    #[error("failed to close {what}: {reason}")]
    Close { what: String, reason: String },

    /// The connection had already been closed.
    #[error("connection already closed")]
    AlreadyClosed,

    /// A private key file could not be read or decrypted.
    #[error("failed to load private key from {}: {reason}", .path.display())]
    Key { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// `start`/`serve` was called on a tunnel that already ran.
    #[error("tunnel has already been started")]
    AlreadyStarted,

    /// The tunnel shut down without ever binding its listener.
    #[error("tunnel never started listening")]
    NotListening,
}

impl TunnelError {
    /// Whether a failed SSH dial is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TunnelError::Dial { .. })
    }

    /// Whether this error only reports a redundant close.
    pub fn is_already_closed(&self) -> bool {
        matches!(self, TunnelError::AlreadyClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod classification {
        use super::*;

        #[test]
        fn test_dial_is_retryable() {
            let err = TunnelError::Dial {
                server: "bastion:22".to_string(),
                reason: "Connection refused".to_string(),
            };
            assert!(err.is_retryable());
        }

        #[test]
        fn test_authentication_is_not_retryable() {
            let err = TunnelError::Authentication {
                server: "bastion:22".to_string(),
                user: "ops".to_string(),
                reason: "publickey rejected".to_string(),
            };
            assert!(!err.is_retryable());
        }

        #[test]
        fn test_channel_open_is_not_retryable() {
            let err = TunnelError::ChannelOpen {
                remote: "db:5432".to_string(),
                reason: "administratively prohibited".to_string(),
            };
            assert!(!err.is_retryable());
        }

        #[test]
        fn test_already_closed() {
            assert!(TunnelError::AlreadyClosed.is_already_closed());
            let err = TunnelError::Close {
                what: "server connection".to_string(),
                reason: "broken pipe".to_string(),
            };
            assert!(!err.is_already_closed());
        }
    }

    mod messages {
        use super::*;

        #[test]
        fn test_key_error_shows_path() {
            let err = TunnelError::Key {
                path: PathBuf::from("/home/ops/.ssh/id_ed25519"),
                reason: "bad passphrase".to_string(),
            };
            let msg = err.to_string();
            assert!(msg.contains("/home/ops/.ssh/id_ed25519"));
            assert!(msg.contains("bad passphrase"));
        }

        #[test]
        fn test_bind_error_keeps_source() {
            let err = TunnelError::Bind {
                address: "localhost:80".to_string(),
                source: io::Error::new(io::ErrorKind::AddrInUse, "address in use"),
            };
            assert!(err.to_string().contains("localhost:80"));
            assert!(std::error::Error::source(&err).is_some());
        }

        #[test]
        fn test_malformed_endpoint_quotes_input() {
            let err = TunnelError::MalformedEndpoint {
                input: "[::1".to_string(),
                reason: "unterminated bracket",
            };
            assert_eq!(
                err.to_string(),
                "malformed endpoint \"[::1\": unterminated bracket"
            );
        }
    }
}
