//! Error types for the gateway

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by a link's transport or session
#[derive(Debug, Error)]
pub enum LinkError {
    /// Socket operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Host name did not resolve to any address
    #[error("cannot resolve {0}")]
    Resolve(String),

    /// Operation needs an open transport
    #[error("transport is not open")]
    NotOpen,

    /// No remote address known yet to send to
    #[error("no peer address known")]
    NoPeer,

    /// The far end of a virtual transport went away
    #[error("transport channel closed")]
    ChannelClosed,

    /// The previous socket on this local address has not been released yet
    #[error("{0} is still held by the previous socket")]
    Releasing(std::net::SocketAddr),
}

impl LinkError {
    /// Whether opening again on the next tick is likely to succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, LinkError::Releasing(_))
    }
}

/// Errors loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML syntax or type error
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values parsed but are inconsistent
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors that stop the gateway from starting
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Configuration problem
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The repeater socket could not be opened
    #[error("cannot open repeater link on {address}: {source}")]
    RepeaterBind {
        address: String,
        #[source]
        source: LinkError,
    },
}
