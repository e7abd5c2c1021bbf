//! Error types for MMDVM wire decoding

use thiserror::Error;

/// Errors that can occur while decoding a datagram
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Datagram shorter than its tag requires
    #[error("truncated {tag} datagram: need {needed} bytes, got {actual}")]
    Truncated {
        tag: &'static str,
        needed: usize,
        actual: usize,
    },

    /// Tag not part of the protocol
    #[error("unknown tag: {0}")]
    UnknownTag(String),

    /// Data type nibble the gateway does not route
    #[error("unsupported data type: {0}")]
    UnsupportedDataType(u8),

    /// Voice burst index outside A..F
    #[error("invalid burst index: {0}")]
    InvalidBurstIndex(u8),
}
