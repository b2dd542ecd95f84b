//! Error types for RLDP2 operations.

use thiserror::Error;

use crate::types::RldpTypeError;

/// RLDP2 error type.
///
/// Every error that concerns a single transfer is delivered through that
/// transfer's own result; nothing here is fatal to the connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RldpError {
    /// Transfer deadline passed before completion.
    #[error("Transfer timed out")]
    Timeout,

    /// The peer violated the transfer protocol (offset overflow, inconsistent
    /// sizes, symbols rejected by the decoder).
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// FEC parameters are not supported.
    #[error("Invalid FEC type: {0}")]
    InvalidFecType(String),

    /// Error parsing a wire message.
    #[error("Parse error: {0}")]
    Parse(#[from] RldpTypeError),

    /// Invalid data size.
    #[error("Invalid data size: {0}")]
    InvalidDataSize(String),

    /// A packet was recorded out of sequence.
    #[error("Non-sequential seqno: expected {expected}, got {got}")]
    InvalidSeqno { expected: u32, got: u32 },

    /// The connection driver is gone.
    #[error("Channel closed")]
    ChannelClosed,
}

/// Result type for RLDP2 operations.
pub type Result<T> = std::result::Result<T, RldpError>;

impl RldpError {
    /// Shorthand for a [`RldpError::ProtocolViolation`].
    pub(crate) fn violation(msg: impl Into<String>) -> Self {
        RldpError::ProtocolViolation(msg.into())
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for RldpError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        RldpError::ChannelClosed
    }
}
