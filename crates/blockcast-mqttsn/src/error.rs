//! Error types for the delivery engine.

use std::io;

use thiserror::Error;

/// Errors surfaced by the delivery engine and its transport.
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// Datagram send/receive failed at the transport layer.
    #[error("transport failure: {0}")]
    Transport(#[from] io::Error),

    /// An expected acknowledgment did not arrive within its budget.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// A received frame could not be parsed.
    #[error("malformed {kind} frame: {detail}")]
    Malformed {
        kind: &'static str,
        detail: &'static str,
    },

    /// The gateway answered with a non-zero return code.
    #[error("gateway rejected {kind} (return code {code})")]
    Rejected { kind: &'static str, code: u8 },

    /// Publish on a channel that was never registered or subscribed.
    #[error("channel '{0}' is not registered")]
    UnknownChannel(String),

    /// QoS outside 0..=2.
    #[error("invalid QoS level {0} (must be 0, 1, or 2)")]
    InvalidQos(u8),

    /// Operation requires an established session.
    #[error("client is not connected")]
    NotConnected,
}

/// Result type for delivery-engine operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;
