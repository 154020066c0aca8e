//! Error types for the block-transfer core.

use blockcast_mqttsn::DeliveryError;
use thiserror::Error;

/// Errors surfaced by the block sender and the status sub-protocol.
#[derive(Error, Debug)]
pub enum TransferError {
    /// Payload exceeds the reassembly buffer or the supported chunk count.
    /// Raised before any network activity.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A chunk failed delivery after its retry budget; the transfer is
    /// aborted and not resumable.
    #[error("chunk {part}/{total} failed: {source}")]
    ChunkDelivery {
        part: u16,
        total: u16,
        #[source]
        source: DeliveryError,
    },

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// File source/sink failures.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("file is {size} bytes, larger than the {max}-byte limit")]
    TooLarge { size: u64, max: u64 },

    #[error("file is empty: {0}")]
    Empty(String),

    #[error("storage I/O: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransferError>;
