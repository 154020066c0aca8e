/// Blockcast block-transfer core.
///
/// Moves payloads larger than one datagram across a lossy MQTT-SN link:
/// - Sender-side fragmentation with per-chunk QoS delivery and pacing
/// - Receiver-side reassembly over a fixed buffer/bitmap arena with
///   duplicate and gap detection
/// - Receiver-to-sender status reports (COMPLETE / MISSING)
/// - Magic-byte payload classification for stored blocks

pub mod bitmap;
pub mod error;
pub mod receiver;
pub mod sender;
pub mod sniff;
pub mod status;
pub mod store;
pub mod wire;

// Re-export key types for convenience.
pub use bitmap::PartBitmap;
pub use error::{StorageError, TransferError};
pub use receiver::{CompletionNote, Reassembler, StatusOutlet};
pub use sender::BlockSender;
pub use sniff::detect_extension;
pub use status::{StatusReporter, process_status};
pub use store::BlockStore;
pub use wire::{
    BLOCK_BUFFER_SIZE, BlockStatus, CHUNK_HEADER, CHUNK_PAYLOAD, CHUNK_SIZE, ChunkHeader,
    MAX_PARTS, STATUS_MAX_MISSING, StatusMessage, encode_chunk, parts_for_len,
};
