//! Block receiver: one resident reassembly, fed chunk by chunk.
//!
//! The buffer/bitmap arena is allocated once at construction and reused for
//! every block. Exactly one block is in flight: a chunk carrying a
//! different block id discards the resident state and starts fresh. Bad
//! inputs (short packets, out-of-range or duplicate parts) are dropped and
//! counted; they never abort the in-flight reassembly.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use blockcast_mqttsn::DeliveryError;

use crate::bitmap::PartBitmap;
use crate::sniff::detect_extension;
use crate::store::BlockStore;
use crate::wire::{BLOCK_BUFFER_SIZE, CHUNK_PAYLOAD, ChunkHeader, MAX_PARTS, StatusMessage};

/// A block with no accepted chunk for this long is evicted by the sweep.
const REASSEMBLY_TIMEOUT: Duration = Duration::from_millis(120_000);

/// Where the receiver's reports go: status messages back to the sender and
/// a completion note for observers. Both are best-effort from the
/// receiver's point of view.
pub trait StatusOutlet {
    fn send_status(&mut self, status: &StatusMessage) -> Result<(), DeliveryError>;
    fn notify_complete(&mut self, note: &CompletionNote) -> Result<(), DeliveryError>;
}

/// Summary of a finished block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionNote {
    pub block_id: u16,
    pub size: u32,
    pub parts: u16,
    pub extension: &'static str,
}

/// Metadata for the resident block; the arena itself lives on the
/// reassembler so it survives block turnover.
struct Assembly {
    block_id: u16,
    total_parts: u16,
    /// Known only once the final part has arrived.
    total_length: Option<u32>,
    last_update: Instant,
}

pub struct Reassembler {
    buffer: Box<[u8]>,
    bitmap: PartBitmap,
    max_parts: u16,
    timeout: Duration,
    active: Option<Assembly>,
    packets_received: u64,
    duplicates: u64,
    out_of_range: u64,
    malformed: u64,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reassembler {
    pub fn new() -> Self {
        Self::with_limits(BLOCK_BUFFER_SIZE, MAX_PARTS, REASSEMBLY_TIMEOUT)
    }

    /// Size the arena explicitly; tests shrink it.
    pub fn with_limits(capacity: usize, max_parts: u16, timeout: Duration) -> Self {
        Self {
            buffer: vec![0u8; capacity].into_boxed_slice(),
            bitmap: PartBitmap::new(max_parts),
            max_parts,
            timeout,
            active: None,
            packets_received: 0,
            duplicates: 0,
            out_of_range: 0,
            malformed: 0,
        }
    }

    /// True while a block is resident.
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    pub fn out_of_range(&self) -> u64 {
        self.out_of_range
    }

    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    /// Parts accepted for the resident block, 0 when idle.
    pub fn received_parts(&self) -> u16 {
        if self.active.is_some() {
            self.bitmap.received()
        } else {
            0
        }
    }

    /// Consume one raw chunk packet. Side effects flow through the sink
    /// (finished blocks) and the outlet (status and completion reports).
    pub fn on_chunk(&mut self, raw: &[u8], sink: &dyn BlockStore, outlet: &mut dyn StatusOutlet) {
        self.packets_received += 1;

        let Some(header) = ChunkHeader::parse(raw) else {
            self.malformed += 1;
            warn!(len = raw.len(), "chunk packet shorter than header, dropped");
            return;
        };
        let payload = &raw[crate::wire::CHUNK_HEADER..];
        let data_len = header.data_len as usize;
        if payload.len() < data_len {
            self.malformed += 1;
            warn!(
                declared = data_len,
                carried = payload.len(),
                "chunk payload shorter than declared, dropped"
            );
            return;
        }

        // A different block id takes over the arena wholesale.
        let resident = self
            .active
            .as_ref()
            .map(|assembly| assembly.block_id == header.block_id)
            .unwrap_or(false);
        if !resident && !self.begin_block(&header) {
            return;
        }
        let Some(assembly) = self.active.as_mut() else {
            return;
        };

        if header.part_num == 0 || header.part_num > assembly.total_parts {
            self.out_of_range += 1;
            warn!(
                part = header.part_num,
                total = assembly.total_parts,
                "part number out of range, dropped"
            );
            return;
        }

        if self.bitmap.get(header.part_num) {
            self.duplicates += 1;
            debug!(
                part = header.part_num,
                duplicates = self.duplicates,
                "duplicate chunk ignored"
            );
            return;
        }

        let offset = (header.part_num - 1) as usize * CHUNK_PAYLOAD;
        if offset + data_len > self.buffer.len() {
            warn!(
                part = header.part_num,
                offset,
                data_len,
                capacity = self.buffer.len(),
                "chunk would overflow the reassembly buffer, dropped"
            );
            return;
        }

        self.buffer[offset..offset + data_len].copy_from_slice(&payload[..data_len]);
        self.bitmap.set(header.part_num);
        assembly.last_update = Instant::now();

        let received = self.bitmap.received();
        if received % 10 == 0 || received == assembly.total_parts {
            info!(received, total = assembly.total_parts, "reassembly progress");
        }

        if header.part_num == assembly.total_parts {
            // The final part fixes the block's true length.
            assembly.total_length = Some((offset + data_len) as u32);

            if received < assembly.total_parts {
                let missing = self.bitmap.missing_parts();
                warn!(
                    block_id = assembly.block_id,
                    missing = missing.len(),
                    "final chunk arrived with gaps"
                );
                let report = StatusMessage::missing(assembly.block_id, &missing);
                if let Err(e) = outlet.send_status(&report) {
                    warn!("failed to send MISSING status: {}", e);
                }
            }
        }

        if self.bitmap.is_complete() {
            self.finish(sink, outlet);
        }
    }

    /// Evict the resident block if it has seen no chunk for the timeout.
    /// Partial data is discarded without notification.
    pub fn check_timeout(&mut self, now: Instant) {
        if let Some(assembly) = &self.active {
            if now.duration_since(assembly.last_update) > self.timeout {
                warn!(
                    block_id = assembly.block_id,
                    received = self.bitmap.received(),
                    total = assembly.total_parts,
                    "reassembly timed out, discarding partial block"
                );
                self.active = None;
            }
        }
    }

    fn begin_block(&mut self, header: &ChunkHeader) -> bool {
        if let Some(old) = self.active.take() {
            warn!(
                old_block = old.block_id,
                new_block = header.block_id,
                received = self.bitmap.received(),
                "new block id takes over, discarding resident state"
            );
        }
        if header.total_parts == 0 || header.total_parts > self.max_parts {
            self.malformed += 1;
            warn!(
                total_parts = header.total_parts,
                max = self.max_parts,
                "unsupported chunk count, block refused"
            );
            return false;
        }

        self.bitmap.reset(header.total_parts);
        self.buffer.fill(0);
        self.active = Some(Assembly {
            block_id: header.block_id,
            total_parts: header.total_parts,
            total_length: None,
            last_update: Instant::now(),
        });
        info!(
            block_id = header.block_id,
            total_parts = header.total_parts,
            "new block assembly started"
        );
        true
    }

    fn finish(&mut self, sink: &dyn BlockStore, outlet: &mut dyn StatusOutlet) {
        let Some(assembly) = self.active.take() else {
            return;
        };
        let total_length = assembly.total_length.unwrap_or(0) as usize;
        let data = &self.buffer[..total_length];
        let extension = detect_extension(data);

        info!(
            block_id = assembly.block_id,
            size = total_length,
            parts = assembly.total_parts,
            extension,
            duplicates = self.duplicates,
            out_of_range = self.out_of_range,
            "block transfer complete"
        );

        // Best effort: the protocol is satisfied once the block is whole,
        // a sink failure does not reopen it.
        let name = format!(
            "received/block_{}_{}{}",
            assembly.block_id,
            unix_seconds(),
            extension
        );
        match sink.write(&name, data) {
            Ok(()) => info!(name = %name, "block stored"),
            Err(e) => warn!(name = %name, "failed to store block: {}", e),
        }

        let note = CompletionNote {
            block_id: assembly.block_id,
            size: total_length as u32,
            parts: assembly.total_parts,
            extension,
        };
        if let Err(e) = outlet.notify_complete(&note) {
            warn!("failed to publish completion note: {}", e);
        }
        if let Err(e) = outlet.send_status(&StatusMessage::complete(assembly.block_id)) {
            warn!("failed to send COMPLETE status: {}", e);
        }
    }
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
