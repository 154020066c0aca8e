//! Block sender: fragments a payload and drives the delivery engine once
//! per chunk.
//!
//! Size limits are enforced before any network activity. A chunk that
//! exhausts its delivery retry budget aborts the whole transfer; partially
//! sent blocks are not resumable. A fixed inter-chunk delay is the only
//! concession to the receiver's fixed buffer — there is no credit or
//! window signal to react to.

use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use blockcast_mqttsn::{Client, Transport};

use crate::error::{Result, StorageError, TransferError};
use crate::store::BlockStore;
use crate::wire::{
    BLOCK_BUFFER_SIZE, CHUNK_PAYLOAD, ChunkHeader, MAX_PARTS, MAX_SOURCE_FILE_BYTES,
    encode_chunk, parts_for_len,
};

/// Pause after every chunk so the receiver's buffer can drain.
const INTER_CHUNK_DELAY: Duration = Duration::from_millis(50);

pub struct BlockSender {
    next_block_id: u16,
    max_block_bytes: usize,
    max_parts: u16,
    inter_chunk_delay: Duration,
}

impl Default for BlockSender {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockSender {
    pub fn new() -> Self {
        Self {
            next_block_id: 1,
            max_block_bytes: BLOCK_BUFFER_SIZE,
            max_parts: MAX_PARTS,
            inter_chunk_delay: INTER_CHUNK_DELAY,
        }
    }

    /// Override limits and pacing; tests run with zero delay.
    pub fn with_limits(max_block_bytes: usize, max_parts: u16, inter_chunk_delay: Duration) -> Self {
        Self {
            next_block_id: 1,
            max_block_bytes,
            max_parts,
            inter_chunk_delay,
        }
    }

    /// Fragment `data` and publish every chunk on `channel` at `qos`.
    pub fn send<T: Transport>(
        &mut self,
        client: &mut Client<T>,
        channel: &str,
        data: &[u8],
        qos: u8,
    ) -> Result<()> {
        if data.len() > self.max_block_bytes {
            return Err(TransferError::ResourceExhausted(format!(
                "payload is {} bytes, buffer holds {}",
                data.len(),
                self.max_block_bytes
            )));
        }
        let total_parts = parts_for_len(data.len());
        if total_parts > self.max_parts as usize {
            return Err(TransferError::ResourceExhausted(format!(
                "payload needs {} chunks, at most {} supported",
                total_parts, self.max_parts
            )));
        }
        let total_parts = total_parts as u16;

        let block_id = self.next_block_id;
        self.next_block_id = self.next_block_id.wrapping_add(1);

        info!(
            block_id,
            size = data.len(),
            chunks = total_parts,
            qos,
            "starting block transfer"
        );

        for part_num in 1..=total_parts {
            let offset = (part_num - 1) as usize * CHUNK_PAYLOAD;
            let end = (offset + CHUNK_PAYLOAD).min(data.len());
            let header = ChunkHeader {
                block_id,
                part_num,
                total_parts,
                data_len: (end - offset) as u16,
            };
            let packet = encode_chunk(&header, &data[offset..end]);

            client
                .publish(channel, &packet, qos)
                .map_err(|source| TransferError::ChunkDelivery {
                    part: part_num,
                    total: total_parts,
                    source,
                })?;

            if part_num % 10 == 0 || part_num == total_parts {
                info!(part = part_num, total = total_parts, "chunk progress");
            } else {
                debug!(part = part_num, bytes = packet.len(), "chunk sent");
            }

            // Keep the link serviced across the pacing pause.
            client.drive();
            if !self.inter_chunk_delay.is_zero() {
                thread::sleep(self.inter_chunk_delay);
            }
        }

        info!(block_id, chunks = total_parts, "block transfer complete");
        Ok(())
    }

    /// Read a payload from the file store and send it.
    pub fn send_file<T: Transport>(
        &mut self,
        client: &mut Client<T>,
        store: &dyn BlockStore,
        channel: &str,
        name: &str,
        qos: u8,
    ) -> Result<()> {
        let data = store.read(name)?;
        if data.len() as u64 > MAX_SOURCE_FILE_BYTES {
            return Err(TransferError::Storage(StorageError::TooLarge {
                size: data.len() as u64,
                max: MAX_SOURCE_FILE_BYTES,
            }));
        }
        info!(name, size = data.len(), qos, "sending file as block transfer");
        self.send(client, channel, &data, qos)
    }
}
