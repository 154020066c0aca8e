/// Block-transfer wire formats.
///
/// Chunk packet (little-endian):
/// ```text
/// [0..2]   Block id (u16)
/// [2..4]   Part number (u16, 1-based)
/// [4..6]   Total parts (u16)
/// [6..8]   Data length (u16)
/// [8..]    Payload slice (up to 120 bytes)
/// ```
///
/// Status message (little-endian):
/// ```text
/// [0..2]   Block id (u16)
/// [2]      Status (0 = COMPLETE, 1 = MISSING)
/// [3..5]   Missing count (u16)
/// [5..]    Missing part numbers (u16 each, at most 50)
/// ```

/// Size of a chunk packet including its header; fits one datagram.
pub const CHUNK_SIZE: usize = 128;

/// Chunk header: four u16 fields.
pub const CHUNK_HEADER: usize = 8;

/// Payload bytes per chunk.
pub const CHUNK_PAYLOAD: usize = CHUNK_SIZE - CHUNK_HEADER;

/// Most chunks a single block may span.
pub const MAX_PARTS: u16 = 3000;

/// Reassembly buffer capacity; bounds the transferable block size.
pub const BLOCK_BUFFER_SIZE: usize = 150_000;

/// Largest source file the convenience send path accepts.
pub const MAX_SOURCE_FILE_BYTES: u64 = 150_000;

/// Hard cap on missing part numbers in one status message.
pub const STATUS_MAX_MISSING: usize = 50;

/// Number of chunks needed to carry `len` payload bytes.
pub fn parts_for_len(len: usize) -> usize {
    len.div_ceil(CHUNK_PAYLOAD)
}

/// Parsed chunk packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub block_id: u16,
    pub part_num: u16,
    pub total_parts: u16,
    pub data_len: u16,
}

impl ChunkHeader {
    /// Serialize into the first 8 bytes of `buf`.
    pub fn write_to(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= CHUNK_HEADER);
        buf[0..2].copy_from_slice(&self.block_id.to_le_bytes());
        buf[2..4].copy_from_slice(&self.part_num.to_le_bytes());
        buf[4..6].copy_from_slice(&self.total_parts.to_le_bytes());
        buf[6..8].copy_from_slice(&self.data_len.to_le_bytes());
    }

    /// Parse from raw bytes. Returns None if too short for the header.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < CHUNK_HEADER {
            return None;
        }
        Some(Self {
            block_id: u16::from_le_bytes([buf[0], buf[1]]),
            part_num: u16::from_le_bytes([buf[2], buf[3]]),
            total_parts: u16::from_le_bytes([buf[4], buf[5]]),
            data_len: u16::from_le_bytes([buf[6], buf[7]]),
        })
    }
}

/// Build a chunk packet: header followed by the payload slice.
pub fn encode_chunk(header: &ChunkHeader, payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= CHUNK_PAYLOAD);
    debug_assert_eq!(payload.len(), header.data_len as usize);
    let mut packet = vec![0u8; CHUNK_HEADER + payload.len()];
    header.write_to(&mut packet);
    packet[CHUNK_HEADER..].copy_from_slice(payload);
    packet
}

/// Payload slice of a raw chunk packet.
pub fn chunk_payload(raw: &[u8]) -> &[u8] {
    &raw[CHUNK_HEADER..]
}

/// Receiver-to-sender block report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    Complete,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub block_id: u16,
    pub status: BlockStatus,
    /// Missing part numbers, capped at [`STATUS_MAX_MISSING`].
    pub missing: Vec<u16>,
}

impl StatusMessage {
    pub fn complete(block_id: u16) -> Self {
        Self {
            block_id,
            status: BlockStatus::Complete,
            missing: Vec::new(),
        }
    }

    /// Build a MISSING report; part numbers beyond the cap are truncated.
    pub fn missing(block_id: u16, missing_parts: &[u16]) -> Self {
        let mut missing = missing_parts.to_vec();
        missing.truncate(STATUS_MAX_MISSING);
        Self {
            block_id,
            status: BlockStatus::Missing,
            missing,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(5 + self.missing.len() * 2);
        out.extend_from_slice(&self.block_id.to_le_bytes());
        out.push(match self.status {
            BlockStatus::Complete => 0,
            BlockStatus::Missing => 1,
        });
        out.extend_from_slice(&(self.missing.len() as u16).to_le_bytes());
        for part in &self.missing {
            out.extend_from_slice(&part.to_le_bytes());
        }
        out
    }

    /// Parse from raw bytes. Returns None on truncation, an unknown status
    /// code, or a missing-count beyond the cap.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        if raw.len() < 5 {
            return None;
        }
        let block_id = u16::from_le_bytes([raw[0], raw[1]]);
        let status = match raw[2] {
            0 => BlockStatus::Complete,
            1 => BlockStatus::Missing,
            _ => return None,
        };
        let count = u16::from_le_bytes([raw[3], raw[4]]) as usize;
        if count > STATUS_MAX_MISSING || raw.len() < 5 + count * 2 {
            return None;
        }
        let missing = raw[5..5 + count * 2]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Some(Self {
            block_id,
            status,
            missing,
        })
    }
}
