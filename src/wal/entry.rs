//! WAL Entry definitions
//!
//! Defines the structure of individual WAL records and their framing.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{KvsnsError, Result};

/// Record header: LSN (8) + CRC (4) + payload length (4)
pub const HEADER_SIZE: usize = 16;

/// Upper bound on a single record payload (64 MB)
const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

/// A single record in the WAL: one atomically committed batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Log Sequence Number - monotonically increasing
    pub lsn: u64,

    /// The mutations applied together
    pub operations: Vec<Operation>,

    /// Timestamp (unix millis) when the record was created
    pub timestamp: u64,
}

/// Mutations that can be logged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Put a key-value pair
    Put { key: String, value: Vec<u8> },

    /// Delete a key
    Delete { key: String },
}

impl Operation {
    /// The key this operation touches
    pub fn key(&self) -> &str {
        match self {
            Operation::Put { key, .. } | Operation::Delete { key } => key,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Payload {
    operations: Vec<Operation>,
    timestamp: u64,
}

impl WalEntry {
    /// Create a record stamped with the current time
    pub fn new(lsn: u64, operations: Vec<Operation>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self {
            lsn,
            operations,
            timestamp,
        }
    }

    /// Encode to the on-disk framing: header + payload
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(&Payload {
            operations: self.operations.clone(),
            timestamp: self.timestamp,
        })?;

        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(KvsnsError::InvalidArgument(format!(
                "WAL batch too large: {} bytes (max {})",
                payload.len(),
                MAX_PAYLOAD_SIZE
            )));
        }

        let crc = Self::compute_crc(self.lsn, &payload);

        let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
        bytes.extend_from_slice(&self.lsn.to_le_bytes());
        bytes.extend_from_slice(&crc.to_le_bytes());
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    /// Decode one framed record, verifying its checksum
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(KvsnsError::WalCorruption(format!(
                "Incomplete header: expected {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }

        let (lsn, crc, len) = Self::parse_header(&bytes[..HEADER_SIZE])?;
        let payload = bytes.get(HEADER_SIZE..HEADER_SIZE + len).ok_or_else(|| {
            KvsnsError::WalCorruption(format!(
                "Incomplete payload: expected {} bytes, got {}",
                len,
                bytes.len() - HEADER_SIZE
            ))
        })?;

        Self::from_parts(lsn, crc, payload)
    }

    /// Split a header into (lsn, crc, payload length)
    pub(crate) fn parse_header(header: &[u8]) -> Result<(u64, u32, usize)> {
        let mut lsn = [0u8; 8];
        let mut crc = [0u8; 4];
        let mut len = [0u8; 4];
        lsn.copy_from_slice(&header[0..8]);
        crc.copy_from_slice(&header[8..12]);
        len.copy_from_slice(&header[12..16]);

        let len = u32::from_le_bytes(len) as usize;
        if len > MAX_PAYLOAD_SIZE {
            return Err(KvsnsError::WalCorruption(format!(
                "Payload length {} exceeds maximum {}",
                len, MAX_PAYLOAD_SIZE
            )));
        }
        Ok((u64::from_le_bytes(lsn), u32::from_le_bytes(crc), len))
    }

    /// Rebuild a record from its header fields and payload bytes
    pub(crate) fn from_parts(lsn: u64, crc: u32, payload: &[u8]) -> Result<Self> {
        let actual = Self::compute_crc(lsn, payload);
        if actual != crc {
            return Err(KvsnsError::WalCorruption(format!(
                "CRC mismatch at LSN {}: stored {:#010x}, computed {:#010x}",
                lsn, crc, actual
            )));
        }

        let payload: Payload = bincode::deserialize(payload)
            .map_err(|e| KvsnsError::WalCorruption(format!("Undecodable batch: {}", e)))?;

        Ok(Self {
            lsn,
            operations: payload.operations,
            timestamp: payload.timestamp,
        })
    }

    /// CRC32 over the LSN and payload bytes
    pub fn compute_crc(lsn: u64, payload: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&lsn.to_le_bytes());
        hasher.update(payload);
        hasher.finalize()
    }
}
