//! The `volume`/`disk` section: chunk geometry and media flags (§3, §4.2).
//!
//! Two payload sizes are in circulation for the v1 grammar: the short
//! "SMART"/`S01` layout (payload 170 bytes) and the fuller EnCase `E01`
//! layout (payload 1128 bytes) which additionally carries media type,
//! error granularity, and a set-identifier GUID. Both share the same
//! leading fields this crate actually needs.

use crate::error::{EwfError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Removable,
    Fixed,
    Optical,
    LogicalEvidence,
    Memory,
    Unknown(u8),
}

impl MediaType {
    fn from_byte(b: u8) -> Self {
        match b {
            0x00 => MediaType::Removable,
            0x01 => MediaType::Fixed,
            0x03 => MediaType::Optical,
            0x0e => MediaType::LogicalEvidence,
            0x10 => MediaType::Memory,
            other => MediaType::Unknown(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VolumeSection {
    pub chunk_count: u32,
    pub sectors_per_chunk: u32,
    pub bytes_per_sector: u32,
    pub total_sector_count: u32,
    pub media_type: MediaType,
    pub error_granularity: u32,
    pub compression_level: u8,
    pub set_identifier: [u8; 16],
}

impl Default for VolumeSection {
    fn default() -> Self {
        VolumeSection {
            chunk_count: 0,
            sectors_per_chunk: 32,
            bytes_per_sector: 512,
            total_sector_count: 0,
            media_type: MediaType::Fixed,
            error_granularity: 0,
            compression_level: 0,
            set_identifier: [0; 16],
        }
    }
}

impl VolumeSection {
    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.sectors_per_chunk as usize * self.bytes_per_sector as usize
    }

    #[inline]
    pub fn media_size(&self) -> u64 {
        self.total_sector_count as u64 * self.bytes_per_sector as u64
    }

    /// Decodes a `disk`/`volume` payload. `payload_len` distinguishes the
    /// short SMART layout (170 bytes) from the full EnCase layout (1128
    /// bytes), matching the sizes real tools emit.
    pub fn decode(payload: &[u8], payload_len: u64) -> Result<Self> {
        let require = |n: usize| -> Result<()> {
            if payload.len() < n {
                Err(EwfError::CorruptSection {
                    segment: 0,
                    offset: 0,
                    section_type: "volume".into(),
                    reason: format!("payload too short: need {n}, have {}", payload.len()),
                })
            } else {
                Ok(())
            }
        };

        match payload_len {
            170 => {
                require(20)?;
                let chunk_count = u32::from_le_bytes(payload[4..8].try_into().unwrap());
                let sectors_per_chunk = u32::from_le_bytes(payload[8..12].try_into().unwrap());
                let bytes_per_sector = u32::from_le_bytes(payload[12..16].try_into().unwrap());
                let total_sector_count = u32::from_le_bytes(payload[16..20].try_into().unwrap());
                Ok(VolumeSection {
                    chunk_count,
                    sectors_per_chunk,
                    bytes_per_sector,
                    total_sector_count,
                    ..Default::default()
                })
            }
            _ => {
                // EnCase-style "full" volume section (commonly 1128 bytes),
                // and anything else we at least try to read the common
                // leading fields out of, since older/short variants exist
                // in the wild with nonstandard trailing padding.
                require(28)?;
                let media_type = MediaType::from_byte(payload[0]);
                let chunk_count = u32::from_le_bytes(payload[4..8].try_into().unwrap());
                let sectors_per_chunk = u32::from_le_bytes(payload[8..12].try_into().unwrap());
                let bytes_per_sector = u32::from_le_bytes(payload[12..16].try_into().unwrap());
                let total_sector_count = u32::from_le_bytes(payload[16..20].try_into().unwrap());
                let error_granularity = u32::from_le_bytes(payload[24..28].try_into().unwrap());
                let mut set_identifier = [0u8; 16];
                if payload.len() >= 44 {
                    set_identifier.copy_from_slice(&payload[28..44]);
                }
                let compression_level = if payload.len() > 3 { payload[3] } else { 0 };

                Ok(VolumeSection {
                    chunk_count,
                    sectors_per_chunk,
                    bytes_per_sector,
                    total_sector_count,
                    media_type,
                    error_granularity,
                    compression_level,
                    set_identifier,
                })
            }
        }
    }

    /// Encodes the full (EnCase-style, 1128-byte) volume payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = vec![0u8; 1128];
        payload[0] = match self.media_type {
            MediaType::Removable => 0x00,
            MediaType::Fixed => 0x01,
            MediaType::Optical => 0x03,
            MediaType::LogicalEvidence => 0x0e,
            MediaType::Memory => 0x10,
            MediaType::Unknown(b) => b,
        };
        payload[3] = self.compression_level;
        payload[4..8].copy_from_slice(&self.chunk_count.to_le_bytes());
        payload[8..12].copy_from_slice(&self.sectors_per_chunk.to_le_bytes());
        payload[12..16].copy_from_slice(&self.bytes_per_sector.to_le_bytes());
        payload[16..20].copy_from_slice(&self.total_sector_count.to_le_bytes());
        payload[24..28].copy_from_slice(&self.error_granularity.to_le_bytes());
        payload[28..44].copy_from_slice(&self.set_identifier);
        payload
    }
}
