// VelDB
// Copyright (C) 2026 VelDB Contributors

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

// Durable-page envelope for the version map file
// Every page starts with a fixed-size header carrying the file magic, the
// format version, the page type, and a checksum of the data area.

use crate::version_map::lib::{VersionMapError, VersionMapResult, PAGE_HEADER_SIZE};

/// Magic number identifying a version map file (VELM)
const MAP_MAGIC: [u8; 4] = [0x56, 0x45, 0x4C, 0x4D];

/// Current format version
const MAP_FORMAT_VERSION: u16 = 1;

/// Types of pages in the version map file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    /// State page (counters and free-list heads)
    State = 0,
    /// Bucket page (packed version counters)
    Bucket = 1,
}

/// Fixed-size header at the start of every version map page.
#[derive(Debug, Clone, Copy)]
pub struct PageEnvelope {
    /// Type of page
    pub page_type: PageType,
    /// Checksum of the page's data area
    pub checksum: u32,
}

impl PageEnvelope {
    pub fn new(page_type: PageType, checksum: u32) -> Self {
        Self { page_type, checksum }
    }

    /// Size of the envelope in bytes
    pub const fn size() -> usize {
        // magic(4) + format_version(2) + page_type(1) + checksum(4) = 11 bytes
        // Reserved up to 32 bytes for the generic durable-page envelope
        PAGE_HEADER_SIZE
    }

    /// Serialize the envelope into the head of a page buffer
    pub fn serialize(&self, buffer: &mut [u8]) -> VersionMapResult<()> {
        if buffer.len() < Self::size() {
            return Err(VersionMapError::Corruption("Buffer too small for page envelope".to_string()));
        }

        buffer[0..4].copy_from_slice(&MAP_MAGIC);
        buffer[4..6].copy_from_slice(&MAP_FORMAT_VERSION.to_le_bytes());
        buffer[6] = self.page_type as u8;
        buffer[7..11].copy_from_slice(&self.checksum.to_le_bytes());

        // Remaining bytes are reserved and set to zero
        buffer[11..Self::size()].fill(0);

        Ok(())
    }

    /// Deserialize the envelope from the head of a page buffer
    pub fn deserialize(buffer: &[u8]) -> VersionMapResult<Self> {
        if buffer.len() < Self::size() {
            return Err(VersionMapError::Corruption("Buffer too small for page envelope".to_string()));
        }

        if buffer[0..4] != MAP_MAGIC {
            return Err(VersionMapError::Corruption("Bad magic number".to_string()));
        }

        let format_version = u16::from_le_bytes(buffer[4..6].try_into().map_err(|_| VersionMapError::Corruption("Invalid format version bytes".to_string()))?);
        if format_version != MAP_FORMAT_VERSION {
            return Err(VersionMapError::Corruption(format!("Unsupported format version {format_version}")));
        }

        let page_type = match buffer[6] {
            0 => PageType::State,
            1 => PageType::Bucket,
            other => return Err(VersionMapError::Corruption(format!("Unknown page type {other}"))),
        };

        let checksum = u32::from_le_bytes(buffer[7..11].try_into().map_err(|_| VersionMapError::Corruption("Invalid checksum bytes".to_string()))?);

        Ok(Self { page_type, checksum })
    }
}

/// Calculate the CRC32 checksum of a page's data area
pub fn checksum_data(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Stamp a full page buffer: checksum the data area, write the envelope.
pub fn seal_page(buffer: &mut [u8], page_type: PageType) -> VersionMapResult<()> {
    let checksum = checksum_data(&buffer[PAGE_HEADER_SIZE..]);
    PageEnvelope::new(page_type, checksum).serialize(buffer)
}

/// Verify a full page buffer: envelope, expected type, and checksum.
pub fn verify_page(buffer: &[u8], expected: PageType) -> VersionMapResult<PageEnvelope> {
    let envelope = PageEnvelope::deserialize(buffer)?;
    if envelope.page_type != expected {
        return Err(VersionMapError::Corruption(format!("Expected a {expected:?} page, found {:?}", envelope.page_type)));
    }
    let checksum = checksum_data(&buffer[PAGE_HEADER_SIZE..]);
    if checksum != envelope.checksum {
        return Err(VersionMapError::Corruption(format!("Checksum mismatch on {expected:?} page")));
    }
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_roundtrip() {
        let mut buffer = vec![0u8; 128];
        PageEnvelope::new(PageType::Bucket, 0xDEAD_BEEF).serialize(&mut buffer).unwrap();

        let envelope = PageEnvelope::deserialize(&buffer).unwrap();
        assert_eq!(envelope.page_type, PageType::Bucket);
        assert_eq!(envelope.checksum, 0xDEAD_BEEF);
    }

    #[test]
    fn test_bad_magic_is_corruption() {
        let mut buffer = vec![0u8; 128];
        PageEnvelope::new(PageType::State, 1).serialize(&mut buffer).unwrap();
        buffer[0] = 0xFF;
        assert!(matches!(PageEnvelope::deserialize(&buffer), Err(VersionMapError::Corruption(_))));
    }

    #[test]
    fn test_seal_and_verify_page() {
        let mut buffer = vec![0u8; 256];
        buffer[PAGE_HEADER_SIZE] = 42;
        seal_page(&mut buffer, PageType::State).unwrap();
        verify_page(&buffer, PageType::State).unwrap();

        // Flipping a data byte must break the checksum.
        buffer[PAGE_HEADER_SIZE + 1] ^= 0x01;
        assert!(matches!(verify_page(&buffer, PageType::State), Err(VersionMapError::Corruption(_))));
    }

    #[test]
    fn test_wrong_page_type_is_corruption() {
        let mut buffer = vec![0u8; 256];
        seal_page(&mut buffer, PageType::Bucket).unwrap();
        assert!(matches!(verify_page(&buffer, PageType::State), Err(VersionMapError::Corruption(_))));
    }
}
