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

// State page of the version map file
// Page 0 of the file: slot and page counters plus the free-list heads,
// serialized little-endian after the durable-page envelope.

use crate::version_map::lib::{VersionMapError, VersionMapResult, FREE_LIST_COUNT, PAGE_HEADER_SIZE};
use crate::version_map::page::{seal_page, verify_page, PageType};

/// Sentinel for an empty free-list head
pub const FREE_LIST_EMPTY: i32 = -1;

/// In-memory copy of the version map's state page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePage {
    /// Number of live (allocated, not freed) slots
    pub records_size: i32,
    /// Slot high-water mark: indexes below it are live or tombstoned
    pub size: i32,
    /// Number of allocated bucket pages
    pub file_size: i32,
    /// Free-list heads; [`FREE_LIST_EMPTY`] marks an empty chain
    pub free_list: [i32; FREE_LIST_COUNT],
}

impl StatePage {
    /// State of a freshly created map: no slots, no buckets, empty chains.
    pub fn new() -> Self {
        Self {
            records_size: 0,
            size: 0,
            file_size: 0,
            free_list: [FREE_LIST_EMPTY; FREE_LIST_COUNT],
        }
    }

    /// Size of the serialized fields in bytes
    pub const fn data_size() -> usize {
        // records_size(4) + size(4) + file_size(4) + free_list(4 * K)
        12 + 4 * FREE_LIST_COUNT
    }

    /// Serialize into a full page buffer, sealing the envelope.
    pub fn serialize(&self, buffer: &mut [u8]) -> VersionMapResult<()> {
        if buffer.len() < PAGE_HEADER_SIZE + Self::data_size() {
            return Err(VersionMapError::Corruption("Buffer too small for state page".to_string()));
        }

        let mut offset = PAGE_HEADER_SIZE;
        buffer[offset..offset + 4].copy_from_slice(&self.records_size.to_le_bytes());
        offset += 4;
        buffer[offset..offset + 4].copy_from_slice(&self.size.to_le_bytes());
        offset += 4;
        buffer[offset..offset + 4].copy_from_slice(&self.file_size.to_le_bytes());
        offset += 4;
        for head in &self.free_list {
            buffer[offset..offset + 4].copy_from_slice(&head.to_le_bytes());
            offset += 4;
        }

        seal_page(buffer, PageType::State)
    }

    /// Deserialize from a full page buffer, verifying the envelope.
    pub fn deserialize(buffer: &[u8]) -> VersionMapResult<Self> {
        verify_page(buffer, PageType::State)?;
        if buffer.len() < PAGE_HEADER_SIZE + Self::data_size() {
            return Err(VersionMapError::Corruption("Buffer too small for state page".to_string()));
        }

        let read_i32 = |offset: usize| -> VersionMapResult<i32> {
            Ok(i32::from_le_bytes(
                buffer[offset..offset + 4].try_into().map_err(|_| VersionMapError::Corruption("Invalid state page bytes".to_string()))?,
            ))
        };

        let records_size = read_i32(PAGE_HEADER_SIZE)?;
        let size = read_i32(PAGE_HEADER_SIZE + 4)?;
        let file_size = read_i32(PAGE_HEADER_SIZE + 8)?;
        if records_size < 0 || size < 0 || file_size < 0 {
            return Err(VersionMapError::Corruption(format!("Negative state counters: records_size {records_size}, size {size}, file_size {file_size}")));
        }

        let mut free_list = [FREE_LIST_EMPTY; FREE_LIST_COUNT];
        for (index, head) in free_list.iter_mut().enumerate() {
            *head = read_i32(PAGE_HEADER_SIZE + 12 + index * 4)?;
        }

        Ok(Self { records_size, size, file_size, free_list })
    }
}

impl Default for StatePage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_page_roundtrip() {
        let mut state = StatePage::new();
        state.records_size = 5;
        state.size = 9;
        state.file_size = 1;
        state.free_list[3] = 7;

        let mut buffer = vec![0u8; 256];
        state.serialize(&mut buffer).unwrap();
        assert_eq!(StatePage::deserialize(&buffer).unwrap(), state);
    }

    #[test]
    fn test_field_order_is_fixed() {
        let mut state = StatePage::new();
        state.records_size = 0x01020304;
        state.size = 0x11121314;
        state.file_size = 0x21222324;

        let mut buffer = vec![0u8; 256];
        state.serialize(&mut buffer).unwrap();

        // records_size, size, file_size, free_list — little-endian, in order.
        assert_eq!(&buffer[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + 4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&buffer[PAGE_HEADER_SIZE + 4..PAGE_HEADER_SIZE + 8], &[0x14, 0x13, 0x12, 0x11]);
        assert_eq!(&buffer[PAGE_HEADER_SIZE + 8..PAGE_HEADER_SIZE + 12], &[0x24, 0x23, 0x22, 0x21]);
        assert_eq!(&buffer[PAGE_HEADER_SIZE + 12..PAGE_HEADER_SIZE + 16], &(-1i32).to_le_bytes());
    }

    #[test]
    fn test_negative_counters_are_corruption() {
        let mut state = StatePage::new();
        state.size = 3;
        let mut buffer = vec![0u8; 256];
        state.serialize(&mut buffer).unwrap();

        // Patch size to a negative value and re-seal.
        buffer[PAGE_HEADER_SIZE + 4..PAGE_HEADER_SIZE + 8].copy_from_slice(&(-3i32).to_le_bytes());
        seal_page(&mut buffer, PageType::State).unwrap();
        assert!(matches!(StatePage::deserialize(&buffer), Err(VersionMapError::Corruption(_))));
    }
}
