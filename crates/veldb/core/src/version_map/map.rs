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

//! Durable version slot map.
//!
//! One file: the state page at page 0, bucket pages after it, each bucket
//! a packed array of `i32` version counters. A negative counter is a
//! tombstone and never a live version; the free list is threaded through
//! the tombstoned slots themselves (`-1` ends a chain, `-(next + 2)`
//! links to the next free slot), so tombstone marker and chain link are
//! one field.
//!
//! The map performs no locking of its own. Callers hold coarser
//! exclusivity — admission through the operation gate plus whatever page
//! latch the owning component provides — before mutating a slot; the
//! post-increment assertion in [`VersionMap::increment_version`] is a
//! defensive check against unsynchronized concurrent misuse, not a
//! substitute for it.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::version_map::lib::{Flushable, VersionMapConfig, VersionMapError, VersionMapResult, FREE_LIST_COUNT, PAGE_HEADER_SIZE};
use crate::version_map::page::{seal_page, verify_page, PageType};
use crate::version_map::state_page::{StatePage, FREE_LIST_EMPTY};

/// Encode a free-list link into the tombstone range.
fn encode_free_link(next: Option<u32>) -> i32 {
    match next {
        None => -1,
        Some(next) => -((next as i64) + 2) as i32,
    }
}

/// Decode a tombstoned counter back into a free-list link.
///
/// Returns `None` for live (non-negative) counters.
fn decode_free_link(stored: i32) -> Option<Option<u32>> {
    if stored >= 0 {
        return None;
    }
    if stored == -1 {
        return Some(None);
    }
    Some(Some((-(stored as i64) - 2) as u32))
}

/// Durable, page-backed array of per-slot version counters.
pub struct VersionMap {
    file: File,
    path: PathBuf,
    config: VersionMapConfig,
    /// Write-through copy of page 0.
    state: StatePage,
}

impl VersionMap {
    /// Open a version map file, creating it when absent or empty.
    pub fn open<P: AsRef<Path>>(path: P, config: VersionMapConfig) -> VersionMapResult<Self> {
        if config.page_size < PAGE_HEADER_SIZE + StatePage::data_size() || config.page_size % 4 != 0 {
            return Err(VersionMapError::InvalidConfiguration(format!("Page size {} is too small or not a multiple of 4", config.page_size)));
        }

        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).create(true).truncate(false).open(&path)?;

        let file_length = file.metadata()?.len();
        let state = if file_length == 0 {
            let state = StatePage::new();
            let mut buffer = vec![0u8; config.page_size];
            state.serialize(&mut buffer)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&buffer)?;
            state
        } else {
            let mut buffer = vec![0u8; config.page_size];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut buffer)?;
            let state = StatePage::deserialize(&buffer)?;

            let expected_length = (state.file_size as u64 + 1) * config.page_size as u64;
            if file_length < expected_length {
                return Err(VersionMapError::Corruption(format!("File is {file_length} bytes but the state page accounts for {expected_length}")));
            }
            state
        };

        Ok(Self { file, path, config, state })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of live slots.
    pub fn records_size(&self) -> u32 {
        self.state.records_size as u32
    }

    /// Slot high-water mark.
    pub fn size(&self) -> u32 {
        self.state.size as u32
    }

    /// Number of allocated bucket pages.
    pub fn allocated_pages(&self) -> u32 {
        self.state.file_size as u32
    }

    /// Slots held by each bucket page.
    pub fn slots_per_bucket(&self) -> u32 {
        ((self.config.page_size - PAGE_HEADER_SIZE) / 4) as u32
    }

    /// Current version of a live slot.
    ///
    /// Errors with [`VersionMapError::SlotTombstoned`] when the slot has
    /// been freed — a freed slot's counter must never be trusted as a
    /// live version.
    pub fn version(&mut self, slot: u32) -> VersionMapResult<u32> {
        self.check_bounds(slot)?;
        let stored = self.read_slot(slot)?;
        if stored < 0 {
            return Err(VersionMapError::SlotTombstoned(slot));
        }
        Ok(stored as u32)
    }

    /// Bump a live slot's version by one and return the new value.
    ///
    /// After writing, the counter is re-read from the file and compared
    /// against the expected value; a mismatch surfaces unsynchronized
    /// concurrent misuse as [`VersionMapError::VersionMismatch`] instead
    /// of silently correcting it.
    pub fn increment_version(&mut self, slot: u32) -> VersionMapResult<u32> {
        self.check_bounds(slot)?;
        let stored = self.read_slot(slot)?;
        if stored < 0 {
            return Err(VersionMapError::SlotTombstoned(slot));
        }

        let bumped = match stored.checked_add(1) {
            Some(bumped) if bumped >= 0 => bumped,
            _ => return Err(VersionMapError::VersionOverflow { slot, version: stored }),
        };
        self.write_slot(slot, bumped)?;

        let found = self.read_slot(slot)?;
        if found != bumped {
            return Err(VersionMapError::VersionMismatch { slot, expected: bumped, found });
        }
        Ok(bumped as u32)
    }

    /// Allocate a slot, reusing a tombstoned one when the free list is
    /// non-empty and growing the file by one bucket page otherwise.
    pub fn allocate(&mut self) -> VersionMapResult<u32> {
        for head_index in 0..FREE_LIST_COUNT {
            let head = self.state.free_list[head_index];
            if head == FREE_LIST_EMPTY {
                continue;
            }

            let slot = head as u32;
            let stored = self.read_slot(slot)?;
            let next = match decode_free_link(stored) {
                Some(next) => next,
                None => return Err(VersionMapError::Corruption(format!("Free head {slot} holds live version {stored}"))),
            };

            self.write_slot(slot, 0)?;
            self.state.free_list[head_index] = match next {
                Some(next) => next as i32,
                None => FREE_LIST_EMPTY,
            };
            self.state.records_size += 1;
            self.write_state()?;
            return Ok(slot);
        }

        let slot = self.state.size as u32;
        let capacity = self.state.file_size as u32 * self.slots_per_bucket();
        if slot >= capacity {
            self.grow_bucket()?;
        }
        self.state.size += 1;
        self.state.records_size += 1;
        self.write_state()?;
        Ok(slot)
    }

    /// Tombstone a slot and push it onto its free-list chain.
    pub fn free(&mut self, slot: u32) -> VersionMapResult<()> {
        self.check_bounds(slot)?;
        let stored = self.read_slot(slot)?;
        if stored < 0 {
            return Err(VersionMapError::SlotTombstoned(slot));
        }

        let head_index = slot as usize % FREE_LIST_COUNT;
        let link = encode_free_link(match self.state.free_list[head_index] {
            FREE_LIST_EMPTY => None,
            head => Some(head as u32),
        });
        self.write_slot(slot, link)?;
        self.state.free_list[head_index] = slot as i32;
        if self.state.records_size == 0 {
            warn!(slot, "records_size underflow while freeing a slot");
        } else {
            self.state.records_size -= 1;
        }
        self.write_state()
    }

    fn check_bounds(&self, slot: u32) -> VersionMapResult<()> {
        if slot >= self.state.size as u32 {
            return Err(VersionMapError::SlotOutOfRange { slot, size: self.state.size as u32 });
        }
        Ok(())
    }

    fn page_position(&self, page_index: u64) -> u64 {
        page_index * self.config.page_size as u64
    }

    fn read_bucket(&mut self, bucket: u32) -> VersionMapResult<Vec<u8>> {
        let mut buffer = vec![0u8; self.config.page_size];
        self.file.seek(SeekFrom::Start(self.page_position(bucket as u64 + 1)))?;
        self.file.read_exact(&mut buffer)?;
        verify_page(&buffer, PageType::Bucket)?;
        Ok(buffer)
    }

    fn write_bucket(&mut self, bucket: u32, buffer: &mut [u8]) -> VersionMapResult<()> {
        seal_page(buffer, PageType::Bucket)?;
        self.file.seek(SeekFrom::Start(self.page_position(bucket as u64 + 1)))?;
        self.file.write_all(buffer)?;
        Ok(())
    }

    fn slot_offset(&self, slot: u32) -> usize {
        (slot % self.slots_per_bucket()) as usize * 4 + PAGE_HEADER_SIZE
    }

    fn read_slot(&mut self, slot: u32) -> VersionMapResult<i32> {
        let bucket = slot / self.slots_per_bucket();
        let buffer = self.read_bucket(bucket)?;
        let offset = self.slot_offset(slot);
        Ok(i32::from_le_bytes(
            buffer[offset..offset + 4].try_into().map_err(|_| VersionMapError::Corruption("Invalid slot bytes".to_string()))?,
        ))
    }

    fn write_slot(&mut self, slot: u32, value: i32) -> VersionMapResult<()> {
        let bucket = slot / self.slots_per_bucket();
        let mut buffer = self.read_bucket(bucket)?;
        let offset = self.slot_offset(slot);
        buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        self.write_bucket(bucket, &mut buffer)
    }

    /// Append one zeroed bucket page and account for it in the state page.
    fn grow_bucket(&mut self) -> VersionMapResult<()> {
        let bucket = self.state.file_size as u32;
        let mut buffer = vec![0u8; self.config.page_size];
        self.write_bucket(bucket, &mut buffer)?;
        self.state.file_size += 1;
        debug!(bucket, "grew version map by one bucket page");
        Ok(())
    }

    fn write_state(&mut self) -> VersionMapResult<()> {
        let mut buffer = vec![0u8; self.config.page_size];
        self.state.serialize(&mut buffer)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&buffer)?;
        Ok(())
    }
}

impl Flushable for VersionMap {
    fn flush(&mut self) -> VersionMapResult<()> {
        self.file.sync_all()?;
        Ok(())
    }
}
