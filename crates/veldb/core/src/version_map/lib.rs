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

// Common types and constants for the version slot map

use std::io;

use serde::{Deserialize, Serialize};

/// Size of the durable-page envelope in bytes. Slot addressing inside a
/// bucket page starts right after it.
pub const PAGE_HEADER_SIZE: usize = 32;

/// Number of free-list heads reserved in the state page.
pub const FREE_LIST_COUNT: usize = 16;

/// Error types specific to the version slot map
#[derive(Debug, thiserror::Error)]
pub enum VersionMapError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Slot {0} is tombstoned")]
    SlotTombstoned(u32),

    #[error("Slot {slot} is out of range (size {size})")]
    SlotOutOfRange { slot: u32, size: u32 },

    #[error("Slot {slot} version changed during increment: expected {expected}, found {found}")]
    VersionMismatch { slot: u32, expected: i32, found: i32 },

    #[error("Slot {slot} version {version} cannot grow without entering the tombstone range")]
    VersionOverflow { slot: u32, version: i32 },

    #[error("Corrupted version map: {0}")]
    Corruption(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Result type for version map operations
pub type VersionMapResult<T> = std::result::Result<T, VersionMapError>;

/// Configuration for the version slot map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionMapConfig {
    /// Size of each page in bytes
    pub page_size: usize,
}

impl Default for VersionMapConfig {
    fn default() -> Self {
        Self { page_size: 4096 }
    }
}

/// Trait for components that need periodic flushing to disk
pub trait Flushable {
    /// Flush any in-memory data to disk
    fn flush(&mut self) -> VersionMapResult<()>;
}
