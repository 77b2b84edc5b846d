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

// Version slot map module
// Durable, page-backed array of per-slot version counters with a free
// list, used for optimistic-concurrency validation of record positions

pub mod lib;
pub mod map;
pub mod page;
pub mod state_page;

// Public exports
pub use lib::{Flushable, VersionMapConfig, VersionMapError, VersionMapResult, FREE_LIST_COUNT, PAGE_HEADER_SIZE};
pub use map::VersionMap;
pub use page::{PageEnvelope, PageType};
pub use state_page::StatePage;
