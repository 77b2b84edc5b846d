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

// Record identity module
// Tracks record identity from provisional placeholder to permanent slot
// address and keeps identity-keyed caches consistent across the transition

pub mod record_cache;
pub mod record_id;

// Public exports
pub use record_cache::RecordCache;
pub use record_id::{IdentityChangeListener, IdentityError, IdentityResult, IdentitySequence, RecordId, INVALID_CLUSTER_ID, INVALID_CLUSTER_POSITION};
