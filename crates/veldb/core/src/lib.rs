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

//! Transactional admission and identity-coordination core of the VelDB
//! storage engine.
//!
//! This crate holds the three pieces every other engine component leans on:
//!
//! - **Admission control** ([`admission`]): the freeze-aware entry/exit
//!   barrier that lets foreground operations run concurrently while
//!   maintenance tasks (backup, layout changes) obtain exclusive access
//!   without stopping the server.
//! - **Record identity** ([`identity`]): the lifecycle of a record id from
//!   a provisional in-memory placeholder to a permanent physical
//!   (cluster, position) address, with a two-phase change broadcast that
//!   keeps identity-keyed caches consistent across the transition.
//! - **Version slot map** ([`version_map`]): a durable, page-backed array
//!   of per-slot version counters used for optimistic-concurrency
//!   validation of physical record positions.
//!
//! Higher layers (SQL frontend, indexing, network protocols, schema
//! management) are collaborators that call into this core; they live in
//! sibling crates.

pub mod admission;
pub mod identity;
pub mod version_map;

// Public exports
pub use admission::{AdmissionError, AdmissionResult, FreezeId, OperationGate, Refusal, RefusalKind, WaiterNode, WaiterQueue};
pub use identity::{IdentityChangeListener, IdentityError, IdentityResult, IdentitySequence, RecordCache, RecordId, INVALID_CLUSTER_ID, INVALID_CLUSTER_POSITION};
pub use version_map::{Flushable, StatePage, VersionMap, VersionMapConfig, VersionMapError, VersionMapResult};
