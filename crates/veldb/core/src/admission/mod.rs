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

// Admission control module
// Coordinates foreground operations with exclusive maintenance freezes

pub mod gate;
pub mod lib;
pub mod waiter_queue;

// Public exports
pub use gate::OperationGate;
pub use lib::{AdmissionError, AdmissionResult, FreezeId, Refusal, RefusalFactory, RefusalKind};
pub use waiter_queue::{WaiterNode, WaiterQueue};
