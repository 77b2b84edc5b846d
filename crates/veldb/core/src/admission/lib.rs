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

// Common types for the admission subsystem

use std::fmt;
use std::sync::Arc;

/// Identifier handed out by a freeze request and required by its release.
pub type FreezeId = i64;

/// Error types specific to admission control
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("Operations are frozen: {0}")]
    Frozen(String),

    #[error("Backup in progress: {0}")]
    BackupInProgress(String),

    #[error("Operation exit without a matching enter")]
    NotEntered,
}

/// Result type for admission operations
pub type AdmissionResult<T> = std::result::Result<T, AdmissionError>;

/// Constructor for the error a fail-fast freeze hands to late entrants.
///
/// Returning `None` means the error cannot be constructed; the gate logs the
/// degradation and parks the entrant instead of failing it.
pub type RefusalFactory = Arc<dyn Fn(Option<&str>) -> Option<AdmissionError> + Send + Sync>;

/// How a fail-fast freeze turns a late entrant away.
#[derive(Clone)]
pub enum RefusalKind {
    /// Entrants fail with [`AdmissionError::Frozen`].
    Frozen,
    /// Entrants fail with [`AdmissionError::BackupInProgress`].
    BackupInProgress,
    /// Entrants fail with a caller-constructed error; the constructor may
    /// decline by returning `None`.
    Custom(RefusalFactory),
}

impl fmt::Debug for RefusalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefusalKind::Frozen => write!(f, "Frozen"),
            RefusalKind::BackupInProgress => write!(f, "BackupInProgress"),
            RefusalKind::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// Fail-fast specification registered with a freeze.
///
/// While the freeze is outstanding, operations trying to enter receive the
/// constructed error immediately instead of parking.
#[derive(Debug, Clone)]
pub struct Refusal {
    kind: RefusalKind,
    message: Option<String>,
}

impl Refusal {
    /// Create a refusal with an optional detail message.
    pub fn new(kind: RefusalKind, message: Option<String>) -> Self {
        Self { kind, message }
    }

    /// The refusal kind.
    pub fn kind(&self) -> &RefusalKind {
        &self.kind
    }

    /// Construct the error handed to a refused entrant.
    ///
    /// `None` signals that the error could not be built and the gate must
    /// fall back to parking.
    pub fn to_error(&self) -> Option<AdmissionError> {
        match &self.kind {
            RefusalKind::Frozen => Some(AdmissionError::Frozen(self.message.clone().unwrap_or_else(|| "storage is frozen".to_string()))),
            RefusalKind::BackupInProgress => Some(AdmissionError::BackupInProgress(self.message.clone().unwrap_or_else(|| "a backup is running".to_string()))),
            RefusalKind::Custom(factory) => factory(self.message.as_deref()),
        }
    }
}
