//! Record store: local copy of discovered devices plus the migration audit
//! trail.

mod backend;
mod memory;
mod sqlite;

pub use backend::{
    check_completion, status_to_str, str_to_status, RecordStore,
};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::DevEui;

/// Status of one migration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Pending,
    InProgress,
    Completed,
    RequiresManualSteps,
    Failed,
}

impl MigrationStatus {
    /// Terminal statuses carry a completion timestamp.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MigrationStatus::Completed | MigrationStatus::RequiresManualSteps | MigrationStatus::Failed
        )
    }

    /// Counted as a success by the batch scheduler.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            MigrationStatus::Completed | MigrationStatus::RequiresManualSteps
        )
    }
}

impl std::fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(status_to_str(*self))
    }
}

/// A migration row as it is first written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMigrationRecord {
    pub dev_eui: DevEui,
    pub source_backend: String,
    pub target_backend: String,
    pub status: MigrationStatus,
    pub options_snapshot: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One migration attempt as stored. Rows are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub id: i64,
    pub dev_eui: DevEui,
    pub source_backend: String,
    pub target_backend: String,
    pub status: MigrationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub options_snapshot: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
