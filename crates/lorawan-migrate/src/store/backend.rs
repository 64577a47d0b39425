//! Record store trait.
//!
//! The orchestrator and the discovery sweep work with `Arc<dyn RecordStore>`
//! and never see the concrete storage. Any `Err` from a store is systemic:
//! callers abort the unit of work instead of recording it per device.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{MigrationRecord, MigrationStatus, NewMigrationRecord};
use crate::core::{Credential, DevEui, DeviceProfileRef, DeviceRecord, SessionState, StoredDevice};
use crate::error::{MigrateError, Result};

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Upsert a device and its credential, keyed by DevEUI.
    ///
    /// A placeholder key never overwrites a known key.
    async fn save_device(&self, device: &DeviceRecord, credential: &Credential) -> Result<()>;

    async fn get_device(&self, dev_eui: &DevEui) -> Result<Option<StoredDevice>>;

    /// All devices, ordered by DevEUI.
    async fn get_all_devices(&self) -> Result<Vec<StoredDevice>>;

    async fn save_session_keys(&self, session: &SessionState) -> Result<()>;

    async fn get_session_keys(&self, dev_eui: &DevEui) -> Result<Option<SessionState>>;

    async fn save_device_profile(&self, profile: &DeviceProfileRef) -> Result<()>;

    async fn get_device_profile(&self, id: &str) -> Result<Option<DeviceProfileRef>>;

    /// Append a migration row and return its id.
    async fn save_migration_record(&self, record: &NewMigrationRecord) -> Result<i64>;

    /// Move a migration row to `status`.
    ///
    /// `completed_at` must be set exactly when `status` is terminal.
    async fn update_migration_status(
        &self,
        id: i64,
        status: MigrationStatus,
        error: Option<&str>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Migration rows, newest first, optionally for one device.
    async fn get_migration_history(&self, dev_eui: Option<&DevEui>) -> Result<Vec<MigrationRecord>>;

    /// Store type name for logging.
    fn store_type(&self) -> &'static str;
}

/// Reject a status/completion pair that breaks the terminal invariant.
pub fn check_completion(status: MigrationStatus, completed_at: Option<&DateTime<Utc>>) -> Result<()> {
    match (status.is_terminal(), completed_at.is_some()) {
        (true, false) => Err(MigrateError::store(format!(
            "status '{}' is terminal and needs a completion time",
            status
        ))),
        (false, true) => Err(MigrateError::store(format!(
            "status '{}' is not terminal and cannot carry a completion time",
            status
        ))),
        _ => Ok(()),
    }
}

pub fn status_to_str(status: MigrationStatus) -> &'static str {
    match status {
        MigrationStatus::Pending => "pending",
        MigrationStatus::InProgress => "in_progress",
        MigrationStatus::Completed => "completed",
        MigrationStatus::RequiresManualSteps => "requires_manual_steps",
        MigrationStatus::Failed => "failed",
    }
}

pub fn str_to_status(s: &str) -> Result<MigrationStatus> {
    match s {
        "pending" => Ok(MigrationStatus::Pending),
        "in_progress" => Ok(MigrationStatus::InProgress),
        "completed" => Ok(MigrationStatus::Completed),
        "requires_manual_steps" => Ok(MigrationStatus::RequiresManualSteps),
        "failed" => Ok(MigrationStatus::Failed),
        _ => Err(MigrateError::store(format!("Invalid migration status: {}", s))),
    }
}
