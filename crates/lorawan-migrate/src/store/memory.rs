//! In-process record store.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::backend::{check_completion, RecordStore};
use super::{MigrationRecord, MigrationStatus, NewMigrationRecord};
use crate::core::{Credential, DevEui, DeviceProfileRef, DeviceRecord, SessionState, StoredDevice};
use crate::error::{MigrateError, Result};

#[derive(Default)]
struct Inner {
    devices: BTreeMap<DevEui, StoredDevice>,
    sessions: HashMap<DevEui, SessionState>,
    profiles: HashMap<String, DeviceProfileRef>,
    migrations: Vec<MigrationRecord>,
}

/// Record store held in memory; contents are lost on drop.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn save_device(&self, device: &DeviceRecord, credential: &Credential) -> Result<()> {
        let mut inner = self.inner();
        let credential = match inner.devices.get(&device.dev_eui) {
            Some(existing) => credential.clone().merged_over(&existing.credential),
            None => credential.clone(),
        };
        inner.devices.insert(
            device.dev_eui,
            StoredDevice {
                device: device.clone(),
                credential,
            },
        );
        Ok(())
    }

    async fn get_device(&self, dev_eui: &DevEui) -> Result<Option<StoredDevice>> {
        Ok(self.inner().devices.get(dev_eui).cloned())
    }

    async fn get_all_devices(&self) -> Result<Vec<StoredDevice>> {
        Ok(self.inner().devices.values().cloned().collect())
    }

    async fn save_session_keys(&self, session: &SessionState) -> Result<()> {
        self.inner().sessions.insert(session.dev_eui, session.clone());
        Ok(())
    }

    async fn get_session_keys(&self, dev_eui: &DevEui) -> Result<Option<SessionState>> {
        Ok(self.inner().sessions.get(dev_eui).cloned())
    }

    async fn save_device_profile(&self, profile: &DeviceProfileRef) -> Result<()> {
        self.inner()
            .profiles
            .insert(profile.id.clone(), profile.clone());
        Ok(())
    }

    async fn get_device_profile(&self, id: &str) -> Result<Option<DeviceProfileRef>> {
        Ok(self.inner().profiles.get(id).cloned())
    }

    async fn save_migration_record(&self, record: &NewMigrationRecord) -> Result<i64> {
        check_completion(record.status, record.completed_at.as_ref())?;
        let mut inner = self.inner();
        let id = inner.migrations.len() as i64 + 1;
        inner.migrations.push(MigrationRecord {
            id,
            dev_eui: record.dev_eui,
            source_backend: record.source_backend.clone(),
            target_backend: record.target_backend.clone(),
            status: record.status,
            error: None,
            options_snapshot: record.options_snapshot.clone(),
            started_at: record.started_at,
            completed_at: record.completed_at,
        });
        Ok(id)
    }

    async fn update_migration_status(
        &self,
        id: i64,
        status: MigrationStatus,
        error: Option<&str>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        check_completion(status, completed_at.as_ref())?;
        let mut inner = self.inner();
        let row = inner
            .migrations
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| MigrateError::store(format!("no migration record with id {}", id)))?;
        row.status = status;
        row.error = error.map(str::to_string);
        row.completed_at = completed_at;
        Ok(())
    }

    async fn get_migration_history(&self, dev_eui: Option<&DevEui>) -> Result<Vec<MigrationRecord>> {
        let mut rows: Vec<MigrationRecord> = self
            .inner()
            .migrations
            .iter()
            .filter(|r| dev_eui.map_or(true, |e| &r.dev_eui == e))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }

    fn store_type(&self) -> &'static str {
        "memory"
    }
}
