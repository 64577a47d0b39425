//! Per-device migration: record store -> target backend.
//!
//! [`Migrator::migrate_device`] walks one device through the
//! [`MigrationPhase`] machine and writes exactly one migration row for the
//! attempt. Backend failures end the device in a terminal status; only
//! record store failures are returned as `Err`, since they are systemic.

mod phase;

pub use phase::MigrationPhase;

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::BackendClient;
use crate::config::Config;
use crate::core::{DevEui, DeviceRecord};
use crate::error::{BackendError, BackendResult, Result};
use crate::mapper::LorawanVersion;
use crate::store::{MigrationStatus, NewMigrationRecord, RecordStore};

/// Parameters of a migration run, snapshotted into every migration row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationOptions {
    /// Batch run this attempt belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub activate_sessions: bool,
    pub timeout_retries: u32,
    pub target_version: LorawanVersion,
}

impl MigrationOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            run_id: None,
            activate_sessions: config.migration.activate_sessions,
            timeout_retries: config.migration.timeout_retries,
            target_version: config.target.lorawan_version,
        }
    }
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            run_id: None,
            activate_sessions: true,
            timeout_retries: 0,
            target_version: LorawanVersion::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteLevel {
    Info,
    Warning,
    /// Something an operator has to do by hand.
    Action,
}

/// Operator-facing note attached to a migration attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub level: NoteLevel,
    pub message: String,
}

impl Note {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoteLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoteLevel::Warning,
            message: message.into(),
        }
    }

    pub fn action(message: impl Into<String>) -> Self {
        Self {
            level: NoteLevel::Action,
            message: message.into(),
        }
    }
}

/// Contents of a migration row's options snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionsSnapshot {
    pub options: MigrationOptions,
    #[serde(default)]
    pub notes: Vec<Note>,
}

/// Result of migrating one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMigrationOutcome {
    pub dev_eui: DevEui,
    pub status: MigrationStatus,
    /// Id of the migration row written for this attempt.
    pub record_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub notes: Vec<Note>,
}

/// Phase tracking and notes for one attempt.
struct Attempt {
    dev_eui: DevEui,
    started_at: DateTime<Utc>,
    phase: MigrationPhase,
    notes: Vec<Note>,
}

impl Attempt {
    fn new(dev_eui: DevEui) -> Self {
        Self {
            dev_eui,
            started_at: Utc::now(),
            phase: MigrationPhase::Pending,
            notes: Vec::new(),
        }
    }

    fn advance(&mut self, next: MigrationPhase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "illegal transition {} -> {}",
            self.phase,
            next
        );
        debug!("{}: {} -> {}", self.dev_eui, self.phase, next);
        self.phase = next;
    }
}

/// Drives single-device migrations against one target backend.
pub struct Migrator {
    store: Arc<dyn RecordStore>,
    target: Arc<dyn BackendClient>,
    source_name: String,
    source_console: String,
    options: MigrationOptions,
}

impl Migrator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        target: Arc<dyn BackendClient>,
        source_name: impl Into<String>,
        source_console: impl Into<String>,
        options: MigrationOptions,
    ) -> Self {
        Self {
            store,
            target,
            source_name: source_name.into(),
            source_console: source_console.into(),
            options,
        }
    }

    pub fn options(&self) -> &MigrationOptions {
        &self.options
    }

    pub fn target_name(&self) -> &str {
        self.target.name()
    }

    /// Migrate one device and record the outcome.
    pub async fn migrate_device(&self, dev_eui: DevEui) -> Result<DeviceMigrationOutcome> {
        let mut attempt = Attempt::new(dev_eui);

        attempt.advance(MigrationPhase::Fetching);
        let stored = match self.store.get_device(&dev_eui).await? {
            Some(stored) => stored,
            None => {
                return self
                    .finish(attempt, MigrationPhase::Failed, Some("not found locally".into()))
                    .await
            }
        };
        if let Err(e) = stored.device.validate() {
            return self
                .finish(attempt, MigrationPhase::Failed, Some(e.to_string()))
                .await;
        }

        attempt.advance(MigrationPhase::Provisioning);
        if let Err(e) = self.provision(&stored.device).await {
            return self
                .finish(
                    attempt,
                    MigrationPhase::Failed,
                    Some(format!("provisioning on '{}' failed: {}", self.target.name(), e)),
                )
                .await;
        }

        if self.options.activate_sessions {
            self.push_session(&mut attempt).await?;
        }

        if stored.credential.is_placeholder() {
            attempt.notes.push(Note::action(format!(
                "AppKey is unknown locally. Enter it manually on the target ({}) or read it from the source console ({}) and re-run discovery.",
                self.target.console_url(),
                self.source_console
            )));
            return self
                .finish(
                    attempt,
                    MigrationPhase::RequiresManualSteps,
                    Some("application key unknown".into()),
                )
                .await;
        }

        attempt.advance(MigrationPhase::AssigningCredential);
        let credential = &stored.credential;
        match self
            .retrying("set_credential", &dev_eui, || {
                self.target.set_credential(&dev_eui, credential)
            })
            .await
        {
            Ok(()) => self.finish(attempt, MigrationPhase::Completed, None).await,
            Err(e) => {
                attempt.notes.push(Note::action(format!(
                    "Key assignment was rejected ({}). Enter the AppKey manually on the target ({}).",
                    e,
                    self.target.console_url()
                )));
                self.finish(
                    attempt,
                    MigrationPhase::RequiresManualSteps,
                    Some(format!("key assignment failed: {}", e)),
                )
                .await
            }
        }
    }

    /// Create the device, updating it instead if it already exists.
    async fn provision(&self, device: &DeviceRecord) -> BackendResult<()> {
        let dev_eui = &device.dev_eui;
        match self
            .retrying("create", dev_eui, || self.target.create(device))
            .await
        {
            Err(BackendError::Conflict(_)) => {
                debug!("{}: exists on '{}', updating", dev_eui, self.target.name());
                self.retrying("update", dev_eui, || self.target.update(dev_eui, device))
                    .await
            }
            other => other,
        }
    }

    /// Push stored session state to the target. Never changes the status.
    async fn push_session(&self, attempt: &mut Attempt) -> Result<()> {
        let dev_eui = attempt.dev_eui;
        if !self.target.supports_activation() {
            attempt.notes.push(Note::info(format!(
                "Target '{}' does not support session activation; the device will rejoin.",
                self.target.name()
            )));
            return Ok(());
        }

        let session = match self.store.get_session_keys(&dev_eui).await? {
            Some(session) => session,
            None => return Ok(()),
        };

        match self.target.activate(&dev_eui, &session).await {
            Ok(()) => attempt.notes.push(Note::info(format!(
                "Session activated (DevAddr {}, FCntUp {}).",
                session.dev_addr, session.f_cnt_up
            ))),
            Err(BackendError::Unsupported(msg)) => attempt.notes.push(Note::info(format!(
                "Session activation not supported by target '{}' ({}); the device will rejoin.",
                self.target.name(),
                msg
            ))),
            Err(e) => {
                warn!("{}: session activation failed: {}", dev_eui, e);
                attempt
                    .notes
                    .push(Note::warning(format!("Session activation failed: {}", e)));
            }
        }
        Ok(())
    }

    /// Repeat a target call while it times out, up to the configured retries.
    async fn retrying<F, Fut, T>(&self, op: &str, dev_eui: &DevEui, mut call: F) -> BackendResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BackendResult<T>>,
    {
        let mut retries = 0;
        loop {
            match call().await {
                Err(e) if e.is_timeout() && retries < self.options.timeout_retries => {
                    retries += 1;
                    warn!(
                        "{}: {} timed out, retry {}/{}",
                        dev_eui, op, retries, self.options.timeout_retries
                    );
                }
                other => return other,
            }
        }
    }

    /// Write the migration row for a terminal phase.
    async fn finish(
        &self,
        mut attempt: Attempt,
        terminal: MigrationPhase,
        error: Option<String>,
    ) -> Result<DeviceMigrationOutcome> {
        attempt.advance(terminal);
        let status = terminal.status();

        let snapshot = OptionsSnapshot {
            options: self.options.clone(),
            notes: attempt.notes.clone(),
        };
        let id = self
            .store
            .save_migration_record(&NewMigrationRecord {
                dev_eui: attempt.dev_eui,
                source_backend: self.source_name.clone(),
                target_backend: self.target.name().to_string(),
                status: MigrationStatus::InProgress,
                options_snapshot: serde_json::to_value(&snapshot)?,
                started_at: attempt.started_at,
                completed_at: None,
            })
            .await?;
        self.store
            .update_migration_status(id, status, error.as_deref(), Some(Utc::now()))
            .await?;

        match (&status, &error) {
            (MigrationStatus::Completed, _) => info!("{}: completed", attempt.dev_eui),
            (_, Some(e)) => warn!("{}: {} ({})", attempt.dev_eui, status, e),
            (_, None) => warn!("{}: {}", attempt.dev_eui, status),
        }

        Ok(DeviceMigrationOutcome {
            dev_eui: attempt.dev_eui,
            status,
            record_id: id,
            error,
            notes: attempt.notes,
        })
    }
}
