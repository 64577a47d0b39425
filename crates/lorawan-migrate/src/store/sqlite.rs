//! SQLite-backed record store.
//!
//! Timestamps are stored as RFC 3339 text with fixed microsecond precision
//! so that text order is time order. Keys and EUIs are stored as lower-case
//! hex, the same form they take on the wire.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, Pool, Sqlite};
use tracing::{debug, info};

use super::backend::{check_completion, status_to_str, str_to_status, RecordStore};
use super::{MigrationRecord, MigrationStatus, NewMigrationRecord};
use crate::core::{
    AesKey, Credential, DevAddr, DevEui, DeviceProfileRef, DeviceRecord, Eui64, SessionState,
    StoredDevice,
};
use crate::error::{MigrateError, Result};

const SCHEMA_SQL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS devices (
        dev_eui TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        application_id TEXT NOT NULL,
        device_profile_id TEXT NOT NULL,
        join_eui TEXT,
        app_key TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS session_keys (
        dev_eui TEXT PRIMARY KEY,
        dev_addr TEXT NOT NULL,
        nwk_s_key TEXT NOT NULL,
        app_s_key TEXT NOT NULL,
        f_cnt_up INTEGER NOT NULL,
        f_cnt_down INTEGER NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS device_profiles (
        id TEXT PRIMARY KEY,
        backend TEXT NOT NULL,
        name TEXT NOT NULL,
        region TEXT,
        mac_version TEXT,
        reg_params_revision TEXT,
        supports_otaa INTEGER NOT NULL,
        supports_class_b INTEGER NOT NULL,
        supports_class_c INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS migration_records (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        dev_eui TEXT NOT NULL,
        source_backend TEXT NOT NULL,
        target_backend TEXT NOT NULL,
        status TEXT NOT NULL CHECK (status IN
            ('pending', 'in_progress', 'completed', 'requires_manual_steps', 'failed')),
        error TEXT,
        options_snapshot TEXT NOT NULL,
        started_at TEXT NOT NULL,
        completed_at TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_migration_records_device
        ON migration_records(dev_eui, started_at DESC)",
];

#[derive(FromRow)]
struct DeviceRow {
    dev_eui: String,
    name: String,
    description: String,
    application_id: String,
    device_profile_id: String,
    join_eui: Option<String>,
    app_key: String,
}

#[derive(FromRow)]
struct SessionRow {
    dev_eui: String,
    dev_addr: String,
    nwk_s_key: String,
    app_s_key: String,
    f_cnt_up: i64,
    f_cnt_down: i64,
}

#[derive(FromRow)]
struct ProfileRow {
    id: String,
    backend: String,
    name: String,
    region: Option<String>,
    mac_version: Option<String>,
    reg_params_revision: Option<String>,
    supports_otaa: bool,
    supports_class_b: bool,
    supports_class_c: bool,
}

#[derive(FromRow)]
struct MigrationRow {
    id: i64,
    dev_eui: String,
    source_backend: String,
    target_backend: String,
    status: String,
    error: Option<String>,
    options_snapshot: String,
    started_at: String,
    completed_at: Option<String>,
}

fn corrupt(column: &str, e: impl std::fmt::Display) -> MigrateError {
    MigrateError::store(format!("corrupt value in column '{}': {}", column, e))
}

fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(column: &str, s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt(column, e))
}

fn counter(column: &str, v: i64) -> Result<u32> {
    u32::try_from(v).map_err(|e| corrupt(column, e))
}

impl DeviceRow {
    fn into_stored(self) -> Result<StoredDevice> {
        let dev_eui = Eui64::parse(&self.dev_eui).map_err(|e| corrupt("dev_eui", e))?;
        let join_eui = self
            .join_eui
            .as_deref()
            .map(Eui64::parse)
            .transpose()
            .map_err(|e| corrupt("join_eui", e))?;
        let app_key = AesKey::parse(&self.app_key).map_err(|e| corrupt("app_key", e))?;
        Ok(StoredDevice {
            device: DeviceRecord {
                dev_eui,
                name: self.name,
                description: self.description,
                application_id: self.application_id,
                device_profile_id: self.device_profile_id,
            },
            credential: Credential {
                dev_eui,
                join_eui,
                app_key,
            },
        })
    }
}

impl SessionRow {
    fn into_session(self) -> Result<SessionState> {
        Ok(SessionState {
            dev_eui: Eui64::parse(&self.dev_eui).map_err(|e| corrupt("dev_eui", e))?,
            dev_addr: DevAddr::parse(&self.dev_addr).map_err(|e| corrupt("dev_addr", e))?,
            nwk_s_key: AesKey::parse(&self.nwk_s_key).map_err(|e| corrupt("nwk_s_key", e))?,
            app_s_key: AesKey::parse(&self.app_s_key).map_err(|e| corrupt("app_s_key", e))?,
            f_cnt_up: counter("f_cnt_up", self.f_cnt_up)?,
            f_cnt_down: counter("f_cnt_down", self.f_cnt_down)?,
        })
    }
}

impl From<ProfileRow> for DeviceProfileRef {
    fn from(row: ProfileRow) -> Self {
        DeviceProfileRef {
            id: row.id,
            backend: row.backend,
            name: row.name,
            region: row.region,
            mac_version: row.mac_version,
            reg_params_revision: row.reg_params_revision,
            supports_otaa: row.supports_otaa,
            supports_class_b: row.supports_class_b,
            supports_class_c: row.supports_class_c,
        }
    }
}

impl MigrationRow {
    fn into_record(self) -> Result<MigrationRecord> {
        Ok(MigrationRecord {
            id: self.id,
            dev_eui: Eui64::parse(&self.dev_eui).map_err(|e| corrupt("dev_eui", e))?,
            source_backend: self.source_backend,
            target_backend: self.target_backend,
            status: str_to_status(&self.status)?,
            error: self.error,
            options_snapshot: serde_json::from_str(&self.options_snapshot)
                .map_err(|e| corrupt("options_snapshot", e))?,
            started_at: parse_ts("started_at", &self.started_at)?,
            completed_at: self
                .completed_at
                .as_deref()
                .map(|s| parse_ts("completed_at", s))
                .transpose()?,
        })
    }
}

/// Record store persisted in a SQLite database file.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path` and ensure the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        info!("Record store opened at {}", path.display());
        Ok(store)
    }

    /// A private in-memory database.
    pub async fn in_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // Each connection to :memory: is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables and indexes. Idempotent.
    pub async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA_SQL {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Record store schema ready");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn save_device(&self, device: &DeviceRecord, credential: &Credential) -> Result<()> {
        let placeholder = AesKey::PLACEHOLDER.to_wire();
        sqlx::query(
            "INSERT INTO devices
                (dev_eui, name, description, application_id, device_profile_id,
                 join_eui, app_key, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (dev_eui) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                application_id = excluded.application_id,
                device_profile_id = excluded.device_profile_id,
                join_eui = COALESCE(excluded.join_eui, devices.join_eui),
                app_key = CASE WHEN excluded.app_key = ?9
                               THEN devices.app_key
                               ELSE excluded.app_key END,
                updated_at = excluded.updated_at",
        )
        .bind(device.dev_eui.to_wire())
        .bind(&device.name)
        .bind(&device.description)
        .bind(&device.application_id)
        .bind(&device.device_profile_id)
        .bind(credential.join_eui.map(|e| e.to_wire()))
        .bind(credential.app_key.to_wire())
        .bind(ts(&Utc::now()))
        .bind(placeholder)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_device(&self, dev_eui: &DevEui) -> Result<Option<StoredDevice>> {
        let row = sqlx::query_as::<_, DeviceRow>(
            "SELECT dev_eui, name, description, application_id, device_profile_id, join_eui, app_key
             FROM devices WHERE dev_eui = ?",
        )
        .bind(dev_eui.to_wire())
        .fetch_optional(&self.pool)
        .await?;
        row.map(DeviceRow::into_stored).transpose()
    }

    async fn get_all_devices(&self) -> Result<Vec<StoredDevice>> {
        let rows = sqlx::query_as::<_, DeviceRow>(
            "SELECT dev_eui, name, description, application_id, device_profile_id, join_eui, app_key
             FROM devices ORDER BY dev_eui",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(DeviceRow::into_stored).collect()
    }

    async fn save_session_keys(&self, session: &SessionState) -> Result<()> {
        sqlx::query(
            "INSERT INTO session_keys
                (dev_eui, dev_addr, nwk_s_key, app_s_key, f_cnt_up, f_cnt_down, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (dev_eui) DO UPDATE SET
                dev_addr = excluded.dev_addr,
                nwk_s_key = excluded.nwk_s_key,
                app_s_key = excluded.app_s_key,
                f_cnt_up = excluded.f_cnt_up,
                f_cnt_down = excluded.f_cnt_down,
                updated_at = excluded.updated_at",
        )
        .bind(session.dev_eui.to_wire())
        .bind(session.dev_addr.to_wire())
        .bind(session.nwk_s_key.to_wire())
        .bind(session.app_s_key.to_wire())
        .bind(i64::from(session.f_cnt_up))
        .bind(i64::from(session.f_cnt_down))
        .bind(ts(&Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_session_keys(&self, dev_eui: &DevEui) -> Result<Option<SessionState>> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT dev_eui, dev_addr, nwk_s_key, app_s_key, f_cnt_up, f_cnt_down
             FROM session_keys WHERE dev_eui = ?",
        )
        .bind(dev_eui.to_wire())
        .fetch_optional(&self.pool)
        .await?;
        row.map(SessionRow::into_session).transpose()
    }

    async fn save_device_profile(&self, profile: &DeviceProfileRef) -> Result<()> {
        sqlx::query(
            "INSERT INTO device_profiles
                (id, backend, name, region, mac_version, reg_params_revision,
                 supports_otaa, supports_class_b, supports_class_c)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                backend = excluded.backend,
                name = excluded.name,
                region = excluded.region,
                mac_version = excluded.mac_version,
                reg_params_revision = excluded.reg_params_revision,
                supports_otaa = excluded.supports_otaa,
                supports_class_b = excluded.supports_class_b,
                supports_class_c = excluded.supports_class_c",
        )
        .bind(&profile.id)
        .bind(&profile.backend)
        .bind(&profile.name)
        .bind(&profile.region)
        .bind(&profile.mac_version)
        .bind(&profile.reg_params_revision)
        .bind(profile.supports_otaa)
        .bind(profile.supports_class_b)
        .bind(profile.supports_class_c)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_device_profile(&self, id: &str) -> Result<Option<DeviceProfileRef>> {
        let row = sqlx::query_as::<_, ProfileRow>(
            "SELECT id, backend, name, region, mac_version, reg_params_revision,
                    supports_otaa, supports_class_b, supports_class_c
             FROM device_profiles WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(DeviceProfileRef::from))
    }

    async fn save_migration_record(&self, record: &NewMigrationRecord) -> Result<i64> {
        check_completion(record.status, record.completed_at.as_ref())?;
        let result = sqlx::query(
            "INSERT INTO migration_records
                (dev_eui, source_backend, target_backend, status, options_snapshot,
                 started_at, completed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.dev_eui.to_wire())
        .bind(&record.source_backend)
        .bind(&record.target_backend)
        .bind(status_to_str(record.status))
        .bind(serde_json::to_string(&record.options_snapshot)?)
        .bind(ts(&record.started_at))
        .bind(record.completed_at.as_ref().map(ts))
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn update_migration_status(
        &self,
        id: i64,
        status: MigrationStatus,
        error: Option<&str>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        check_completion(status, completed_at.as_ref())?;
        let result = sqlx::query(
            "UPDATE migration_records SET status = ?, error = ?, completed_at = ? WHERE id = ?",
        )
        .bind(status_to_str(status))
        .bind(error)
        .bind(completed_at.as_ref().map(ts))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MigrateError::store(format!(
                "no migration record with id {}",
                id
            )));
        }
        Ok(())
    }

    async fn get_migration_history(&self, dev_eui: Option<&DevEui>) -> Result<Vec<MigrationRecord>> {
        const COLUMNS: &str = "SELECT id, dev_eui, source_backend, target_backend, status, error,
                                      options_snapshot, started_at, completed_at
                               FROM migration_records";
        let rows = match dev_eui {
            Some(eui) => {
                sqlx::query_as::<_, MigrationRow>(&format!(
                    "{} WHERE dev_eui = ? ORDER BY started_at DESC, id DESC",
                    COLUMNS
                ))
                .bind(eui.to_wire())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, MigrationRow>(&format!(
                    "{} ORDER BY started_at DESC, id DESC",
                    COLUMNS
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.into_iter().map(MigrationRow::into_record).collect()
    }

    fn store_type(&self) -> &'static str {
        "sqlite"
    }
}
