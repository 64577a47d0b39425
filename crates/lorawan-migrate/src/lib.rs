//! # lorawan-migrate
//!
//! Move LoRaWAN device records and credentials between device-management
//! backends.
//!
//! The library provides:
//!
//! - **Backend clients** for a REST-style and an RPC-style backend behind one
//!   [`BackendClient`] trait, picked from explicit configuration
//! - **Credential field mapping** between stored AppKeys and the
//!   version-dependent wire key fields
//! - **Discovery** of every device on a source backend into a local
//!   [`RecordStore`]
//! - **Per-device migration** as a state machine with an append-only audit
//!   trail
//! - **Batch scheduling** in paced, concurrent chunks with partial-failure
//!   reporting
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use lorawan_migrate::{
//!     backend, BatchScheduler, Config, MigrationOptions, Migrator, RecordStore, SqliteStore,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> lorawan_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let store: Arc<dyn RecordStore> = Arc::new(SqliteStore::open(&config.store.path).await?);
//!     let target = backend::connect(&config.target)?;
//!     let migrator = Migrator::new(
//!         store.clone(),
//!         target,
//!         config.source.name.clone(),
//!         config.source.console().to_string(),
//!         MigrationOptions::from_config(&config),
//!     );
//!     let devices = store
//!         .get_all_devices()
//!         .await?
//!         .into_iter()
//!         .map(|d| d.device.dev_eui)
//!         .collect();
//!     let scheduler = BatchScheduler::from_config(Arc::new(migrator), &config.migration);
//!     let result = scheduler.run(devices, CancellationToken::new()).await?;
//!     println!("{} migrated, {} failed", result.successful, result.failed);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod core;
pub mod discovery;
pub mod error;
pub mod mapper;
pub mod orchestrator;
pub mod scheduler;
pub mod store;

// Re-exports for convenient access
pub use backend::{BackendClient, ConnectionResult};
pub use config::{BackendConfig, BackendVariant, Config, MigrationConfig};
pub use crate::core::{Credential, DevEui, DeviceRecord, ItemError, SessionState};
pub use discovery::{DiscoveryResult, DiscoverySweep};
pub use error::{BackendError, MigrateError, Result};
pub use mapper::LorawanVersion;
pub use orchestrator::{DeviceMigrationOutcome, MigrationOptions, MigrationPhase, Migrator};
pub use scheduler::{BatchResult, BatchScheduler};
pub use store::{MemoryStore, MigrationRecord, MigrationStatus, RecordStore, SqliteStore};
