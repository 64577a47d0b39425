//! Configuration type definitions.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::mapper::LorawanVersion;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Backend devices are discovered from.
    pub source: BackendConfig,

    /// Backend devices are migrated to.
    pub target: BackendConfig,

    /// Local record store.
    #[serde(default)]
    pub store: StoreConfig,

    /// Migration behavior.
    #[serde(default)]
    pub migration: MigrationConfig,

    /// Discovery sweep behavior.
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

/// Wire protocol spoken by a backend instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendVariant {
    /// `{url}/api/{resource}` JSON API.
    Rest,
    /// `{url}/api.<Service>/<Method>` unary RPC.
    Rpc,
}

impl BackendVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendVariant::Rest => "rest",
            BackendVariant::Rpc => "rpc",
        }
    }
}

impl fmt::Display for BackendVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection settings for one backend instance.
#[derive(Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Label recorded in migration history.
    pub name: String,

    /// Protocol variant. Always explicit; never guessed from the URL.
    pub variant: BackendVariant,

    /// Base URL, e.g. `https://ns.example.com`.
    pub url: String,

    /// Bearer token sent on every call.
    pub api_token: String,

    /// Tenant (organization) identifier passed through to list calls.
    #[serde(default)]
    pub tenant_id: String,

    /// Which key field holds the AppKey on this backend.
    #[serde(default)]
    pub lorawan_version: LorawanVersion,

    /// Per-call timeout in seconds (default: 10).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Accept self-signed TLS certificates (default: false).
    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// Page size for list calls (default: 100).
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Whether the backend accepts session activation (default: true).
    #[serde(default = "default_true")]
    pub supports_activation: bool,

    /// Operator console URL, quoted in manual-step notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console_url: Option<String>,
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    /// Console URL for operator notes, falling back to the API URL.
    pub fn console(&self) -> &str {
        self.console_url.as_deref().unwrap_or_else(|| self.base_url())
    }
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("name", &self.name)
            .field("variant", &self.variant)
            .field("url", &self.url)
            .field("api_token", &"[REDACTED]")
            .field("tenant_id", &self.tenant_id)
            .field("lorawan_version", &self.lorawan_version)
            .field("timeout_secs", &self.timeout_secs)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .field("page_size", &self.page_size)
            .field("supports_activation", &self.supports_activation)
            .field("console_url", &self.console_url)
            .finish()
    }
}

/// Record store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file (default: lorawan-migrate.db).
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Devices migrated concurrently per chunk (default: 5).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between chunks in milliseconds (default: 1000).
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,

    /// Push stored session state to the target (default: true).
    #[serde(default = "default_true")]
    pub activate_sessions: bool,

    /// Extra attempts for target calls that timed out (default: 0).
    #[serde(default)]
    pub timeout_retries: u32,
}

impl MigrationConfig {
    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_pause_ms: default_batch_pause_ms(),
            activate_sessions: true,
            timeout_retries: 0,
        }
    }
}

/// Discovery sweep configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Devices fetched concurrently within one application (default: 4).
    #[serde(default = "default_discovery_concurrency")]
    pub concurrency: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            concurrency: default_discovery_concurrency(),
        }
    }
}

// Default value functions for serde
fn default_timeout_secs() -> u64 {
    10
}

fn default_page_size() -> usize {
    100
}

fn default_true() -> bool {
    true
}

fn default_store_path() -> PathBuf {
    PathBuf::from("lorawan-migrate.db")
}

fn default_batch_size() -> usize {
    5
}

fn default_batch_pause_ms() -> u64 {
    1000
}

fn default_discovery_concurrency() -> usize {
    4
}
