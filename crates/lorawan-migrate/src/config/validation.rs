//! Configuration validation.

use super::{BackendConfig, Config};
use crate::error::{MigrateError, Result};

fn validate_backend(role: &str, backend: &BackendConfig) -> Result<()> {
    if backend.name.trim().is_empty() {
        return Err(MigrateError::Config(format!("{}.name is required", role)));
    }
    if backend.url.trim().is_empty() {
        return Err(MigrateError::Config(format!("{}.url is required", role)));
    }
    if !(backend.url.starts_with("http://") || backend.url.starts_with("https://")) {
        return Err(MigrateError::Config(format!(
            "{}.url must start with http:// or https://, got '{}'",
            role, backend.url
        )));
    }
    if backend.api_token.trim().is_empty() {
        return Err(MigrateError::Config(format!(
            "{}.api_token is required",
            role
        )));
    }
    if backend.timeout_secs == 0 {
        return Err(MigrateError::Config(format!(
            "{}.timeout_secs must be at least 1",
            role
        )));
    }
    if backend.page_size == 0 {
        return Err(MigrateError::Config(format!(
            "{}.page_size must be at least 1",
            role
        )));
    }
    Ok(())
}

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_backend("source", &config.source)?;
    validate_backend("target", &config.target)?;

    // Cannot migrate onto the same backend tenant
    if config.source.base_url() == config.target.base_url()
        && config.source.tenant_id == config.target.tenant_id
    {
        return Err(MigrateError::Config(
            "source and target cannot be the same backend tenant".into(),
        ));
    }

    if config.migration.batch_size == 0 {
        return Err(MigrateError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }
    if config.discovery.concurrency == 0 {
        return Err(MigrateError::Config(
            "discovery.concurrency must be at least 1".into(),
        ));
    }

    Ok(())
}
