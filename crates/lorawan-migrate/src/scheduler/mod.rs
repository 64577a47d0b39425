//! Batch scheduler: fans device identifiers out to the migrator in paced
//! chunks.
//!
//! Devices within a chunk run concurrently; a chunk finishes when every
//! device in it has reached a terminal status. Chunks run strictly one after
//! another with a fixed pause in between. Cancellation is honored only
//! between chunks, since calls already sent to the target cannot be rolled
//! back.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::MigrationConfig;
use crate::core::{DevEui, ItemError};
use crate::error::{MigrateError, Result};
use crate::orchestrator::{DeviceMigrationOutcome, Migrator};
use crate::store::MigrationStatus;

/// Aggregate result of a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub run_id: String,
    pub total: usize,
    /// `Completed` plus `RequiresManualSteps`.
    pub successful: usize,
    pub failed: usize,
    /// One entry per failed device.
    pub errors: Vec<ItemError>,
    /// Devices never started because the run was cancelled.
    pub skipped: usize,
    pub cancelled: bool,
    /// Chunks actually started.
    pub chunks: usize,
    pub results: Vec<DeviceMigrationOutcome>,
}

impl BatchResult {
    /// Devices that ended in `RequiresManualSteps`.
    pub fn requires_manual_steps(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == MigrationStatus::RequiresManualSteps)
            .count()
    }
}

/// Fresh identifier for a batch run.
pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Number of chunks `total` devices split into.
pub fn chunk_count(total: usize, batch_size: usize) -> usize {
    total.div_ceil(batch_size.max(1))
}

pub struct BatchScheduler {
    migrator: Arc<Migrator>,
    batch_size: usize,
    pause: Duration,
}

impl BatchScheduler {
    pub fn new(migrator: Arc<Migrator>, batch_size: usize, pause: Duration) -> Self {
        Self {
            migrator,
            batch_size: batch_size.max(1),
            pause,
        }
    }

    pub fn from_config(migrator: Arc<Migrator>, config: &MigrationConfig) -> Self {
        Self::new(migrator, config.batch_size, config.batch_pause())
    }

    /// Migrate every device in `dev_euis`.
    ///
    /// Per-device failures are collected in the result. `Err` means a
    /// systemic failure (the record store); the chunk in flight is still
    /// drained before it is returned.
    pub async fn run(&self, dev_euis: Vec<DevEui>, cancel: CancellationToken) -> Result<BatchResult> {
        let run_id = self
            .migrator
            .options()
            .run_id
            .clone()
            .unwrap_or_else(new_run_id);
        let total = dev_euis.len();
        let chunk_total = chunk_count(total, self.batch_size);

        info!(
            "Starting batch run {}: {} device(s) in {} chunk(s) of up to {} -> '{}'",
            run_id,
            total,
            chunk_total,
            self.batch_size,
            self.migrator.target_name()
        );

        let mut result = BatchResult {
            run_id,
            total,
            successful: 0,
            failed: 0,
            errors: Vec::new(),
            skipped: 0,
            cancelled: false,
            chunks: 0,
            results: Vec::with_capacity(total),
        };

        for (index, chunk) in dev_euis.chunks(self.batch_size).enumerate() {
            if index > 0 && !self.pause.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.pause) => {}
                }
            }
            if cancel.is_cancelled() {
                result.skipped = total - index * self.batch_size;
                result.cancelled = true;
                warn!(
                    "Cancellation requested, skipping {} remaining device(s)",
                    result.skipped
                );
                break;
            }

            result.chunks += 1;
            info!(
                "Chunk {}/{}: migrating {} device(s)",
                index + 1,
                chunk_total,
                chunk.len()
            );
            self.run_chunk(chunk, &mut result).await?;
        }

        info!(
            "Batch run {} finished: {} successful ({} need manual steps), {} failed, {} skipped",
            result.run_id,
            result.successful,
            result.requires_manual_steps(),
            result.failed,
            result.skipped
        );
        Ok(result)
    }

    async fn run_chunk(&self, chunk: &[DevEui], result: &mut BatchResult) -> Result<()> {
        let handles: Vec<_> = chunk
            .iter()
            .map(|&dev_eui| {
                let migrator = self.migrator.clone();
                (
                    dev_eui,
                    tokio::spawn(async move { migrator.migrate_device(dev_eui).await }),
                )
            })
            .collect();

        let mut systemic: Option<MigrateError> = None;
        for (dev_eui, handle) in handles {
            match handle.await {
                Ok(Ok(outcome)) => {
                    if outcome.status.is_success() {
                        result.successful += 1;
                    } else {
                        result.failed += 1;
                        result.errors.push(ItemError::device(
                            dev_eui,
                            outcome
                                .error
                                .clone()
                                .unwrap_or_else(|| outcome.status.to_string()),
                        ));
                    }
                    result.results.push(outcome);
                }
                Ok(Err(e)) => {
                    error!("{}: {}", dev_eui, e);
                    if systemic.is_none() {
                        systemic = Some(e);
                    }
                }
                Err(e) => {
                    error!("{}: task panicked - {}", dev_eui, e);
                    result.failed += 1;
                    result
                        .errors
                        .push(ItemError::device(dev_eui, format!("Task panicked: {}", e)));
                }
            }
        }

        match systemic {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
