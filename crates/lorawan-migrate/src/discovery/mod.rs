//! Discovery sweep: source backend -> record store.
//!
//! Enumerates every application of the source tenant and every device in
//! each, fetches the device, its credential and session state, and upserts
//! them locally. Device profiles are listed once per sweep and saved the
//! first time a device references them.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::BackendClient;
use crate::core::{DeviceProfileRef, DeviceRecord, ItemError};
use crate::error::{MigrateError, Result};
use crate::store::RecordStore;

/// Aggregate result of a sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub applications: usize,
    /// Devices listed across all applications.
    pub total: usize,
    /// Devices written to the record store.
    pub synced: usize,
    /// Synced devices whose key could not be read.
    pub unknown_keys: usize,
    pub sessions: usize,
    pub profiles: usize,
    pub errors: Vec<ItemError>,
}

enum DeviceSync {
    Synced {
        unknown_key: bool,
        session: bool,
        profile_saved: bool,
    },
    Failed(ItemError),
}

pub struct DiscoverySweep {
    source: Arc<dyn BackendClient>,
    store: Arc<dyn RecordStore>,
    tenant_id: String,
    concurrency: usize,
}

impl DiscoverySweep {
    pub fn new(
        source: Arc<dyn BackendClient>,
        store: Arc<dyn RecordStore>,
        tenant_id: impl Into<String>,
        concurrency: usize,
    ) -> Self {
        Self {
            source,
            store,
            tenant_id: tenant_id.into(),
            concurrency: concurrency.max(1),
        }
    }

    /// Run the sweep.
    ///
    /// Failing to list applications, or any record store failure, is
    /// returned as `Err`. Everything narrower is collected in the result.
    pub async fn run(&self) -> Result<DiscoveryResult> {
        let name = self.source.name().to_string();
        info!("Discovering devices on '{}' (tenant {})", name, self.tenant_id);

        let applications = self
            .source
            .list_applications(&self.tenant_id)
            .await
            .map_err(|e| MigrateError::backend(&name, e))?;

        let profiles: HashMap<String, DeviceProfileRef> =
            match self.source.list_device_profiles(&self.tenant_id).await {
                Ok(list) => list.into_iter().map(|p| (p.id.clone(), p)).collect(),
                Err(e) => {
                    warn!("Listing device profiles on '{}' failed: {}", name, e);
                    HashMap::new()
                }
            };
        debug!("Cached {} device profile(s)", profiles.len());
        let saved_profiles = Mutex::new(HashSet::new());

        let mut result = DiscoveryResult {
            applications: applications.len(),
            ..Default::default()
        };

        for app in &applications {
            let devices = match self.source.list_devices(&app.id).await {
                Ok(devices) => devices,
                Err(e) => {
                    warn!("Listing devices of application '{}' failed: {}", app.name, e);
                    result
                        .errors
                        .push(ItemError::application(&app.id, format!("list devices: {}", e)));
                    continue;
                }
            };
            info!(
                "Application '{}': {} device(s)",
                app.name,
                devices.len()
            );
            result.total += devices.len();

            let outcomes: Vec<Result<DeviceSync>> = stream::iter(devices)
                .map(|device| self.sync_device(device, &profiles, &saved_profiles))
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

            for outcome in outcomes {
                match outcome? {
                    DeviceSync::Synced {
                        unknown_key,
                        session,
                        profile_saved,
                    } => {
                        result.synced += 1;
                        result.unknown_keys += usize::from(unknown_key);
                        result.sessions += usize::from(session);
                        result.profiles += usize::from(profile_saved);
                    }
                    DeviceSync::Failed(err) => result.errors.push(err),
                }
            }
        }

        info!(
            "Discovery finished: {}/{} device(s) synced ({} without key), {} error(s)",
            result.synced,
            result.total,
            result.unknown_keys,
            result.errors.len()
        );
        Ok(result)
    }

    async fn sync_device(
        &self,
        listed: DeviceRecord,
        profiles: &HashMap<String, DeviceProfileRef>,
        saved_profiles: &Mutex<HashSet<String>>,
    ) -> Result<DeviceSync> {
        let dev_eui = listed.dev_eui;
        let fail = |what: &str, e: crate::error::BackendError| {
            warn!("{}: {} failed: {}", dev_eui, what, e);
            Ok(DeviceSync::Failed(ItemError::device(
                dev_eui,
                format!("{}: {}", what, e),
            )))
        };

        let device = match self.source.get_device(&dev_eui).await {
            Ok(device) => device,
            Err(e) => return fail("get device", e),
        };
        let credential = match self.source.get_credential(&dev_eui).await {
            Ok(credential) => credential,
            Err(e) => return fail("get credential", e),
        };
        let session = match self.source.get_session_state(&dev_eui).await {
            Ok(session) => session,
            Err(e) => return fail("get session state", e),
        };

        let profile_saved = match profiles.get(&device.device_profile_id) {
            Some(profile) if self.claim_profile(saved_profiles, &profile.id) => {
                self.store.save_device_profile(profile).await?;
                true
            }
            _ => false,
        };

        self.store.save_device(&device, &credential).await?;
        if let Some(session) = &session {
            self.store.save_session_keys(session).await?;
        }
        debug!("{}: synced", dev_eui);

        Ok(DeviceSync::Synced {
            unknown_key: credential.is_placeholder(),
            session: session.is_some(),
            profile_saved,
        })
    }

    /// True for the first device to reference a profile in this sweep.
    fn claim_profile(&self, saved: &Mutex<HashSet<String>>, id: &str) -> bool {
        saved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.to_string())
    }
}
