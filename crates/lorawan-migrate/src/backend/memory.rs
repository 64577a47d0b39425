//! In-memory backend for tests.
//!
//! Behaves like a well-mannered backend (conflict on duplicate create,
//! not-found on missing devices, keys echoed through the two wire fields)
//! and records every call so tests can assert on what was sent. Failures
//! can be injected per operation, once or persistently, and per device.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::{BackendClient, ConnectionResult};
use crate::config::BackendVariant;
use crate::core::{
    ApplicationRef, Credential, DevEui, DeviceProfileRef, DeviceRecord, Eui64, SessionState,
};
use crate::error::{BackendError, BackendResult};
use crate::mapper::{self, LorawanVersion, WireKeys};

/// Backend operations, for call logs and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    TestConnection,
    ListApplications,
    ListDeviceProfiles,
    ListDevices,
    GetDevice,
    GetCredential,
    GetSessionState,
    Create,
    Update,
    SetCredential,
    Activate,
    Delete,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: Op,
    pub dev_eui: Option<DevEui>,
}

#[derive(Default)]
struct State {
    applications: Vec<ApplicationRef>,
    profiles: Vec<DeviceProfileRef>,
    devices: BTreeMap<DevEui, DeviceRecord>,
    keys: HashMap<DevEui, (WireKeys, Option<Eui64>)>,
    sessions: HashMap<DevEui, SessionState>,
    calls: Vec<Call>,
    queued: HashMap<Op, VecDeque<BackendError>>,
    persistent: HashMap<Op, BackendError>,
    per_device: HashMap<(Op, DevEui), BackendError>,
}

/// A backend held entirely in memory.
pub struct InMemoryBackend {
    name: String,
    console_url: String,
    version: LorawanVersion,
    supports_activation: bool,
    latency: Duration,
    state: Mutex<State>,
}

impl InMemoryBackend {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            console_url: format!("https://{}.example.com", name),
            version: LorawanVersion::V1_0,
            supports_activation: true,
            latency: Duration::ZERO,
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_version(mut self, version: LorawanVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_activation(mut self, supported: bool) -> Self {
        self.supports_activation = supported;
        self
    }

    /// Delay every call by `latency` (use with a paused tokio clock).
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // --- seeding ---

    pub fn add_application(&self, app: ApplicationRef) {
        self.state().applications.push(app);
    }

    pub fn add_profile(&self, profile: DeviceProfileRef) {
        self.state().profiles.push(profile);
    }

    pub fn insert_device(&self, device: DeviceRecord) {
        self.state().devices.insert(device.dev_eui, device);
    }

    pub fn insert_credential(&self, credential: &Credential) {
        self.state().keys.insert(
            credential.dev_eui,
            (mapper::write_app_key(credential.app_key), credential.join_eui),
        );
    }

    /// Set the raw wire fields, e.g. to model a backend that only fills one.
    pub fn set_wire_keys(&self, dev_eui: DevEui, keys: WireKeys) {
        self.state().keys.insert(dev_eui, (keys, None));
    }

    pub fn insert_session(&self, session: SessionState) {
        self.state().sessions.insert(session.dev_eui, session);
    }

    // --- failure injection ---

    /// Fail the next call to `op` with `err`. Queued failures are consumed
    /// in order.
    pub fn fail_next(&self, op: Op, err: BackendError) {
        self.state().queued.entry(op).or_default().push_back(err);
    }

    /// Fail every call to `op` until cleared.
    pub fn fail_always(&self, op: Op, err: BackendError) {
        self.state().persistent.insert(op, err);
    }

    /// Fail every call to `op` for one device.
    pub fn fail_device(&self, op: Op, dev_eui: DevEui, err: BackendError) {
        self.state().per_device.insert((op, dev_eui), err);
    }

    // --- inspection ---

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn call_count(&self, op: Op) -> usize {
        self.state().calls.iter().filter(|c| c.op == op).count()
    }

    pub fn device(&self, dev_eui: &DevEui) -> Option<DeviceRecord> {
        self.state().devices.get(dev_eui).cloned()
    }

    pub fn device_count(&self) -> usize {
        self.state().devices.len()
    }

    pub fn wire_keys(&self, dev_eui: &DevEui) -> Option<WireKeys> {
        self.state().keys.get(dev_eui).map(|(k, _)| *k)
    }

    pub fn session(&self, dev_eui: &DevEui) -> Option<SessionState> {
        self.state().sessions.get(dev_eui).cloned()
    }

    /// Log the call, wait out the latency, then apply injected failures.
    async fn enter(&self, op: Op, dev_eui: Option<DevEui>) -> BackendResult<()> {
        self.state().calls.push(Call { op, dev_eui });
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut state = self.state();
        if let Some(eui) = dev_eui {
            if let Some(err) = state.per_device.get(&(op, eui)) {
                return Err(err.clone());
            }
        }
        if let Some(err) = state.queued.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        if let Some(err) = state.persistent.get(&op) {
            return Err(err.clone());
        }
        Ok(())
    }

    fn not_found(dev_eui: &DevEui) -> BackendError {
        BackendError::NotFound(format!("device {} does not exist", dev_eui))
    }
}

#[async_trait]
impl BackendClient for InMemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn variant(&self) -> BackendVariant {
        BackendVariant::Rest
    }

    fn supports_activation(&self) -> bool {
        self.supports_activation
    }

    fn console_url(&self) -> &str {
        &self.console_url
    }

    async fn test_connection(&self) -> ConnectionResult {
        match self.enter(Op::TestConnection, None).await {
            Ok(()) => ConnectionResult {
                ok: true,
                detail: Some(format!(
                    "listed {} application(s)",
                    self.state().applications.len()
                )),
                error: None,
                latency_ms: self.latency.as_millis() as u64,
            },
            Err(e) => ConnectionResult {
                ok: false,
                detail: None,
                error: Some(e.to_string()),
                latency_ms: self.latency.as_millis() as u64,
            },
        }
    }

    async fn list_applications(&self, tenant_id: &str) -> BackendResult<Vec<ApplicationRef>> {
        self.enter(Op::ListApplications, None).await?;
        Ok(self
            .state()
            .applications
            .iter()
            .filter(|a| a.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn list_device_profiles(&self, _tenant_id: &str) -> BackendResult<Vec<DeviceProfileRef>> {
        self.enter(Op::ListDeviceProfiles, None).await?;
        Ok(self.state().profiles.clone())
    }

    async fn list_devices(&self, application_id: &str) -> BackendResult<Vec<DeviceRecord>> {
        self.enter(Op::ListDevices, None).await?;
        Ok(self
            .state()
            .devices
            .values()
            .filter(|d| d.application_id == application_id)
            .cloned()
            .collect())
    }

    async fn get_device(&self, dev_eui: &DevEui) -> BackendResult<DeviceRecord> {
        self.enter(Op::GetDevice, Some(*dev_eui)).await?;
        self.device(dev_eui).ok_or_else(|| Self::not_found(dev_eui))
    }

    async fn get_credential(&self, dev_eui: &DevEui) -> BackendResult<Credential> {
        self.enter(Op::GetCredential, Some(*dev_eui)).await?;
        let state = self.state();
        Ok(match state.keys.get(dev_eui) {
            Some((wire, join_eui)) => Credential {
                dev_eui: *dev_eui,
                join_eui: *join_eui,
                app_key: mapper::read_app_key(self.version, wire),
            },
            None => Credential::placeholder(*dev_eui),
        })
    }

    async fn get_session_state(&self, dev_eui: &DevEui) -> BackendResult<Option<SessionState>> {
        self.enter(Op::GetSessionState, Some(*dev_eui)).await?;
        Ok(self.session(dev_eui))
    }

    async fn create(&self, device: &DeviceRecord) -> BackendResult<()> {
        self.enter(Op::Create, Some(device.dev_eui)).await?;
        let mut state = self.state();
        if state.devices.contains_key(&device.dev_eui) {
            return Err(BackendError::Conflict(format!(
                "device {} already exists",
                device.dev_eui
            )));
        }
        state.devices.insert(device.dev_eui, device.clone());
        Ok(())
    }

    async fn update(&self, dev_eui: &DevEui, device: &DeviceRecord) -> BackendResult<()> {
        self.enter(Op::Update, Some(*dev_eui)).await?;
        let mut state = self.state();
        match state.devices.get_mut(dev_eui) {
            Some(existing) => {
                *existing = device.clone();
                Ok(())
            }
            None => Err(Self::not_found(dev_eui)),
        }
    }

    async fn set_credential(&self, dev_eui: &DevEui, credential: &Credential) -> BackendResult<()> {
        self.enter(Op::SetCredential, Some(*dev_eui)).await?;
        let mut state = self.state();
        if !state.devices.contains_key(dev_eui) {
            return Err(Self::not_found(dev_eui));
        }
        state.keys.insert(
            *dev_eui,
            (mapper::write_app_key(credential.app_key), credential.join_eui),
        );
        Ok(())
    }

    async fn activate(&self, dev_eui: &DevEui, session: &SessionState) -> BackendResult<()> {
        self.enter(Op::Activate, Some(*dev_eui)).await?;
        if !self.supports_activation {
            return Err(BackendError::Unsupported(format!(
                "backend '{}' does not accept session activation",
                self.name
            )));
        }
        let mut state = self.state();
        if !state.devices.contains_key(dev_eui) {
            return Err(Self::not_found(dev_eui));
        }
        state.sessions.insert(*dev_eui, session.clone());
        Ok(())
    }

    async fn delete(&self, dev_eui: &DevEui) -> BackendResult<()> {
        self.enter(Op::Delete, Some(*dev_eui)).await?;
        let mut state = self.state();
        if state.devices.remove(dev_eui).is_none() {
            return Err(Self::not_found(dev_eui));
        }
        state.keys.remove(dev_eui);
        state.sessions.remove(dev_eui);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AesKey;

    fn record(eui: &str) -> DeviceRecord {
        DeviceRecord {
            dev_eui: Eui64::parse(eui).unwrap(),
            name: format!("dev-{}", eui),
            description: String::new(),
            application_id: "app".into(),
            device_profile_id: "profile".into(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_create_conflicts() {
        let backend = InMemoryBackend::new("target");
        let device = record("0000000000000001");
        backend.create(&device).await.unwrap();
        assert!(matches!(
            backend.create(&device).await,
            Err(BackendError::Conflict(_))
        ));
        assert_eq!(backend.call_count(Op::Create), 2);
    }

    #[tokio::test]
    async fn test_queued_failure_is_consumed_once() {
        let backend = InMemoryBackend::new("target");
        backend.fail_next(Op::Create, BackendError::Timeout(10));
        let device = record("0000000000000002");
        assert!(backend.create(&device).await.unwrap_err().is_timeout());
        backend.create(&device).await.unwrap();
    }

    #[tokio::test]
    async fn test_keys_written_to_both_fields() {
        let backend = InMemoryBackend::new("target");
        let device = record("0000000000000003");
        backend.insert_device(device.clone());
        let key = AesKey::parse(&"5".repeat(32)).unwrap();
        backend
            .set_credential(
                &device.dev_eui,
                &Credential {
                    dev_eui: device.dev_eui,
                    join_eui: None,
                    app_key: key,
                },
            )
            .await
            .unwrap();
        let wire = backend.wire_keys(&device.dev_eui).unwrap();
        assert_eq!(wire.nwk_key, key);
        assert_eq!(wire.app_key, key);
    }

    #[tokio::test]
    async fn test_missing_keys_read_as_placeholder() {
        let backend = InMemoryBackend::new("source");
        let cred = backend
            .get_credential(&Eui64::parse("0000000000000004").unwrap())
            .await
            .unwrap();
        assert!(cred.is_placeholder());
    }
}
