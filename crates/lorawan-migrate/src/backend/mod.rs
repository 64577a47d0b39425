//! Device-management backend clients.
//!
//! [`BackendClient`] is the one interface the orchestrator and the discovery
//! sweep talk to. Two concrete variants implement it:
//!
//! - [`RestClient`]: `{url}/api/{resource}` JSON API
//! - [`RpcClient`]: `{url}/api.<Service>/<Method>` unary RPC stubs
//!
//! The variant is picked once, by [`connect`], from the explicit
//! `variant` field of the backend config. Nothing downstream branches on it.
//!
//! Clients hold no per-call mutable state, so one `Arc<dyn BackendClient>`
//! is shared by every concurrent device migration in a batch.

mod http;
#[cfg(test)]
pub mod memory;
mod rest;
mod rpc;
#[cfg(test)]
mod stub_server;
mod wire;

pub use http::HttpTransport;
pub use rest::RestClient;
pub use rpc::RpcClient;

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{BackendConfig, BackendVariant};
use crate::core::{
    ApplicationRef, Credential, DevEui, DeviceProfileRef, DeviceRecord, SessionState,
};
use crate::error::{BackendResult, Result};

/// Result of a connection probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub latency_ms: u64,
}

/// Uniform operations against one backend instance.
///
/// Every call is bounded by the backend's per-call timeout. All calls are
/// safe to retry except [`create`](BackendClient::create).
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Configured backend name.
    fn name(&self) -> &str;

    /// Protocol variant.
    fn variant(&self) -> BackendVariant;

    /// Whether [`activate`](BackendClient::activate) can succeed at all.
    fn supports_activation(&self) -> bool;

    /// Operator console URL for notes.
    fn console_url(&self) -> &str;

    /// Probe the backend with a bounded list query. Never mutates state.
    async fn test_connection(&self) -> ConnectionResult;

    async fn list_applications(&self, tenant_id: &str) -> BackendResult<Vec<ApplicationRef>>;

    async fn list_device_profiles(&self, tenant_id: &str) -> BackendResult<Vec<DeviceProfileRef>>;

    async fn list_devices(&self, application_id: &str) -> BackendResult<Vec<DeviceRecord>>;

    /// Fetch one device; `NotFound` if absent.
    async fn get_device(&self, dev_eui: &DevEui) -> BackendResult<DeviceRecord>;

    /// Fetch the join credential. A device without keys yields the
    /// placeholder credential rather than `NotFound`.
    async fn get_credential(&self, dev_eui: &DevEui) -> BackendResult<Credential>;

    /// Fetch the activation state, `None` for devices that never joined.
    async fn get_session_state(&self, dev_eui: &DevEui) -> BackendResult<Option<SessionState>>;

    /// Create a device. `Conflict` means it already exists.
    async fn create(&self, device: &DeviceRecord) -> BackendResult<()>;

    async fn update(&self, dev_eui: &DevEui, device: &DeviceRecord) -> BackendResult<()>;

    /// Assign keys, writing the AppKey to both key fields. Tries the
    /// protocol's canonical verb first and the alternate verb once if the
    /// backend rejects it.
    async fn set_credential(&self, dev_eui: &DevEui, credential: &Credential) -> BackendResult<()>;

    /// Push session state. `Unsupported` on variants without activation.
    async fn activate(&self, dev_eui: &DevEui, session: &SessionState) -> BackendResult<()>;

    async fn delete(&self, dev_eui: &DevEui) -> BackendResult<()>;
}

/// Build the client for a backend config.
pub fn connect(config: &BackendConfig) -> Result<Arc<dyn BackendClient>> {
    info!(
        "Connecting to backend '{}' ({} at {})",
        config.name, config.variant, config.base_url()
    );
    let client: Arc<dyn BackendClient> = match config.variant {
        BackendVariant::Rest => Arc::new(RestClient::new(config)?),
        BackendVariant::Rpc => Arc::new(RpcClient::new(config)?),
    };
    Ok(client)
}

/// Run a probe and wrap its outcome as a [`ConnectionResult`].
pub(crate) async fn probe<F, T>(fut: F) -> ConnectionResult
where
    F: Future<Output = BackendResult<Vec<T>>>,
{
    let start = Instant::now();
    let outcome = fut.await;
    let latency_ms = start.elapsed().as_millis() as u64;
    match outcome {
        Ok(items) => ConnectionResult {
            ok: true,
            detail: Some(format!("listed {} application(s)", items.len())),
            error: None,
            latency_ms,
        },
        Err(e) => ConnectionResult {
            ok: false,
            detail: None,
            error: Some(e.to_string()),
            latency_ms,
        },
    }
}

/// Collect every page of an offset/limit list call.
pub(crate) async fn paginate<T, F, Fut>(page_size: usize, mut fetch: F) -> BackendResult<Vec<T>>
where
    F: FnMut(usize, usize) -> Fut,
    Fut: Future<Output = BackendResult<Vec<T>>>,
{
    let page_size = page_size.max(1);
    let mut all = Vec::new();
    let mut offset = 0;
    loop {
        let page = fetch(offset, page_size).await?;
        let len = page.len();
        all.extend(page);
        if len < page_size {
            break;
        }
        offset += len;
    }
    Ok(all)
}
