//! RPC-style backend: unary calls at `{url}/api.<Service>/<Method>`.
//!
//! Each call is a JSON POST carrying the request message; the response body
//! is the reply message. Failures come back as `{"code": "...", "message":
//! "..."}` and are classified by the shared transport.

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::http::HttpTransport;
use super::wire::{invalid, parse_optional_eui, KeyFields, SessionFields};
use super::{paginate, probe, BackendClient, ConnectionResult};
use crate::config::{BackendConfig, BackendVariant};
use crate::core::{
    ApplicationRef, Credential, DevEui, DeviceProfileRef, DeviceRecord, Eui64, SessionState,
};
use crate::error::{BackendError, BackendResult, Result};
use crate::mapper::LorawanVersion;

const APPLICATION_SERVICE: &str = "api.ApplicationService";
const DEVICE_PROFILE_SERVICE: &str = "api.DeviceProfileService";
const DEVICE_SERVICE: &str = "api.DeviceService";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListRequest<'a> {
    limit: usize,
    offset: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    tenant_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    application_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListReply<T> {
    #[serde(default = "Vec::new")]
    result: Vec<T>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DevEuiRequest {
    dev_eui: String,
}

#[derive(Debug, Deserialize, Default)]
struct Empty {}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApplicationItem {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceProfileItem {
    id: String,
    name: String,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    mac_version: Option<String>,
    #[serde(default)]
    reg_params_revision: Option<String>,
    #[serde(default)]
    supports_otaa: bool,
    #[serde(default)]
    supports_class_b: bool,
    #[serde(default)]
    supports_class_c: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Device {
    dev_eui: String,
    name: String,
    #[serde(default)]
    description: String,
    application_id: String,
    device_profile_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct DeviceMessage {
    device: Device,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceKeys {
    #[serde(default)]
    dev_eui: String,
    #[serde(flatten)]
    keys: KeyFields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    join_eui: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceKeysMessage {
    #[serde(default)]
    device_keys: DeviceKeys,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceActivation {
    #[serde(default)]
    dev_eui: String,
    #[serde(flatten)]
    session: SessionFields,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceActivationMessage {
    #[serde(default)]
    device_activation: Option<DeviceActivation>,
}

impl Device {
    fn from_record(device: &DeviceRecord) -> Self {
        Self {
            dev_eui: device.dev_eui.to_wire(),
            name: device.name.clone(),
            description: device.description.clone(),
            application_id: device.application_id.clone(),
            device_profile_id: device.device_profile_id.clone(),
        }
    }

    fn into_record(self) -> BackendResult<DeviceRecord> {
        Ok(DeviceRecord {
            dev_eui: Eui64::parse(&self.dev_eui).map_err(|e| invalid("devEui", e))?,
            name: self.name,
            description: self.description,
            application_id: self.application_id,
            device_profile_id: self.device_profile_id,
        })
    }
}

fn keys_to_credential(
    version: LorawanVersion,
    dev_eui: &DevEui,
    keys: DeviceKeys,
) -> BackendResult<Credential> {
    let join_eui = parse_optional_eui("joinEui", keys.join_eui.as_deref())?;
    keys.keys.into_credential(version, dev_eui, join_eui)
}

fn credential_to_keys(dev_eui: &DevEui, credential: &Credential) -> DeviceKeysMessage {
    DeviceKeysMessage {
        device_keys: DeviceKeys {
            dev_eui: dev_eui.to_wire(),
            keys: KeyFields::from_credential(credential),
            join_eui: credential.join_eui.map(|e| e.to_wire()),
        },
    }
}

/// Client for the RPC variant.
pub struct RpcClient {
    name: String,
    console_url: String,
    page_size: usize,
    version: LorawanVersion,
    supports_activation: bool,
    tenant_id: String,
    http: HttpTransport,
}

impl RpcClient {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        Ok(Self {
            name: config.name.clone(),
            console_url: config.console().to_string(),
            page_size: config.page_size,
            version: config.lorawan_version,
            supports_activation: config.supports_activation,
            tenant_id: config.tenant_id.clone(),
            http: HttpTransport::new(config)?,
        })
    }

    /// One unary call.
    async fn unary<Req, Rep>(&self, service: &str, method: &str, request: &Req) -> BackendResult<Rep>
    where
        Req: Serialize + ?Sized + Sync,
        Rep: DeserializeOwned,
    {
        let path = rpc_path(service, method);
        let timeout_ms = self.http.timeout().as_millis().to_string();
        let builder = self
            .http
            .request(Method::POST, &path)
            .header("Connect-Protocol-Version", "1")
            .header("Connect-Timeout-Ms", timeout_ms)
            .json(request);
        self.http.execute_json(builder).await
    }

    async fn list_page<T: DeserializeOwned>(
        &self,
        service: &str,
        request: ListRequest<'_>,
    ) -> BackendResult<Vec<T>> {
        let reply: ListReply<T> = self.unary(service, "List", &request).await?;
        Ok(reply.result)
    }
}

fn rpc_path(service: &str, method: &str) -> String {
    format!("/{}/{}", service, method)
}

#[async_trait]
impl BackendClient for RpcClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn variant(&self) -> BackendVariant {
        BackendVariant::Rpc
    }

    fn supports_activation(&self) -> bool {
        self.supports_activation
    }

    fn console_url(&self) -> &str {
        &self.console_url
    }

    async fn test_connection(&self) -> ConnectionResult {
        let request = ListRequest {
            limit: 1,
            offset: 0,
            tenant_id: Some(&self.tenant_id),
            application_id: None,
        };
        probe(self.list_page::<ApplicationItem>(APPLICATION_SERVICE, request)).await
    }

    async fn list_applications(&self, tenant_id: &str) -> BackendResult<Vec<ApplicationRef>> {
        let items: Vec<ApplicationItem> = paginate(self.page_size, |offset, limit| {
            self.list_page(
                APPLICATION_SERVICE,
                ListRequest {
                    limit,
                    offset,
                    tenant_id: Some(tenant_id),
                    application_id: None,
                },
            )
        })
        .await?;

        Ok(items
            .into_iter()
            .map(|a| ApplicationRef {
                id: a.id,
                name: a.name,
                description: a.description,
                tenant_id: tenant_id.to_string(),
            })
            .collect())
    }

    async fn list_device_profiles(&self, tenant_id: &str) -> BackendResult<Vec<DeviceProfileRef>> {
        let items: Vec<DeviceProfileItem> = paginate(self.page_size, |offset, limit| {
            self.list_page(
                DEVICE_PROFILE_SERVICE,
                ListRequest {
                    limit,
                    offset,
                    tenant_id: Some(tenant_id),
                    application_id: None,
                },
            )
        })
        .await?;

        Ok(items
            .into_iter()
            .map(|p| DeviceProfileRef {
                id: p.id,
                backend: self.name.clone(),
                name: p.name,
                region: p.region,
                mac_version: p.mac_version,
                reg_params_revision: p.reg_params_revision,
                supports_otaa: p.supports_otaa,
                supports_class_b: p.supports_class_b,
                supports_class_c: p.supports_class_c,
            })
            .collect())
    }

    async fn list_devices(&self, application_id: &str) -> BackendResult<Vec<DeviceRecord>> {
        let items: Vec<Device> = paginate(self.page_size, |offset, limit| {
            self.list_page(
                DEVICE_SERVICE,
                ListRequest {
                    limit,
                    offset,
                    tenant_id: None,
                    application_id: Some(application_id),
                },
            )
        })
        .await?;

        items.into_iter().map(Device::into_record).collect()
    }

    async fn get_device(&self, dev_eui: &DevEui) -> BackendResult<DeviceRecord> {
        let reply: DeviceMessage = self
            .unary(
                DEVICE_SERVICE,
                "Get",
                &DevEuiRequest {
                    dev_eui: dev_eui.to_wire(),
                },
            )
            .await?;
        reply.device.into_record()
    }

    async fn get_credential(&self, dev_eui: &DevEui) -> BackendResult<Credential> {
        let request = DevEuiRequest {
            dev_eui: dev_eui.to_wire(),
        };
        match self
            .unary::<_, DeviceKeysMessage>(DEVICE_SERVICE, "GetKeys", &request)
            .await
        {
            Ok(reply) => keys_to_credential(self.version, dev_eui, reply.device_keys),
            Err(BackendError::NotFound(_)) => {
                debug!("{}: no keys for {}, using placeholder", self.name, dev_eui);
                Ok(Credential::placeholder(*dev_eui))
            }
            Err(e) => Err(e),
        }
    }

    async fn get_session_state(&self, dev_eui: &DevEui) -> BackendResult<Option<SessionState>> {
        let request = DevEuiRequest {
            dev_eui: dev_eui.to_wire(),
        };
        match self
            .unary::<_, DeviceActivationMessage>(DEVICE_SERVICE, "GetActivation", &request)
            .await
        {
            Ok(DeviceActivationMessage {
                device_activation: Some(activation),
            }) => activation.session.into_session(dev_eui),
            Ok(_) => Ok(None),
            Err(BackendError::NotFound(_)) | Err(BackendError::Unsupported(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create(&self, device: &DeviceRecord) -> BackendResult<()> {
        let request = DeviceMessage {
            device: Device::from_record(device),
        };
        self.unary::<_, Empty>(DEVICE_SERVICE, "Create", &request)
            .await
            .map(|_| ())
    }

    async fn update(&self, dev_eui: &DevEui, device: &DeviceRecord) -> BackendResult<()> {
        let mut wire = Device::from_record(device);
        wire.dev_eui = dev_eui.to_wire();
        self.unary::<_, Empty>(DEVICE_SERVICE, "Update", &DeviceMessage { device: wire })
            .await
            .map(|_| ())
    }

    async fn set_credential(&self, dev_eui: &DevEui, credential: &Credential) -> BackendResult<()> {
        let request = credential_to_keys(dev_eui, credential);
        match self
            .unary::<_, Empty>(DEVICE_SERVICE, "CreateKeys", &request)
            .await
        {
            Err(e) if e.is_rejection() => {
                debug!(
                    "{}: CreateKeys for {} rejected ({}), retrying as UpdateKeys",
                    self.name, dev_eui, e
                );
                self.unary::<_, Empty>(DEVICE_SERVICE, "UpdateKeys", &request)
                    .await
                    .map(|_| ())
            }
            other => other.map(|_| ()),
        }
    }

    async fn activate(&self, dev_eui: &DevEui, session: &SessionState) -> BackendResult<()> {
        if !self.supports_activation {
            return Err(BackendError::Unsupported(format!(
                "backend '{}' does not accept session activation",
                self.name
            )));
        }
        let request = DeviceActivationMessage {
            device_activation: Some(DeviceActivation {
                dev_eui: dev_eui.to_wire(),
                session: SessionFields::from_session(session),
            }),
        };
        self.unary::<_, Empty>(DEVICE_SERVICE, "Activate", &request)
            .await
            .map(|_| ())
    }

    async fn delete(&self, dev_eui: &DevEui) -> BackendResult<()> {
        let request = DevEuiRequest {
            dev_eui: dev_eui.to_wire(),
        };
        self.unary::<_, Empty>(DEVICE_SERVICE, "Delete", &request)
            .await
            .map(|_| ())
    }
}
