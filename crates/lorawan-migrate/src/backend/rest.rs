//! REST-style backend: `{url}/api/{resource}`.
//!
//! GET lists and reads, POST creates, PUT updates and assigns keys (with a
//! POST retry when the PUT is rejected), DELETE removes. Identifiers in
//! paths and bodies are lower-case hex; 64-bit ids travel as strings.

use async_trait::async_trait;
use reqwest::Method;
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

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    result: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApplicationItem {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(rename = "organizationID", default)]
    organization_id: String,
}

#[derive(Debug, Deserialize)]
struct DeviceProfileItem {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceProfileBody {
    device_profile: DeviceProfileWire,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceProfileWire {
    id: String,
    name: String,
    #[serde(default)]
    mac_version: Option<String>,
    #[serde(default)]
    reg_params_revision: Option<String>,
    #[serde(default)]
    rf_region: Option<String>,
    #[serde(default)]
    supports_join: bool,
    #[serde(default)]
    supports_class_b: bool,
    #[serde(default)]
    supports_class_c: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceWire {
    #[serde(rename = "devEUI")]
    dev_eui: String,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(rename = "applicationID")]
    application_id: String,
    #[serde(rename = "deviceProfileID")]
    device_profile_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct DeviceBody {
    device: DeviceWire,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DeviceKeysWire {
    #[serde(flatten)]
    keys: KeyFields,
    #[serde(rename = "appEUI", default, skip_serializing_if = "Option::is_none")]
    app_eui: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceKeysBody {
    #[serde(default)]
    device_keys: DeviceKeysWire,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DeviceActivationWire {
    #[serde(rename = "devEUI", default)]
    dev_eui: String,
    #[serde(flatten)]
    session: SessionFields,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceActivationBody {
    #[serde(default)]
    device_activation: Option<DeviceActivationWire>,
}

impl DeviceWire {
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
            dev_eui: Eui64::parse(&self.dev_eui).map_err(|e| invalid("devEUI", e))?,
            name: self.name,
            description: self.description,
            application_id: self.application_id,
            device_profile_id: self.device_profile_id,
        })
    }
}

impl DeviceActivationWire {
    fn from_session(session: &SessionState) -> Self {
        Self {
            dev_eui: session.dev_eui.to_wire(),
            session: SessionFields::from_session(session),
        }
    }
}

/// Client for the REST variant.
pub struct RestClient {
    name: String,
    console_url: String,
    page_size: usize,
    version: LorawanVersion,
    supports_activation: bool,
    tenant_id: String,
    http: HttpTransport,
}

impl RestClient {
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

    async fn send_device(&self, method: Method, path: &str, device: &DeviceRecord) -> BackendResult<()> {
        let body = DeviceBody {
            device: DeviceWire::from_record(device),
        };
        self.http
            .execute(self.http.request(method, path).json(&body))
            .await
            .map(|_| ())
    }

    async fn send_keys(&self, method: Method, dev_eui: &DevEui, body: &DeviceKeysBody) -> BackendResult<()> {
        let path = format!("/api/devices/{}/keys", dev_eui.to_wire());
        self.http
            .execute(self.http.request(method, &path).json(body))
            .await
            .map(|_| ())
    }

    async fn fetch_profile(&self, id: &str) -> BackendResult<DeviceProfileRef> {
        let path = format!("/api/device-profiles/{}", id);
        let body: DeviceProfileBody = self
            .http
            .execute_json(self.http.request(Method::GET, &path))
            .await?;
        let p = body.device_profile;
        Ok(DeviceProfileRef {
            id: p.id,
            backend: self.name.clone(),
            name: p.name,
            region: p.rf_region,
            mac_version: p.mac_version,
            reg_params_revision: p.reg_params_revision,
            supports_otaa: p.supports_join,
            supports_class_b: p.supports_class_b,
            supports_class_c: p.supports_class_c,
        })
    }
}

#[async_trait]
impl BackendClient for RestClient {
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
        let request = self
            .http
            .request(Method::GET, "/api/applications")
            .query(&[("limit", "1"), ("organizationID", self.tenant_id.as_str())]);
        probe(async move {
            let page: ListResponse<ApplicationItem> = self.http.execute_json(request).await?;
            Ok(page.result)
        })
        .await
    }

    async fn list_applications(&self, tenant_id: &str) -> BackendResult<Vec<ApplicationRef>> {
        let items = paginate(self.page_size, |offset, limit| {
            let request = self.http.request(Method::GET, "/api/applications").query(&[
                ("organizationID", tenant_id.to_string()),
                ("limit", limit.to_string()),
                ("offset", offset.to_string()),
            ]);
            async move {
                let page: ListResponse<ApplicationItem> = self.http.execute_json(request).await?;
                Ok(page.result)
            }
        })
        .await?;

        Ok(items
            .into_iter()
            .map(|a| ApplicationRef {
                id: a.id,
                name: a.name,
                description: a.description,
                tenant_id: if a.organization_id.is_empty() {
                    tenant_id.to_string()
                } else {
                    a.organization_id
                },
            })
            .collect())
    }

    async fn list_device_profiles(&self, tenant_id: &str) -> BackendResult<Vec<DeviceProfileRef>> {
        let items = paginate(self.page_size, |offset, limit| {
            let request = self.http.request(Method::GET, "/api/device-profiles").query(&[
                ("organizationID", tenant_id.to_string()),
                ("limit", limit.to_string()),
                ("offset", offset.to_string()),
            ]);
            async move {
                let page: ListResponse<DeviceProfileItem> = self.http.execute_json(request).await?;
                Ok(page.result)
            }
        })
        .await?;

        // The list view carries only ids and names; details need one read each.
        let mut profiles = Vec::with_capacity(items.len());
        for item in items {
            profiles.push(self.fetch_profile(&item.id).await?);
        }
        Ok(profiles)
    }

    async fn list_devices(&self, application_id: &str) -> BackendResult<Vec<DeviceRecord>> {
        let items = paginate(self.page_size, |offset, limit| {
            let request = self.http.request(Method::GET, "/api/devices").query(&[
                ("applicationID", application_id.to_string()),
                ("limit", limit.to_string()),
                ("offset", offset.to_string()),
            ]);
            async move {
                let page: ListResponse<DeviceWire> = self.http.execute_json(request).await?;
                Ok(page.result)
            }
        })
        .await?;

        items.into_iter().map(DeviceWire::into_record).collect()
    }

    async fn get_device(&self, dev_eui: &DevEui) -> BackendResult<DeviceRecord> {
        let path = format!("/api/devices/{}", dev_eui.to_wire());
        let body: DeviceBody = self
            .http
            .execute_json(self.http.request(Method::GET, &path))
            .await?;
        body.device.into_record()
    }

    async fn get_credential(&self, dev_eui: &DevEui) -> BackendResult<Credential> {
        let path = format!("/api/devices/{}/keys", dev_eui.to_wire());
        let body: DeviceKeysBody = match self
            .http
            .execute_json(self.http.request(Method::GET, &path))
            .await
        {
            Ok(body) => body,
            Err(BackendError::NotFound(_)) => {
                debug!("{}: no keys for {}, using placeholder", self.name, dev_eui);
                return Ok(Credential::placeholder(*dev_eui));
            }
            Err(e) => return Err(e),
        };
        keys_to_credential(self.version, dev_eui, body.device_keys)
    }

    async fn get_session_state(&self, dev_eui: &DevEui) -> BackendResult<Option<SessionState>> {
        let path = format!("/api/devices/{}/activation", dev_eui.to_wire());
        match self
            .http
            .execute_json::<DeviceActivationBody>(self.http.request(Method::GET, &path))
            .await
        {
            Ok(DeviceActivationBody {
                device_activation: Some(activation),
            }) => activation.session.into_session(dev_eui),
            Ok(_) => Ok(None),
            Err(BackendError::NotFound(_)) | Err(BackendError::Unsupported(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create(&self, device: &DeviceRecord) -> BackendResult<()> {
        self.send_device(Method::POST, "/api/devices", device).await
    }

    async fn update(&self, dev_eui: &DevEui, device: &DeviceRecord) -> BackendResult<()> {
        let path = format!("/api/devices/{}", dev_eui.to_wire());
        match self.send_device(Method::PUT, &path, device).await {
            Err(e) if e.is_rejection() && !matches!(e, BackendError::NotFound(_)) => {
                debug!("{}: PUT {} rejected ({}), retrying as POST", self.name, path, e);
                self.send_device(Method::POST, &path, device).await
            }
            other => other,
        }
    }

    async fn set_credential(&self, dev_eui: &DevEui, credential: &Credential) -> BackendResult<()> {
        let body = credential_to_keys(credential);
        match self.send_keys(Method::PUT, dev_eui, &body).await {
            Err(e) if e.is_rejection() => {
                debug!("{}: PUT keys for {} rejected ({}), retrying as POST", self.name, dev_eui, e);
                self.send_keys(Method::POST, dev_eui, &body).await
            }
            other => other,
        }
    }

    async fn activate(&self, dev_eui: &DevEui, session: &SessionState) -> BackendResult<()> {
        if !self.supports_activation {
            return Err(BackendError::Unsupported(format!(
                "backend '{}' does not accept session activation",
                self.name
            )));
        }
        let path = format!("/api/devices/{}/activate", dev_eui.to_wire());
        let body = DeviceActivationBody {
            device_activation: Some(DeviceActivationWire::from_session(session)),
        };
        self.http
            .execute(self.http.request(Method::POST, &path).json(&body))
            .await
            .map(|_| ())
    }

    async fn delete(&self, dev_eui: &DevEui) -> BackendResult<()> {
        let path = format!("/api/devices/{}", dev_eui.to_wire());
        self.http
            .execute(self.http.request(Method::DELETE, &path))
            .await
            .map(|_| ())
    }
}

fn keys_to_credential(
    version: LorawanVersion,
    dev_eui: &DevEui,
    keys: DeviceKeysWire,
) -> BackendResult<Credential> {
    let join_eui = parse_optional_eui("appEUI", keys.app_eui.as_deref())?;
    keys.keys.into_credential(version, dev_eui, join_eui)
}

fn credential_to_keys(credential: &Credential) -> DeviceKeysBody {
    DeviceKeysBody {
        device_keys: DeviceKeysWire {
            keys: KeyFields::from_credential(credential),
            app_eui: credential.join_eui.map(|e| e.to_wire()),
        },
    }
}
