//! Key and session fields shared by both backend variants.
//!
//! The variants differ in how they name the device and join EUIs and in the
//! envelope around these fields, not in the fields themselves. Each variant
//! flattens these structs into its own wire types.

use serde::{Deserialize, Serialize};

use crate::core::{AesKey, Credential, DevAddr, DevEui, Eui64, SessionState};
use crate::error::{BackendError, BackendResult, MigrateError};
use crate::mapper::{self, LorawanVersion, WireKeys};

pub(crate) fn invalid(field: &str, e: MigrateError) -> BackendError {
    BackendError::protocol(200, format!("invalid {} in response: {}", field, e))
}

/// Parse an optional EUI field; empty means absent.
pub(crate) fn parse_optional_eui(field: &str, value: Option<&str>) -> BackendResult<Option<Eui64>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => Eui64::parse(s).map(Some).map_err(|e| invalid(field, e)),
    }
}

/// The two root-key fields.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct KeyFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nwk_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_key: Option<String>,
}

impl KeyFields {
    /// The AppKey written to both fields.
    pub fn from_credential(credential: &Credential) -> Self {
        let wire = mapper::write_app_key(credential.app_key);
        Self {
            nwk_key: Some(wire.nwk_key.to_wire()),
            app_key: Some(wire.app_key.to_wire()),
        }
    }

    pub fn into_credential(
        self,
        version: LorawanVersion,
        dev_eui: &DevEui,
        join_eui: Option<Eui64>,
    ) -> BackendResult<Credential> {
        let wire = WireKeys {
            nwk_key: AesKey::parse_wire(self.nwk_key.as_deref()).map_err(|e| invalid("nwkKey", e))?,
            app_key: AesKey::parse_wire(self.app_key.as_deref()).map_err(|e| invalid("appKey", e))?,
        };
        Ok(Credential {
            dev_eui: *dev_eui,
            join_eui,
            app_key: mapper::read_app_key(version, &wire),
        })
    }
}

/// Address, session keys and frame counters of an activated device.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct SessionFields {
    #[serde(rename = "devAddr", default)]
    pub dev_addr: String,
    #[serde(rename = "appSKey", default)]
    pub app_s_key: String,
    #[serde(rename = "nwkSEncKey", default)]
    pub nwk_s_enc_key: String,
    #[serde(rename = "sNwkSIntKey", default)]
    pub s_nwk_s_int_key: String,
    #[serde(rename = "fNwkSIntKey", default)]
    pub f_nwk_s_int_key: String,
    #[serde(rename = "fCntUp", default)]
    pub f_cnt_up: u32,
    #[serde(rename = "nFCntDown", default)]
    pub n_f_cnt_down: u32,
    #[serde(rename = "aFCntDown", default)]
    pub a_f_cnt_down: u32,
}

impl SessionFields {
    pub fn from_session(session: &SessionState) -> Self {
        let nwk = session.nwk_s_key.to_wire();
        Self {
            dev_addr: session.dev_addr.to_wire(),
            app_s_key: session.app_s_key.to_wire(),
            // 1.0.x devices use one network session key for all three roles.
            nwk_s_enc_key: nwk.clone(),
            s_nwk_s_int_key: nwk.clone(),
            f_nwk_s_int_key: nwk,
            f_cnt_up: session.f_cnt_up,
            n_f_cnt_down: session.f_cnt_down,
            a_f_cnt_down: session.f_cnt_down,
        }
    }

    /// `None` for a device that never joined.
    pub fn into_session(self, dev_eui: &DevEui) -> BackendResult<Option<SessionState>> {
        if self.dev_addr.is_empty() {
            return Ok(None);
        }
        let dev_addr = DevAddr::parse(&self.dev_addr).map_err(|e| invalid("devAddr", e))?;
        let nwk_source = if self.nwk_s_enc_key.is_empty() {
            self.f_nwk_s_int_key.as_str()
        } else {
            self.nwk_s_enc_key.as_str()
        };
        let nwk_s_key =
            AesKey::parse_wire(Some(nwk_source)).map_err(|e| invalid("nwkSEncKey", e))?;
        let app_s_key =
            AesKey::parse_wire(Some(self.app_s_key.as_str())).map_err(|e| invalid("appSKey", e))?;
        if nwk_s_key.is_placeholder() && app_s_key.is_placeholder() {
            return Ok(None);
        }
        Ok(Some(SessionState {
            dev_eui: *dev_eui,
            dev_addr,
            nwk_s_key,
            app_s_key,
            f_cnt_up: self.f_cnt_up,
            f_cnt_down: self.n_f_cnt_down,
        }))
    }
}
