//! Device records as held by the record store and exchanged with backends.

use serde::{Deserialize, Serialize};

use super::identifier::{AesKey, DevAddr, DevEui, Eui64};
use crate::error::{MigrateError, Result};

/// A device's identity and profile references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub dev_eui: DevEui,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub application_id: String,
    pub device_profile_id: String,
}

impl DeviceRecord {
    /// Check that the record can be provisioned on a backend.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(MigrateError::Validation(format!(
                "device {} has an empty name",
                self.dev_eui
            )));
        }
        if self.device_profile_id.trim().is_empty() {
            return Err(MigrateError::Validation(format!(
                "device {} has no device profile",
                self.dev_eui
            )));
        }
        Ok(())
    }
}

/// Join credentials for OTAA.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub dev_eui: DevEui,
    #[serde(default)]
    pub join_eui: Option<Eui64>,
    #[serde(default)]
    pub app_key: AesKey,
}

impl Credential {
    /// A credential whose key is not known.
    pub fn placeholder(dev_eui: DevEui) -> Self {
        Self {
            dev_eui,
            join_eui: None,
            app_key: AesKey::PLACEHOLDER,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.app_key.is_placeholder()
    }

    /// Merge an incoming credential over an existing one.
    ///
    /// A known key is never replaced by the placeholder; the join EUI keeps
    /// its old value when the incoming one is absent.
    pub fn merged_over(self, existing: &Credential) -> Credential {
        let app_key = if self.app_key.is_placeholder() {
            existing.app_key
        } else {
            self.app_key
        };
        Credential {
            dev_eui: self.dev_eui,
            join_eui: self.join_eui.or(existing.join_eui),
            app_key,
        }
    }
}

/// Activation state of a joined device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub dev_eui: DevEui,
    pub dev_addr: DevAddr,
    pub nwk_s_key: AesKey,
    pub app_s_key: AesKey,
    pub f_cnt_up: u32,
    pub f_cnt_down: u32,
}

/// Backend-scoped device profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfileRef {
    pub id: String,
    /// Name of the backend the profile was read from.
    pub backend: String,
    pub name: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub mac_version: Option<String>,
    #[serde(default)]
    pub reg_params_revision: Option<String>,
    #[serde(default)]
    pub supports_otaa: bool,
    #[serde(default)]
    pub supports_class_b: bool,
    #[serde(default)]
    pub supports_class_c: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub tenant_id: String,
}

/// A device as read back from the record store, with its credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDevice {
    pub device: DeviceRecord,
    pub credential: Credential,
}

/// A per-unit failure collected, not thrown, by a batch operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_eui: Option<DevEui>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
    pub error: String,
}

impl ItemError {
    pub fn device(dev_eui: DevEui, error: impl Into<String>) -> Self {
        Self {
            dev_eui: Some(dev_eui),
            application_id: None,
            error: error.into(),
        }
    }

    pub fn application(application_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            dev_eui: None,
            application_id: Some(application_id.into()),
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eui() -> DevEui {
        Eui64::parse("70B3D57ED0049D2A").unwrap()
    }

    fn key(c: char) -> AesKey {
        AesKey::parse(&c.to_string().repeat(32)).unwrap()
    }

    #[test]
    fn test_merge_keeps_known_key_over_placeholder() {
        let existing = Credential {
            dev_eui: eui(),
            join_eui: Some(Eui64::parse("0000000000000001").unwrap()),
            app_key: key('1'),
        };
        let merged = Credential::placeholder(eui()).merged_over(&existing);
        assert_eq!(merged.app_key, key('1'));
        assert_eq!(merged.join_eui, existing.join_eui);
    }

    #[test]
    fn test_merge_replaces_with_new_known_key() {
        let existing = Credential {
            dev_eui: eui(),
            join_eui: None,
            app_key: key('1'),
        };
        let incoming = Credential {
            dev_eui: eui(),
            join_eui: None,
            app_key: key('2'),
        };
        assert_eq!(incoming.merged_over(&existing).app_key, key('2'));
    }

    #[test]
    fn test_validate_rejects_missing_profile() {
        let record = DeviceRecord {
            dev_eui: eui(),
            name: "sensor-1".into(),
            description: String::new(),
            application_id: "1".into(),
            device_profile_id: " ".into(),
        };
        assert!(matches!(
            record.validate(),
            Err(MigrateError::Validation(_))
        ));
    }
}
