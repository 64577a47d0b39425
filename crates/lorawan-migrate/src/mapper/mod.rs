//! Credential field mapping between stored credentials and backend wire keys.
//!
//! Backends keep the root key in one of two wire fields: the legacy
//! network-key field (`nwkKey`), which LoRaWAN 1.0.x deployments use to hold
//! the AppKey, and the application-key field (`appKey`). Which one is
//! authoritative depends on the LoRaWAN version the device speaks.
//!
//! Reads resolve the ambiguity with a version hint. Writes fill both fields
//! so the record is right whichever field the backend consults.

use serde::{Deserialize, Serialize};

use crate::core::AesKey;

/// LoRaWAN major version hint for key field resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LorawanVersion {
    #[default]
    #[serde(rename = "1.0.x")]
    V1_0,
    #[serde(rename = "1.1.x")]
    V1_1,
}

impl LorawanVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            LorawanVersion::V1_0 => "1.0.x",
            LorawanVersion::V1_1 => "1.1.x",
        }
    }
}

impl std::fmt::Display for LorawanVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two key fields as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WireKeys {
    /// Legacy network-key field.
    pub nwk_key: AesKey,
    /// Application-key field.
    pub app_key: AesKey,
}

/// Resolve the application key from the wire fields.
///
/// - 1.0.x: the legacy field wins when it holds a key, else the application
///   field.
/// - 1.1.x: the application field wins when it holds a key, else the legacy
///   field.
///
/// Both fields empty yields the placeholder.
pub fn read_app_key(version: LorawanVersion, wire: &WireKeys) -> AesKey {
    let (preferred, fallback) = match version {
        LorawanVersion::V1_0 => (wire.nwk_key, wire.app_key),
        LorawanVersion::V1_1 => (wire.app_key, wire.nwk_key),
    };
    if !preferred.is_placeholder() {
        preferred
    } else {
        fallback
    }
}

/// Populate both wire fields with the same key.
pub fn write_app_key(app_key: AesKey) -> WireKeys {
    WireKeys {
        nwk_key: app_key,
        app_key,
    }
}
