//! Hex-encoded LoRaWAN identifiers and keys.
//!
//! Backends exchange EUIs, device addresses and AES keys as hex strings.
//! These newtypes validate length and alphabet once, at the boundary, so
//! the rest of the crate never handles unchecked strings.
//!
//! EUIs display upper-cased and go on the wire lower-cased. Keys display
//! lower-cased and redact their bytes in `Debug`.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{MigrateError, Result};

fn decode_fixed<const N: usize>(kind: &str, s: &str) -> Result<[u8; N]> {
    let trimmed = s.trim();
    if trimmed.len() != N * 2 {
        return Err(MigrateError::Validation(format!(
            "{} must be {} hex characters, got {} ({:?})",
            kind,
            N * 2,
            trimmed.len(),
            trimmed
        )));
    }
    let mut out = [0u8; N];
    hex::decode_to_slice(trimmed, &mut out).map_err(|e| {
        MigrateError::Validation(format!("{} is not valid hex ({:?}): {}", kind, trimmed, e))
    })?;
    Ok(out)
}

/// 8-byte extended unique identifier (DevEUI, JoinEUI/AppEUI).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Eui64([u8; 8]);

/// Globally unique device identifier.
pub type DevEui = Eui64;

impl Eui64 {
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub fn parse(s: &str) -> Result<Self> {
        decode_fixed::<8>("EUI", s).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// Lower-case hex form used in request paths and bodies.
    pub fn to_wire(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Eui64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl fmt::Debug for Eui64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Eui64({})", self)
    }
}

impl FromStr for Eui64 {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// 4-byte device address assigned at activation.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevAddr([u8; 4]);

impl DevAddr {
    pub const fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    pub fn parse(s: &str) -> Result<Self> {
        decode_fixed::<4>("DevAddr", s).map(Self)
    }

    pub fn to_wire(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for DevAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl fmt::Debug for DevAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DevAddr({})", self)
    }
}

/// 16-byte AES-128 key (AppKey, NwkKey, session keys).
///
/// The all-zero value is the placeholder sentinel meaning "credential
/// unknown"; it is never a usable key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AesKey([u8; 16]);

impl AesKey {
    /// The "credential unknown" sentinel (32 hex zeros).
    pub const PLACEHOLDER: AesKey = AesKey([0u8; 16]);

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn parse(s: &str) -> Result<Self> {
        decode_fixed::<16>("key", s).map(Self)
    }

    /// Parse a key as found on the wire, where a missing or empty field means
    /// the backend holds no value.
    pub fn parse_wire(s: Option<&str>) -> Result<Self> {
        match s.map(str::trim) {
            None | Some("") => Ok(Self::PLACEHOLDER),
            Some(v) => Self::parse(v),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        *self == Self::PLACEHOLDER
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_wire(&self) -> String {
        hex::encode(self.0)
    }
}

impl Default for AesKey {
    fn default() -> Self {
        Self::PLACEHOLDER
    }
}

impl fmt::Display for AesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

impl fmt::Debug for AesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_placeholder() {
            f.write_str("AesKey(placeholder)")
        } else {
            f.write_str("AesKey([REDACTED])")
        }
    }
}

macro_rules! hex_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                <$ty>::parse(&s).map_err(de::Error::custom)
            }
        }
    };
}

hex_serde!(Eui64);
hex_serde!(DevAddr);
hex_serde!(AesKey);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eui_parse_is_case_insensitive() {
        let upper = Eui64::parse("70B3D57ED0049D2A").unwrap();
        let lower = Eui64::parse("70b3d57ed0049d2a").unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper.to_string(), "70B3D57ED0049D2A");
        assert_eq!(upper.to_wire(), "70b3d57ed0049d2a");
    }

    #[test]
    fn test_eui_rejects_bad_length() {
        assert!(Eui64::parse("70B3D57ED0049D").is_err());
        assert!(Eui64::parse("70B3D57ED0049D2A00").is_err());
        assert!(Eui64::parse("").is_err());
    }

    #[test]
    fn test_eui_rejects_non_hex() {
        let err = Eui64::parse("70B3D57ED0049DZZ").unwrap_err();
        assert!(matches!(err, MigrateError::Validation(_)));
    }

    #[test]
    fn test_placeholder_key() {
        let key = AesKey::parse(&"0".repeat(32)).unwrap();
        assert!(key.is_placeholder());
        assert_eq!(key, AesKey::default());
        assert!(!AesKey::parse(&"1".repeat(32)).unwrap().is_placeholder());
    }

    #[test]
    fn test_parse_wire_treats_missing_as_placeholder() {
        assert!(AesKey::parse_wire(None).unwrap().is_placeholder());
        assert!(AesKey::parse_wire(Some("")).unwrap().is_placeholder());
        assert!(AesKey::parse_wire(Some("abc")).is_err());
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let key = AesKey::parse("2b7e151628aed2a6abf7158809cf4f3c").unwrap();
        let debug = format!("{:?}", key);
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("2b7e"));
    }

    #[test]
    fn test_serde_as_hex_string() {
        let eui = Eui64::parse("0102030405060708").unwrap();
        let json = serde_json::to_string(&eui).unwrap();
        assert_eq!(json, "\"0102030405060708\"");
        let back: Eui64 = serde_json::from_str("\"0102030405060708\"").unwrap();
        assert_eq!(back, eui);
        assert!(serde_json::from_str::<Eui64>("\"nothex\"").is_err());
    }
}
