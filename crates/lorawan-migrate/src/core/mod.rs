//! Core domain types shared by the backends, the record store and the
//! orchestrator.

pub mod identifier;
pub mod model;

pub use identifier::{AesKey, DevAddr, DevEui, Eui64};
pub use model::{
    ApplicationRef, Credential, DeviceProfileRef, DeviceRecord, ItemError, SessionState,
    StoredDevice,
};
