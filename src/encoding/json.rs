//! JSON is used to encode values exchanged on the bootstrap mesh and the
//! published address book. The mesh protocol predates this implementation and
//! is text-based, so a self-describing text encoding is required; it also
//! keeps the published files readable by non-Rust clients.
//!
//! This module wraps serde_json so every caller goes through the same entry
//! points.

use crate::error::Result;

/// Deserializes a value from JSON bytes.
pub fn deserialize<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Serializes a value to JSON bytes.
pub fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}
