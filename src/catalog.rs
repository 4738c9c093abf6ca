//! Declarative-catalog loading shared by [`crate::canonical`] and
//! [`crate::metric`].
//!
//! A catalog document is a JSON array of records. The core only parses
//! and validates; reading it from a file, URL, or embedded resource is
//! the caller's job; file I/O adapters live above this crate.

use crate::error::SerializationError;
use serde::de::DeserializeOwned;

/// Parses `src` as a JSON array of `T`, rejecting records with unknown
/// fields (each `T` is expected to carry `#[serde(deny_unknown_fields)]`).
pub fn load_records<T: DeserializeOwned>(src: &str) -> Result<Vec<T>, SerializationError> {
    serde_json::from_str(src).map_err(|e| SerializationError::SchemaError(e.to_string()))
}
