//! Storage key derivation for (loader, parameters, loader id) triples.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::ResourceError;

/// Identity of a loader function: the address of its shared allocation.
///
/// Clones of one [`LoaderFn`](crate::LoaderFn) share an identity. Two loaders
/// built from identical closures do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct LoaderIdentity(usize);

impl LoaderIdentity {
    pub(crate) fn of<T: ?Sized>(ptr: *const T) -> Self {
        LoaderIdentity(ptr.cast::<()>() as usize)
    }
}

/// Everything that distinguishes one cached resource from another.
#[derive(Debug, Serialize)]
pub struct KeyInput<'a, P: Serialize> {
    pub loader: LoaderIdentity,
    /// Type name of the resource value, so that differently typed resources
    /// never share a key.
    pub value_type: &'static str,
    pub parameters: &'a P,
    pub loader_id: Option<&'a str>,
}

/// Derive a stable storage key from `input`.
///
/// The input is converted to canonical JSON (object keys sorted) and hashed
/// with SHA-256; the key is the hex digest.
pub fn storage_key<P: Serialize>(input: &KeyInput<'_, P>) -> Result<String, ResourceError> {
    let canonical = serde_json::to_value(input)
        .and_then(|value| serde_json::to_vec(&value))
        .map_err(|e| ResourceError::Serialization(format!("Key derivation failed: {}", e)))?;

    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(hex::encode(hasher.finalize()))
}
