//! Base64 helpers for wire and storage fields (standard alphabet, padded).

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::error::{Error, Result};

/// Encode bytes as base64
pub fn encode(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode a base64 string
pub fn decode(encoded: &str) -> Result<Vec<u8>> {
    Ok(BASE64.decode(encoded.trim())?)
}

/// Decode a base64 string that must hold exactly 32 bytes (keys)
pub fn decode_key32(encoded: &str) -> Result<[u8; 32]> {
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| Error::InvalidKey(format!("Key is not valid base64: {}", e)))?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| Error::InvalidKey(format!("Key must be 32 bytes, got {}", len)))
}
