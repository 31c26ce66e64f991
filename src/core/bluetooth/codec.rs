//! Wire encoding of characteristic values.
//!
//! Values cross the transport boundary as standard, padded base64 strings.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::core::bluetooth::error::CodecError;

/// Encodes raw bytes into a wire value.
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decodes a wire value back into raw bytes.
pub fn decode(value: &str) -> Result<Vec<u8>, CodecError> {
    STANDARD
        .decode(value)
        .map_err(|e| CodecError(e.to_string()))
}

/// Decodes a wire value into display text, replacing invalid UTF-8.
pub fn decode_text(value: &str) -> Result<String, CodecError> {
    let bytes = decode(value)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
