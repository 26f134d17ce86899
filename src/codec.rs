//! Vector codec.
//!
//! Vectors are stored as standard base64 of their little-endian `f32` bytes.
//! The round trip is bit-exact and the encoded form only uses the base64
//! alphabet, so it can sit inside any line-oriented record.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{RecallError, Result};

/// Encode a float vector.
///
/// # Example
///
/// ```rust
/// use notes_recall::codec::{decode, encode};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let text = encode(&v);
/// assert_eq!(decode(&text).unwrap(), v);
/// ```
pub fn encode(vec: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    STANDARD.encode(bytes)
}

/// Decode a vector produced by [`encode`].
pub fn decode(text: &str) -> Result<Vec<f32>> {
    let bytes = STANDARD
        .decode(text.trim())
        .map_err(|e| RecallError::Corrupt(format!("invalid vector encoding: {}", e)))?;
    if bytes.len() % 4 != 0 {
        return Err(RecallError::Corrupt(format!(
            "vector byte length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    let vec: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    if let Some(pos) = vec.iter().position(|v| !v.is_finite()) {
        return Err(RecallError::Corrupt(format!(
            "vector component {} is not finite",
            pos
        )));
    }
    Ok(vec)
}
