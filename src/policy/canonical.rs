//! JCS (RFC 8785) canonicalization, SHA-256 hashing, and HMAC signing.
//!
//! Every signed object in Sentinel (a policy document's detached
//! signature, a decision log entry's signature) is signed over this
//! canonical byte form, never over whatever order serde happened to
//! produce.

use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Canonicalize a value using JCS (RFC 8785): object keys sorted
/// lexicographically, no whitespace, stable number/string formatting.
pub fn canonicalize<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v = serde_json::to_value(value)?;
    canonicalize_value(&v)
}

fn canonicalize_value(value: &serde_json::Value) -> Result<String, serde_json::Error> {
    match value {
        serde_json::Value::Object(map) => {
            let mut pairs: Vec<(&String, &serde_json::Value)> = map.iter().collect();
            pairs.sort_by_key(|(k, _)| *k);

            let mut result = String::from("{");
            for (i, (k, v)) in pairs.iter().enumerate() {
                if i > 0 {
                    result.push(',');
                }
                result.push_str(&serde_json::to_string(k)?);
                result.push(':');
                result.push_str(&canonicalize_value(v)?);
            }
            result.push('}');
            Ok(result)
        }
        serde_json::Value::Array(arr) => {
            let mut result = String::from("[");
            for (i, v) in arr.iter().enumerate() {
                if i > 0 {
                    result.push(',');
                }
                result.push_str(&canonicalize_value(v)?);
            }
            result.push(']');
            Ok(result)
        }
        _ => serde_json::to_string(value),
    }
}

/// SHA-256 of the JCS-canonicalized representation (hex-encoded).
pub fn hash_canonical<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let canonical = canonicalize(value)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// HMAC-SHA256 over the JCS-canonical form of `value`, hex-encoded.
pub fn hmac_sign<T: Serialize>(value: &T, key: &[u8]) -> Result<String, String> {
    let canonical = canonicalize(value).map_err(|e| e.to_string())?;
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| e.to_string())?;
    mac.update(canonical.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify an HMAC-SHA256 signature (constant-time comparison internally
/// via `hmac::Mac::verify_slice`).
pub fn hmac_verify<T: Serialize>(value: &T, key: &[u8], signature_hex: &str) -> Result<bool, String> {
    let canonical = canonicalize(value).map_err(|e| e.to_string())?;
    let sig_bytes = hex::decode(signature_hex).map_err(|e| e.to_string())?;
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| e.to_string())?;
    mac.update(canonical.as_bytes());
    Ok(mac.verify_slice(&sig_bytes).is_ok())
}

/// Raw HMAC-SHA256 over arbitrary bytes (used to sign/verify a detached
/// policy signature, which is not itself a serde value).
pub fn hmac_sign_bytes(data: &[u8], key: &[u8]) -> Result<String, String> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| e.to_string())?;
    mac.update(data);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub fn hmac_verify_bytes(data: &[u8], key: &[u8], signature_hex: &str) -> Result<bool, String> {
    let sig_bytes = hex::decode(signature_hex).map_err(|e| e.to_string())?;
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| e.to_string())?;
    mac.update(data);
    Ok(mac.verify_slice(&sig_bytes).is_ok())
}
