//! C3: canonical-JSON RS256 signing and verification of audit records.
//!
//! Uses `jsonwebtoken`'s low-level `crypto::sign`/`crypto::verify` over raw
//! bytes rather than its JWT-encoding helpers, since what's being signed is
//! a canonical hash string, not a JWT claims set.

use chrono::Utc;
use jsonwebtoken::crypto::{sign, verify};
use jsonwebtoken::{Algorithm, EncodingKey, DecodingKey};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::model::AuditSignature;

const ALGORITHM: &str = "RS256";

#[derive(Clone)]
pub enum SigningKey {
    Configured {
        encoding_key: EncodingKey,
        decoding_key: DecodingKey,
        signer: String,
    },
    Unconfigured,
}

impl SigningKey {
    pub fn from_pem(private_key_pem: &[u8], public_key_pem: &[u8], signer: String) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem)
            .map_err(|err| Error::Internal(format!("invalid RSA private key: {err}")))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem)
            .map_err(|err| Error::Internal(format!("invalid RSA public key: {err}")))?;
        Ok(SigningKey::Configured {
            encoding_key,
            decoding_key,
            signer,
        })
    }

    pub fn unconfigured() -> Self {
        SigningKey::Unconfigured
    }
}

/// Recursively sorts object keys so semantically identical records always
/// serialize to the same bytes, independent of field insertion order.
pub fn canonicalize(value: &Value) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<(&String, &Value)> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                let mut out = serde_json::Map::new();
                for (k, v) in entries {
                    out.insert(k.clone(), sorted(v));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    serde_json::to_string(&sorted(value)).unwrap_or_default()
}

pub fn hash_hex(value: &Value) -> String {
    let canonical = canonicalize(value);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Signs the canonical serialization of `value`. Returns `None` when no
/// key is configured — the record is then written unsigned per §4.3.
pub fn sign_record(key: &SigningKey, value: &Value) -> Result<Option<AuditSignature>> {
    let (encoding_key, signer) = match key {
        SigningKey::Unconfigured => return Ok(None),
        SigningKey::Configured {
            encoding_key, signer, ..
        } => (encoding_key, signer.clone()),
    };
    let canonical = canonicalize(value);
    let signature = sign(canonical.as_bytes(), encoding_key, Algorithm::RS256)
        .map_err(|err| Error::Internal(format!("failed to sign audit record: {err}")))?;
    Ok(Some(AuditSignature {
        algorithm: ALGORITHM.to_string(),
        signer,
        value: signature,
        timestamp: Utc::now(),
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationOutcome {
    Valid,
    Invalid,
    Unsigned,
}

/// Re-serializes `value` canonically and verifies `signature` against it.
/// A record with no signature is `Unsigned`, never `Invalid`.
pub fn verify_record(
    key: &SigningKey,
    value: &Value,
    signature: Option<&AuditSignature>,
) -> VerificationOutcome {
    let Some(signature) = signature else {
        return VerificationOutcome::Unsigned;
    };
    let decoding_key = match key {
        SigningKey::Unconfigured => return VerificationOutcome::Unsigned,
        SigningKey::Configured { decoding_key, .. } => decoding_key,
    };
    if signature.algorithm != ALGORITHM {
        return VerificationOutcome::Invalid;
    }
    let canonical = canonicalize(value);
    match verify(&signature.value, canonical.as_bytes(), decoding_key, Algorithm::RS256) {
        Ok(true) => VerificationOutcome::Valid,
        _ => VerificationOutcome::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonicalize_is_order_independent() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonicalize(&a), canonicalize(&b));
    }

    #[test]
    fn unconfigured_key_yields_unsigned_records() {
        let key = SigningKey::unconfigured();
        let value = json!({"run_id": "run-1"});
        assert!(sign_record(&key, &value).unwrap().is_none());
        assert_eq!(verify_record(&key, &value, None), VerificationOutcome::Unsigned);
    }

    #[test]
    fn hash_hex_is_deterministic_across_key_order() {
        let a = json!({"x": 1, "y": {"b": 2, "a": 1}});
        let b = json!({"y": {"a": 1, "b": 2}, "x": 1});
        assert_eq!(hash_hex(&a), hash_hex(&b));
    }
}
