//! ES384 JWS in compact serialization (`header.payload.signature`).
//!
//! The signature is the raw 96-byte `r || s` pair (RFC 7518 §3.4), not DER.

use crate::error::{CryptoError, CryptoResult};
use crate::jose::{
    alg, b64url_decode, b64url_encode, decode_header, encode_header, reject_extensions,
};
use p384::ecdsa::signature::{Signer, Verifier};
use p384::ecdsa::{Signature, SigningKey, VerifyingKey};
use p384::{PublicKey, SecretKey};
use serde::{Deserialize, Serialize};

/// Protected header of a signed token. Claims that describe the signature
/// itself (issuer, subject, issued-at) live in the header so the payload can
/// stay a plain value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwsHeader {
    pub alg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crit: Option<Vec<String>>,
}

/// A token whose signature has been checked.
#[derive(Clone, Debug)]
pub struct VerifiedJws {
    pub header: JwsHeader,
    pub payload: Vec<u8>,
}

impl VerifiedJws {
    pub fn payload_json<T: for<'de> Deserialize<'de>>(&self) -> CryptoResult<T> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| CryptoError::Malformed(format!("invalid JWS payload: {e}")))
    }
}

/// Signs `payload` (serialized as JSON) with ES384. `header.alg` is
/// overwritten with `ES384`.
pub fn sign_es384<T: Serialize>(
    header: &JwsHeader,
    payload: &T,
    key: &SecretKey,
) -> CryptoResult<String> {
    let header = JwsHeader {
        alg: alg::ES384.to_string(),
        ..header.clone()
    };
    let signing_input = format!(
        "{}.{}",
        encode_header(&header)?,
        b64url_encode(&serde_json::to_vec(payload)?)
    );
    let signature: Signature = SigningKey::from(key).sign(signing_input.as_bytes());
    Ok(format!("{signing_input}.{}", b64url_encode(&signature.to_bytes())))
}

/// Verifies an ES384 compact JWS against `key`.
pub fn verify_es384(jws: &str, key: &PublicKey) -> CryptoResult<VerifiedJws> {
    let parts: Vec<&str> = jws.trim().split('.').collect();
    if parts.len() != 3 {
        return Err(CryptoError::Malformed(format!(
            "compact JWS must have 3 parts, got {}",
            parts.len()
        )));
    }
    let header: JwsHeader = decode_header(parts[0])?;
    if header.alg != alg::ES384 {
        return Err(CryptoError::UnsupportedAlgorithm(header.alg));
    }
    reject_extensions(header.zip.as_deref(), header.crit.as_deref())?;

    let signature_bytes = b64url_decode(parts[2], "signature")?;
    let signature = Signature::from_slice(&signature_bytes)
        .map_err(|e| CryptoError::Signature(format!("invalid ES384 signature encoding: {e}")))?;
    let signing_input_len = parts[0].len() + 1 + parts[1].len();
    VerifyingKey::from(key)
        .verify(&jws.trim().as_bytes()[..signing_input_len], &signature)
        .map_err(|_| CryptoError::Signature("ES384 signature does not match".to_string()))?;

    Ok(VerifiedJws {
        header,
        payload: b64url_decode(parts[1], "payload")?,
    })
}
