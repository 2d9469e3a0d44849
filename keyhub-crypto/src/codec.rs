//! Portable binary encodings for P-384 keys.
//!
//! Public keys are encoded as X.509 SubjectPublicKeyInfo DER, private keys
//! as PKCS#8 DER. Both encodings are deterministic, so decoding and
//! re-encoding a key reproduces the input byte for byte. On the wire the
//! DER bytes travel as standard base64.

use crate::error::{CryptoError, CryptoResult};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use p384::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use p384::{PublicKey, SecretKey};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Encodes a public key as SubjectPublicKeyInfo DER.
pub fn encode_public_key(key: &PublicKey) -> CryptoResult<Vec<u8>> {
    let doc = key
        .to_public_key_der()
        .map_err(|e| CryptoError::Encryption(format!("public key encoding failed: {e}")))?;
    Ok(doc.as_bytes().to_vec())
}

/// Decodes a SubjectPublicKeyInfo DER public key.
///
/// Keys on other curves, or of other algorithms, fail with [`CryptoError::NotEcKey`].
pub fn decode_public_key(der: &[u8]) -> CryptoResult<PublicKey> {
    PublicKey::from_public_key_der(der).map_err(|e| CryptoError::NotEcKey(e.to_string()))
}

/// Encodes a private key as PKCS#8 DER. The buffer is wiped on drop.
pub fn encode_private_key(key: &SecretKey) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let doc = key
        .to_pkcs8_der()
        .map_err(|e| CryptoError::Encryption(format!("private key encoding failed: {e}")))?;
    Ok(Zeroizing::new(doc.as_bytes().to_vec()))
}

/// Decodes a PKCS#8 DER private key.
pub fn decode_private_key(der: &[u8]) -> CryptoResult<SecretKey> {
    SecretKey::from_pkcs8_der(der).map_err(|e| CryptoError::NotEcKey(e.to_string()))
}

pub fn encode_public_key_b64(key: &PublicKey) -> CryptoResult<String> {
    Ok(STANDARD.encode(encode_public_key(key)?))
}

pub fn decode_public_key_b64(encoded: &str) -> CryptoResult<PublicKey> {
    let der = STANDARD
        .decode(encoded)
        .map_err(|e| CryptoError::Malformed(format!("invalid public key encoding: {e}")))?;
    decode_public_key(&der)
}

pub fn encode_private_key_b64(key: &SecretKey) -> CryptoResult<Zeroizing<String>> {
    Ok(Zeroizing::new(STANDARD.encode(encode_private_key(key)?.as_slice())))
}

pub fn decode_private_key_b64(encoded: &str) -> CryptoResult<SecretKey> {
    let der = Zeroizing::new(
        STANDARD
            .decode(encoded)
            .map_err(|e| CryptoError::Malformed(format!("invalid private key encoding: {e}")))?,
    );
    decode_private_key(&der)
}

/// Stable identifier of a device: lowercase hex SHA-256 over the SPKI DER
/// of its public key.
pub fn device_id(key: &PublicKey) -> CryptoResult<String> {
    let der = encode_public_key(key)?;
    Ok(hex::encode(Sha256::digest(&der)))
}
