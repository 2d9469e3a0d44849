//! Building blocks shared by the JWE and JWS serializations.
//!
//! Holds the algorithm identifiers, the JOSE header model, base64url
//! helpers and the primitive operations every envelope is assembled from:
//! AES-256-GCM content encryption, AES key wrap (RFC 3394), the ECDH-ES
//! Concat KDF (RFC 7518 §4.6.2) and PBES2 key derivation (RFC 7518 §4.8).

use crate::error::{CryptoError, CryptoResult};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use aes_kw::KekAes256 as Kek;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use p384::elliptic_curve::JwkEcKey;
use p384::{PublicKey, SecretKey};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use zeroize::Zeroizing;

/// Algorithm identifiers as they appear in `alg` / `enc` header fields.
pub mod alg {
    pub const ECDH_ES: &str = "ECDH-ES";
    pub const ECDH_ES_A256KW: &str = "ECDH-ES+A256KW";
    pub const PBES2_HS512_A256KW: &str = "PBES2-HS512+A256KW";
    pub const A256KW: &str = "A256KW";
    pub const A256GCM: &str = "A256GCM";
    pub const ES384: &str = "ES384";
}

/// Size of every symmetric key handled here (CEKs, KEKs, member keys).
pub const KEY_SIZE: usize = 32;
/// AES-GCM IV size.
pub const IV_SIZE: usize = 12;
/// AES-GCM tag size.
pub const TAG_SIZE: usize = 16;
/// PBES2 salt size.
pub const P2S_SIZE: usize = 16;

/// JOSE header fields used by the envelopes in this crate.
///
/// One struct serves protected headers and per-recipient headers alike;
/// absent fields are skipped on serialization.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JoseHeader {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epk: Option<JwkEcKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apu: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p2s: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p2c: Option<u32>,
    /// Compression is not supported; parsed only so it can be refused.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crit: Option<Vec<String>>,
}

impl JoseHeader {
    pub fn alg(&self) -> CryptoResult<&str> {
        self.alg
            .as_deref()
            .ok_or_else(|| CryptoError::Malformed("header is missing \"alg\"".to_string()))
    }

    /// Fails unless the content encryption is `A256GCM`.
    pub fn require_a256gcm(&self) -> CryptoResult<()> {
        match self.enc.as_deref() {
            Some(alg::A256GCM) => Ok(()),
            Some(other) => Err(CryptoError::UnsupportedAlgorithm(other.to_string())),
            None => Err(CryptoError::Malformed("header is missing \"enc\"".to_string())),
        }
    }

    /// Fails on `zip` and on any `crit` extension: none are understood here.
    pub fn reject_unsupported_parameters(&self) -> CryptoResult<()> {
        reject_extensions(self.zip.as_deref(), self.crit.as_deref())
    }

    /// Merges `other` into a copy of `self`; fields set in both are an error,
    /// as RFC 7516 forbids duplicate header parameters.
    pub fn merged(&self, other: &JoseHeader) -> CryptoResult<JoseHeader> {
        fn pick<T: Clone>(a: &Option<T>, b: &Option<T>, name: &str) -> CryptoResult<Option<T>> {
            match (a, b) {
                (Some(_), Some(_)) => Err(CryptoError::Malformed(format!(
                    "header parameter \"{name}\" appears twice"
                ))),
                (Some(v), None) | (None, Some(v)) => Ok(Some(v.clone())),
                (None, None) => Ok(None),
            }
        }
        Ok(JoseHeader {
            alg: pick(&self.alg, &other.alg, "alg")?,
            enc: pick(&self.enc, &other.enc, "enc")?,
            kid: pick(&self.kid, &other.kid, "kid")?,
            cty: pick(&self.cty, &other.cty, "cty")?,
            epk: pick(&self.epk, &other.epk, "epk")?,
            apu: pick(&self.apu, &other.apu, "apu")?,
            apv: pick(&self.apv, &other.apv, "apv")?,
            p2s: pick(&self.p2s, &other.p2s, "p2s")?,
            p2c: pick(&self.p2c, &other.p2c, "p2c")?,
            zip: pick(&self.zip, &other.zip, "zip")?,
            crit: pick(&self.crit, &other.crit, "crit")?,
        })
    }
}

pub(crate) fn reject_extensions(zip: Option<&str>, crit: Option<&[String]>) -> CryptoResult<()> {
    if let Some(zip) = zip {
        return Err(CryptoError::UnsupportedAlgorithm(format!("zip {zip}")));
    }
    if let Some(crit) = crit {
        return Err(CryptoError::UnsupportedAlgorithm(format!(
            "critical header parameters [{}]",
            crit.join(", ")
        )));
    }
    Ok(())
}

pub fn b64url_encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn b64url_decode(encoded: &str, what: &str) -> CryptoResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| CryptoError::Malformed(format!("invalid base64url in {what}: {e}")))
}

pub(crate) fn encode_header<T: Serialize>(header: &T) -> CryptoResult<String> {
    Ok(b64url_encode(&serde_json::to_vec(header)?))
}

pub(crate) fn decode_header<T: for<'de> Deserialize<'de>>(encoded: &str) -> CryptoResult<T> {
    let raw = b64url_decode(encoded, "protected header")?;
    serde_json::from_slice(&raw)
        .map_err(|e| CryptoError::Malformed(format!("invalid protected header: {e}")))
}

pub(crate) fn random_bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    OsRng.fill_bytes(&mut out);
    out
}

/// Generates a fresh 256-bit key (CEK or vault member key).
pub fn generate_key() -> Zeroizing<[u8; KEY_SIZE]> {
    Zeroizing::new(random_bytes::<KEY_SIZE>())
}

pub(crate) fn to_key(bytes: &[u8]) -> CryptoResult<Zeroizing<[u8; KEY_SIZE]>> {
    if bytes.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: bytes.len(),
        });
    }
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    key.copy_from_slice(bytes);
    Ok(key)
}

/// AES-256-GCM ciphertext split the way JWE serializes it.
pub(crate) struct SealedContent {
    pub iv: [u8; IV_SIZE],
    pub ciphertext: Vec<u8>,
    pub tag: Vec<u8>,
}

pub(crate) fn seal_content(
    cek: &[u8; KEY_SIZE],
    aad: &[u8],
    plaintext: &[u8],
) -> CryptoResult<SealedContent> {
    let cipher = Aes256Gcm::new_from_slice(cek)
        .map_err(|e| CryptoError::Encryption(format!("invalid content key: {e}")))?;
    let iv = random_bytes::<IV_SIZE>();
    let mut ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), Payload { msg: plaintext, aad })
        .map_err(|e| CryptoError::Encryption(format!("content encryption failed: {e}")))?;
    let tag = ciphertext.split_off(ciphertext.len() - TAG_SIZE);
    Ok(SealedContent { iv, ciphertext, tag })
}

pub(crate) fn open_content(
    cek: &[u8; KEY_SIZE],
    aad: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
) -> CryptoResult<Vec<u8>> {
    if iv.len() != IV_SIZE {
        return Err(CryptoError::Malformed(format!(
            "IV must be {IV_SIZE} bytes, got {}",
            iv.len()
        )));
    }
    if tag.len() != TAG_SIZE {
        return Err(CryptoError::Malformed(format!(
            "tag must be {TAG_SIZE} bytes, got {}",
            tag.len()
        )));
    }
    let cipher = Aes256Gcm::new_from_slice(cek)
        .map_err(|e| CryptoError::Decryption(format!("invalid content key: {e}")))?;
    let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_SIZE);
    sealed.extend_from_slice(ciphertext);
    sealed.extend_from_slice(tag);
    cipher
        .decrypt(Nonce::from_slice(iv), Payload { msg: &sealed, aad })
        .map_err(|_| {
            CryptoError::Decryption(
                "content decryption failed (wrong key or tampered data)".to_string(),
            )
        })
}

pub(crate) fn wrap_key(kek: &[u8; KEY_SIZE], cek: &[u8]) -> CryptoResult<Vec<u8>> {
    Kek::from(*kek)
        .wrap_vec(cek)
        .map_err(|e| CryptoError::Encryption(format!("AES-KW wrap failed: {e}")))
}

pub(crate) fn unwrap_key(
    kek: &[u8; KEY_SIZE],
    wrapped: &[u8],
) -> CryptoResult<Zeroizing<[u8; KEY_SIZE]>> {
    let unwrapped = Zeroizing::new(Kek::from(*kek).unwrap_vec(wrapped).map_err(|_| {
        CryptoError::Decryption("AES-KW unwrap failed (wrong key or tampered data)".to_string())
    })?);
    to_key(&unwrapped)
}

/// Single-round Concat KDF with SHA-256, sized for 256-bit outputs.
pub(crate) fn concat_kdf(
    z: &[u8],
    algorithm_id: &str,
    apu: &[u8],
    apv: &[u8],
) -> Zeroizing<[u8; KEY_SIZE]> {
    let mut hasher = Sha256::new();
    hasher.update(1u32.to_be_bytes());
    hasher.update(z);
    for field in [algorithm_id.as_bytes(), apu, apv] {
        hasher.update((field.len() as u32).to_be_bytes());
        hasher.update(field);
    }
    hasher.update(((KEY_SIZE * 8) as u32).to_be_bytes());
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    key.copy_from_slice(&hasher.finalize());
    key
}

/// Ephemeral-static ECDH, sender side. Returns the ephemeral public key in
/// JWK form and the derived key.
pub(crate) fn ecdh_sender(
    recipient: &PublicKey,
    algorithm_id: &str,
    apu: &[u8],
    apv: &[u8],
) -> (JwkEcKey, Zeroizing<[u8; KEY_SIZE]>) {
    let ephemeral = p384::ecdh::EphemeralSecret::random(&mut OsRng);
    let epk = ephemeral.public_key().to_jwk();
    let shared = ephemeral.diffie_hellman(recipient);
    let key = concat_kdf(shared.raw_secret_bytes(), algorithm_id, apu, apv);
    (epk, key)
}

/// Ephemeral-static ECDH, recipient side.
pub(crate) fn ecdh_recipient(
    header: &JoseHeader,
    recipient: &SecretKey,
    algorithm_id: &str,
) -> CryptoResult<Zeroizing<[u8; KEY_SIZE]>> {
    let epk = header
        .epk
        .as_ref()
        .ok_or_else(|| CryptoError::Malformed("header is missing \"epk\"".to_string()))?;
    let epk = PublicKey::from_jwk(epk).map_err(|e| CryptoError::NotEcKey(e.to_string()))?;
    let apu = optional_b64(header.apu.as_deref(), "apu")?;
    let apv = optional_b64(header.apv.as_deref(), "apv")?;
    let shared = p384::ecdh::diffie_hellman(recipient.to_nonzero_scalar(), epk.as_affine());
    Ok(concat_kdf(shared.raw_secret_bytes(), algorithm_id, &apu, &apv))
}

fn optional_b64(value: Option<&str>, what: &str) -> CryptoResult<Vec<u8>> {
    value.map_or(Ok(Vec::new()), |v| b64url_decode(v, what))
}

/// PBES2 key derivation: PBKDF2-HMAC-SHA-512 over `alg || 0x00 || p2s`.
pub(crate) fn pbes2_kek(
    secret: &[u8],
    p2s: &[u8],
    iterations: u32,
) -> Zeroizing<[u8; KEY_SIZE]> {
    let mut salt = Vec::with_capacity(alg::PBES2_HS512_A256KW.len() + 1 + p2s.len());
    salt.extend_from_slice(alg::PBES2_HS512_A256KW.as_bytes());
    salt.push(0);
    salt.extend_from_slice(p2s);
    let mut kek = Zeroizing::new([0u8; KEY_SIZE]);
    pbkdf2::pbkdf2_hmac::<Sha512>(secret, &salt, iterations, kek.as_mut_slice());
    kek
}
