//! Single-recipient JWE in compact serialization.
//!
//! `header.encryptedKey.iv.ciphertext.tag`, each part base64url without
//! padding. Three key-management schemes are supported:
//!
//! - **Agreement**: `ECDH-ES` (direct) or `ECDH-ES+A256KW` to a P-384 public key
//! - **Password**: `PBES2-HS512+A256KW` to a low-entropy secret
//! - **Raw-key wrap**: `A256KW` to a pre-shared 256-bit key
//!
//! Content is always encrypted with `A256GCM`. Ephemeral keys, salts, CEKs
//! and IVs are freshly generated for every call.

use crate::error::{CryptoError, CryptoResult};
use crate::jose::{
    self, JoseHeader, KEY_SIZE, P2S_SIZE, alg, b64url_decode, b64url_encode, decode_header,
    encode_header,
};
use p384::{PublicKey, SecretKey};
use zeroize::Zeroizing;

/// Default PBKDF2 iteration count for the password scheme.
pub const DEFAULT_PBES2_ITERATIONS: u32 = 1_000_000;
/// Smallest `p2c` accepted when decrypting.
pub const MIN_PBES2_ITERATIONS: u32 = 1_000;
/// Largest `p2c` accepted when decrypting; bounds the work a hostile header can demand.
pub const MAX_PBES2_ITERATIONS: u32 = 10_000_000;

/// Key management mode of the agreement scheme.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EcdhMode {
    /// `ECDH-ES`: the agreed key is the CEK; the encrypted key part is empty.
    #[default]
    Direct,
    /// `ECDH-ES+A256KW`: the agreed key wraps a random CEK.
    KeyWrap,
}

/// Options for the agreement scheme.
///
/// Defaults: direct mode, no party info, no key id.
#[derive(Clone, Debug, Default)]
pub struct EcdhOptions {
    pub mode: EcdhMode,
    /// Agreement PartyUInfo (sender context), mixed into the KDF.
    pub apu: Option<Vec<u8>>,
    /// Agreement PartyVInfo (recipient context), mixed into the KDF.
    pub apv: Option<Vec<u8>>,
    pub kid: Option<String>,
}

/// Options for the password scheme.
#[derive(Clone, Debug)]
pub struct PasswordOptions {
    /// PBKDF2 iteration count written to `p2c`.
    pub iterations: u32,
}

impl Default for PasswordOptions {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_PBES2_ITERATIONS,
        }
    }
}

/// A compact JWE split into its five decoded parts.
struct CompactJwe {
    protected_b64: String,
    header: JoseHeader,
    encrypted_key: Vec<u8>,
    iv: Vec<u8>,
    ciphertext: Vec<u8>,
    tag: Vec<u8>,
}

impl CompactJwe {
    fn parse(jwe: &str) -> CryptoResult<Self> {
        let parts: Vec<&str> = jwe.trim().split('.').collect();
        if parts.len() != 5 {
            return Err(CryptoError::Malformed(format!(
                "compact JWE must have 5 parts, got {}",
                parts.len()
            )));
        }
        let header: JoseHeader = decode_header(parts[0])?;
        header.require_a256gcm()?;
        header.reject_unsupported_parameters()?;
        Ok(Self {
            protected_b64: parts[0].to_string(),
            header,
            encrypted_key: b64url_decode(parts[1], "encrypted key")?,
            iv: b64url_decode(parts[2], "IV")?,
            ciphertext: b64url_decode(parts[3], "ciphertext")?,
            tag: b64url_decode(parts[4], "tag")?,
        })
    }

    /// Fails with a decryption error unless `alg` is one of `expected`.
    fn expect_alg(&self, expected: &[&str]) -> CryptoResult<&str> {
        let actual = self.header.alg()?;
        if expected.contains(&actual) {
            Ok(actual)
        } else {
            Err(CryptoError::Decryption(format!(
                "envelope uses {actual}, expected {}",
                expected.join(" or ")
            )))
        }
    }

    fn open(&self, cek: &[u8; KEY_SIZE]) -> CryptoResult<Vec<u8>> {
        jose::open_content(
            cek,
            self.protected_b64.as_bytes(),
            &self.iv,
            &self.ciphertext,
            &self.tag,
        )
    }
}

fn serialize(
    header: &JoseHeader,
    cek: &[u8; KEY_SIZE],
    encrypted_key: &[u8],
    payload: &[u8],
) -> CryptoResult<String> {
    let protected_b64 = encode_header(header)?;
    let sealed = jose::seal_content(cek, protected_b64.as_bytes(), payload)?;
    Ok(format!(
        "{}.{}.{}.{}.{}",
        protected_b64,
        b64url_encode(encrypted_key),
        b64url_encode(&sealed.iv),
        b64url_encode(&sealed.ciphertext),
        b64url_encode(&sealed.tag),
    ))
}

/// Reads the protected header of a compact JWE without decrypting it.
pub fn peek_header(jwe: &str) -> CryptoResult<JoseHeader> {
    let first = jwe
        .split('.')
        .next()
        .ok_or_else(|| CryptoError::Malformed("empty envelope".to_string()))?;
    decode_header(first)
}

// ── Agreement ──

/// Encrypts `payload` to a P-384 public key.
pub fn encrypt_ecdh(
    payload: &[u8],
    recipient: &PublicKey,
    options: &EcdhOptions,
) -> CryptoResult<String> {
    let apu = options.apu.clone().unwrap_or_default();
    let apv = options.apv.clone().unwrap_or_default();
    let mut header = JoseHeader {
        enc: Some(alg::A256GCM.to_string()),
        kid: options.kid.clone(),
        apu: options.apu.as_deref().map(b64url_encode),
        apv: options.apv.as_deref().map(b64url_encode),
        ..Default::default()
    };

    match options.mode {
        EcdhMode::Direct => {
            let (epk, cek) = jose::ecdh_sender(recipient, alg::A256GCM, &apu, &apv);
            header.alg = Some(alg::ECDH_ES.to_string());
            header.epk = Some(epk);
            serialize(&header, &cek, &[], payload)
        }
        EcdhMode::KeyWrap => {
            let (epk, kek) = jose::ecdh_sender(recipient, alg::ECDH_ES_A256KW, &apu, &apv);
            let cek = jose::generate_key();
            let encrypted_key = jose::wrap_key(&kek, cek.as_slice())?;
            header.alg = Some(alg::ECDH_ES_A256KW.to_string());
            header.epk = Some(epk);
            serialize(&header, &cek, &encrypted_key, payload)
        }
    }
}

/// Decrypts an agreement-scheme envelope with the recipient's private key.
pub fn decrypt_ecdh(jwe: &str, recipient: &SecretKey) -> CryptoResult<Vec<u8>> {
    let parsed = CompactJwe::parse(jwe)?;
    match parsed.expect_alg(&[alg::ECDH_ES, alg::ECDH_ES_A256KW])? {
        alg::ECDH_ES => {
            if !parsed.encrypted_key.is_empty() {
                return Err(CryptoError::Malformed(
                    "ECDH-ES envelope must have an empty encrypted key".to_string(),
                ));
            }
            let cek = jose::ecdh_recipient(&parsed.header, recipient, alg::A256GCM)?;
            parsed.open(&cek)
        }
        _ => {
            let kek = jose::ecdh_recipient(&parsed.header, recipient, alg::ECDH_ES_A256KW)?;
            let cek = jose::unwrap_key(&kek, &parsed.encrypted_key)?;
            parsed.open(&cek)
        }
    }
}

// ── Password ──

/// Encrypts `payload` to a password or account key.
pub fn encrypt_password(
    payload: &[u8],
    password: &str,
    options: &PasswordOptions,
) -> CryptoResult<String> {
    let p2s = jose::random_bytes::<P2S_SIZE>();
    let kek = jose::pbes2_kek(password.as_bytes(), &p2s, options.iterations);
    let cek = jose::generate_key();
    let encrypted_key = jose::wrap_key(&kek, cek.as_slice())?;
    let header = JoseHeader {
        alg: Some(alg::PBES2_HS512_A256KW.to_string()),
        enc: Some(alg::A256GCM.to_string()),
        p2s: Some(b64url_encode(&p2s)),
        p2c: Some(options.iterations),
        ..Default::default()
    };
    serialize(&header, &cek, &encrypted_key, payload)
}

/// Decrypts a password-scheme envelope. A wrong password fails the key
/// unwrap and surfaces as [`CryptoError::Decryption`].
pub fn decrypt_password(jwe: &str, password: &str) -> CryptoResult<Vec<u8>> {
    let parsed = CompactJwe::parse(jwe)?;
    parsed.expect_alg(&[alg::PBES2_HS512_A256KW])?;
    let p2s = parsed
        .header
        .p2s
        .as_deref()
        .ok_or_else(|| CryptoError::Malformed("header is missing \"p2s\"".to_string()))
        .and_then(|s| b64url_decode(s, "p2s"))?;
    let p2c = parsed
        .header
        .p2c
        .ok_or_else(|| CryptoError::Malformed("header is missing \"p2c\"".to_string()))?;
    if !(MIN_PBES2_ITERATIONS..=MAX_PBES2_ITERATIONS).contains(&p2c) {
        return Err(CryptoError::KeyDerivation(format!(
            "p2c {p2c} outside [{MIN_PBES2_ITERATIONS}, {MAX_PBES2_ITERATIONS}]"
        )));
    }
    let kek = jose::pbes2_kek(password.as_bytes(), &p2s, p2c);
    let cek = jose::unwrap_key(&kek, &parsed.encrypted_key)?;
    parsed.open(&cek)
}

// ── Raw-key wrap ──

/// Encrypts `payload` under a pre-shared 256-bit key.
pub fn encrypt_key_wrap(
    payload: &[u8],
    kek: &[u8; KEY_SIZE],
    kid: Option<&str>,
) -> CryptoResult<String> {
    let cek = jose::generate_key();
    let encrypted_key = jose::wrap_key(kek, cek.as_slice())?;
    let header = JoseHeader {
        alg: Some(alg::A256KW.to_string()),
        enc: Some(alg::A256GCM.to_string()),
        kid: kid.map(str::to_string),
        ..Default::default()
    };
    serialize(&header, &cek, &encrypted_key, payload)
}

pub fn decrypt_key_wrap(jwe: &str, kek: &[u8; KEY_SIZE]) -> CryptoResult<Vec<u8>> {
    let parsed = CompactJwe::parse(jwe)?;
    parsed.expect_alg(&[alg::A256KW])?;
    let cek: Zeroizing<[u8; KEY_SIZE]> = jose::unwrap_key(kek, &parsed.encrypted_key)?;
    parsed.open(&cek)
}
