//! Multi-recipient JWE in general JSON serialization.
//!
//! One random CEK encrypts the payload once; the CEK is then wrapped
//! independently for each recipient, which may be a symmetric key (`A256KW`)
//! or a P-384 public key (`ECDH-ES+A256KW`). Any single recipient key is
//! enough to decrypt.
//!
//! ```text
//! {
//!   "protected": b64url({"enc":"A256GCM"}),
//!   "recipients": [ { "header": {...}, "encrypted_key": "..." }, ... ],
//!   "iv": "...", "ciphertext": "...", "tag": "..."
//! }
//! ```

use crate::error::{CryptoError, CryptoResult};
use crate::jose::{
    self, JoseHeader, KEY_SIZE, alg, b64url_decode, b64url_encode, decode_header, encode_header,
};
use p384::{PublicKey, SecretKey};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// A recipient of a multi-recipient envelope.
#[derive(Clone, Copy, Debug)]
pub enum Recipient<'a> {
    /// Symmetric 256-bit key, wrapped with `A256KW`.
    Symmetric {
        kid: Option<&'a str>,
        key: &'a [u8; KEY_SIZE],
    },
    /// P-384 public key, wrapped with `ECDH-ES+A256KW`.
    Ec {
        kid: Option<&'a str>,
        key: &'a PublicKey,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct RecipientEntry {
    header: JoseHeader,
    encrypted_key: String,
}

/// General JSON serialization of a JWE.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MultiRecipientJwe {
    protected: String,
    recipients: Vec<RecipientEntry>,
    iv: String,
    ciphertext: String,
    tag: String,
}

impl MultiRecipientJwe {
    /// Encrypts `payload` once for all `recipients`.
    pub fn encrypt(payload: &[u8], recipients: &[Recipient<'_>]) -> CryptoResult<Self> {
        if recipients.is_empty() {
            return Err(CryptoError::Encryption("at least one recipient is required".to_string()));
        }

        let cek = jose::generate_key();
        let mut entries = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            entries.push(match *recipient {
                Recipient::Symmetric { kid, key } => RecipientEntry {
                    header: JoseHeader {
                        alg: Some(alg::A256KW.to_string()),
                        kid: kid.map(str::to_string),
                        ..Default::default()
                    },
                    encrypted_key: b64url_encode(&jose::wrap_key(key, cek.as_slice())?),
                },
                Recipient::Ec { kid, key } => {
                    let (epk, kek) = jose::ecdh_sender(key, alg::ECDH_ES_A256KW, b"", b"");
                    RecipientEntry {
                        header: JoseHeader {
                            alg: Some(alg::ECDH_ES_A256KW.to_string()),
                            kid: kid.map(str::to_string),
                            epk: Some(epk),
                            ..Default::default()
                        },
                        encrypted_key: b64url_encode(&jose::wrap_key(&kek, cek.as_slice())?),
                    }
                }
            });
        }

        let protected = encode_header(&JoseHeader {
            enc: Some(alg::A256GCM.to_string()),
            ..Default::default()
        })?;
        let sealed = jose::seal_content(&cek, protected.as_bytes(), payload)?;

        Ok(Self {
            protected,
            recipients: entries,
            iv: b64url_encode(&sealed.iv),
            ciphertext: b64url_encode(&sealed.ciphertext),
            tag: b64url_encode(&sealed.tag),
        })
    }

    pub fn parse(json: &str) -> CryptoResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| CryptoError::Malformed(format!("invalid JWE JSON serialization: {e}")))
    }

    pub fn to_json(&self) -> CryptoResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Key ids of all recipients, in order.
    pub fn recipient_kids(&self) -> Vec<Option<&str>> {
        self.recipients.iter().map(|r| r.header.kid.as_deref()).collect()
    }

    /// Decrypts with a symmetric recipient key.
    ///
    /// Only `A256KW` recipients (and, when `kid` is given, only those with a
    /// matching key id) are tried.
    pub fn decrypt_with_key(
        &self,
        kid: Option<&str>,
        key: &[u8; KEY_SIZE],
    ) -> CryptoResult<Vec<u8>> {
        self.decrypt_with(alg::A256KW, kid, |_, entry| {
            jose::unwrap_key(key, &b64url_decode(&entry.encrypted_key, "encrypted key")?)
        })
    }

    /// Decrypts with an EC recipient private key.
    pub fn decrypt_with_ec_key(&self, kid: Option<&str>, key: &SecretKey) -> CryptoResult<Vec<u8>> {
        self.decrypt_with(alg::ECDH_ES_A256KW, kid, |header, entry| {
            let kek = jose::ecdh_recipient(header, key, alg::ECDH_ES_A256KW)?;
            jose::unwrap_key(&kek, &b64url_decode(&entry.encrypted_key, "encrypted key")?)
        })
    }

    fn decrypt_with<F>(
        &self,
        wanted_alg: &str,
        kid: Option<&str>,
        unwrap: F,
    ) -> CryptoResult<Vec<u8>>
    where
        F: Fn(&JoseHeader, &RecipientEntry) -> CryptoResult<Zeroizing<[u8; KEY_SIZE]>>,
    {
        let protected: JoseHeader = decode_header(&self.protected)?;
        protected.require_a256gcm()?;

        let mut last_error = None;
        for entry in &self.recipients {
            let header = protected.merged(&entry.header)?;
            header.reject_unsupported_parameters()?;
            if header.alg()? != wanted_alg {
                continue;
            }
            if kid.is_some() && header.kid.as_deref() != kid {
                continue;
            }
            match unwrap(&header, entry) {
                Ok(cek) => {
                    return jose::open_content(
                        &cek,
                        self.protected.as_bytes(),
                        &b64url_decode(&self.iv, "IV")?,
                        &b64url_decode(&self.ciphertext, "ciphertext")?,
                        &b64url_decode(&self.tag, "tag")?,
                    );
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            CryptoError::Decryption(format!(
                "no {wanted_alg} recipient{} in envelope",
                kid.map(|k| format!(" with kid {k}")).unwrap_or_default()
            ))
        }))
    }
}
