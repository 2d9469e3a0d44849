//! User and device key pairs.
//!
//! A user owns two P-384 pairs: one for key agreement (ECDH), one for
//! signing (ECDSA). Public halves are published; private halves only ever
//! leave memory inside an envelope, either to a device public key
//! (agreement scheme) or to the user's account key (password scheme).

use crate::codec;
use crate::error::{CryptoError, CryptoResult};
use crate::jwe::{self, EcdhOptions, PasswordOptions};
use p384::{PublicKey, SecretKey};
use rand::Rng;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// A single P-384 key pair.
#[derive(Clone)]
pub struct EcKeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl EcKeyPair {
    pub fn generate() -> Self {
        Self::from_secret(SecretKey::random(&mut OsRng))
    }

    pub fn from_secret(secret: SecretKey) -> Self {
        let public = secret.public_key();
        Self { secret, public }
    }

    pub fn secret(&self) -> &SecretKey {
        &self.secret
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    pub fn public_key_b64(&self) -> CryptoResult<String> {
        codec::encode_public_key_b64(&self.public)
    }
}

impl std::fmt::Debug for EcKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcKeyPair")
            .field("public", &self.public_key_b64().unwrap_or_default())
            .finish_non_exhaustive()
    }
}

/// The published half of a user's keys, base64 SPKI DER.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPublicKeys {
    pub ecdh_public_key: String,
    pub ecdsa_public_key: String,
}

impl UserPublicKeys {
    pub fn ecdh_key(&self) -> CryptoResult<PublicKey> {
        codec::decode_public_key_b64(&self.ecdh_public_key)
    }

    pub fn ecdsa_key(&self) -> CryptoResult<PublicKey> {
        codec::decode_public_key_b64(&self.ecdsa_public_key)
    }
}

/// Envelope payload carrying both private halves as base64 PKCS#8.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
struct PrivateKeysPayload {
    ecdh_private_key: String,
    ecdsa_private_key: String,
}

/// A user's ECDH and ECDSA key pairs.
#[derive(Clone, Debug)]
pub struct UserKeys {
    pub ecdh: EcKeyPair,
    pub ecdsa: EcKeyPair,
}

impl UserKeys {
    /// Creates a fresh pair of pairs.
    pub fn create() -> Self {
        Self {
            ecdh: EcKeyPair::generate(),
            ecdsa: EcKeyPair::generate(),
        }
    }

    pub fn public_keys(&self) -> CryptoResult<UserPublicKeys> {
        Ok(UserPublicKeys {
            ecdh_public_key: self.ecdh.public_key_b64()?,
            ecdsa_public_key: self.ecdsa.public_key_b64()?,
        })
    }

    fn private_payload(&self) -> CryptoResult<Zeroizing<Vec<u8>>> {
        let payload = PrivateKeysPayload {
            ecdh_private_key: codec::encode_private_key_b64(self.ecdh.secret())?.to_string(),
            ecdsa_private_key: codec::encode_private_key_b64(self.ecdsa.secret())?.to_string(),
        };
        Ok(Zeroizing::new(serde_json::to_vec(&payload)?))
    }

    /// Rebuilds user keys from a decrypted payload, checking each private
    /// half against the published public half.
    fn from_private_payload(plaintext: &[u8], public: &UserPublicKeys) -> CryptoResult<Self> {
        let payload: PrivateKeysPayload = serde_json::from_slice(plaintext)
            .map_err(|e| CryptoError::Malformed(format!("invalid private keys payload: {e}")))?;
        let ecdh =
            EcKeyPair::from_secret(codec::decode_private_key_b64(&payload.ecdh_private_key)?);
        let ecdsa =
            EcKeyPair::from_secret(codec::decode_private_key_b64(&payload.ecdsa_private_key)?);

        if ecdh.public() != &public.ecdh_key()? {
            return Err(CryptoError::Decryption(
                "ECDH private key does not match the published public key".to_string(),
            ));
        }
        if ecdsa.public() != &public.ecdsa_key()? {
            return Err(CryptoError::Decryption(
                "ECDSA private key does not match the published public key".to_string(),
            ));
        }
        Ok(Self { ecdh, ecdsa })
    }

    /// Wraps the private halves to the user's account key (password scheme).
    pub fn encrypt_with_account_key(&self, account_key: &str) -> CryptoResult<String> {
        self.encrypt_with_account_key_opts(account_key, &PasswordOptions::default())
    }

    pub fn encrypt_with_account_key_opts(
        &self,
        account_key: &str,
        options: &PasswordOptions,
    ) -> CryptoResult<String> {
        jwe::encrypt_password(&self.private_payload()?, account_key, options)
    }

    /// Recovers user keys from the account-key envelope.
    ///
    /// A wrong account key fails as [`CryptoError::Decryption`].
    pub fn recover_from_account_key(
        envelope: &str,
        account_key: &str,
        public: &UserPublicKeys,
    ) -> CryptoResult<Self> {
        let plaintext = Zeroizing::new(jwe::decrypt_password(envelope, account_key)?);
        Self::from_private_payload(&plaintext, public)
    }

    /// Wraps the private halves to a device public key (agreement scheme).
    pub fn encrypt_for_device(&self, device_public: &PublicKey) -> CryptoResult<String> {
        jwe::encrypt_ecdh(&self.private_payload()?, device_public, &EcdhOptions::default())
    }

    /// Unwraps the device envelope with the device private key.
    pub fn decrypt_on_device(
        envelope: &str,
        device_secret: &SecretKey,
        public: &UserPublicKeys,
    ) -> CryptoResult<Self> {
        let plaintext = Zeroizing::new(jwe::decrypt_ecdh(envelope, device_secret)?);
        Self::from_private_payload(&plaintext, public)
    }
}

/// The key pair of one physical install.
#[derive(Clone, Debug)]
pub struct DeviceKeys {
    pair: EcKeyPair,
}

impl DeviceKeys {
    pub fn generate() -> Self {
        Self {
            pair: EcKeyPair::generate(),
        }
    }

    pub fn from_secret(secret: SecretKey) -> Self {
        Self {
            pair: EcKeyPair::from_secret(secret),
        }
    }

    pub fn secret(&self) -> &SecretKey {
        self.pair.secret()
    }

    pub fn public(&self) -> &PublicKey {
        self.pair.public()
    }

    /// Hex SHA-256 of the encoded public key.
    pub fn device_id(&self) -> CryptoResult<String> {
        codec::device_id(self.pair.public())
    }

    pub fn public_key_b64(&self) -> CryptoResult<String> {
        self.pair.public_key_b64()
    }

    pub fn to_pkcs8(&self) -> CryptoResult<Zeroizing<Vec<u8>>> {
        codec::encode_private_key(self.pair.secret())
    }

    pub fn from_pkcs8(der: &[u8]) -> CryptoResult<Self> {
        Ok(Self::from_secret(codec::decode_private_key(der)?))
    }
}

/// Alphabet of account keys: digits and upper-case letters without the
/// look-alikes `0 O 1 I L`.
const ACCOUNT_KEY_ALPHABET: &[u8] = b"23456789ABCDEFGHJKMNPQRSTUVWXYZ";
const ACCOUNT_KEY_GROUPS: usize = 8;
const ACCOUNT_KEY_GROUP_LEN: usize = 4;

/// Generates an account key such as `7KQF-2M9X-...` (8 groups of 4).
///
/// About 158 bits of entropy, enough that the PBES2 iteration count is
/// not what protects it.
pub fn generate_account_key() -> Zeroizing<String> {
    let mut rng = OsRng;
    let mut key = Zeroizing::new(String::with_capacity(
        ACCOUNT_KEY_GROUPS * (ACCOUNT_KEY_GROUP_LEN + 1),
    ));
    for group in 0..ACCOUNT_KEY_GROUPS {
        if group > 0 {
            key.push('-');
        }
        for _ in 0..ACCOUNT_KEY_GROUP_LEN {
            let idx = rng.gen_range(0..ACCOUNT_KEY_ALPHABET.len());
            key.push(ACCOUNT_KEY_ALPHABET[idx] as char);
        }
    }
    key
}
