//! Key management layer for keyhub.
//!
//! Provides the cryptographic machinery behind shared vaults:
//! - P-384 key encoding (SPKI / PKCS#8) and device identifiers
//! - JOSE envelopes: compact JWE (ECDH-ES, PBES2, A256KW), general JSON JWE
//!   with heterogeneous recipients, and ES384 compact JWS
//! - The key hierarchy: device keys, user keys, vault member/recovery keys
//!   and access tokens
//!
//! # Architecture
//!
//! Keys are layered so that no server ever holds a usable private key:
//!
//! 1. **Device Key**: generated per install, never leaves the device.
//!    User private keys are wrapped to it with ECDH-ES.
//!
//! 2. **User Keys**: an ECDH pair for receiving vault keys and an ECDSA pair
//!    for signing trust attestations. Also wrapped to the user's account key
//!    with PBES2 so a new device can be bootstrapped.
//!
//! 3. **Vault Keys**: a symmetric member key that opens the vault metadata,
//!    and a recovery key pair for owners. Delivered per user as an access
//!    token wrapped to that user's ECDH public key.
//!
//! All envelopes use standard JOSE serializations so they interoperate with
//! independent implementations.

pub mod codec;
mod error;
pub mod jose;
pub mod jwe;
pub mod jwe_json;
pub mod jws;
pub mod keys;
pub mod vault;

pub use error::{CryptoError, CryptoResult};
pub use jose::{KEY_SIZE, generate_key};
pub use jwe::{EcdhMode, EcdhOptions, PasswordOptions};
pub use jwe_json::{MultiRecipientJwe, Recipient};
pub use jws::{JwsHeader, VerifiedJws};
pub use keys::{DeviceKeys, EcKeyPair, UserKeys, UserPublicKeys, generate_account_key};
pub use p384::{PublicKey, SecretKey};
pub use vault::{AccessToken, AutomaticAccessGrant, StorageDescriptor, VaultKeys, VaultMetadata};
pub use zeroize::Zeroizing;
