use keyhub_crypto::codec::{
    decode_private_key_b64, decode_public_key, decode_public_key_b64, device_id,
    encode_public_key, encode_public_key_b64,
};
use keyhub_crypto::{CryptoError, DeviceKeys, PasswordOptions, UserKeys};

const FAST: PasswordOptions = PasswordOptions { iterations: 1_000 };

#[test]
fn user_keys_are_two_distinct_pairs() {
    let keys = UserKeys::create();
    let public = keys.public_keys().unwrap();
    assert_ne!(public.ecdh_public_key, public.ecdsa_public_key);
    assert_eq!(decode_public_key_b64(&public.ecdh_public_key).unwrap(), *keys.ecdh.public());
}

#[test]
fn account_key_roundtrip() {
    let keys = UserKeys::create();
    let public = keys.public_keys().unwrap();
    let account_key = keyhub_crypto::generate_account_key();

    let envelope = keys.encrypt_with_account_key_opts(&account_key, &FAST).unwrap();
    let recovered = UserKeys::recover_from_account_key(&envelope, &account_key, &public).unwrap();

    assert_eq!(recovered.public_keys().unwrap(), public);
    assert_eq!(recovered.ecdsa.secret().to_bytes(), keys.ecdsa.secret().to_bytes());
}

#[test]
fn wrong_account_key_is_a_decryption_error() {
    let keys = UserKeys::create();
    let public = keys.public_keys().unwrap();
    let envelope = keys.encrypt_with_account_key_opts("AAAA-BBBB", &FAST).unwrap();

    let err = UserKeys::recover_from_account_key(&envelope, "AAAA-BBBC", &public).unwrap_err();
    assert!(matches!(err, CryptoError::Decryption(_)), "got {err:?}");
}

#[test]
fn device_roundtrip() {
    let keys = UserKeys::create();
    let public = keys.public_keys().unwrap();
    let device = DeviceKeys::generate();

    let envelope = keys.encrypt_for_device(device.public()).unwrap();
    let decrypted = UserKeys::decrypt_on_device(&envelope, device.secret(), &public).unwrap();
    assert_eq!(decrypted.public_keys().unwrap(), public);
}

#[test]
fn other_device_cannot_decrypt() {
    let keys = UserKeys::create();
    let public = keys.public_keys().unwrap();
    let device = DeviceKeys::generate();
    let other = DeviceKeys::generate();

    let envelope = keys.encrypt_for_device(device.public()).unwrap();
    assert!(matches!(
        UserKeys::decrypt_on_device(&envelope, other.secret(), &public),
        Err(CryptoError::Decryption(_))
    ));
}

#[test]
fn device_id_is_hash_of_encoded_public_key() {
    use sha2::{Digest, Sha256};

    let device = DeviceKeys::generate();
    let der = encode_public_key(device.public()).unwrap();
    assert_eq!(device.device_id().unwrap(), hex::encode(Sha256::digest(&der)));
    assert_eq!(device_id(device.public()).unwrap(), device.device_id().unwrap());
}

#[test]
fn encodings_are_deterministic() {
    let device = DeviceKeys::generate();
    let b64 = encode_public_key_b64(device.public()).unwrap();
    assert_eq!(b64, encode_public_key_b64(device.public()).unwrap());
    let der = encode_public_key(device.public()).unwrap();
    assert_eq!(encode_public_key(&decode_public_key(&der).unwrap()).unwrap(), der);
}

#[test]
fn non_ec_keys_are_rejected() {
    // Ed25519 SubjectPublicKeyInfo
    let ed25519_spki = [
        0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00, 0x19, 0xbf,
        0x44, 0x09, 0x69, 0x84, 0xcd, 0xfe, 0x85, 0x41, 0xba, 0xc1, 0x67, 0xdc, 0x3b, 0x96,
        0xc8, 0x50, 0x86, 0xaa, 0x30, 0xb6, 0xb6, 0xcb, 0x0c, 0x5c, 0x38, 0xad, 0x70, 0x31,
        0x66, 0xe1,
    ];
    assert!(matches!(
        decode_public_key(&ed25519_spki),
        Err(CryptoError::NotEcKey(_))
    ));
    assert!(matches!(
        decode_private_key_b64("MC4CAQAwBQYDK2VwBCIEINTuctv5E1hK1bbY8fdp+K06/nwoy/HU++CXqI9EdVhC"),
        Err(CryptoError::NotEcKey(_))
    ));
}

#[test]
fn other_curves_are_rejected() {
    // P-256 SubjectPublicKeyInfo and PKCS#8 of the same key
    let p256_spki = "MFkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDQgAEDkNRJV1Nkzqlr1uxtTOQ5d8R+H7rGTR0d/27vx02YmJHoJAT\
                     3uZpFuOWBOE6UELdn5d6QZNYMBDhMszYeYAtSQ==";
    let p256_pkcs8 = "MIGHAgEAMBMGByqGSM49AgEGCCqGSM49AwEHBG0wawIBAQQgt1G2GAyIHvqAAAzpSyJZUHYbE7i+NpmW\
                      TMVr7ezAwXehRANCAAQOQ1ElXU2TOqWvW7G1M5Dl3xH4fusZNHR3/bu/HTZiYkegkBPe5mkW45YE4TpQ\
                      Qt2fl3pBk1gwEOEyzNh5gC1J";
    assert!(matches!(
        decode_public_key_b64(p256_spki),
        Err(CryptoError::NotEcKey(_))
    ));
    assert!(matches!(
        decode_private_key_b64(p256_pkcs8),
        Err(CryptoError::NotEcKey(_))
    ));
}
