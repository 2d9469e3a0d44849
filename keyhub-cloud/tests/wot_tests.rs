mod support;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use keyhub_cloud::wot::{self, TrustAnchor, UNVERIFIED};
use keyhub_cloud::{CloudError, HubConfig, TrustDto, UserDto, WotService};
use keyhub_crypto::{UserKeys, UserPublicKeys};
use std::sync::Arc;
use support::{FakeBackend, FixedUserKeys};

const MAX_LEN: usize = 16;

struct Person {
    dto: UserDto,
    keys: UserKeys,
}

fn person(id: &str) -> Person {
    let keys = UserKeys::create();
    let public = keys.public_keys().unwrap();
    Person {
        dto: UserDto {
            id: id.to_string(),
            name: id.to_string(),
            ecdh_public_key: Some(public.ecdh_public_key),
            ecdsa_public_key: Some(public.ecdsa_public_key),
            private_keys: None,
        },
        keys,
    }
}

fn anchor_of(p: &Person) -> TrustAnchor {
    TrustAnchor {
        user_id: p.dto.id.clone(),
        ecdsa_key: p.keys.ecdsa.public().clone(),
    }
}

/// People `u0..=un` where each `ui` signed `u(i+1)`; returns them and the chain
/// from `u0` to `un`.
fn chain_of(n: usize) -> (Vec<Person>, Vec<String>) {
    let people: Vec<Person> = (0..=n).map(|i| person(&format!("u{i}"))).collect();
    let chain = people
        .windows(2)
        .map(|pair| wot::sign(pair[0].keys.ecdsa.secret(), &pair[0].dto.id, &pair[1].dto).unwrap())
        .collect();
    (people, chain)
}

fn trust(subject: &str, chain: Vec<String>) -> TrustDto {
    TrustDto {
        trusted_user_id: Some(subject.to_string()),
        signature_chain: Some(chain),
    }
}

/// Flips one byte of part `part` (0 header, 1 payload, 2 signature) of a JWS.
fn mutate(jws: &str, part: usize, byte: usize) -> String {
    let mut parts: Vec<String> = jws.split('.').map(str::to_string).collect();
    let mut bytes = URL_SAFE_NO_PAD.decode(&parts[part]).unwrap();
    let idx = byte % bytes.len();
    bytes[idx] ^= 0x20;
    parts[part] = URL_SAFE_NO_PAD.encode(bytes);
    parts.join(".")
}

// ── Signing ──

#[test]
fn attestation_carries_issuer_subject_and_keys() {
    let alice = person("alice");
    let bob = person("bob");
    let jws = wot::sign(alice.keys.ecdsa.secret(), "alice", &bob.dto).unwrap();

    let verified = keyhub_crypto::jws::verify_es384(&jws, alice.keys.ecdsa.public()).unwrap();
    assert_eq!(verified.header.alg, "ES384");
    assert_eq!(verified.header.typ.as_deref(), Some("JWT"));
    assert_eq!(verified.header.iss.as_deref(), Some("alice"));
    assert_eq!(verified.header.sub.as_deref(), Some("bob"));
    assert!(verified.header.iat.is_some());
    let payload: UserPublicKeys = verified.payload_json().unwrap();
    assert_eq!(payload, bob.dto.public_keys().unwrap());
}

#[test]
fn signing_user_without_keys_fails() {
    let alice = person("alice");
    let mut bob = person("bob").dto;
    bob.ecdsa_public_key = None;
    assert!(matches!(
        wot::sign(alice.keys.ecdsa.secret(), "alice", &bob),
        Err(CloudError::Untrusted(_))
    ));
}

// ── Chain verification ──

#[test]
fn chain_of_n_yields_level_n() {
    for n in 1..=4 {
        let (people, chain) = chain_of(n);
        let level = wot::trust_level(
            &anchor_of(&people[0]),
            &trust(&people[n].dto.id, chain),
            Some(&people[n].dto),
            MAX_LEN,
        );
        assert_eq!(level, n as i32, "chain of length {n}");
    }
}

#[test]
fn any_mutated_byte_yields_unverified() {
    let (people, chain) = chain_of(3);
    let anchor = anchor_of(&people[0]);
    let subject = &people[3].dto;

    for element in 0..chain.len() {
        for part in [1, 2] {
            for byte in [0, 7, 31, 95] {
                let mut tampered = chain.clone();
                tampered[element] = mutate(&chain[element], part, byte);
                let level =
                    wot::trust_level(&anchor, &trust("u3", tampered), Some(subject), MAX_LEN);
                assert_eq!(level, UNVERIFIED, "element {element} part {part} byte {byte}");
            }
        }
    }
}

#[test]
fn self_trust_is_level_zero_without_chain() {
    let alice = person("alice");
    let record = TrustDto {
        trusted_user_id: Some("alice".to_string()),
        signature_chain: None,
    };
    assert_eq!(wot::trust_level(&anchor_of(&alice), &record, None, MAX_LEN), 0);
}

#[test]
fn incomplete_records_are_unverified() {
    let (people, chain) = chain_of(1);
    let anchor = anchor_of(&people[0]);

    let no_subject = TrustDto {
        trusted_user_id: None,
        signature_chain: Some(chain.clone()),
    };
    assert_eq!(wot::trust_level(&anchor, &no_subject, Some(&people[1].dto), MAX_LEN), UNVERIFIED);

    let no_chain = TrustDto {
        trusted_user_id: Some("u1".to_string()),
        signature_chain: None,
    };
    assert_eq!(wot::trust_level(&anchor, &no_chain, Some(&people[1].dto), MAX_LEN), UNVERIFIED);

    assert_eq!(
        wot::trust_level(&anchor, &trust("u1", vec![]), Some(&people[1].dto), MAX_LEN),
        UNVERIFIED
    );

    let mut keyless = people[1].dto.clone();
    keyless.ecdh_public_key = None;
    assert_eq!(wot::trust_level(&anchor, &trust("u1", chain), Some(&keyless), MAX_LEN), UNVERIFIED);
}

#[test]
fn chain_must_end_at_subjects_current_keys() {
    let (people, chain) = chain_of(2);
    let rotated = person("u2").dto;
    let level =
        wot::trust_level(&anchor_of(&people[0]), &trust("u2", chain), Some(&rotated), MAX_LEN);
    assert_eq!(level, UNVERIFIED);
}

#[test]
fn chain_must_start_at_anchor() {
    let (people, chain) = chain_of(2);
    let stranger = person("u0");
    let level = wot::trust_level(
        &anchor_of(&stranger),
        &trust("u2", chain),
        Some(&people[2].dto),
        MAX_LEN,
    );
    assert_eq!(level, UNVERIFIED);
}

#[test]
fn chains_longer_than_limit_are_refused() {
    let (people, chain) = chain_of(3);
    let target = people[3].dto.public_keys().unwrap();
    let anchor = people[0].keys.ecdsa.public();

    assert!(wot::verify_chain(&chain, anchor, &target, 3).is_ok());
    assert!(matches!(
        wot::verify_chain(&chain, anchor, &target, 2),
        Err(CloudError::Untrusted(_))
    ));
    assert!(wot::verify_chain(&[], anchor, &target, 3).is_err());
}

// ── Batch ──

#[test]
fn verify_trusts_keeps_verified_and_drops_the_rest() {
    let (people, chain) = chain_of(2);
    let anchor = anchor_of(&people[0]);
    let mut broken = chain.clone();
    broken[1] = mutate(&broken[1], 2, 3);

    let trusts = vec![
        trust("u1", chain[..1].to_vec()),
        trust("u2", chain.clone()),
        trust("ghost", chain.clone()),
        trust("u2", broken),
        TrustDto::default(),
    ];
    let known: Vec<UserDto> = people.iter().map(|p| p.dto.clone()).collect();

    let levels = wot::verify_trusts(&trusts, &known, &anchor, MAX_LEN);
    assert_eq!(levels.len(), 2);
    assert_eq!(levels["u1"], 1);
    assert_eq!(levels["u2"], 2);
}

#[test]
fn verify_trusts_prefers_shortest_chain() {
    let (people, chain) = chain_of(2);
    let direct = wot::sign(people[0].keys.ecdsa.secret(), "u0", &people[2].dto).unwrap();
    let known: Vec<UserDto> = people.iter().map(|p| p.dto.clone()).collect();

    let levels = wot::verify_trusts(
        &[trust("u2", chain), trust("u2", vec![direct])],
        &known,
        &anchor_of(&people[0]),
        MAX_LEN,
    );
    assert_eq!(levels["u2"], 1);
}

// ── Service ──

#[tokio::test]
async fn service_signs_and_reports_transitive_levels() {
    let alice = person("alice");
    let bob = person("bob");
    let carol = person("carol");

    let backend = FakeBackend::new("alice");
    backend.add_user("alice", Some(&alice.keys));
    backend.add_user("bob", Some(&bob.keys));
    backend.add_user("carol", Some(&carol.keys));

    let alice_wot =
        WotService::new(Arc::new(backend.clone()), FixedUserKeys::new(alice.keys), MAX_LEN);
    let bob_wot =
        WotService::new(Arc::new(backend.as_user("bob")), FixedUserKeys::new(bob.keys), MAX_LEN);

    alice_wot.sign_user("bob").await.unwrap();
    bob_wot.sign_user("carol").await.unwrap();

    let levels = alice_wot.trust_levels().await.unwrap();
    assert_eq!(levels.get("bob"), Some(&1));
    assert_eq!(levels.get("carol"), Some(&2));
    assert_eq!(alice_wot.trust_level_of("carol").await.unwrap(), 2);
    assert_eq!(alice_wot.trust_level_of("nobody").await.unwrap(), UNVERIFIED);

    let bounded = alice_wot.trust_levels_within(1).await.unwrap();
    assert_eq!(bounded.get("bob"), Some(&1));
    assert!(!bounded.contains_key("carol"));
}

#[tokio::test]
async fn service_honours_configured_chain_length() {
    let alice = person("alice");
    let bob = person("bob");
    let carol = person("carol");

    let backend = FakeBackend::new("alice");
    backend.add_user("alice", Some(&alice.keys));
    backend.add_user("bob", Some(&bob.keys));
    backend.add_user("carol", Some(&carol.keys));

    let config = HubConfig {
        max_chain_length: 1,
        ..HubConfig::default()
    };
    let alice_wot =
        WotService::from_config(Arc::new(backend.clone()), FixedUserKeys::new(alice.keys), &config);
    let bob_wot = WotService::from_config(
        Arc::new(backend.as_user("bob")),
        FixedUserKeys::new(bob.keys),
        &config,
    );
    alice_wot.sign_user("bob").await.unwrap();
    bob_wot.sign_user("carol").await.unwrap();

    let levels = alice_wot.trust_levels().await.unwrap();
    assert_eq!(levels.get("bob"), Some(&1));
    assert!(!levels.contains_key("carol"));
    assert!(!alice_wot.trust_levels_within(5).await.unwrap().contains_key("carol"));
}

#[tokio::test]
async fn signing_unknown_user_is_not_found() {
    let alice = person("alice");
    let backend = FakeBackend::new("alice");
    backend.add_user("alice", Some(&alice.keys));
    let service = WotService::new(Arc::new(backend), FixedUserKeys::new(alice.keys), MAX_LEN);

    let err = service.sign_user("nobody").await.unwrap_err();
    assert!(err.is_not_found(), "got {err:?}");
}
