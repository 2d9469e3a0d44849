mod support;

use keyhub_cloud::wot;
use keyhub_cloud::{AccessGrantService, HubConfig, NewVault, SkipReason, UserDto, VaultService};
use keyhub_crypto::{AccessToken, AutomaticAccessGrant, UserKeys};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use support::{FakeBackend, FixedUserKeys};

const MAX_CHAIN: usize = 16;

struct World {
    backend: FakeBackend,
    owner: Arc<UserKeys>,
    users: Vec<(String, UserKeys)>,
}

impl World {
    /// An owner plus a line of users `t1..=tn`, where the owner signed `t1`
    /// and each `ti` signed `t(i+1)`; `tn` therefore has trust level `n`.
    fn with_trust_line(n: usize) -> Self {
        let owner = UserKeys::create();
        let backend = FakeBackend::new("owner");
        backend.add_user("owner", Some(&owner));

        let users: Vec<(String, UserKeys)> =
            (1..=n).map(|i| (format!("t{i}"), UserKeys::create())).collect();
        for (id, keys) in &users {
            backend.add_user(id, Some(keys));
        }

        let mut signer_id = "owner".to_string();
        let mut signer_keys = &owner;
        for (id, keys) in &users {
            let subject = dto(&backend, id);
            let jws = wot::sign(signer_keys.ecdsa.secret(), &signer_id, &subject).unwrap();
            backend.put_attestation(&signer_id, id, jws);
            signer_id = id.clone();
            signer_keys = keys;
        }

        Self {
            backend,
            owner: Arc::new(owner),
            users,
        }
    }

    fn owner_keys(&self) -> Arc<FixedUserKeys> {
        Arc::new(FixedUserKeys(self.owner.clone()))
    }

    async fn create_vault(&self, grant: AutomaticAccessGrant) -> String {
        VaultService::new(Arc::new(self.backend.clone()), self.owner_keys())
            .create_vault(NewVault {
                name: "shared".to_string(),
                automatic_access_grant: grant,
                ..Default::default()
            })
            .await
            .unwrap()
    }

    fn grant_service(&self) -> AccessGrantService {
        AccessGrantService::new(Arc::new(self.backend.clone()), self.owner_keys(), MAX_CHAIN)
    }

    /// Bulk grant uploads after vault creation's own owner-token upload.
    fn grant_uploads(&self) -> usize {
        self.backend.grant_calls().len() - 1
    }
}

fn dto(backend: &FakeBackend, id: &str) -> UserDto {
    backend.state.lock().unwrap().users[id].clone()
}

/// Uploads caused by one grant run for a candidate at trust level 2.
async fn uploads_for(enabled: bool, max_wot_depth: i64) -> usize {
    let world = World::with_trust_line(2);
    let vault_id = world.create_vault(AutomaticAccessGrant::new(enabled, max_wot_depth)).await;
    world.backend.add_member(&vault_id, "t2");
    world.grant_service().grant_access(&vault_id).await.unwrap();
    world.grant_uploads()
}

// ── Decision table ──

#[tokio::test]
async fn decision_table() {
    let table = [
        ((false, -1), 0),
        ((true, -1), 0),
        ((true, 3), 1),
        ((true, 2), 1),
        ((true, 1), 0),
    ];
    for ((enabled, depth), expected) in table {
        assert_eq!(
            uploads_for(enabled, depth).await,
            expected,
            "enabled={enabled} maxWotDepth={depth} level=2"
        );
    }
}

// ── Outcomes ──

#[tokio::test]
async fn granted_token_opens_for_candidate_without_recovery_key() {
    let world = World::with_trust_line(1);
    let vault_id = world.create_vault(AutomaticAccessGrant::new(true, 1)).await;
    world.backend.add_member(&vault_id, "t1");

    let outcome = world.grant_service().grant_access(&vault_id).await.unwrap();
    assert!(outcome.policy_enabled);
    assert_eq!(outcome.granted, vec!["t1".to_string()]);
    assert!(outcome.skipped.is_empty());

    let (vault, tokens) = world.backend.grant_calls().pop().unwrap();
    assert_eq!(vault, vault_id);
    let token = AccessToken::decrypt(&tokens["t1"], world.users[0].1.ecdh.secret()).unwrap();
    assert!(!token.has_recovery_key());

    let member = VaultService::new(
        Arc::new(world.backend.as_user("t1")),
        Arc::new(FixedUserKeys(Arc::new(world.users[0].1.clone()))),
    );
    let metadata = member.vault_metadata(&vault_id).await.unwrap();
    assert_eq!(metadata.automatic_access_grant, AutomaticAccessGrant::new(true, 1));
}

#[tokio::test]
async fn rerun_with_unchanged_state_writes_nothing() {
    let world = World::with_trust_line(1);
    let vault_id = world.create_vault(AutomaticAccessGrant::new(true, 2)).await;
    world.backend.add_member(&vault_id, "t1");
    let service = world.grant_service();

    assert!(service.grant_access(&vault_id).await.unwrap().uploaded());
    let second = service.grant_access(&vault_id).await.unwrap();
    assert!(!second.uploaded());
    assert_eq!(world.grant_uploads(), 1);
}

#[tokio::test]
async fn candidates_without_ecdh_key_or_trust_are_skipped() {
    let world = World::with_trust_line(1);
    let vault_id = world.create_vault(AutomaticAccessGrant::new(true, 5)).await;

    world.backend.add_user("keyless", None);
    world.backend.add_user("stranger", Some(&UserKeys::create()));
    world.backend.add_member(&vault_id, "keyless");
    world.backend.add_member(&vault_id, "stranger");
    world.backend.add_member(&vault_id, "t1");

    let outcome = world.grant_service().grant_access(&vault_id).await.unwrap();
    assert_eq!(outcome.granted, vec!["t1".to_string()]);
    assert_eq!(
        outcome.skipped,
        vec![
            ("keyless".to_string(), SkipReason::NoEcdhKey),
            ("stranger".to_string(), SkipReason::Untrusted),
        ]
    );
    let (_, tokens) = world.backend.grant_calls().pop().unwrap();
    assert_eq!(tokens.keys().collect::<Vec<_>>(), vec!["t1"]);
}

#[tokio::test]
async fn malformed_depth_disables_policy() {
    let world = World::with_trust_line(1);
    let grant = AutomaticAccessGrant {
        enabled: true,
        max_wot_depth: serde_json::json!("1"),
    };
    let vault_id = world.create_vault(grant).await;
    world.backend.add_member(&vault_id, "t1");

    let outcome = world.grant_service().grant_access(&vault_id).await.unwrap();
    assert!(!outcome.policy_enabled);
    assert_eq!(world.grant_uploads(), 0);
}

#[tokio::test]
async fn missing_own_access_token_aborts() {
    let world = World::with_trust_line(1);
    let vault_id = world.create_vault(AutomaticAccessGrant::new(true, 1)).await;
    world.backend.add_member(&vault_id, "t1");

    let outsider = UserKeys::create();
    world.backend.add_user("outsider", Some(&outsider));
    let service = AccessGrantService::new(
        Arc::new(world.backend.as_user("outsider")),
        Arc::new(FixedUserKeys(Arc::new(outsider))),
        MAX_CHAIN,
    );

    let err = service.grant_access(&vault_id).await.unwrap_err();
    assert!(err.is_forbidden(), "got {err:?}");
    assert_eq!(world.grant_uploads(), 0);
}

#[tokio::test]
async fn unknown_vault_aborts() {
    let world = World::with_trust_line(1);
    let err = world.grant_service().grant_access("no-such-vault").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn configured_chain_length_caps_vault_depth() {
    let world = World::with_trust_line(2);
    let vault_id = world.create_vault(AutomaticAccessGrant::new(true, 2)).await;
    world.backend.add_member(&vault_id, "t2");

    let config = HubConfig {
        max_chain_length: 1,
        ..HubConfig::default()
    };
    let service = AccessGrantService::from_config(
        Arc::new(world.backend.clone()),
        world.owner_keys(),
        &config,
    );
    let outcome = service.grant_access(&vault_id).await.unwrap();
    assert!(outcome.granted.is_empty());
    assert_eq!(outcome.skipped, vec![("t2".to_string(), SkipReason::Untrusted)]);
    assert_eq!(world.grant_uploads(), 0);
}
