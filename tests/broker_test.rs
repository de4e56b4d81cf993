//! Brokered login/logout flows against a stubbed upstream provider.

mod helpers;

use helpers::{
    query_param, FakeExchanger, GroupBuilder, TestEnv, TEST_CLIENT_ID, TEST_LOGOUT_CALLBACK,
    TEST_REDIRECT_URI,
};
use latchkey::errors::Error;
use latchkey::roles::ROLE_INSTRUCTOR;
use latchkey::store::Store;
use latchkey::{CrudBits, RelationKind};
use serde_json::json;
use std::sync::atomic::Ordering;

fn instructor_claims() -> serde_json::Value {
    json!({
        "sub": "idp-alice",
        "email": "alice@example.com",
        "given_name": "Alice",
        "groups": "cs101:instructor",
        "training_id": "tenant-1"
    })
}

#[tokio::test]
async fn login_state_is_single_use() {
    let env = TestEnv::new();
    let broker = env.broker(FakeExchanger::returning(instructor_claims()));

    let url = broker
        .start_login(TEST_CLIENT_ID, TEST_REDIRECT_URI)
        .await
        .unwrap();
    assert!(url.as_str().starts_with("https://idp.test/authorize"));
    assert_eq!(query_param(&url, "response_type").as_deref(), Some("code"));
    let state = query_param(&url, "state").expect("state param");

    broker.handle_callback("auth-code", &state).await.unwrap();

    // Replay: the state was consumed atomically.
    let replay = broker.handle_callback("auth-code", &state).await;
    assert!(matches!(replay, Err(Error::InvalidState)));
}

#[tokio::test]
async fn unknown_state_is_invalid() {
    let env = TestEnv::new();
    let broker = env.broker(FakeExchanger::returning(instructor_claims()));
    let err = broker.handle_callback("auth-code", "never-minted").await;
    assert!(matches!(err, Err(Error::InvalidState)));
}

#[tokio::test]
async fn callback_provisions_user_groups_and_session() {
    let env = TestEnv::new();
    let broker = env.broker(FakeExchanger::returning(instructor_claims()));

    let url = broker
        .start_login(TEST_CLIENT_ID, TEST_REDIRECT_URI)
        .await
        .unwrap();
    let state = query_param(&url, "state").unwrap();
    let session = broker.handle_callback("auth-code", &state).await.unwrap();

    // User exists, carries the upstream identity and backfilled profile.
    let user = env
        .store
        .find_user_by_identity("idp-alice")
        .await
        .unwrap()
        .expect("provisioned user");
    assert_eq!(user.email.as_deref(), Some("alice@example.com"));
    assert_eq!(user.tenant_id.as_deref(), Some("tenant-1"));
    assert_eq!(session.user_id, user.id);

    // The claimed group exists with the Instructor role and the user is a
    // member, so resolution grants instructor bits on the group.
    let group = env
        .store
        .find_group_by_name("cs101:instructor")
        .await
        .unwrap()
        .expect("claim-provisioned group");
    let resolved = env.resolver().resolve(&user.id).await.unwrap();
    assert_eq!(
        resolved.get(group.id.as_str()),
        Some(&(CrudBits::READ | CrudBits::UPDATE))
    );
}

#[tokio::test]
async fn second_login_diffs_memberships() {
    let env = TestEnv::new();

    // First login: instructor in cs101.
    let broker = env.broker(FakeExchanger::returning(instructor_claims()));
    let url = broker
        .start_login(TEST_CLIENT_ID, TEST_REDIRECT_URI)
        .await
        .unwrap();
    let state = query_param(&url, "state").unwrap();
    broker.handle_callback("code-1", &state).await.unwrap();

    let user = env
        .store
        .find_user_by_identity("idp-alice")
        .await
        .unwrap()
        .unwrap();

    // Manually administered group: must survive the sync diff.
    GroupBuilder::new("faculty-council")
        .with_role(ROLE_INSTRUCTOR)
        .create(&env)
        .await;
    env.hierarchy
        .add_user_to_group(&user.id, "faculty-council")
        .await
        .unwrap();

    // Second login: the claim now names a different course.
    let broker = env.broker(FakeExchanger::returning(json!({
        "sub": "idp-alice",
        "groups": "math200:learner"
    })));
    let url = broker
        .start_login(TEST_CLIENT_ID, TEST_REDIRECT_URI)
        .await
        .unwrap();
    let state = query_param(&url, "state").unwrap();
    broker.handle_callback("code-2", &state).await.unwrap();

    let old_group = env
        .store
        .find_group_by_name("cs101:instructor")
        .await
        .unwrap()
        .unwrap();
    let new_group = env
        .store
        .find_group_by_name("math200:learner")
        .await
        .unwrap()
        .unwrap();

    let memberships = env
        .store
        .find_relations(
            &latchkey::store::RelationFilter::to_node(&user.id).kind(RelationKind::Membership),
        )
        .await
        .unwrap();
    let group_ids: Vec<&str> = memberships.iter().map(|r| r.from_id.as_str()).collect();

    assert!(group_ids.contains(&new_group.id.as_str()), "enrolled in claimed group");
    assert!(
        !group_ids.contains(&old_group.id.as_str()),
        "unenrolled from no-longer-claimed group"
    );
    assert!(
        group_ids.contains(&"faculty-council"),
        "manually administered membership untouched"
    );
}

#[tokio::test]
async fn tier_groups_are_nested_admin_over_instructor_over_learner() {
    let env = TestEnv::new();
    let broker = env.broker(FakeExchanger::returning(json!({
        "sub": "idp-admin",
        "groups": "cs101:admin,cs101:instructor,cs101:learner"
    })));
    let url = broker
        .start_login(TEST_CLIENT_ID, TEST_REDIRECT_URI)
        .await
        .unwrap();
    let state = query_param(&url, "state").unwrap();
    broker.handle_callback("code", &state).await.unwrap();

    let admin = env.store.find_group_by_name("cs101:admin").await.unwrap().unwrap();
    let instructor = env
        .store
        .find_group_by_name("cs101:instructor")
        .await
        .unwrap()
        .unwrap();
    let learner = env
        .store
        .find_group_by_name("cs101:learner")
        .await
        .unwrap()
        .unwrap();

    for (parent, child) in [(&admin.id, &instructor.id), (&instructor.id, &learner.id)] {
        let edges = env
            .store
            .find_relations(&latchkey::store::RelationFilter {
                from_id: Some(parent.clone()),
                to_id: Some(child.clone()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(edges.len(), 1, "tier nesting {parent} -> {child}");
    }
}

#[tokio::test]
async fn upstream_failure_propagates_and_consumes_state() {
    let env = TestEnv::new();
    let exchanger = FakeExchanger::failing(502, "provider unavailable");
    let broker = env.broker(exchanger.clone());

    let url = broker
        .start_login(TEST_CLIENT_ID, TEST_REDIRECT_URI)
        .await
        .unwrap();
    let state = query_param(&url, "state").unwrap();

    let err = broker.handle_callback("auth-code", &state).await;
    match err {
        Err(Error::Upstream { status, message }) => {
            assert_eq!(status, 502);
            assert_eq!(message, "provider unavailable");
        }
        other => panic!("expected upstream error, got {other:?}"),
    }

    // Code exchange is single-use upstream: the state is gone and no retry
    // happened.
    assert_eq!(exchanger.calls.load(Ordering::SeqCst), 1);
    let replay = broker.handle_callback("auth-code", &state).await;
    assert!(matches!(replay, Err(Error::InvalidState)));
}

#[tokio::test]
async fn unregistered_client_or_redirect_is_rejected() {
    let env = TestEnv::new();
    let broker = env.broker(FakeExchanger::returning(instructor_claims()));

    assert!(matches!(
        broker.start_login("ghost-client", TEST_REDIRECT_URI).await,
        Err(Error::BadRequest(_))
    ));
    assert!(matches!(
        broker
            .start_login(TEST_CLIENT_ID, "https://evil.test/steal")
            .await,
        Err(Error::BadRequest(_))
    ));
}

#[tokio::test]
async fn logout_round_trip_and_replay() {
    let env = TestEnv::new();
    let broker = env.broker(FakeExchanger::returning(instructor_claims()));

    let url = broker
        .start_logout(TEST_CLIENT_ID, TEST_REDIRECT_URI)
        .await
        .unwrap();
    assert!(url.as_str().starts_with("https://idp.test/logout"));
    // The provider is told how to get back to the broker's return leg.
    assert_eq!(
        query_param(&url, "post_logout_redirect_uri").as_deref(),
        Some(TEST_LOGOUT_CALLBACK)
    );
    let state = query_param(&url, "state").unwrap();

    let redirect = broker.handle_logout_callback(&state).await.unwrap();
    assert_eq!(redirect, TEST_REDIRECT_URI);

    let replay = broker.handle_logout_callback(&state).await;
    assert!(matches!(replay, Err(Error::InvalidState)));
}

#[tokio::test]
async fn login_state_cannot_complete_a_logout() {
    let env = TestEnv::new();
    let broker = env.broker(FakeExchanger::returning(instructor_claims()));

    let url = broker
        .start_login(TEST_CLIENT_ID, TEST_REDIRECT_URI)
        .await
        .unwrap();
    let state = query_param(&url, "state").unwrap();

    // The flow is bound into the state record; crossing legs is a replay.
    let err = broker.handle_logout_callback(&state).await;
    assert!(matches!(err, Err(Error::InvalidState)));
}
