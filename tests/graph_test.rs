//! Cross-module graph and authorization flows: hierarchy mutations feeding
//! the resolver and the guard.

mod helpers;

use helpers::{GroupBuilder, TestEnv, UserBuilder};
use latchkey::errors::Error;
use latchkey::roles::{ROLE_INSTRUCTOR, ROLE_LEARNER};
use latchkey::{CrudBits, Decision, GuardConfig, NodeRef, RelationKind, Verb};

#[tokio::test]
async fn instructor_group_grants_full_bits_on_owned_tool() {
    let env = TestEnv::new();
    let user = UserBuilder::new("alice").create(&env).await;
    GroupBuilder::new("cs101")
        .with_role(ROLE_INSTRUCTOR)
        .create(&env)
        .await;
    env.hierarchy
        .add_user_to_group(&user.id, "cs101")
        .await
        .unwrap();
    env.hierarchy
        .link(
            &NodeRef::group("cs101"),
            &NodeRef::new("tool", "tool-1"),
            RelationKind::Ownership,
            true,
        )
        .await
        .unwrap();

    let resolved = env.resolver().resolve(&user.id).await.unwrap();
    assert_eq!(resolved.get("tool-1"), Some(&CrudBits(7)));
}

#[tokio::test]
async fn reverse_edge_is_rejected_as_cyclic() {
    let env = TestEnv::new();
    env.hierarchy
        .link(
            &NodeRef::group("a"),
            &NodeRef::group("b"),
            RelationKind::Ownership,
            true,
        )
        .await
        .unwrap();

    let err = env
        .hierarchy
        .link(
            &NodeRef::group("b"),
            &NodeRef::group("a"),
            RelationKind::Ownership,
            true,
        )
        .await;
    assert!(matches!(err, Err(Error::CyclicDependency { .. })));
}

#[tokio::test]
async fn long_nesting_chain_rejects_any_back_edge() {
    let env = TestEnv::new();
    let names: Vec<String> = (0..8).map(|i| format!("g{i}")).collect();
    for pair in names.windows(2) {
        env.hierarchy
            .link(
                &NodeRef::group(&pair[0]),
                &NodeRef::group(&pair[1]),
                RelationKind::Ownership,
                true,
            )
            .await
            .unwrap();
    }

    // Every edge from a deeper group back to a shallower one closes a cycle.
    for (i, to) in names.iter().enumerate().take(7) {
        let err = env
            .hierarchy
            .link(
                &NodeRef::group(&names[i + 1]),
                &NodeRef::group(to),
                RelationKind::Ownership,
                true,
            )
            .await;
        assert!(
            matches!(err, Err(Error::CyclicDependency { .. })),
            "back edge g{} -> g{i} must be rejected",
            i + 1
        );
    }
}

#[tokio::test]
async fn guard_allows_update_on_reachable_tool_only() {
    let env = TestEnv::new();
    let user = UserBuilder::new("alice").create(&env).await;
    GroupBuilder::new("cs101")
        .with_role(ROLE_INSTRUCTOR)
        .create(&env)
        .await;
    env.hierarchy
        .add_user_to_group(&user.id, "cs101")
        .await
        .unwrap();
    env.hierarchy
        .link(
            &NodeRef::group("cs101"),
            &NodeRef::new("tool", "tool-1"),
            RelationKind::Ownership,
            true,
        )
        .await
        .unwrap();
    // tool-2 lives under an unrelated group.
    GroupBuilder::new("other").with_role(ROLE_LEARNER).create(&env).await;
    env.hierarchy
        .link(
            &NodeRef::group("other"),
            &NodeRef::new("tool", "tool-2"),
            RelationKind::Ownership,
            true,
        )
        .await
        .unwrap();

    let guard = env.guard(GuardConfig::default());
    let allowed = guard
        .authorize(&user.id, Verb::Put, "tool", &["tool-1".to_string()])
        .await
        .unwrap();
    assert!(allowed.is_allowed());

    let denied = guard
        .authorize(&user.id, Verb::Put, "tool", &["tool-2".to_string()])
        .await
        .unwrap();
    match denied {
        Decision::Deny { resource, .. } => assert_eq!(resource, "tool-2"),
        Decision::Allow => panic!("expected fail-closed deny"),
    }
}

#[tokio::test]
async fn registration_baseline_covers_own_record() {
    let env = TestEnv::new();
    let user = UserBuilder::new("bob").create(&env).await;

    // The private singleton group's Self role gives full control of the
    // user's own record.
    let resolved = env.resolver().resolve(&user.id).await.unwrap();
    assert_eq!(resolved.get(user.id.as_str()), Some(&CrudBits::ALL));

    let guard = env.guard(GuardConfig::default());
    let decision = guard
        .authorize(&user.id, Verb::Get, "user", &[user.id.clone()])
        .await
        .unwrap();
    assert!(decision.is_allowed());
}

#[tokio::test]
async fn deleting_a_group_cascades_its_edges() {
    let env = TestEnv::new();
    let user = UserBuilder::new("carol").create(&env).await;
    GroupBuilder::new("cs101")
        .with_role(ROLE_LEARNER)
        .create(&env)
        .await;
    env.hierarchy
        .add_user_to_group(&user.id, "cs101")
        .await
        .unwrap();

    env.hierarchy
        .unlink_node(&NodeRef::group("cs101"))
        .await
        .unwrap();

    // Only the singleton-group baseline remains.
    let resolved = env.resolver().resolve(&user.id).await.unwrap();
    assert!(!resolved.contains_key("cs101"));
    assert_eq!(resolved.get(user.id.as_str()), Some(&CrudBits::ALL));
}
