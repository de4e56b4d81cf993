//! Entities and the persistence-agnostic storage seam.
//!
//! The core never issues graph queries against the backend: algorithms fetch
//! one `relations()` snapshot per invocation and traverse in memory. The
//! bundled [`MemoryStore`] keeps everything behind a single `RwLock`, which
//! makes `consume_login_state` an atomic read-then-delete.

use crate::authz::types::RelationKind;
use crate::errors::{Error, Result};
use async_trait::async_trait;
use base64ct::Encoding;
use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// URL-safe opaque identifier (144 bits).
pub(crate) fn random_id() -> String {
    let mut bytes = [0u8; 18];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64ct::Base64UrlUnpadded::encode_string(&bytes)
}

pub(crate) fn now() -> i64 {
    Utc::now().timestamp()
}

/// Directed, typed edge between two node references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub id: String,
    pub from_id: String,
    pub from_kind: String,
    pub to_id: String,
    pub to_kind: String,
    /// Optional sibling ordering hint, not an access-control input.
    pub order: Option<i64>,
    pub relation_type: RelationKind,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub display_name: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    /// Stable identifier issued by the upstream IdP; never rewritten once set.
    pub identity_id: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub tenant_id: Option<String>,
    pub created_at: i64,
}

/// Which redirect leg a state token binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateFlow {
    Login,
    Logout,
}

/// Single-use, time-boxed token binding an OIDC redirect leg to its
/// originating request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginState {
    pub state: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub flow: StateFlow,
    pub created_at: i64,
    pub expires_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub created_at: i64,
    pub expires_at: i64,
}

/// Attribute filter over relations; `None` fields match anything.
#[derive(Debug, Clone, Default)]
pub struct RelationFilter {
    pub from_id: Option<String>,
    pub to_id: Option<String>,
    pub from_kind: Option<String>,
    pub to_kind: Option<String>,
    pub relation_type: Option<RelationKind>,
}

impl RelationFilter {
    pub fn from_node(id: impl Into<String>) -> Self {
        Self {
            from_id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn to_node(id: impl Into<String>) -> Self {
        Self {
            to_id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn kind(mut self, kind: RelationKind) -> Self {
        self.relation_type = Some(kind);
        self
    }

    pub fn matches(&self, r: &Relation) -> bool {
        self.from_id.as_ref().map_or(true, |v| *v == r.from_id)
            && self.to_id.as_ref().map_or(true, |v| *v == r.to_id)
            && self.from_kind.as_ref().map_or(true, |v| *v == r.from_kind)
            && self.to_kind.as_ref().map_or(true, |v| *v == r.to_kind)
            && self.relation_type.map_or(true, |k| k == r.relation_type)
    }
}

/// Narrow storage contract the core consumes. Implementations must return
/// `relations()` in creation order so graph traversal stays deterministic.
#[async_trait]
pub trait Store: Send + Sync {
    // Relations
    async fn insert_relation(&self, relation: Relation) -> Result<Relation>;
    async fn relations(&self) -> Result<Vec<Relation>>;
    async fn find_relations(&self, filter: &RelationFilter) -> Result<Vec<Relation>>;
    async fn delete_relation(&self, id: &str) -> Result<()>;
    /// Bulk delete; missing ids are ignored. Returns the number removed.
    async fn delete_relations(&self, ids: &[String]) -> Result<u64>;

    // Users
    async fn insert_user(&self, user: User) -> Result<User>;
    async fn user(&self, id: &str) -> Result<User>;
    async fn find_user_by_identity(&self, identity_id: &str) -> Result<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn update_user(&self, user: User) -> Result<User>;
    async fn delete_user(&self, id: &str) -> Result<()>;

    // Groups
    async fn insert_group(&self, group: Group) -> Result<Group>;
    async fn group(&self, id: &str) -> Result<Group>;
    async fn find_group_by_name(&self, display_name: &str) -> Result<Option<Group>>;
    async fn delete_group(&self, id: &str) -> Result<()>;

    // OIDC state tokens
    async fn put_login_state(&self, state: LoginState) -> Result<()>;
    /// Atomic read-then-delete. Returns `None` when the token is missing or
    /// expired; either way the record is gone afterwards.
    async fn consume_login_state(&self, state: &str) -> Result<Option<LoginState>>;

    // Sessions
    async fn put_session(&self, session: Session) -> Result<()>;
    async fn session(&self, token: &str) -> Result<Option<Session>>;
    async fn delete_session(&self, token: &str) -> Result<()>;
}

#[derive(Debug, Default)]
struct Inner {
    /// Insertion order preserved: this is the `relations()` snapshot order.
    relations: Vec<Relation>,
    users: HashMap<String, User>,
    groups: HashMap<String, Group>,
    states: HashMap<String, LoginState>,
    sessions: HashMap<String, Session>,
}

/// Reference in-memory backend. Suitable for tests and single-process
/// deployments; a database-backed adapter implements the same trait.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_relation(&self, relation: Relation) -> Result<Relation> {
        let mut inner = self.inner.write().await;
        if inner.relations.iter().any(|r| r.id == relation.id) {
            return Err(Error::Conflict(format!(
                "relation `{}` already exists",
                relation.id
            )));
        }
        inner.relations.push(relation.clone());
        Ok(relation)
    }

    async fn relations(&self) -> Result<Vec<Relation>> {
        Ok(self.inner.read().await.relations.clone())
    }

    async fn find_relations(&self, filter: &RelationFilter) -> Result<Vec<Relation>> {
        Ok(self
            .inner
            .read()
            .await
            .relations
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn delete_relation(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let before = inner.relations.len();
        inner.relations.retain(|r| r.id != id);
        if inner.relations.len() == before {
            return Err(Error::not_found(format!("relation `{id}`")));
        }
        Ok(())
    }

    async fn delete_relations(&self, ids: &[String]) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let before = inner.relations.len();
        inner.relations.retain(|r| !ids.contains(&r.id));
        Ok((before - inner.relations.len()) as u64)
    }

    async fn insert_user(&self, user: User) -> Result<User> {
        let mut inner = self.inner.write().await;
        if inner.users.contains_key(&user.id) {
            return Err(Error::Conflict(format!("user `{}` already exists", user.id)));
        }
        if let Some(identity) = &user.identity_id {
            if inner
                .users
                .values()
                .any(|u| u.identity_id.as_deref() == Some(identity))
            {
                return Err(Error::Conflict(format!(
                    "identity `{identity}` already registered"
                )));
            }
        }
        inner.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn user(&self, id: &str) -> Result<User> {
        self.inner
            .read()
            .await
            .users
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("user `{id}`")))
    }

    async fn find_user_by_identity(&self, identity_id: &str) -> Result<Option<User>> {
        Ok(self
            .inner
            .read()
            .await
            .users
            .values()
            .find(|u| u.identity_id.as_deref() == Some(identity_id))
            .cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .inner
            .read()
            .await
            .users
            .values()
            .find(|u| u.email.as_deref() == Some(email))
            .cloned())
    }

    async fn update_user(&self, user: User) -> Result<User> {
        let mut inner = self.inner.write().await;
        if !inner.users.contains_key(&user.id) {
            return Err(Error::not_found(format!("user `{}`", user.id)));
        }
        inner.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn delete_user(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .users
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("user `{id}`")))
    }

    async fn insert_group(&self, group: Group) -> Result<Group> {
        let mut inner = self.inner.write().await;
        if inner.groups.contains_key(&group.id) {
            return Err(Error::Conflict(format!(
                "group `{}` already exists",
                group.id
            )));
        }
        inner.groups.insert(group.id.clone(), group.clone());
        Ok(group)
    }

    async fn group(&self, id: &str) -> Result<Group> {
        self.inner
            .read()
            .await
            .groups
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("group `{id}`")))
    }

    async fn find_group_by_name(&self, display_name: &str) -> Result<Option<Group>> {
        Ok(self
            .inner
            .read()
            .await
            .groups
            .values()
            .find(|g| g.display_name == display_name)
            .cloned())
    }

    async fn delete_group(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .groups
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("group `{id}`")))
    }

    async fn put_login_state(&self, state: LoginState) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.states.insert(state.state.clone(), state);
        Ok(())
    }

    async fn consume_login_state(&self, state: &str) -> Result<Option<LoginState>> {
        let mut inner = self.inner.write().await;
        match inner.states.remove(state) {
            Some(record) if now() <= record.expires_at => Ok(Some(record)),
            _ => Ok(None),
        }
    }

    async fn put_session(&self, session: Session) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.sessions.insert(session.token.clone(), session);
        Ok(())
    }

    async fn session(&self, token: &str) -> Result<Option<Session>> {
        Ok(self.inner.read().await.sessions.get(token).cloned())
    }

    async fn delete_session(&self, token: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.sessions.remove(token);
        Ok(())
    }
}
