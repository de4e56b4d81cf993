//! User provisioning.
//!
//! Every registered user owns a private singleton group carrying the
//! immutable `Self` role, so a freshly created account always has at least
//! one group-derived permission baseline. Claim-driven resolution prefers
//! the stable upstream identity, falls back to legacy local-id/email lookup,
//! and only ever backfills missing profile fields, never an existing primary
//! identifier.

use crate::authz::types::NodeRef;
use crate::errors::{Error, Result};
use crate::hierarchy::HierarchyManager;
use crate::roles::ROLE_SELF;
use crate::store::{now, random_id, Group, Store, User};
use std::sync::Arc;

/// Incoming identity attributes, from registration or from IdP claims.
#[derive(Debug, Clone, Default)]
pub struct Profile {
    pub username: String,
    pub email: Option<String>,
    pub identity_id: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub tenant_id: Option<String>,
}

pub struct Accounts {
    store: Arc<dyn Store>,
    hierarchy: Arc<HierarchyManager>,
}

impl Accounts {
    pub fn new(store: Arc<dyn Store>, hierarchy: Arc<HierarchyManager>) -> Self {
        Self { store, hierarchy }
    }

    /// Create a user plus their private singleton group (role `Self`, one
    /// membership edge).
    pub async fn register(&self, profile: Profile) -> Result<User> {
        let user = self
            .store
            .insert_user(User {
                id: random_id(),
                username: profile.username.clone(),
                email: profile.email,
                identity_id: profile.identity_id,
                given_name: profile.given_name,
                family_name: profile.family_name,
                tenant_id: profile.tenant_id,
                created_at: now(),
            })
            .await?;

        let singleton = self
            .store
            .insert_group(Group {
                id: random_id(),
                display_name: format!("user:{}", user.username),
                created_at: now(),
            })
            .await?;
        self.hierarchy.assign_role(&singleton.id, ROLE_SELF).await?;
        self.hierarchy
            .add_user_to_group(&user.id, &singleton.id)
            .await?;

        tracing::info!(user = %user.id, username = %user.username, "registered user");
        Ok(user)
    }

    /// Find the user an upstream identity maps to, creating them on first
    /// login. Lookup order: stable identity id, then legacy local id, then
    /// email. A duplicate-insert race resolves by re-reading.
    pub async fn resolve_or_provision(&self, profile: Profile) -> Result<User> {
        let identity = profile
            .identity_id
            .clone()
            .ok_or_else(|| Error::BadRequest("identity claims carry no subject".into()))?;

        if let Some(user) = self.store.find_user_by_identity(&identity).await? {
            return self.backfill(user, &profile).await;
        }

        // Legacy accounts: provisioned before identity federation, keyed by
        // local id or email.
        if let Ok(user) = self.store.user(&identity).await {
            return self.adopt_identity(user, &identity, &profile).await;
        }
        if let Some(email) = &profile.email {
            if let Some(user) = self.store.find_user_by_email(email).await? {
                return self.adopt_identity(user, &identity, &profile).await;
            }
        }

        match self.register(profile).await {
            Ok(user) => Ok(user),
            // Concurrent first login for the same identity: the other
            // request won, re-read instead of erroring.
            Err(Error::Conflict(_)) => self
                .store
                .find_user_by_identity(&identity)
                .await?
                .ok_or_else(|| Error::not_found(format!("user for identity `{identity}`"))),
            Err(err) => Err(err),
        }
    }

    /// Cascade: remove the user, their private singleton group and every
    /// edge touching either.
    pub async fn delete(&self, user_id: &str) -> Result<()> {
        let user = self.store.user(user_id).await?;
        if let Some(singleton) = self
            .store
            .find_group_by_name(&format!("user:{}", user.username))
            .await?
        {
            self.hierarchy
                .unlink_node(&NodeRef::group(&singleton.id))
                .await?;
            self.store.delete_group(&singleton.id).await?;
        }
        self.hierarchy.unlink_node(&NodeRef::user(user_id)).await?;
        self.store.delete_user(user_id).await
    }

    /// Attach the upstream identity to a legacy account. The local id stays
    /// untouched.
    async fn adopt_identity(&self, mut user: User, identity: &str, profile: &Profile) -> Result<User> {
        if user.identity_id.is_none() {
            user.identity_id = Some(identity.to_string());
            user = self.store.update_user(user).await?;
            tracing::info!(user = %user.id, "adopted upstream identity for legacy account");
        }
        self.backfill(user, profile).await
    }

    /// Fill in missing profile fields only; existing values are never
    /// overwritten.
    async fn backfill(&self, mut user: User, profile: &Profile) -> Result<User> {
        let mut changed = false;
        if user.email.is_none() && profile.email.is_some() {
            user.email = profile.email.clone();
            changed = true;
        }
        if user.given_name.is_none() && profile.given_name.is_some() {
            user.given_name = profile.given_name.clone();
            changed = true;
        }
        if user.family_name.is_none() && profile.family_name.is_some() {
            user.family_name = profile.family_name.clone();
            changed = true;
        }
        if user.tenant_id.is_none() && profile.tenant_id.is_some() {
            user.tenant_id = profile.tenant_id.clone();
            changed = true;
        }
        if changed {
            user = self.store.update_user(user).await?;
            tracing::debug!(user = %user.id, "backfilled profile fields");
        }
        Ok(user)
    }
}
