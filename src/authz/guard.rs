//! Request-time authorization decisions.
//!
//! Two stages, both of which must pass: a coarse check that some direct
//! group membership carries the required capability for the resource kind,
//! and a fine check that every explicitly targeted id is present in the
//! user's resolved permission map with that capability. An id the resolver
//! never reached is denied (fail closed). Collaborators arrive through the
//! constructor; the guard imports nothing from the broker.

use crate::authz::resolver::PermissionResolver;
use crate::authz::types::{CrudBits, RelationKind, Verb};
use crate::errors::{Error, Result};
use crate::roles::RoleRegistry;
use crate::store::{RelationFilter, Store};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Outcome of an authorization check. `Deny` names the offending resource
/// and verb so callers can produce a useful `Forbidden`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny {
        resource: String,
        verb: Verb,
        required: CrudBits,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    /// Convert a denial into the crate's `Forbidden` error.
    pub fn into_result(self) -> Result<()> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny {
                resource,
                verb,
                required,
            } => Err(Error::Forbidden {
                resource,
                verb: verb.to_string(),
                required: required.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GuardConfig {
    /// Principals that bypass both checks entirely.
    pub super_admins: HashSet<String>,
    /// Per-verb overrides of the default verb -> capability mapping.
    pub verb_overrides: HashMap<Verb, CrudBits>,
}

impl GuardConfig {
    /// Build from the `[authorization]` settings section. Unparseable verbs
    /// or capability names are skipped with a warning.
    pub fn from_settings(settings: &crate::settings::AuthorizationSettings) -> Self {
        let mut verb_overrides = HashMap::new();
        for (verb, capability) in &settings.verb_overrides {
            match (verb.parse::<Verb>(), capability_bit(capability)) {
                (Ok(verb), Some(bit)) => {
                    verb_overrides.insert(verb, bit);
                }
                _ => tracing::warn!(%verb, %capability, "ignoring invalid verb override"),
            }
        }
        Self {
            super_admins: settings.super_admins.iter().cloned().collect(),
            verb_overrides,
        }
    }
}

fn capability_bit(name: &str) -> Option<CrudBits> {
    match name.to_ascii_lowercase().as_str() {
        "create" => Some(CrudBits::CREATE),
        "read" => Some(CrudBits::READ),
        "update" => Some(CrudBits::UPDATE),
        "delete" => Some(CrudBits::DELETE),
        _ => None,
    }
}

pub struct Guard {
    store: Arc<dyn Store>,
    roles: Arc<RoleRegistry>,
    resolver: PermissionResolver,
    config: GuardConfig,
}

impl Guard {
    pub fn new(
        store: Arc<dyn Store>,
        roles: Arc<RoleRegistry>,
        resolver: PermissionResolver,
        config: GuardConfig,
    ) -> Self {
        Self {
            store,
            roles,
            resolver,
            config,
        }
    }

    fn required_bit(&self, verb: Verb) -> CrudBits {
        self.config
            .verb_overrides
            .get(&verb)
            .copied()
            .unwrap_or_else(|| verb.required_bit())
    }

    /// Decide whether `user_id` may perform `verb` on `resource_kind`,
    /// additionally checking each explicitly targeted id.
    pub async fn authorize(
        &self,
        user_id: &str,
        verb: Verb,
        resource_kind: &str,
        target_ids: &[String],
    ) -> Result<Decision> {
        if self.config.super_admins.contains(user_id) {
            tracing::debug!(user = %user_id, "super-admin bypass");
            return Ok(Decision::Allow);
        }

        let required = self.required_bit(verb);

        if !self.coarse_check(user_id, resource_kind, required).await? {
            return Ok(Decision::Deny {
                resource: resource_kind.to_string(),
                verb,
                required,
            });
        }

        if !target_ids.is_empty() {
            let resolved = self.resolver.resolve(user_id).await?;
            for id in target_ids {
                let granted = resolved.get(id).copied().unwrap_or(CrudBits::NONE);
                if !granted.contains(required) {
                    return Ok(Decision::Deny {
                        resource: id.clone(),
                        verb,
                        required,
                    });
                }
            }
        }

        Ok(Decision::Allow)
    }

    /// Short-circuit OR across the user's direct groups: does any group's
    /// role carry the required bit for the resource kind?
    async fn coarse_check(
        &self,
        user_id: &str,
        resource_kind: &str,
        required: CrudBits,
    ) -> Result<bool> {
        let memberships = self
            .store
            .find_relations(&RelationFilter::to_node(user_id).kind(RelationKind::Membership))
            .await?;

        for membership in memberships {
            let assignments = self
                .store
                .find_relations(
                    &RelationFilter::from_node(&membership.from_id)
                        .kind(RelationKind::RoleAssignment),
                )
                .await?;
            let Some(role_edge) = assignments.first() else {
                continue;
            };
            let role = match self.roles.get(&role_edge.to_id) {
                Ok(role) => role,
                Err(_) => {
                    tracing::warn!(
                        group = %membership.from_id,
                        role = %role_edge.to_id,
                        "role assignment points at unknown role"
                    );
                    continue;
                }
            };
            if role.permission_for(resource_kind).contains(required) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
