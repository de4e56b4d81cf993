//! Named permission templates ("roles") and the in-memory registry holding
//! them.
//!
//! A role carries one CRUD bit-vector per resource kind. The `lineage` flag
//! controls inheritance during graph propagation: `true` means descendant
//! roles' bits are OR-combined into the working set, `false` means the first
//! descendant role replaces the working set wholesale. `strength` orders
//! roles for display only and never feeds an access decision.

use crate::authz::types::CrudBits;
use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

/// The fixed set of resource kinds every role's permission map carries.
pub const RESOURCE_KINDS: [&str; 6] = ["user", "group", "lo", "service", "tool", "consumer"];

/// Well-known seed role ids.
pub const ROLE_SELF: &str = "self";
pub const ROLE_LEARNER: &str = "learner";
pub const ROLE_INSTRUCTOR: &str = "instructor";
pub const ROLE_ORG_ADMIN: &str = "org-admin";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub display_name: String,
    /// true: descendant roles widen this one; false: they replace it.
    pub lineage: bool,
    /// Seniority rank, informational only.
    pub strength: i32,
    /// Immutable roles reject update and delete.
    pub immutable: bool,
    /// Always carries every kind in [`RESOURCE_KINDS`].
    pub resource_permissions: BTreeMap<String, CrudBits>,
}

impl Role {
    /// Build a role with the full fixed key set; kinds absent from `grants`
    /// get no capabilities.
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        lineage: bool,
        strength: i32,
        immutable: bool,
        grants: &[(&str, CrudBits)],
    ) -> Self {
        let mut resource_permissions: BTreeMap<String, CrudBits> = RESOURCE_KINDS
            .iter()
            .map(|k| (k.to_string(), CrudBits::NONE))
            .collect();
        for (kind, bits) in grants {
            resource_permissions.insert(kind.to_string(), *bits);
        }
        Self {
            id: id.into(),
            display_name: display_name.into(),
            lineage,
            strength,
            immutable,
            resource_permissions,
        }
    }

    /// Capability bits for a resource kind. Unknown kinds resolve to no
    /// capabilities (fail closed).
    pub fn permission_for(&self, kind: &str) -> CrudBits {
        self.resource_permissions
            .get(kind)
            .copied()
            .unwrap_or(CrudBits::NONE)
    }

    /// OR every kind's bits from `other` into this role (lineage widening).
    pub fn widen(&mut self, other: &Role) {
        for (kind, bits) in &other.resource_permissions {
            *self
                .resource_permissions
                .entry(kind.clone())
                .or_insert(CrudBits::NONE) |= *bits;
        }
    }

    /// Replace this role's permission map wholesale (no-lineage delegation).
    pub fn replace_with(&mut self, other: &Role) {
        self.resource_permissions = other.resource_permissions.clone();
    }
}

/// In-memory registry of roles, seeded with the platform templates.
#[derive(Debug, Default)]
pub struct RoleRegistry {
    inner: RwLock<HashMap<String, Role>>,
}

impl RoleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with Self, Learner, Instructor and OrgAdmin.
    pub fn with_defaults() -> Self {
        let inner = seed_roles()
            .into_iter()
            .map(|role| (role.id.clone(), role))
            .collect();
        Self {
            inner: RwLock::new(inner),
        }
    }

    pub fn get(&self, id: &str) -> Result<Role> {
        self.inner
            .read()
            .expect("role registry lock poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("role `{id}`")))
    }

    pub fn insert(&self, role: Role) -> Result<()> {
        let mut inner = self.inner.write().expect("role registry lock poisoned");
        if inner.contains_key(&role.id) {
            return Err(Error::Conflict(format!("role `{}` already exists", role.id)));
        }
        inner.insert(role.id.clone(), role);
        Ok(())
    }

    pub fn update(&self, role: Role) -> Result<()> {
        let mut inner = self.inner.write().expect("role registry lock poisoned");
        match inner.get(&role.id) {
            None => Err(Error::not_found(format!("role `{}`", role.id))),
            Some(existing) if existing.immutable => Err(Error::Conflict(format!(
                "role `{}` is immutable",
                role.id
            ))),
            Some(_) => {
                inner.insert(role.id.clone(), role);
                Ok(())
            }
        }
    }

    pub fn remove(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write().expect("role registry lock poisoned");
        match inner.get(id) {
            None => Err(Error::not_found(format!("role `{id}`"))),
            Some(existing) if existing.immutable => {
                Err(Error::Conflict(format!("role `{id}` is immutable")))
            }
            Some(_) => {
                inner.remove(id);
                Ok(())
            }
        }
    }

    /// All roles, ordered by descending strength then id.
    pub fn list(&self) -> Vec<Role> {
        let mut roles: Vec<Role> = self
            .inner
            .read()
            .expect("role registry lock poisoned")
            .values()
            .cloned()
            .collect();
        roles.sort_by(|a, b| b.strength.cmp(&a.strength).then(a.id.cmp(&b.id)));
        roles
    }
}

/// Platform seed templates, verified under create=1/read=2/update=4/delete=8.
fn seed_roles() -> Vec<Role> {
    let rw = CrudBits::READ | CrudBits::UPDATE;
    let cru = CrudBits::CREATE | CrudBits::READ | CrudBits::UPDATE;
    vec![
        // Every user's private singleton group carries Self: full control of
        // their own record and singleton group, nothing else.
        Role::new(
            ROLE_SELF,
            "Self",
            true,
            0,
            true,
            &[("user", CrudBits::ALL), ("group", CrudBits::ALL)],
        ),
        Role::new(
            ROLE_LEARNER,
            "Learner",
            true,
            1,
            false,
            &RESOURCE_KINDS.map(|k| (k, CrudBits::READ)),
        ),
        Role::new(
            ROLE_INSTRUCTOR,
            "Instructor",
            true,
            2,
            false,
            &[
                ("user", CrudBits::READ),
                ("group", rw),
                ("lo", cru),
                ("service", cru),
                ("tool", cru),
                ("consumer", CrudBits::READ),
            ],
        ),
        // Non-lineage: anything delegated beneath an OrgAdmin group is
        // governed entirely by the more specific role.
        Role::new(
            ROLE_ORG_ADMIN,
            "OrgAdmin",
            false,
            3,
            false,
            &RESOURCE_KINDS.map(|k| (k, CrudBits::ALL)),
        ),
    ]
}
