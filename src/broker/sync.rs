//! Claim-driven group and role provisioning.
//!
//! Runs on every brokered login and is idempotent: parse the delimited
//! groups claim into `(base, role)` pairs, make sure a group exists per pair
//! with its role attached, keep the Admin -> Instructor -> Learner nesting
//! between co-located groups, then diff the desired membership set against
//! the user's current broker-managed memberships. Individual enroll and
//! unenroll failures are logged and swallowed; login never fails because
//! provisioning partially failed.

use crate::errors::Result;
use crate::hierarchy::HierarchyManager;
use crate::roles::{ROLE_INSTRUCTOR, ROLE_LEARNER, ROLE_ORG_ADMIN};
use crate::settings::ClaimKeys;
use crate::store::{now, random_id, Group, RelationFilter, Store, User};
use crate::authz::types::RelationKind;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Tier a claim suffix maps to, most senior first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncRole {
    OrgAdmin,
    Instructor,
    Learner,
}

impl SyncRole {
    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix.to_ascii_lowercase().as_str() {
            "learner" | "student" => Some(SyncRole::Learner),
            "instructor" | "teacher" => Some(SyncRole::Instructor),
            "admin" | "orgadmin" | "org-admin" => Some(SyncRole::OrgAdmin),
            _ => None,
        }
    }

    fn role_id(self) -> &'static str {
        match self {
            SyncRole::Learner => ROLE_LEARNER,
            SyncRole::Instructor => ROLE_INSTRUCTOR,
            SyncRole::OrgAdmin => ROLE_ORG_ADMIN,
        }
    }

    fn canonical_suffix(self) -> &'static str {
        match self {
            SyncRole::Learner => "learner",
            SyncRole::Instructor => "instructor",
            SyncRole::OrgAdmin => "admin",
        }
    }

    const TIERS: [SyncRole; 3] = [SyncRole::OrgAdmin, SyncRole::Instructor, SyncRole::Learner];
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupClaim {
    pub base: String,
    pub role: SyncRole,
}

impl GroupClaim {
    /// Canonical display name of the managed group for this pair.
    fn group_name(&self, keys: &ClaimKeys) -> String {
        format!(
            "{}{}{}",
            self.base,
            keys.role_separator,
            self.role.canonical_suffix()
        )
    }
}

/// Parse the delimited groups claim. Entries with an unknown role suffix or
/// an empty base are skipped with a warning; a misconfigured IdP must not
/// silently grant access.
pub fn parse_groups_claim(raw: &str, keys: &ClaimKeys) -> Vec<GroupClaim> {
    let mut seen: HashSet<GroupClaim> = HashSet::new();
    let mut claims = Vec::new();

    for entry in raw.split(keys.group_delimiter.as_str()) {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let Some((base, suffix)) = entry.rsplit_once(keys.role_separator.as_str()) else {
            tracing::warn!(%entry, "group claim entry has no role suffix; skipping");
            continue;
        };
        let base = base.trim();
        let Some(role) = SyncRole::from_suffix(suffix.trim()) else {
            tracing::warn!(%entry, "group claim entry has unknown role suffix; skipping");
            continue;
        };
        if base.is_empty() {
            tracing::warn!(%entry, "group claim entry has empty base name; skipping");
            continue;
        }
        let claim = GroupClaim {
            base: base.to_string(),
            role,
        };
        if seen.insert(claim.clone()) {
            claims.push(claim);
        }
    }
    claims
}

/// Is this display name one the broker manages (`<base><sep><suffix>` with a
/// known suffix)? Manually administered groups never match and are never
/// unenrolled by a login.
fn is_managed_name(name: &str, keys: &ClaimKeys) -> bool {
    name.rsplit_once(keys.role_separator.as_str())
        .and_then(|(base, suffix)| {
            (!base.is_empty()).then(|| SyncRole::from_suffix(suffix)).flatten()
        })
        .is_some()
}

/// Reconcile the user's broker-managed memberships with the groups claim.
pub async fn sync_groups(
    store: &Arc<dyn Store>,
    hierarchy: &HierarchyManager,
    user: &User,
    groups_claim: &str,
    keys: &ClaimKeys,
) -> Result<()> {
    let desired_claims = parse_groups_claim(groups_claim, keys);

    // Ensure a group exists per (base, role) pair, role attached.
    let mut desired_ids: HashSet<String> = HashSet::new();
    let mut by_name: HashMap<String, String> = HashMap::new();
    let mut bases: Vec<String> = Vec::new();
    for claim in &desired_claims {
        let name = claim.group_name(keys);
        let group = match ensure_group(store, hierarchy, &name, claim.role).await {
            Ok(group) => group,
            Err(err) => {
                tracing::warn!(group = %name, %err, "failed to ensure group; skipping");
                continue;
            }
        };
        desired_ids.insert(group.id.clone());
        by_name.insert(name, group.id);
        if !bases.contains(&claim.base) {
            bases.push(claim.base.clone());
        }
    }

    // Keep the Admin -> Instructor -> Learner chain between co-located
    // groups, where both tiers exist.
    for base in &bases {
        for pair in SyncRole::TIERS.windows(2) {
            let parent = GroupClaim {
                base: base.clone(),
                role: pair[0],
            }
            .group_name(keys);
            let child = GroupClaim {
                base: base.clone(),
                role: pair[1],
            }
            .group_name(keys);
            let (Some(parent_id), Some(child_id)) =
                (lookup(store, &by_name, &parent).await, lookup(store, &by_name, &child).await)
            else {
                continue;
            };
            if let Err(err) = hierarchy.add_group_to_group(&parent_id, &child_id).await {
                tracing::warn!(%parent, %child, %err, "failed to nest tier groups");
            }
        }
    }

    // Current broker-managed memberships.
    let memberships = store
        .find_relations(&RelationFilter::to_node(&user.id).kind(RelationKind::Membership))
        .await?;
    let mut current_ids: HashSet<String> = HashSet::new();
    for membership in &memberships {
        match store.group(&membership.from_id).await {
            Ok(group) if is_managed_name(&group.display_name, keys) => {
                current_ids.insert(group.id);
            }
            _ => {}
        }
    }

    // Diff and apply, best-effort.
    for group_id in desired_ids.difference(&current_ids) {
        if let Err(err) = hierarchy.add_user_to_group(&user.id, group_id).await {
            tracing::warn!(user = %user.id, group = %group_id, %err, "enroll failed");
        }
    }
    for group_id in current_ids.difference(&desired_ids) {
        if let Err(err) = hierarchy.remove_user_from_group(&user.id, group_id).await {
            tracing::warn!(user = %user.id, group = %group_id, %err, "unenroll failed");
        }
    }

    tracing::info!(
        user = %user.id,
        desired = desired_ids.len(),
        previous = current_ids.len(),
        "group sync complete"
    );
    Ok(())
}

async fn ensure_group(
    store: &Arc<dyn Store>,
    hierarchy: &HierarchyManager,
    name: &str,
    role: SyncRole,
) -> Result<Group> {
    if let Some(group) = store.find_group_by_name(name).await? {
        return Ok(group);
    }
    let group = store
        .insert_group(Group {
            id: random_id(),
            display_name: name.to_string(),
            created_at: now(),
        })
        .await?;
    hierarchy.assign_role(&group.id, role.role_id()).await?;
    tracing::info!(group = %name, role = role.role_id(), "provisioned group from claims");
    Ok(group)
}

async fn lookup(
    store: &Arc<dyn Store>,
    by_name: &HashMap<String, String>,
    name: &str,
) -> Option<String> {
    if let Some(id) = by_name.get(name) {
        return Some(id.clone());
    }
    store
        .find_group_by_name(name)
        .await
        .ok()
        .flatten()
        .map(|g| g.id)
}
