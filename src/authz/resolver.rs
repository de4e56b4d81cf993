//! Relation-graph permission resolution.
//!
//! `resolve` computes, for one user, the transitive closure of everything
//! reachable from their group memberships together with the effective CRUD
//! bits per reached id. The walk runs against a single `relations()`
//! snapshot and performs no writes, so concurrent invocations never share
//! mutable state.
//!
//! Visitation order is deterministic and documented: memberships in
//! edge-creation order, then depth-first into each group's owned edges, also
//! in creation order. An id already present in the result map is never
//! overwritten by a later path (first-write-wins). A "most permissive path
//! wins" merge would be a semantic change and is deliberately not applied
//! here.

use crate::authz::types::{CrudBits, RelationKind};
use crate::errors::Result;
use crate::roles::{Role, RoleRegistry};
use crate::store::{Relation, Store};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Propagation ceiling. The edge set is acyclic by construction; the bound
/// is a backstop against corrupted data.
const MAX_DEPTH: usize = 32;

pub struct PermissionResolver {
    store: Arc<dyn Store>,
    roles: Arc<RoleRegistry>,
}

impl PermissionResolver {
    pub fn new(store: Arc<dyn Store>, roles: Arc<RoleRegistry>) -> Self {
        Self { store, roles }
    }

    /// The authorization oracle: every id reachable for `user_id` (groups,
    /// users, resources and the relation edges themselves) mapped to its
    /// effective CRUD bit-vector.
    pub async fn resolve(&self, user_id: &str) -> Result<HashMap<String, CrudBits>> {
        let mut snapshot = self.store.relations().await?;
        // Stable sort: preserves creation order within equal timestamps.
        snapshot.sort_by_key(|r| r.created_at);

        let mut resolved: HashMap<String, CrudBits> = HashMap::new();

        let memberships: Vec<Relation> = snapshot
            .iter()
            .filter(|r| {
                r.relation_type == RelationKind::Membership
                    && r.to_id == user_id
                    && r.to_kind == "user"
            })
            .cloned()
            .collect();

        for membership in &memberships {
            let group_id = &membership.from_id;
            let Some(role_edge) = snapshot.iter().find(|r| {
                r.from_id == *group_id && r.relation_type == RelationKind::RoleAssignment
            }) else {
                tracing::warn!(group = %group_id, "group has no role assignment; skipping");
                continue;
            };
            let role = self.roles.get(&role_edge.to_id)?;
            // Lineage semantics follow the membership group's own role for
            // the whole of that membership's walk.
            let lineage = role.lineage;

            seed(&mut resolved, group_id, role.permission_for("group"));
            seed(&mut resolved, user_id, role.permission_for("user"));
            seed(&mut resolved, &membership.id, role.permission_for("user"));

            // Depth-first into the group's other owned edges, creation order.
            // The stack pops in reverse, so push reversed.
            let mut stack: Vec<(Relation, Role, usize)> = Vec::new();
            for edge in owned_edges(&snapshot, group_id)
                .into_iter()
                .filter(|e| e.id != membership.id && e.to_kind != "role")
                .rev()
            {
                seed(&mut resolved, &edge.id, role.permission_for(&edge.to_kind));
                seed(&mut resolved, &edge.to_id, role.permission_for(&edge.to_kind));
                stack.push((edge, role.clone(), 1));
            }

            let mut visited: HashSet<String> = HashSet::new();
            while let Some((edge, working, depth)) = stack.pop() {
                if depth >= MAX_DEPTH {
                    tracing::warn!(edge = %edge.id, "propagation hit depth bound");
                    continue;
                }
                // Role edges terminate propagation: they are permission
                // templates, not permission-bearing resources.
                if edge.to_kind == "role" {
                    continue;
                }
                if !visited.insert(edge.id.clone()) {
                    continue;
                }

                let owned = owned_edges(&snapshot, &edge.to_id);

                // A single role edge under the target re-scopes the walk:
                // lineage widens the working role, no-lineage delegates to
                // the sub-role wholesale.
                let mut working = working;
                let sub_role_edges: Vec<&Relation> = owned
                    .iter()
                    .filter(|r| r.relation_type == RelationKind::RoleAssignment)
                    .collect();
                if sub_role_edges.len() == 1 {
                    let sub_role = self.roles.get(&sub_role_edges[0].to_id)?;
                    if lineage {
                        working.widen(&sub_role);
                    } else {
                        working.replace_with(&sub_role);
                    }
                }

                for next in owned
                    .into_iter()
                    .filter(|r| r.to_kind != "role")
                    .rev()
                {
                    seed(&mut resolved, &next.id, working.permission_for(&next.to_kind));
                    seed(
                        &mut resolved,
                        &next.to_id,
                        working.permission_for(&next.to_kind),
                    );
                    stack.push((next, working.clone(), depth + 1));
                }
            }
        }

        tracing::debug!(
            user = %user_id,
            memberships = memberships.len(),
            reachable = resolved.len(),
            "resolved permissions"
        );
        Ok(resolved)
    }
}

/// First-write-wins: never overwrite an id discovered by an earlier path.
fn seed(resolved: &mut HashMap<String, CrudBits>, id: &str, bits: CrudBits) {
    resolved.entry(id.to_string()).or_insert(bits);
}

fn owned_edges(snapshot: &[Relation], node_id: &str) -> Vec<Relation> {
    snapshot
        .iter()
        .filter(|r| r.from_id == node_id)
        .cloned()
        .collect()
}
