//! Creation and validation of graph edges.
//!
//! All membership and ownership mutations go through [`HierarchyManager`],
//! which enforces the DAG invariant over same-kind nesting chains and keeps
//! each group limited to one directly-assigned role. The duplicate/cycle
//! check and the insert run under one mutation lock so concurrent `link`
//! calls cannot jointly introduce a cycle or a duplicate edge.

use crate::authz::types::{NodeRef, RelationKind};
use crate::errors::{Error, Result};
use crate::store::{random_id, now, Relation, RelationFilter, Store};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Walk ceiling. The store is acyclic by construction; the bound is a
/// backstop so a corrupted edge set cannot spin a request.
const MAX_DEPTH: usize = 32;

/// Outcome of a membership operation; duplicates are a soft signal, not an
/// error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enrollment {
    Enrolled(Relation),
    AlreadyEnrolled,
}

pub struct HierarchyManager {
    store: Arc<dyn Store>,
    mutation_lock: Mutex<()>,
}

impl HierarchyManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            mutation_lock: Mutex::new(()),
        }
    }

    /// Insert a directed edge. With `acyclic`, reject duplicate
    /// `(from_id, to_id)` pairs (`Conflict`) and any edge whose target can
    /// already reach the source (`CyclicDependency`).
    pub async fn link(
        &self,
        from: &NodeRef,
        to: &NodeRef,
        kind: RelationKind,
        acyclic: bool,
    ) -> Result<Relation> {
        let _guard = self.mutation_lock.lock().await;
        self.link_locked(from, to, kind, acyclic).await
    }

    // Callers must hold `mutation_lock`.
    async fn link_locked(
        &self,
        from: &NodeRef,
        to: &NodeRef,
        kind: RelationKind,
        acyclic: bool,
    ) -> Result<Relation> {
        if acyclic {
            self.check_acyclic(from, to).await?;
        }

        let ts = now();
        let relation = Relation {
            id: random_id(),
            from_id: from.id.clone(),
            from_kind: from.kind.clone(),
            to_id: to.id.clone(),
            to_kind: to.kind.clone(),
            order: None,
            relation_type: kind,
            created_at: ts,
            updated_at: ts,
        };
        let inserted = self.store.insert_relation(relation).await?;
        tracing::debug!(from = %from, to = %to, %kind, "linked");
        Ok(inserted)
    }

    async fn check_acyclic(&self, from: &NodeRef, to: &NodeRef) -> Result<()> {
        let snapshot = self.store.relations().await?;

        if snapshot
            .iter()
            .any(|r| r.from_id == from.id && r.to_id == to.id)
        {
            return Err(Error::Conflict(format!(
                "relation `{from}` -> `{to}` already exists"
            )));
        }

        if from.id == to.id {
            return Err(Error::CyclicDependency {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        // A cycle appears exactly when the target can already reach the
        // source: upward along nesting chains or downward from the target.
        if ancestors(&snapshot, &from.id).contains(to.id.as_str())
            || descendants(&snapshot, &to.id).contains(from.id.as_str())
        {
            return Err(Error::CyclicDependency {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }

    /// Enroll a user in a group (group -> user membership edge).
    pub async fn add_user_to_group(&self, user_id: &str, group_id: &str) -> Result<Enrollment> {
        let existing = self
            .store
            .find_relations(
                &RelationFilter {
                    from_id: Some(group_id.to_string()),
                    to_id: Some(user_id.to_string()),
                    ..RelationFilter::default()
                }
                .kind(RelationKind::Membership),
            )
            .await?;
        if !existing.is_empty() {
            return Ok(Enrollment::AlreadyEnrolled);
        }

        match self
            .link(
                &NodeRef::group(group_id),
                &NodeRef::user(user_id),
                RelationKind::Membership,
                true,
            )
            .await
        {
            Ok(edge) => Ok(Enrollment::Enrolled(edge)),
            // Lost a race against a concurrent enrollment.
            Err(Error::Conflict(_)) => Ok(Enrollment::AlreadyEnrolled),
            Err(err) => Err(err),
        }
    }

    /// Remove a user's membership edge. Idempotent: removing a membership
    /// that does not exist is a no-op.
    pub async fn remove_user_from_group(&self, user_id: &str, group_id: &str) -> Result<()> {
        let edges = self
            .store
            .find_relations(
                &RelationFilter {
                    from_id: Some(group_id.to_string()),
                    to_id: Some(user_id.to_string()),
                    ..RelationFilter::default()
                }
                .kind(RelationKind::Membership),
            )
            .await?;
        let ids: Vec<String> = edges.into_iter().map(|r| r.id).collect();
        if !ids.is_empty() {
            self.store.delete_relations(&ids).await?;
        }
        Ok(())
    }

    /// Nest a child group under a parent group.
    pub async fn add_group_to_group(&self, group_id: &str, child_group_id: &str) -> Result<Enrollment> {
        match self
            .link(
                &NodeRef::group(group_id),
                &NodeRef::group(child_group_id),
                RelationKind::Ownership,
                true,
            )
            .await
        {
            Ok(edge) => Ok(Enrollment::Enrolled(edge)),
            Err(Error::Conflict(_)) => Ok(Enrollment::AlreadyEnrolled),
            Err(err) => Err(err),
        }
    }

    /// Assign a role to a group, replacing any existing assignment. A group
    /// carries exactly one directly-assigned role; the lookup, delete and
    /// insert run under the mutation lock so concurrent assignments cannot
    /// leave the group with more than one role edge.
    pub async fn assign_role(&self, group_id: &str, role_id: &str) -> Result<Relation> {
        let _guard = self.mutation_lock.lock().await;

        let existing = self
            .store
            .find_relations(
                &RelationFilter::from_node(group_id).kind(RelationKind::RoleAssignment),
            )
            .await?;
        let ids: Vec<String> = existing.into_iter().map(|r| r.id).collect();
        if !ids.is_empty() {
            self.store.delete_relations(&ids).await?;
        }
        self.link_locked(
            &NodeRef::group(group_id),
            &NodeRef::role(role_id),
            RelationKind::RoleAssignment,
            false,
        )
        .await
    }

    /// Cascade: remove every edge touching the node, in both directions.
    pub async fn unlink_node(&self, node: &NodeRef) -> Result<u64> {
        let snapshot = self.store.relations().await?;
        let ids: Vec<String> = snapshot
            .iter()
            .filter(|r| r.from_id == node.id || r.to_id == node.id)
            .map(|r| r.id.clone())
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }
        let removed = self.store.delete_relations(&ids).await?;
        tracing::debug!(node = %node, removed, "cascade unlink");
        Ok(removed)
    }
}

/// Ids reachable upward from `node_id` along same-kind nesting edges
/// (parent -> child), via an explicit worklist.
fn ancestors(snapshot: &[Relation], node_id: &str) -> HashSet<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut worklist: Vec<(String, usize)> = vec![(node_id.to_string(), 0)];

    while let Some((current, depth)) = worklist.pop() {
        if depth >= MAX_DEPTH {
            tracing::warn!(node = %current, "ancestor walk hit depth bound");
            continue;
        }
        for edge in snapshot
            .iter()
            .filter(|r| r.to_id == current && r.from_kind == r.to_kind)
        {
            if seen.insert(edge.from_id.clone()) {
                worklist.push((edge.from_id.clone(), depth + 1));
            }
        }
    }
    seen
}

/// Ids reachable downward from `node_id` along owned edges.
fn descendants(snapshot: &[Relation], node_id: &str) -> HashSet<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut worklist: Vec<(String, usize)> = vec![(node_id.to_string(), 0)];

    while let Some((current, depth)) = worklist.pop() {
        if depth >= MAX_DEPTH {
            tracing::warn!(node = %current, "descendant walk hit depth bound");
            continue;
        }
        for edge in snapshot.iter().filter(|r| r.from_id == current) {
            if seen.insert(edge.to_id.clone()) {
                worklist.push((edge.to_id.clone(), depth + 1));
            }
        }
    }
    seen
}
