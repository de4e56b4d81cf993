//! Latchkey - identity and access backbone for a multi-tenant learning
//! platform.
//!
//! Owns users, groups, roles and external-service resources and answers, for
//! every protected request: does principal P have capability C on resource
//! R? Two subsystems carry the weight: the relation-graph permission
//! resolver ([`authz`]) and the external-identity broker ([`broker`]).
//! Storage, HTTP transport and credential verification are external
//! collaborators behind the narrow seams in [`store`], [`broker`] and
//! [`session`].

pub mod accounts;
pub mod authz;
pub mod broker;
pub mod errors;
pub mod hierarchy;
pub mod roles;
pub mod session;
pub mod settings;
pub mod store;

pub use authz::{CrudBits, Decision, Guard, GuardConfig, NodeRef, PermissionResolver, RelationKind, Verb};
pub use errors::{Error, Result};
pub use hierarchy::{Enrollment, HierarchyManager};
pub use roles::{Role, RoleRegistry};
pub use store::{MemoryStore, Store};
