//! Relationship-based access control: types, the permission resolver and the
//! request-time guard.

pub mod guard;
pub mod resolver;
pub mod types;

pub use guard::{Decision, Guard, GuardConfig};
pub use resolver::PermissionResolver;
pub use types::{CrudBits, NodeRef, RelationKind, Verb};
