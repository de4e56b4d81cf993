use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

/// CRUD capability mask over one resource kind.
///
/// Canonical bit assignment, used everywhere (role templates, verb mapping,
/// guard checks): create=1, read=2, update=4, delete=8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CrudBits(pub u8);

impl CrudBits {
    pub const NONE: CrudBits = CrudBits(0);
    pub const CREATE: CrudBits = CrudBits(1);
    pub const READ: CrudBits = CrudBits(2);
    pub const UPDATE: CrudBits = CrudBits(4);
    pub const DELETE: CrudBits = CrudBits(8);
    pub const ALL: CrudBits = CrudBits(15);

    pub fn contains(self, required: CrudBits) -> bool {
        self.0 & required.0 == required.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for CrudBits {
    type Output = CrudBits;

    fn bitor(self, rhs: CrudBits) -> CrudBits {
        CrudBits(self.0 | rhs.0)
    }
}

impl BitOrAssign for CrudBits {
    fn bitor_assign(&mut self, rhs: CrudBits) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for CrudBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (bit, ch) in [
            (CrudBits::CREATE, 'c'),
            (CrudBits::READ, 'r'),
            (CrudBits::UPDATE, 'u'),
            (CrudBits::DELETE, 'd'),
        ] {
            write!(f, "{}", if self.contains(bit) { ch } else { '-' })?;
        }
        Ok(())
    }
}

/// HTTP-like verb of a protected operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Verb {
    /// Default verb -> required-capability mapping. Overridable per guard
    /// configuration.
    pub fn required_bit(self) -> CrudBits {
        match self {
            Verb::Get => CrudBits::READ,
            Verb::Post => CrudBits::CREATE,
            Verb::Put | Verb::Patch => CrudBits::UPDATE,
            Verb::Delete => CrudBits::DELETE,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Patch => "PATCH",
            Verb::Delete => "DELETE",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Verb {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Verb::Get),
            "POST" => Ok(Verb::Post),
            "PUT" => Ok(Verb::Put),
            "PATCH" => Ok(Verb::Patch),
            "DELETE" => Ok(Verb::Delete),
            other => Err(format!("unknown verb `{other}`")),
        }
    }
}

/// Reference to a graph node: "kind/id", e.g. "group/cs101". Node references
/// are not stored entities; any `(id, kind)` pair names a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub id: String,
    pub kind: String,
}

impl NodeRef {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
        }
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self::new("user", id)
    }

    pub fn group(id: impl Into<String>) -> Self {
        Self::new("group", id)
    }

    pub fn role(id: impl Into<String>) -> Self {
        Self::new("role", id)
    }

    pub fn parse(s: &str) -> Option<Self> {
        let (kind, id) = s.split_once('/')?;
        if kind.is_empty() || id.is_empty() {
            return None;
        }
        Some(Self::new(kind, id))
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// Semantic class of a directed edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// group -> user enrollment.
    Membership,
    /// group -> role; at most one per group.
    RoleAssignment,
    /// group -> group / group -> resource / resource -> resource nesting.
    Ownership,
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RelationKind::Membership => "membership",
            RelationKind::RoleAssignment => "role_assignment",
            RelationKind::Ownership => "ownership",
        };
        write!(f, "{s}")
    }
}
