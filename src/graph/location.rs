//! Node identity and addressing

use crate::graph::Path;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable node identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn new() -> Self {
        NodeId(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        NodeId(uuid)
    }

    pub fn parse(text: &str) -> Option<Self> {
        Uuid::parse_str(text).ok().map(NodeId)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Location of one node: a path, an identifier, or both
///
/// Equality and hashing are structural over both parts, so a location used as
/// a cache key must be built the same way on every lookup (the federation
/// keys its cache by path only). `is_same` is the looser "same node" test.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
    path: Option<Path>,
    id: Option<NodeId>,
}

impl Location {
    pub fn from_path(path: Path) -> Self {
        Location {
            path: Some(path),
            id: None,
        }
    }

    pub fn from_id(id: NodeId) -> Self {
        Location {
            path: None,
            id: Some(id),
        }
    }

    pub fn new(path: Path, id: NodeId) -> Self {
        Location {
            path: Some(path),
            id: Some(id),
        }
    }

    pub fn root() -> Self {
        Location::from_path(Path::root())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_ref()
    }

    pub fn id(&self) -> Option<NodeId> {
        self.id
    }

    pub fn has_path(&self) -> bool {
        self.path.is_some()
    }

    pub fn has_id(&self) -> bool {
        self.id.is_some()
    }

    pub fn with_id(&self, id: NodeId) -> Self {
        Location {
            path: self.path.clone(),
            id: Some(id),
        }
    }

    pub fn with_path(&self, path: Path) -> Self {
        Location {
            path: Some(path),
            id: self.id,
        }
    }

    /// Same location with the identifier dropped
    pub fn path_only(&self) -> Option<Self> {
        self.path.clone().map(Location::from_path)
    }

    /// True when both locations identify the same node
    ///
    /// Identifiers decide when both sides have one; otherwise paths decide.
    pub fn is_same(&self, other: &Location) -> bool {
        match (self.id, other.id) {
            (Some(a), Some(b)) => a == b,
            _ => match (&self.path, &other.path) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl From<Path> for Location {
    fn from(path: Path) -> Self {
        Location::from_path(path)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.path, &self.id) {
            (Some(path), Some(id)) => write!(f, "{} ({})", path, id),
            (Some(path), None) => write!(f, "{}", path),
            (None, Some(id)) => write!(f, "<{}>", id),
            (None, None) => f.write_str("<unknown>"),
        }
    }
}
