//! Read requests
//!
//! Every read carries `CacheInfo` that a processor fills once the content has
//! been loaded.

use crate::graph::{CacheInfo, CachePolicy, Location, Name, Properties, Property};
use crate::request::{impl_operation, CancelFlag, Outcome, RequestKind, DEFAULT_WORKSPACE};

/// Properties and children of one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeData {
    pub location: Location,
    pub properties: Properties,
    pub children: Vec<Location>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertiesData {
    pub location: Location,
    pub properties: Properties,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyData {
    pub location: Location,
    pub property: Option<Property>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildrenData {
    pub location: Location,
    pub children: Vec<Location>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextBlockData {
    /// Actual location of the sibling the block follows
    pub starting_after: Location,
    pub children: Vec<Location>,
}

/// Nodes of a branch in breadth-first order, the branch top first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchData {
    pub location: Location,
    pub nodes: Vec<NodeData>,
}

impl BranchData {
    pub fn node(&self, location: &Location) -> Option<&NodeData> {
        self.nodes.iter().find(|n| n.location.is_same(location))
    }
}

/// Fields and builder methods shared by all reads
macro_rules! read_common {
    ($request:ident) => {
        impl $request {
            pub fn workspace(&self) -> &str {
                &self.workspace
            }

            pub fn in_workspace(mut self, workspace: impl Into<String>) -> Self {
                self.workspace = workspace.into();
                self
            }

            pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
                self.cache = CacheInfo::with_policy(policy);
                self
            }

            /// Share cancellation with an enclosing request
            pub fn sharing_cancel(mut self, cancel: &CancelFlag) -> Self {
                self.cancel = cancel.clone();
                self
            }

            pub fn cache_info(&self) -> &CacheInfo {
                &self.cache
            }
        }
    };
}

#[derive(Debug, Clone)]
pub struct ReadNodeRequest {
    at: Location,
    workspace: String,
    cache: CacheInfo,
    outcome: Outcome<NodeData>,
    cancel: CancelFlag,
}

impl ReadNodeRequest {
    pub fn new(at: impl Into<Location>) -> Self {
        ReadNodeRequest {
            at: at.into(),
            workspace: DEFAULT_WORKSPACE.to_string(),
            cache: CacheInfo::default(),
            outcome: Outcome::Pending,
            cancel: CancelFlag::new(),
        }
    }

    pub fn at(&self) -> &Location {
        &self.at
    }
}

read_common!(ReadNodeRequest);
impl_operation!(ReadNodeRequest, NodeData, RequestKind::ReadNode, cacheable);

#[derive(Debug, Clone)]
pub struct ReadAllPropertiesRequest {
    at: Location,
    workspace: String,
    cache: CacheInfo,
    outcome: Outcome<PropertiesData>,
    cancel: CancelFlag,
}

impl ReadAllPropertiesRequest {
    pub fn new(at: impl Into<Location>) -> Self {
        ReadAllPropertiesRequest {
            at: at.into(),
            workspace: DEFAULT_WORKSPACE.to_string(),
            cache: CacheInfo::default(),
            outcome: Outcome::Pending,
            cancel: CancelFlag::new(),
        }
    }

    pub fn at(&self) -> &Location {
        &self.at
    }
}

read_common!(ReadAllPropertiesRequest);
impl_operation!(
    ReadAllPropertiesRequest,
    PropertiesData,
    RequestKind::ReadAllProperties,
    cacheable
);

#[derive(Debug, Clone)]
pub struct ReadPropertyRequest {
    on: Location,
    name: Name,
    workspace: String,
    cache: CacheInfo,
    outcome: Outcome<PropertyData>,
    cancel: CancelFlag,
}

impl ReadPropertyRequest {
    pub fn new(on: impl Into<Location>, name: impl Into<Name>) -> Self {
        ReadPropertyRequest {
            on: on.into(),
            name: name.into(),
            workspace: DEFAULT_WORKSPACE.to_string(),
            cache: CacheInfo::default(),
            outcome: Outcome::Pending,
            cancel: CancelFlag::new(),
        }
    }

    pub fn on(&self) -> &Location {
        &self.on
    }

    pub fn name(&self) -> &Name {
        &self.name
    }
}

read_common!(ReadPropertyRequest);
impl_operation!(
    ReadPropertyRequest,
    PropertyData,
    RequestKind::ReadProperty,
    cacheable
);

#[derive(Debug, Clone)]
pub struct ReadAllChildrenRequest {
    of: Location,
    workspace: String,
    cache: CacheInfo,
    outcome: Outcome<ChildrenData>,
    cancel: CancelFlag,
}

impl ReadAllChildrenRequest {
    pub fn new(of: impl Into<Location>) -> Self {
        ReadAllChildrenRequest {
            of: of.into(),
            workspace: DEFAULT_WORKSPACE.to_string(),
            cache: CacheInfo::default(),
            outcome: Outcome::Pending,
            cancel: CancelFlag::new(),
        }
    }

    pub fn of(&self) -> &Location {
        &self.of
    }
}

read_common!(ReadAllChildrenRequest);
impl_operation!(
    ReadAllChildrenRequest,
    ChildrenData,
    RequestKind::ReadAllChildren,
    cacheable
);

/// Up to `count` children starting at a zero-based index
#[derive(Debug, Clone)]
pub struct ReadBlockOfChildrenRequest {
    of: Location,
    starting_index: usize,
    count: usize,
    workspace: String,
    cache: CacheInfo,
    outcome: Outcome<ChildrenData>,
    cancel: CancelFlag,
}

impl ReadBlockOfChildrenRequest {
    pub fn new(of: impl Into<Location>, starting_index: usize, count: usize) -> Self {
        ReadBlockOfChildrenRequest {
            of: of.into(),
            starting_index,
            count,
            workspace: DEFAULT_WORKSPACE.to_string(),
            cache: CacheInfo::default(),
            outcome: Outcome::Pending,
            cancel: CancelFlag::new(),
        }
    }

    pub fn of(&self) -> &Location {
        &self.of
    }

    pub fn starting_index(&self) -> usize {
        self.starting_index
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

read_common!(ReadBlockOfChildrenRequest);
impl_operation!(
    ReadBlockOfChildrenRequest,
    ChildrenData,
    RequestKind::ReadBlockOfChildren,
    cacheable
);

/// Up to `count` siblings that follow a given node
#[derive(Debug, Clone)]
pub struct ReadNextBlockOfChildrenRequest {
    starting_after: Location,
    count: usize,
    workspace: String,
    cache: CacheInfo,
    outcome: Outcome<NextBlockData>,
    cancel: CancelFlag,
}

impl ReadNextBlockOfChildrenRequest {
    pub fn new(starting_after: impl Into<Location>, count: usize) -> Self {
        ReadNextBlockOfChildrenRequest {
            starting_after: starting_after.into(),
            count,
            workspace: DEFAULT_WORKSPACE.to_string(),
            cache: CacheInfo::default(),
            outcome: Outcome::Pending,
            cancel: CancelFlag::new(),
        }
    }

    pub fn starting_after(&self) -> &Location {
        &self.starting_after
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

read_common!(ReadNextBlockOfChildrenRequest);
impl_operation!(
    ReadNextBlockOfChildrenRequest,
    NextBlockData,
    RequestKind::ReadNextBlockOfChildren,
    cacheable
);

/// Default depth of a branch read
pub const DEFAULT_BRANCH_DEPTH: usize = 2;

/// Branch of nodes down to `max_depth` levels (the top is level one)
#[derive(Debug, Clone)]
pub struct ReadBranchRequest {
    at: Location,
    max_depth: usize,
    workspace: String,
    cache: CacheInfo,
    outcome: Outcome<BranchData>,
    cancel: CancelFlag,
}

impl ReadBranchRequest {
    pub fn new(at: impl Into<Location>) -> Self {
        Self::with_depth(at, DEFAULT_BRANCH_DEPTH)
    }

    pub fn with_depth(at: impl Into<Location>, max_depth: usize) -> Self {
        ReadBranchRequest {
            at: at.into(),
            max_depth,
            workspace: DEFAULT_WORKSPACE.to_string(),
            cache: CacheInfo::default(),
            outcome: Outcome::Pending,
            cancel: CancelFlag::new(),
        }
    }

    pub fn at(&self) -> &Location {
        &self.at
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }
}

read_common!(ReadBranchRequest);
impl_operation!(
    ReadBranchRequest,
    BranchData,
    RequestKind::ReadBranch,
    cacheable
);

#[derive(Debug, Clone)]
pub struct VerifyNodeExistsRequest {
    at: Location,
    workspace: String,
    cache: CacheInfo,
    outcome: Outcome<Location>,
    cancel: CancelFlag,
}

impl VerifyNodeExistsRequest {
    pub fn new(at: impl Into<Location>) -> Self {
        VerifyNodeExistsRequest {
            at: at.into(),
            workspace: DEFAULT_WORKSPACE.to_string(),
            cache: CacheInfo::default(),
            outcome: Outcome::Pending,
            cancel: CancelFlag::new(),
        }
    }

    pub fn at(&self) -> &Location {
        &self.at
    }
}

read_common!(VerifyNodeExistsRequest);
impl_operation!(
    VerifyNodeExistsRequest,
    Location,
    RequestKind::VerifyNodeExists,
    cacheable
);
