//! Change requests

use crate::graph::{Location, Name, Property};
use crate::request::{impl_operation, CancelFlag, Outcome, RequestKind, DEFAULT_WORKSPACE};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// What `CreateNode` does when a child with the same name already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeConflictBehavior {
    /// Add another same-name sibling
    #[default]
    Append,
    /// Delete the existing node (and its branch), then create
    Replace,
    /// Keep the existing node and merge the new properties into it
    Update,
    /// Keep the existing node untouched
    DoNotReplace,
}

macro_rules! change_common {
    ($request:ident) => {
        impl $request {
            pub fn workspace(&self) -> &str {
                &self.workspace
            }

            pub fn in_workspace(mut self, workspace: impl Into<String>) -> Self {
                self.workspace = workspace.into();
                self
            }

            /// Share cancellation with an enclosing request
            pub fn sharing_cancel(mut self, cancel: &CancelFlag) -> Self {
                self.cancel = cancel.clone();
                self
            }
        }
    };
}

/// Create a child under a parent; completes with the new node's location
#[derive(Debug, Clone)]
pub struct CreateNodeRequest {
    under: Location,
    name: Name,
    properties: Vec<Property>,
    conflict: NodeConflictBehavior,
    workspace: String,
    outcome: Outcome<Location>,
    cancel: CancelFlag,
}

impl CreateNodeRequest {
    pub fn new(under: impl Into<Location>, name: impl Into<Name>) -> Self {
        CreateNodeRequest {
            under: under.into(),
            name: name.into(),
            properties: Vec::new(),
            conflict: NodeConflictBehavior::default(),
            workspace: DEFAULT_WORKSPACE.to_string(),
            outcome: Outcome::Pending,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_properties(mut self, properties: impl IntoIterator<Item = Property>) -> Self {
        self.properties.extend(properties);
        self
    }

    pub fn with_property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    pub fn on_conflict(mut self, conflict: NodeConflictBehavior) -> Self {
        self.conflict = conflict;
        self
    }

    pub fn under(&self) -> &Location {
        &self.under
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    pub fn conflict(&self) -> NodeConflictBehavior {
        self.conflict
    }
}

change_common!(CreateNodeRequest);
impl_operation!(CreateNodeRequest, Location, RequestKind::CreateNode);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatedProperties {
    pub location: Location,
    /// Names of properties that did not exist before the update
    pub created: BTreeSet<Name>,
}

/// Set or remove several properties at once
///
/// A `None` entry removes the property with that name.
#[derive(Debug, Clone)]
pub struct UpdatePropertiesRequest {
    on: Location,
    properties: BTreeMap<Name, Option<Property>>,
    workspace: String,
    outcome: Outcome<UpdatedProperties>,
    cancel: CancelFlag,
}

impl UpdatePropertiesRequest {
    pub fn new(on: impl Into<Location>) -> Self {
        UpdatePropertiesRequest {
            on: on.into(),
            properties: BTreeMap::new(),
            workspace: DEFAULT_WORKSPACE.to_string(),
            outcome: Outcome::Pending,
            cancel: CancelFlag::new(),
        }
    }

    pub fn set(mut self, property: Property) -> Self {
        self.properties.insert(property.name().clone(), Some(property));
        self
    }

    pub fn remove(mut self, name: impl Into<Name>) -> Self {
        self.properties.insert(name.into(), None);
        self
    }

    pub fn on(&self) -> &Location {
        &self.on
    }

    pub fn properties(&self) -> &BTreeMap<Name, Option<Property>> {
        &self.properties
    }
}

change_common!(UpdatePropertiesRequest);
impl_operation!(
    UpdatePropertiesRequest,
    UpdatedProperties,
    RequestKind::UpdateProperties
);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetPropertyData {
    pub location: Location,
    pub is_new: bool,
}

#[derive(Debug, Clone)]
pub struct SetPropertyRequest {
    on: Location,
    property: Property,
    workspace: String,
    outcome: Outcome<SetPropertyData>,
    cancel: CancelFlag,
}

impl SetPropertyRequest {
    pub fn new(on: impl Into<Location>, property: Property) -> Self {
        SetPropertyRequest {
            on: on.into(),
            property,
            workspace: DEFAULT_WORKSPACE.to_string(),
            outcome: Outcome::Pending,
            cancel: CancelFlag::new(),
        }
    }

    pub fn on(&self) -> &Location {
        &self.on
    }

    pub fn property(&self) -> &Property {
        &self.property
    }
}

change_common!(SetPropertyRequest);
impl_operation!(SetPropertyRequest, SetPropertyData, RequestKind::SetProperty);

#[derive(Debug, Clone)]
pub struct RemovePropertyRequest {
    from: Location,
    name: Name,
    workspace: String,
    outcome: Outcome<Location>,
    cancel: CancelFlag,
}

impl RemovePropertyRequest {
    pub fn new(from: impl Into<Location>, name: impl Into<Name>) -> Self {
        RemovePropertyRequest {
            from: from.into(),
            name: name.into(),
            workspace: DEFAULT_WORKSPACE.to_string(),
            outcome: Outcome::Pending,
            cancel: CancelFlag::new(),
        }
    }

    pub fn from(&self) -> &Location {
        &self.from
    }

    pub fn name(&self) -> &Name {
        &self.name
    }
}

change_common!(RemovePropertyRequest);
impl_operation!(RemovePropertyRequest, Location, RequestKind::RemoveProperty);

/// Delete a node and everything below it
#[derive(Debug, Clone)]
pub struct DeleteBranchRequest {
    at: Location,
    workspace: String,
    outcome: Outcome<Location>,
    cancel: CancelFlag,
}

impl DeleteBranchRequest {
    pub fn new(at: impl Into<Location>) -> Self {
        DeleteBranchRequest {
            at: at.into(),
            workspace: DEFAULT_WORKSPACE.to_string(),
            outcome: Outcome::Pending,
            cancel: CancelFlag::new(),
        }
    }

    pub fn at(&self) -> &Location {
        &self.at
    }
}

change_common!(DeleteBranchRequest);
impl_operation!(DeleteBranchRequest, Location, RequestKind::DeleteBranch);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedChildren {
    pub location: Location,
    pub deleted: Vec<Location>,
}

/// Delete every child branch of a node, keeping the node itself
#[derive(Debug, Clone)]
pub struct DeleteChildrenRequest {
    at: Location,
    workspace: String,
    outcome: Outcome<DeletedChildren>,
    cancel: CancelFlag,
}

impl DeleteChildrenRequest {
    pub fn new(at: impl Into<Location>) -> Self {
        DeleteChildrenRequest {
            at: at.into(),
            workspace: DEFAULT_WORKSPACE.to_string(),
            outcome: Outcome::Pending,
            cancel: CancelFlag::new(),
        }
    }

    pub fn at(&self) -> &Location {
        &self.at
    }
}

change_common!(DeleteChildrenRequest);
impl_operation!(
    DeleteChildrenRequest,
    DeletedChildren,
    RequestKind::DeleteChildren
);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyData {
    pub original: Location,
    pub copy: Location,
}

/// Copy a branch, possibly from another workspace, under a new parent
#[derive(Debug, Clone)]
pub struct CopyBranchRequest {
    from: Location,
    from_workspace: String,
    into: Location,
    into_workspace: String,
    desired_name: Option<Name>,
    outcome: Outcome<CopyData>,
    cancel: CancelFlag,
}

impl CopyBranchRequest {
    pub fn new(from: impl Into<Location>, into: impl Into<Location>) -> Self {
        CopyBranchRequest {
            from: from.into(),
            from_workspace: DEFAULT_WORKSPACE.to_string(),
            into: into.into(),
            into_workspace: DEFAULT_WORKSPACE.to_string(),
            desired_name: None,
            outcome: Outcome::Pending,
            cancel: CancelFlag::new(),
        }
    }

    pub fn from_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.from_workspace = workspace.into();
        self
    }

    pub fn into_workspace_named(mut self, workspace: impl Into<String>) -> Self {
        self.into_workspace = workspace.into();
        self
    }

    pub fn named(mut self, name: impl Into<Name>) -> Self {
        self.desired_name = Some(name.into());
        self
    }

    pub fn sharing_cancel(mut self, cancel: &CancelFlag) -> Self {
        self.cancel = cancel.clone();
        self
    }

    pub fn from(&self) -> &Location {
        &self.from
    }

    pub fn source_workspace(&self) -> &str {
        &self.from_workspace
    }

    pub fn destination(&self) -> &Location {
        &self.into
    }

    pub fn into_workspace(&self) -> &str {
        &self.into_workspace
    }

    pub fn desired_name(&self) -> Option<&Name> {
        self.desired_name.as_ref()
    }
}

impl_operation!(CopyBranchRequest, CopyData, RequestKind::CopyBranch);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveData {
    pub before: Location,
    pub after: Location,
}

/// Move a branch under a new parent, optionally renaming it
#[derive(Debug, Clone)]
pub struct MoveBranchRequest {
    from: Location,
    into: Location,
    desired_name: Option<Name>,
    workspace: String,
    outcome: Outcome<MoveData>,
    cancel: CancelFlag,
}

impl MoveBranchRequest {
    pub fn new(from: impl Into<Location>, into: impl Into<Location>) -> Self {
        MoveBranchRequest {
            from: from.into(),
            into: into.into(),
            desired_name: None,
            workspace: DEFAULT_WORKSPACE.to_string(),
            outcome: Outcome::Pending,
            cancel: CancelFlag::new(),
        }
    }

    pub fn named(mut self, name: impl Into<Name>) -> Self {
        self.desired_name = Some(name.into());
        self
    }

    pub fn from(&self) -> &Location {
        &self.from
    }

    pub fn destination(&self) -> &Location {
        &self.into
    }

    pub fn desired_name(&self) -> Option<&Name> {
        self.desired_name.as_ref()
    }
}

change_common!(MoveBranchRequest);
impl_operation!(MoveBranchRequest, MoveData, RequestKind::MoveBranch);

/// Rename a node in place
#[derive(Debug, Clone)]
pub struct RenameNodeRequest {
    at: Location,
    to_name: Name,
    workspace: String,
    outcome: Outcome<MoveData>,
    cancel: CancelFlag,
}

impl RenameNodeRequest {
    pub fn new(at: impl Into<Location>, to_name: impl Into<Name>) -> Self {
        RenameNodeRequest {
            at: at.into(),
            to_name: to_name.into(),
            workspace: DEFAULT_WORKSPACE.to_string(),
            outcome: Outcome::Pending,
            cancel: CancelFlag::new(),
        }
    }

    pub fn at(&self) -> &Location {
        &self.at
    }

    pub fn to_name(&self) -> &Name {
        &self.to_name
    }
}

change_common!(RenameNodeRequest);
impl_operation!(RenameNodeRequest, MoveData, RequestKind::RenameNode);
