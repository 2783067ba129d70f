//! Request Model
//!
//! Typed descriptors for every tree operation. A request carries immutable
//! inputs, a cooperative cancellation flag, and one outcome slot that ends up
//! either completed with a result or failed with a `GraphError`, never both.
//! Read requests also carry cache metadata.

mod change;
mod composite;
mod read;

pub use change::{
    CopyBranchRequest, CopyData, CreateNodeRequest, DeleteBranchRequest, DeleteChildrenRequest,
    DeletedChildren, MoveBranchRequest, MoveData, NodeConflictBehavior, RemovePropertyRequest,
    RenameNodeRequest, SetPropertyData, SetPropertyRequest, UpdatePropertiesRequest, UpdatedProperties,
};
pub use composite::CompositeRequest;
pub use read::{
    BranchData, ChildrenData, NextBlockData, NodeData, PropertiesData, PropertyData,
    ReadAllChildrenRequest, ReadAllPropertiesRequest, ReadBlockOfChildrenRequest,
    ReadBranchRequest, ReadNextBlockOfChildrenRequest, ReadNodeRequest, ReadPropertyRequest,
    VerifyNodeExistsRequest, DEFAULT_BRANCH_DEPTH,
};

use crate::error::GraphError;
use crate::graph::{CacheInfo, Location};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Workspace used when a request does not name one
pub const DEFAULT_WORKSPACE: &str = "default";

/// Result-or-error slot of a request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Outcome<T> {
    #[default]
    Pending,
    Completed(T),
    Failed(GraphError),
}

impl<T> Outcome<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Outcome::Pending)
    }

    pub fn result(&self) -> Option<&T> {
        match self {
            Outcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&GraphError> {
        match self {
            Outcome::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn map_err(self, f: impl FnOnce(GraphError) -> GraphError) -> Self {
        match self {
            Outcome::Failed(err) => Outcome::Failed(f(err)),
            other => other,
        }
    }
}

/// Shared cooperative cancellation flag
///
/// Clones observe the same flag, so a request can be cancelled from another
/// thread while a processor works on it.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Request kind tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RequestKind {
    ReadNode,
    ReadAllProperties,
    ReadProperty,
    ReadAllChildren,
    ReadBlockOfChildren,
    ReadNextBlockOfChildren,
    ReadBranch,
    VerifyNodeExists,
    CreateNode,
    UpdateProperties,
    SetProperty,
    RemoveProperty,
    DeleteBranch,
    DeleteChildren,
    CopyBranch,
    MoveBranch,
    RenameNode,
    Composite,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::ReadNode => "read_node",
            RequestKind::ReadAllProperties => "read_all_properties",
            RequestKind::ReadProperty => "read_property",
            RequestKind::ReadAllChildren => "read_all_children",
            RequestKind::ReadBlockOfChildren => "read_block_of_children",
            RequestKind::ReadNextBlockOfChildren => "read_next_block_of_children",
            RequestKind::ReadBranch => "read_branch",
            RequestKind::VerifyNodeExists => "verify_node_exists",
            RequestKind::CreateNode => "create_node",
            RequestKind::UpdateProperties => "update_properties",
            RequestKind::SetProperty => "set_property",
            RequestKind::RemoveProperty => "remove_property",
            RequestKind::DeleteBranch => "delete_branch",
            RequestKind::DeleteChildren => "delete_children",
            RequestKind::CopyBranch => "copy_branch",
            RequestKind::MoveBranch => "move_branch",
            RequestKind::RenameNode => "rename_node",
            RequestKind::Composite => "composite",
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(
            self,
            RequestKind::ReadNode
                | RequestKind::ReadAllProperties
                | RequestKind::ReadProperty
                | RequestKind::ReadAllChildren
                | RequestKind::ReadBlockOfChildren
                | RequestKind::ReadNextBlockOfChildren
                | RequestKind::ReadBranch
                | RequestKind::VerifyNodeExists
        )
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Behavior shared by every typed request
pub trait Operation {
    type Output;

    fn kind(&self) -> RequestKind;
    fn outcome(&self) -> &Outcome<Self::Output>;
    fn outcome_mut(&mut self) -> &mut Outcome<Self::Output>;
    fn cancel_flag(&self) -> &CancelFlag;
    fn into_outcome(self) -> Outcome<Self::Output>;

    /// Cache metadata, for read requests
    fn cache_info_mut(&mut self) -> Option<&mut CacheInfo> {
        None
    }

    fn result(&self) -> Option<&Self::Output> {
        self.outcome().result()
    }

    fn error(&self) -> Option<&GraphError> {
        self.outcome().error()
    }

    fn has_error(&self) -> bool {
        self.error().is_some()
    }

    fn is_completed(&self) -> bool {
        self.result().is_some()
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_flag().is_cancelled()
    }

    fn cancel(&self) {
        self.cancel_flag().cancel();
    }

    /// Store the result unless the outcome is already decided
    fn complete(&mut self, value: Self::Output) {
        let outcome = self.outcome_mut();
        if outcome.is_pending() {
            *outcome = Outcome::Completed(value);
        }
    }

    /// Store the error; an error replaces any earlier result
    fn fail(&mut self, error: GraphError) {
        *self.outcome_mut() = Outcome::Failed(error);
    }
}

macro_rules! impl_operation {
    ($request:ty, $output:ty, $kind:expr) => {
        impl $crate::request::Operation for $request {
            type Output = $output;

            fn kind(&self) -> $crate::request::RequestKind {
                $kind
            }

            fn outcome(&self) -> &$crate::request::Outcome<$output> {
                &self.outcome
            }

            fn outcome_mut(&mut self) -> &mut $crate::request::Outcome<$output> {
                &mut self.outcome
            }

            fn cancel_flag(&self) -> &$crate::request::CancelFlag {
                &self.cancel
            }

            fn into_outcome(self) -> $crate::request::Outcome<$output> {
                self.outcome
            }
        }
    };
    ($request:ty, $output:ty, $kind:expr, cacheable) => {
        impl $crate::request::Operation for $request {
            type Output = $output;

            fn kind(&self) -> $crate::request::RequestKind {
                $kind
            }

            fn outcome(&self) -> &$crate::request::Outcome<$output> {
                &self.outcome
            }

            fn outcome_mut(&mut self) -> &mut $crate::request::Outcome<$output> {
                &mut self.outcome
            }

            fn cancel_flag(&self) -> &$crate::request::CancelFlag {
                &self.cancel
            }

            fn into_outcome(self) -> $crate::request::Outcome<$output> {
                self.outcome
            }

            fn cache_info_mut(&mut self) -> Option<&mut $crate::graph::CacheInfo> {
                Some(&mut self.cache)
            }
        }
    };
}

pub(crate) use impl_operation;

/// Any request a processor accepts
#[derive(Debug, Clone)]
pub enum Request {
    ReadNode(ReadNodeRequest),
    ReadAllProperties(ReadAllPropertiesRequest),
    ReadProperty(ReadPropertyRequest),
    ReadAllChildren(ReadAllChildrenRequest),
    ReadBlockOfChildren(ReadBlockOfChildrenRequest),
    ReadNextBlockOfChildren(ReadNextBlockOfChildrenRequest),
    ReadBranch(ReadBranchRequest),
    VerifyNodeExists(VerifyNodeExistsRequest),
    CreateNode(CreateNodeRequest),
    UpdateProperties(UpdatePropertiesRequest),
    SetProperty(SetPropertyRequest),
    RemoveProperty(RemovePropertyRequest),
    DeleteBranch(DeleteBranchRequest),
    DeleteChildren(DeleteChildrenRequest),
    CopyBranch(CopyBranchRequest),
    MoveBranch(MoveBranchRequest),
    RenameNode(RenameNodeRequest),
    Composite(CompositeRequest),
}

/// Apply the same expression to whichever typed request is inside
macro_rules! with_request {
    ($request:expr, $r:ident => $body:expr) => {
        match $request {
            Request::ReadNode($r) => $body,
            Request::ReadAllProperties($r) => $body,
            Request::ReadProperty($r) => $body,
            Request::ReadAllChildren($r) => $body,
            Request::ReadBlockOfChildren($r) => $body,
            Request::ReadNextBlockOfChildren($r) => $body,
            Request::ReadBranch($r) => $body,
            Request::VerifyNodeExists($r) => $body,
            Request::CreateNode($r) => $body,
            Request::UpdateProperties($r) => $body,
            Request::SetProperty($r) => $body,
            Request::RemoveProperty($r) => $body,
            Request::DeleteBranch($r) => $body,
            Request::DeleteChildren($r) => $body,
            Request::CopyBranch($r) => $body,
            Request::MoveBranch($r) => $body,
            Request::RenameNode($r) => $body,
            Request::Composite($r) => $body,
        }
    };
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        with_request!(self, r => r.kind())
    }

    pub fn error(&self) -> Option<&GraphError> {
        with_request!(self, r => r.error())
    }

    pub fn has_error(&self) -> bool {
        self.error().is_some()
    }

    pub fn is_completed(&self) -> bool {
        with_request!(self, r => r.is_completed())
    }

    /// Neither completed nor failed
    pub fn is_pending(&self) -> bool {
        !self.is_completed() && !self.has_error()
    }

    pub fn is_cancelled(&self) -> bool {
        with_request!(self, r => r.is_cancelled())
    }

    pub fn cancel(&self) {
        match self {
            Request::Composite(composite) => composite.cancel_all(),
            other => with_request!(other, r => r.cancel()),
        }
    }

    pub fn fail(&mut self, error: GraphError) {
        with_request!(self, r => r.fail(error))
    }

    pub fn cache_info_mut(&mut self) -> Option<&mut CacheInfo> {
        with_request!(self, r => r.cache_info_mut())
    }

    pub fn is_read_only(&self) -> bool {
        match self {
            Request::Composite(composite) => composite.is_read_only(),
            other => other.kind().is_read(),
        }
    }

    /// True for requests that mutate content
    pub fn is_change(&self) -> bool {
        !matches!(self, Request::Composite(_)) && !self.kind().is_read()
    }

    /// Workspace the request operates in
    pub fn workspace(&self) -> &str {
        match self {
            Request::ReadNode(r) => r.workspace(),
            Request::ReadAllProperties(r) => r.workspace(),
            Request::ReadProperty(r) => r.workspace(),
            Request::ReadAllChildren(r) => r.workspace(),
            Request::ReadBlockOfChildren(r) => r.workspace(),
            Request::ReadNextBlockOfChildren(r) => r.workspace(),
            Request::ReadBranch(r) => r.workspace(),
            Request::VerifyNodeExists(r) => r.workspace(),
            Request::CreateNode(r) => r.workspace(),
            Request::UpdateProperties(r) => r.workspace(),
            Request::SetProperty(r) => r.workspace(),
            Request::RemoveProperty(r) => r.workspace(),
            Request::DeleteBranch(r) => r.workspace(),
            Request::DeleteChildren(r) => r.workspace(),
            Request::CopyBranch(r) => r.into_workspace(),
            Request::MoveBranch(r) => r.workspace(),
            Request::RenameNode(r) => r.workspace(),
            Request::Composite(_) => DEFAULT_WORKSPACE,
        }
    }

    /// Location named by the request's input
    pub fn target(&self) -> Option<&Location> {
        match self {
            Request::ReadNode(r) => Some(r.at()),
            Request::ReadAllProperties(r) => Some(r.at()),
            Request::ReadProperty(r) => Some(r.on()),
            Request::ReadAllChildren(r) => Some(r.of()),
            Request::ReadBlockOfChildren(r) => Some(r.of()),
            Request::ReadNextBlockOfChildren(r) => Some(r.starting_after()),
            Request::ReadBranch(r) => Some(r.at()),
            Request::VerifyNodeExists(r) => Some(r.at()),
            Request::CreateNode(r) => Some(r.under()),
            Request::UpdateProperties(r) => Some(r.on()),
            Request::SetProperty(r) => Some(r.on()),
            Request::RemoveProperty(r) => Some(r.from()),
            Request::DeleteBranch(r) => Some(r.at()),
            Request::DeleteChildren(r) => Some(r.at()),
            Request::CopyBranch(r) => Some(r.from()),
            Request::MoveBranch(r) => Some(r.from()),
            Request::RenameNode(r) => Some(r.at()),
            Request::Composite(_) => None,
        }
    }

    /// Actual location changed by a completed change request
    pub fn changed_location(&self) -> Option<Location> {
        match self {
            Request::CreateNode(r) => r.result().cloned(),
            Request::UpdateProperties(r) => r.result().map(|d| d.location.clone()),
            Request::SetProperty(r) => r.result().map(|d| d.location.clone()),
            Request::RemoveProperty(r) => r.result().cloned(),
            Request::DeleteBranch(r) => r.result().cloned(),
            Request::DeleteChildren(r) => r.result().map(|d| d.location.clone()),
            Request::CopyBranch(r) => r.result().map(|d| d.copy.clone()),
            Request::MoveBranch(r) => r.result().map(|d| d.after.clone()),
            Request::RenameNode(r) => r.result().map(|d| d.after.clone()),
            _ => None,
        }
    }
}

macro_rules! impl_from_request {
    ($($variant:ident($request:ty)),* $(,)?) => {
        $(
            impl From<$request> for Request {
                fn from(request: $request) -> Self {
                    Request::$variant(request)
                }
            }
        )*
    };
}

impl_from_request!(
    ReadNode(ReadNodeRequest),
    ReadAllProperties(ReadAllPropertiesRequest),
    ReadProperty(ReadPropertyRequest),
    ReadAllChildren(ReadAllChildrenRequest),
    ReadBlockOfChildren(ReadBlockOfChildrenRequest),
    ReadNextBlockOfChildren(ReadNextBlockOfChildrenRequest),
    ReadBranch(ReadBranchRequest),
    VerifyNodeExists(VerifyNodeExistsRequest),
    CreateNode(CreateNodeRequest),
    UpdateProperties(UpdatePropertiesRequest),
    SetProperty(SetPropertyRequest),
    RemoveProperty(RemovePropertyRequest),
    DeleteBranch(DeleteBranchRequest),
    DeleteChildren(DeleteChildrenRequest),
    CopyBranch(CopyBranchRequest),
    MoveBranch(MoveBranchRequest),
    RenameNode(RenameNodeRequest),
    Composite(CompositeRequest),
);

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target() {
            Some(target) => write!(f, "{} at {} in '{}'", self.kind(), target, self.workspace()),
            None => write!(f, "{}", self.kind()),
        }
    }
}
