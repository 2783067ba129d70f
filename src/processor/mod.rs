//! Request Processor
//!
//! `RequestProcessor` has one handler per request kind. Primitive kinds
//! default to an unsupported-request error; composite kinds default to
//! decompositions into simpler kinds, so a connector only has to implement the
//! primitives it supports. `process` dispatches a `Request` to its handler and
//! guarantees that every request that was not cancelled ends with an outcome.

pub mod logging;

pub use logging::LoggingProcessor;

use crate::error::GraphError;
use crate::execution::ExecutionContext;
use crate::graph::{CacheInfo, CachePolicy};
use crate::observe::{Changes, Observer};
use crate::request::{
    BranchData, ChildrenData, CompositeRequest, CopyBranchRequest, CreateNodeRequest,
    DeleteBranchRequest, DeleteChildrenRequest, DeletedChildren, MoveBranchRequest,
    NextBlockData, NodeData, Operation, Outcome, PropertyData, ReadAllChildrenRequest,
    ReadAllPropertiesRequest, ReadBlockOfChildrenRequest, ReadBranchRequest,
    ReadNextBlockOfChildrenRequest, ReadNodeRequest, ReadPropertyRequest, RemovePropertyRequest,
    RenameNodeRequest, Request, SetPropertyData, SetPropertyRequest, UpdatePropertiesRequest,
    VerifyNodeExistsRequest,
};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tracing::debug;

/// State shared by every handler of one processor
///
/// `now` is fixed when the processor is created; every read it completes is
/// stamped with that instant.
#[derive(Debug, Clone)]
pub struct ProcessorContext {
    source_name: String,
    execution: ExecutionContext,
    now: DateTime<Utc>,
    default_cache_policy: Option<CachePolicy>,
    changes: Option<Vec<Request>>,
}

impl ProcessorContext {
    pub fn new(
        source_name: impl Into<String>,
        execution: ExecutionContext,
        now: DateTime<Utc>,
    ) -> Self {
        ProcessorContext {
            source_name: source_name.into(),
            execution,
            now,
            default_cache_policy: None,
            changes: None,
        }
    }

    pub fn with_default_cache_policy(mut self, policy: Option<CachePolicy>) -> Self {
        self.default_cache_policy = policy;
        self
    }

    /// Keep every successful change request for a later `Changes` batch
    pub fn recording_changes(mut self) -> Self {
        self.changes = Some(Vec::new());
        self
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn execution(&self) -> &ExecutionContext {
        &self.execution
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn default_cache_policy(&self) -> Option<CachePolicy> {
        self.default_cache_policy
    }

    pub fn is_recording(&self) -> bool {
        self.changes.is_some()
    }

    /// Record cache metadata on a completed read
    pub fn set_cacheable_info(&self, info: &mut CacheInfo) {
        info.record(self.default_cache_policy, self.now);
    }

    pub fn record_change(&mut self, request: &Request) {
        if let Some(changes) = self.changes.as_mut() {
            changes.push(request.clone());
        }
    }

    pub fn recorded_changes(&self) -> &[Request] {
        self.changes.as_deref().unwrap_or(&[])
    }

    /// Drain the recorded requests into one batch, if any were recorded
    pub fn take_changes(&mut self) -> Option<Changes> {
        let requests = std::mem::take(self.changes.as_mut()?);
        if requests.is_empty() {
            return None;
        }
        Some(Changes::new(
            &self.execution,
            self.source_name.clone(),
            self.now,
            requests,
        ))
    }

    /// Deliver the recorded changes as one batch, then start a new batch
    pub fn notify_observer_of_changes(&mut self, observer: &dyn Observer) {
        if let Some(changes) = self.take_changes() {
            debug!(
                source = %self.source_name,
                count = changes.len(),
                "Publishing recorded changes"
            );
            observer.notify(&changes);
        }
    }
}

/// Processor of typed requests
pub trait RequestProcessor {
    fn context(&self) -> &ProcessorContext;

    fn context_mut(&mut self) -> &mut ProcessorContext;

    /// Dispatch one request to its handler
    fn process(&mut self, request: &mut Request) {
        dispatch(self, request);
    }

    /// Release resources held by the processor
    fn close(&mut self) {}

    /// Process the embedded requests in order, then fold their outcomes
    fn process_composite(&mut self, request: &mut CompositeRequest) {
        let cancel = request.cancel_flag().clone();
        for embedded in request.requests_mut() {
            if cancel.is_cancelled() {
                return;
            }
            self.process(embedded);
        }
        if cancel.is_cancelled() {
            return;
        }
        request.check_for_errors();
    }

    // Primitive kinds

    fn read_all_children(&mut self, request: &mut ReadAllChildrenRequest) {
        unsupported(self.context(), request);
    }

    fn read_all_properties(&mut self, request: &mut ReadAllPropertiesRequest) {
        unsupported(self.context(), request);
    }

    fn create_node(&mut self, request: &mut CreateNodeRequest) {
        unsupported(self.context(), request);
    }

    fn update_properties(&mut self, request: &mut UpdatePropertiesRequest) {
        unsupported(self.context(), request);
    }

    fn delete_branch(&mut self, request: &mut DeleteBranchRequest) {
        unsupported(self.context(), request);
    }

    fn copy_branch(&mut self, request: &mut CopyBranchRequest) {
        unsupported(self.context(), request);
    }

    fn move_branch(&mut self, request: &mut MoveBranchRequest) {
        unsupported(self.context(), request);
    }

    // Kinds with default decompositions

    /// Properties then children
    fn read_node(&mut self, request: &mut ReadNodeRequest) {
        let mut properties = ReadAllPropertiesRequest::new(request.at().clone())
            .in_workspace(request.workspace())
            .sharing_cancel(request.cancel_flag());
        self.read_all_properties(&mut properties);
        inherit_cache_info(request.cache_info_mut(), properties.cache_info());
        let Some(properties) = absorb(request, properties.into_outcome()) else {
            return;
        };
        if request.is_cancelled() {
            return;
        }

        let mut children = ReadAllChildrenRequest::new(properties.location.clone())
            .in_workspace(request.workspace())
            .sharing_cancel(request.cancel_flag());
        self.read_all_children(&mut children);
        inherit_cache_info(request.cache_info_mut(), children.cache_info());
        let Some(children) = absorb(request, children.into_outcome()) else {
            return;
        };

        request.complete(NodeData {
            location: properties.location,
            properties: properties.properties,
            children: children.children,
        });
    }

    /// All properties, then pick one
    fn read_property(&mut self, request: &mut ReadPropertyRequest) {
        let mut all = ReadAllPropertiesRequest::new(request.on().clone())
            .in_workspace(request.workspace())
            .sharing_cancel(request.cancel_flag());
        self.read_all_properties(&mut all);
        inherit_cache_info(request.cache_info_mut(), all.cache_info());
        let Some(mut data) = absorb(request, all.into_outcome()) else {
            return;
        };
        let property = data.properties.remove(request.name());
        request.complete(PropertyData {
            location: data.location,
            property,
        });
    }

    fn verify_node_exists(&mut self, request: &mut VerifyNodeExistsRequest) {
        let mut all = ReadAllPropertiesRequest::new(request.at().clone())
            .in_workspace(request.workspace())
            .sharing_cancel(request.cancel_flag());
        self.read_all_properties(&mut all);
        inherit_cache_info(request.cache_info_mut(), all.cache_info());
        if let Some(data) = absorb(request, all.into_outcome()) {
            request.complete(data.location);
        }
    }

    /// All children, windowed in memory
    fn read_block_of_children(&mut self, request: &mut ReadBlockOfChildrenRequest) {
        let mut all = ReadAllChildrenRequest::new(request.of().clone())
            .in_workspace(request.workspace())
            .sharing_cancel(request.cancel_flag());
        self.read_all_children(&mut all);
        inherit_cache_info(request.cache_info_mut(), all.cache_info());
        let Some(data) = absorb(request, all.into_outcome()) else {
            return;
        };
        let children = data
            .children
            .into_iter()
            .skip(request.starting_index())
            .take(request.count())
            .collect();
        request.complete(ChildrenData {
            location: data.location,
            children,
        });
    }

    /// Siblings following a node, windowed from its parent's children
    fn read_next_block_of_children(&mut self, request: &mut ReadNextBlockOfChildrenRequest) {
        let mut verify = VerifyNodeExistsRequest::new(request.starting_after().clone())
            .in_workspace(request.workspace())
            .sharing_cancel(request.cancel_flag());
        self.verify_node_exists(&mut verify);
        let Some(actual) = absorb(request, verify.into_outcome()) else {
            return;
        };
        let Some(parent) = actual.path().and_then(|p| p.parent()) else {
            request.fail(GraphError::InvalidRequest(format!(
                "{} has no parent and therefore no siblings",
                actual
            )));
            return;
        };
        if request.is_cancelled() {
            return;
        }

        let mut siblings = ReadAllChildrenRequest::new(parent)
            .in_workspace(request.workspace())
            .sharing_cancel(request.cancel_flag());
        self.read_all_children(&mut siblings);
        inherit_cache_info(request.cache_info_mut(), siblings.cache_info());
        let Some(data) = absorb(request, siblings.into_outcome()) else {
            return;
        };
        let children = data
            .children
            .into_iter()
            .skip_while(|child| !child.is_same(&actual))
            .skip(1)
            .take(request.count())
            .collect();
        request.complete(NextBlockData {
            starting_after: actual,
            children,
        });
    }

    /// Breadth-first reads of each node down to the maximum depth
    fn read_branch(&mut self, request: &mut ReadBranchRequest) {
        let mut queue = VecDeque::from([(request.at().clone(), 1usize)]);
        let mut nodes = Vec::new();
        while let Some((location, depth)) = queue.pop_front() {
            if request.is_cancelled() {
                return;
            }
            let mut read = ReadNodeRequest::new(location)
                .in_workspace(request.workspace())
                .sharing_cancel(request.cancel_flag());
            self.read_node(&mut read);
            inherit_cache_info(request.cache_info_mut(), read.cache_info());
            let Some(node) = absorb(request, read.into_outcome()) else {
                return;
            };
            if depth < request.max_depth() {
                queue.extend(node.children.iter().map(|c| (c.clone(), depth + 1)));
            }
            nodes.push(node);
        }
        let location = match nodes.first() {
            Some(top) => top.location.clone(),
            None => request.at().clone(),
        };
        request.complete(BranchData { location, nodes });
    }

    fn set_property(&mut self, request: &mut SetPropertyRequest) {
        let mut update = UpdatePropertiesRequest::new(request.on().clone())
            .set(request.property().clone())
            .in_workspace(request.workspace())
            .sharing_cancel(request.cancel_flag());
        self.update_properties(&mut update);
        if let Some(data) = absorb(request, update.into_outcome()) {
            let is_new = data.created.contains(request.property().name());
            request.complete(SetPropertyData {
                location: data.location,
                is_new,
            });
        }
    }

    fn remove_property(&mut self, request: &mut RemovePropertyRequest) {
        let mut update = UpdatePropertiesRequest::new(request.from().clone())
            .remove(request.name().clone())
            .in_workspace(request.workspace())
            .sharing_cancel(request.cancel_flag());
        self.update_properties(&mut update);
        if let Some(data) = absorb(request, update.into_outcome()) {
            request.complete(data.location);
        }
    }

    /// All children, then one branch delete per child
    fn delete_children(&mut self, request: &mut DeleteChildrenRequest) {
        let mut children = ReadAllChildrenRequest::new(request.at().clone())
            .in_workspace(request.workspace())
            .sharing_cancel(request.cancel_flag());
        self.read_all_children(&mut children);
        let Some(data) = absorb(request, children.into_outcome()) else {
            return;
        };

        let mut deleted = Vec::with_capacity(data.children.len());
        for child in data.children {
            if request.is_cancelled() {
                return;
            }
            let mut delete = DeleteBranchRequest::new(child)
                .in_workspace(request.workspace())
                .sharing_cancel(request.cancel_flag());
            self.delete_branch(&mut delete);
            let Some(location) = absorb(request, delete.into_outcome()) else {
                return;
            };
            deleted.push(location);
        }
        request.complete(DeletedChildren {
            location: data.location,
            deleted,
        });
    }

    /// Move within the current parent under the new name
    fn rename_node(&mut self, request: &mut RenameNodeRequest) {
        let mut verify = VerifyNodeExistsRequest::new(request.at().clone())
            .in_workspace(request.workspace())
            .sharing_cancel(request.cancel_flag());
        self.verify_node_exists(&mut verify);
        let Some(actual) = absorb(request, verify.into_outcome()) else {
            return;
        };
        let Some(parent) = actual.path().and_then(|p| p.parent()) else {
            request.fail(GraphError::InvalidRequest(format!(
                "cannot rename {}: it has no parent",
                actual
            )));
            return;
        };
        if request.is_cancelled() {
            return;
        }

        let mut mv = MoveBranchRequest::new(actual, parent)
            .named(request.to_name().clone())
            .in_workspace(request.workspace())
            .sharing_cancel(request.cancel_flag());
        self.move_branch(&mut mv);
        if let Some(data) = absorb(request, mv.into_outcome()) {
            request.complete(data);
        }
    }
}

/// Route a request to its handler and enforce the outcome guarantees
///
/// Cancelled requests are left untouched. Completed reads get cache metadata,
/// completed changes are recorded, and a handler that leaves a request pending
/// turns it into an error.
pub fn dispatch<P>(processor: &mut P, request: &mut Request)
where
    P: RequestProcessor + ?Sized,
{
    if request.is_cancelled() {
        return;
    }
    match request {
        Request::ReadNode(r) => processor.read_node(r),
        Request::ReadAllProperties(r) => processor.read_all_properties(r),
        Request::ReadProperty(r) => processor.read_property(r),
        Request::ReadAllChildren(r) => processor.read_all_children(r),
        Request::ReadBlockOfChildren(r) => processor.read_block_of_children(r),
        Request::ReadNextBlockOfChildren(r) => processor.read_next_block_of_children(r),
        Request::ReadBranch(r) => processor.read_branch(r),
        Request::VerifyNodeExists(r) => processor.verify_node_exists(r),
        Request::CreateNode(r) => processor.create_node(r),
        Request::UpdateProperties(r) => processor.update_properties(r),
        Request::SetProperty(r) => processor.set_property(r),
        Request::RemoveProperty(r) => processor.remove_property(r),
        Request::DeleteBranch(r) => processor.delete_branch(r),
        Request::DeleteChildren(r) => processor.delete_children(r),
        Request::CopyBranch(r) => processor.copy_branch(r),
        Request::MoveBranch(r) => processor.move_branch(r),
        Request::RenameNode(r) => processor.rename_node(r),
        Request::Composite(r) => processor.process_composite(r),
    }

    if request.is_cancelled() {
        return;
    }
    if request.is_pending() {
        let kind = request.kind();
        request.fail(GraphError::InvalidRequest(format!(
            "{} was not completed by '{}'",
            kind,
            processor.context().source_name()
        )));
        return;
    }
    if request.is_completed() {
        if let Some(info) = request.cache_info_mut() {
            processor.context().set_cacheable_info(info);
        }
        if request.is_change() {
            processor.context_mut().record_change(request);
        }
    }
}

/// Fail `request` as unsupported by the processor's source
pub fn unsupported<R: Operation + ?Sized>(context: &ProcessorContext, request: &mut R) {
    request.fail(GraphError::UnsupportedRequest(format!(
        "{} is not supported by '{}'",
        request.kind(),
        context.source_name()
    )));
}

/// Take the result of a sub-request, copying its error up to the parent
///
/// Returns `None` when the parent must stop: the sub-request failed or was
/// cancelled before finishing.
pub fn absorb<P, T>(parent: &mut P, outcome: Outcome<T>) -> Option<T>
where
    P: Operation + ?Sized,
{
    match outcome {
        Outcome::Completed(value) => Some(value),
        Outcome::Failed(err) => {
            parent.fail(err);
            None
        }
        Outcome::Pending => {
            if !parent.is_cancelled() {
                parent.fail(GraphError::InvalidRequest(format!(
                    "sub-request of {} finished without an outcome",
                    parent.kind()
                )));
            }
            None
        }
    }
}

/// Carry a sub-read's cache metadata up to the read that issued it
pub fn inherit_cache_info(parent: Option<&mut CacheInfo>, sub: &CacheInfo) {
    if let (Some(parent), Some(loaded_at)) = (parent, sub.loaded_at()) {
        parent.record(sub.policy(), loaded_at);
    }
}
