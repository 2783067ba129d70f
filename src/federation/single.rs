//! Single-projection executor
//!
//! When a federation is one source mounted by one rule, nothing needs
//! merging: each request is rewritten into the source's paths, forwarded on
//! one connection, and its result rewritten back.

use crate::connector::{Connection, ConnectionFactory};
use crate::error::GraphError;
use crate::execution::ExecutionContext;
use crate::federation::{Federation, PathRule, Projection};
use crate::graph::{Location, Properties};
use crate::processor::{absorb, inherit_cache_info, ProcessorContext, RequestProcessor};
use crate::request::{
    CancelFlag, ChildrenData, CopyBranchRequest, CopyData, CreateNodeRequest, DeleteBranchRequest,
    MoveBranchRequest, MoveData, NodeData, Operation, PropertiesData, ReadAllChildrenRequest,
    ReadAllPropertiesRequest, ReadNodeRequest, Request, UpdatePropertiesRequest,
    UpdatedProperties,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{trace, warn};

pub struct SingleProjectionExecutor {
    context: ProcessorContext,
    federation: Arc<Federation>,
    projection: Projection,
    rule: PathRule,
    factory: Arc<dyn ConnectionFactory>,
    connection: Option<Box<dyn Connection>>,
}

impl SingleProjectionExecutor {
    pub fn new(
        federation: Arc<Federation>,
        factory: Arc<dyn ConnectionFactory>,
        execution: ExecutionContext,
    ) -> Result<Self, GraphError> {
        let (projection, rule) = match federation.projections() {
            [projection] => match projection.rules() {
                [rule] => (projection.clone(), rule.clone()),
                _ => {
                    return Err(GraphError::InvalidRequest(format!(
                        "projection of '{}' has more than one rule",
                        projection.source_name()
                    )))
                }
            },
            _ => {
                return Err(GraphError::InvalidRequest(format!(
                    "federation '{}' does not have exactly one projection",
                    federation.name()
                )))
            }
        };
        let context = ProcessorContext::new(federation.name(), execution, Utc::now())
            .with_default_cache_policy(federation.default_cache_policy());
        Ok(SingleProjectionExecutor {
            context,
            federation,
            projection,
            rule,
            factory,
            connection: None,
        })
    }

    pub fn recording_changes(mut self) -> Self {
        self.context = self.context.clone().recording_changes();
        self
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    fn to_source(&self, location: &Location) -> Result<Location, GraphError> {
        let Some(path) = location.path() else {
            return Ok(location.clone());
        };
        let source_path = self
            .rule
            .path_in_source(path)
            .ok_or_else(|| GraphError::path_not_found(location.clone(), None))?;
        Ok(match location.id() {
            Some(id) => Location::new(source_path, id),
            None => Location::from_path(source_path),
        })
    }

    fn to_repository(&self, location: &Location) -> Location {
        match location.path().and_then(|p| self.rule.path_in_repository(p)) {
            Some(path) => location.with_path(path),
            None => location.clone(),
        }
    }

    fn repository_error(&self, err: GraphError) -> GraphError {
        match err {
            GraphError::PathNotFound {
                location,
                lowest_existing,
            } => GraphError::path_not_found(
                self.to_repository(&location),
                lowest_existing.and_then(|p| self.rule.path_in_repository(&p)),
            ),
            other => other,
        }
    }

    /// Content of a federated ancestor of the mount point
    ///
    /// Such nodes exist only to lead to the mounted region: no properties and
    /// one child on the way down.
    fn synthesized(&self, location: &Location) -> Option<NodeData> {
        let path = location.path()?;
        let mount = self.rule.repository_path();
        if !path.is_ancestor_of(mount) {
            return None;
        }
        let next = mount.ancestor_of_len(path.len() + 1)?;
        Some(NodeData {
            location: location.clone(),
            properties: Properties::new(),
            children: vec![Location::from_path(next)],
        })
    }

    /// Check the workspace and translate a location, failing `request` if
    /// either is impossible
    fn source_location<R: Operation>(
        &self,
        request: &mut R,
        workspace: &str,
        location: &Location,
    ) -> Option<Location> {
        if workspace != self.federation.workspace() {
            request.fail(GraphError::InvalidRequest(format!(
                "federation '{}' has no workspace '{}'",
                self.federation.name(),
                workspace
            )));
            return None;
        }
        match self.to_source(location) {
            Ok(location) => Some(location),
            Err(err) => {
                request.fail(err);
                None
            }
        }
    }

    fn check_writable<R: Operation>(&self, request: &mut R) -> bool {
        if self.projection.is_read_only() {
            request.fail(GraphError::InvalidRequest(format!(
                "projection of '{}' is read-only",
                self.projection.source_name()
            )));
            return false;
        }
        true
    }

    fn connection(&mut self, cancel: &CancelFlag) -> Result<&mut Box<dyn Connection>, GraphError> {
        if self.connection.is_none() {
            let connection = self
                .factory
                .create_connection(self.projection.source_name(), cancel)?;
            trace!(source = %self.projection.source_name(), "Opened connection");
            self.connection = Some(connection);
        }
        self.connection
            .as_mut()
            .ok_or_else(|| GraphError::SourceUnavailable(self.projection.source_name().to_string()))
    }

    /// Execute `sub` on the source, failing `parent` if the connection fails
    fn forward<R: Operation>(&mut self, parent: &mut R, mut sub: Request) -> Option<Request> {
        let execution = self.context.execution().clone();
        let cancel = parent.cancel_flag().clone();
        let result = self
            .connection(&cancel)
            .and_then(|connection| connection.execute(&execution, &mut sub));
        match result {
            Ok(()) => Some(sub),
            Err(err) => {
                if let Some(mut connection) = self.connection.take() {
                    close_quietly(self.projection.source_name(), &mut connection);
                }
                parent.fail(err);
                None
            }
        }
    }
}

fn close_quietly(source: &str, connection: &mut Box<dyn Connection>) {
    if let Err(err) = connection.close() {
        warn!(source = source, error = %err, "Failed to close connection");
    }
}

impl RequestProcessor for SingleProjectionExecutor {
    fn context(&self) -> &ProcessorContext {
        &self.context
    }

    fn context_mut(&mut self) -> &mut ProcessorContext {
        &mut self.context
    }

    fn close(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            close_quietly(self.projection.source_name(), &mut connection);
        }
    }

    fn read_node(&mut self, request: &mut ReadNodeRequest) {
        if let Some(data) = self.synthesized(request.at()) {
            return request.complete(data);
        }
        let workspace = request.workspace().to_string();
        let at = request.at().clone();
        let Some(at) = self.source_location(request, &workspace, &at) else {
            return;
        };
        let sub = ReadNodeRequest::new(at)
            .in_workspace(self.projection.workspace())
            .sharing_cancel(request.cancel_flag());
        let Some(Request::ReadNode(sub)) = self.forward(request, sub.into()) else {
            return;
        };
        inherit_cache_info(request.cache_info_mut(), sub.cache_info());
        let outcome = sub.into_outcome().map_err(|e| self.repository_error(e));
        if let Some(data) = absorb(request, outcome) {
            request.complete(NodeData {
                location: self.to_repository(&data.location),
                properties: data.properties,
                children: data.children.iter().map(|c| self.to_repository(c)).collect(),
            });
        }
    }

    fn read_all_properties(&mut self, request: &mut ReadAllPropertiesRequest) {
        if let Some(data) = self.synthesized(request.at()) {
            return request.complete(PropertiesData {
                location: data.location,
                properties: data.properties,
            });
        }
        let workspace = request.workspace().to_string();
        let at = request.at().clone();
        let Some(at) = self.source_location(request, &workspace, &at) else {
            return;
        };
        let sub = ReadAllPropertiesRequest::new(at)
            .in_workspace(self.projection.workspace())
            .sharing_cancel(request.cancel_flag());
        let Some(Request::ReadAllProperties(sub)) = self.forward(request, sub.into()) else {
            return;
        };
        inherit_cache_info(request.cache_info_mut(), sub.cache_info());
        let outcome = sub.into_outcome().map_err(|e| self.repository_error(e));
        if let Some(data) = absorb(request, outcome) {
            request.complete(PropertiesData {
                location: self.to_repository(&data.location),
                properties: data.properties,
            });
        }
    }

    fn read_all_children(&mut self, request: &mut ReadAllChildrenRequest) {
        if let Some(data) = self.synthesized(request.of()) {
            return request.complete(ChildrenData {
                location: data.location,
                children: data.children,
            });
        }
        let workspace = request.workspace().to_string();
        let of = request.of().clone();
        let Some(of) = self.source_location(request, &workspace, &of) else {
            return;
        };
        let sub = ReadAllChildrenRequest::new(of)
            .in_workspace(self.projection.workspace())
            .sharing_cancel(request.cancel_flag());
        let Some(Request::ReadAllChildren(sub)) = self.forward(request, sub.into()) else {
            return;
        };
        inherit_cache_info(request.cache_info_mut(), sub.cache_info());
        let outcome = sub.into_outcome().map_err(|e| self.repository_error(e));
        if let Some(data) = absorb(request, outcome) {
            request.complete(ChildrenData {
                location: self.to_repository(&data.location),
                children: data.children.iter().map(|c| self.to_repository(c)).collect(),
            });
        }
    }

    fn create_node(&mut self, request: &mut CreateNodeRequest) {
        if !self.check_writable(request) {
            return;
        }
        let workspace = request.workspace().to_string();
        let under = request.under().clone();
        let Some(under) = self.source_location(request, &workspace, &under) else {
            return;
        };
        let sub = CreateNodeRequest::new(under, request.name().clone())
            .with_properties(request.properties().to_vec())
            .on_conflict(request.conflict())
            .in_workspace(self.projection.workspace())
            .sharing_cancel(request.cancel_flag());
        let Some(Request::CreateNode(sub)) = self.forward(request, sub.into()) else {
            return;
        };
        let outcome = sub.into_outcome().map_err(|e| self.repository_error(e));
        if let Some(location) = absorb(request, outcome) {
            request.complete(self.to_repository(&location));
        }
    }

    fn update_properties(&mut self, request: &mut UpdatePropertiesRequest) {
        if !self.check_writable(request) {
            return;
        }
        let workspace = request.workspace().to_string();
        let on = request.on().clone();
        let Some(on) = self.source_location(request, &workspace, &on) else {
            return;
        };
        let mut sub = UpdatePropertiesRequest::new(on)
            .in_workspace(self.projection.workspace())
            .sharing_cancel(request.cancel_flag());
        for (name, change) in request.properties() {
            sub = match change {
                Some(property) => sub.set(property.clone()),
                None => sub.remove(name.clone()),
            };
        }
        let Some(Request::UpdateProperties(sub)) = self.forward(request, sub.into()) else {
            return;
        };
        let outcome = sub.into_outcome().map_err(|e| self.repository_error(e));
        if let Some(data) = absorb(request, outcome) {
            request.complete(UpdatedProperties {
                location: self.to_repository(&data.location),
                created: data.created,
            });
        }
    }

    fn delete_branch(&mut self, request: &mut DeleteBranchRequest) {
        if !self.check_writable(request) {
            return;
        }
        let workspace = request.workspace().to_string();
        let at = request.at().clone();
        let Some(at) = self.source_location(request, &workspace, &at) else {
            return;
        };
        let sub = DeleteBranchRequest::new(at)
            .in_workspace(self.projection.workspace())
            .sharing_cancel(request.cancel_flag());
        let Some(Request::DeleteBranch(sub)) = self.forward(request, sub.into()) else {
            return;
        };
        let outcome = sub.into_outcome().map_err(|e| self.repository_error(e));
        if let Some(location) = absorb(request, outcome) {
            request.complete(self.to_repository(&location));
        }
    }

    fn copy_branch(&mut self, request: &mut CopyBranchRequest) {
        if !self.check_writable(request) {
            return;
        }
        let from_workspace = request.source_workspace().to_string();
        let into_workspace = request.into_workspace().to_string();
        let (from, into) = (request.from().clone(), request.destination().clone());
        let Some(from) = self.source_location(request, &from_workspace, &from) else {
            return;
        };
        let Some(into) = self.source_location(request, &into_workspace, &into) else {
            return;
        };
        let mut sub = CopyBranchRequest::new(from, into)
            .from_workspace(self.projection.workspace())
            .into_workspace_named(self.projection.workspace())
            .sharing_cancel(request.cancel_flag());
        if let Some(name) = request.desired_name() {
            sub = sub.named(name.clone());
        }
        let Some(Request::CopyBranch(sub)) = self.forward(request, sub.into()) else {
            return;
        };
        let outcome = sub.into_outcome().map_err(|e| self.repository_error(e));
        if let Some(data) = absorb(request, outcome) {
            request.complete(CopyData {
                original: self.to_repository(&data.original),
                copy: self.to_repository(&data.copy),
            });
        }
    }

    fn move_branch(&mut self, request: &mut MoveBranchRequest) {
        if !self.check_writable(request) {
            return;
        }
        let workspace = request.workspace().to_string();
        let (from, into) = (request.from().clone(), request.destination().clone());
        let Some(from) = self.source_location(request, &workspace, &from) else {
            return;
        };
        let Some(into) = self.source_location(request, &workspace, &into) else {
            return;
        };
        let mut sub = MoveBranchRequest::new(from, into)
            .in_workspace(self.projection.workspace())
            .sharing_cancel(request.cancel_flag());
        if let Some(name) = request.desired_name() {
            sub = sub.named(name.clone());
        }
        let Some(Request::MoveBranch(sub)) = self.forward(request, sub.into()) else {
            return;
        };
        let outcome = sub.into_outcome().map_err(|e| self.repository_error(e));
        if let Some(data) = absorb(request, outcome) {
            request.complete(MoveData {
                before: self.to_repository(&data.before),
                after: self.to_repository(&data.after),
            });
        }
    }
}

impl Drop for SingleProjectionExecutor {
    fn drop(&mut self) {
        RequestProcessor::close(self);
    }
}
