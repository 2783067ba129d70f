//! Federating executor
//!
//! Answers reads by merging what every projection contributes for a path and
//! keeps the merged nodes in the cache source. One executor serves one unit
//! of work: it opens a connection per touched source on first use and closes
//! all of them when it is closed or dropped.
//!
//! Reading a node:
//! 1. look the path up in the cache;
//! 2. on a miss below an uncached ancestor, load the missing ancestors first,
//!    top down;
//! 3. a cached node whose merge plan is unexpired and covers exactly the
//!    configured sources is returned as is;
//! 4. otherwise every projection contributes (one batched read per source),
//!    the contributions are merged, and the node with one placeholder per
//!    child is written to the cache.

use crate::config::FanOutFailurePolicy;
use crate::connector::{Connection, ConnectionFactory};
use crate::error::GraphError;
use crate::execution::ExecutionContext;
use crate::federation::{
    CacheProjection, Contribution, FederatedNode, Federation, MergeContext, MergePlan, Projection,
};
use crate::graph::{lexicon, Location, Name, NodeId, Path, Value};
use crate::processor::{ProcessorContext, RequestProcessor};
use crate::request::{
    CancelFlag, ChildrenData, CompositeRequest, CreateNodeRequest, DeleteBranchRequest,
    DeleteChildrenRequest, NodeConflictBehavior, NodeData, Operation, Outcome, PropertiesData,
    ReadAllChildrenRequest, ReadAllPropertiesRequest, ReadNodeRequest, Request,
    UpdatePropertiesRequest, UpdatedProperties,
};
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, trace, warn};

enum CacheLookup {
    Hit(NodeData),
    Miss { lowest_existing: Option<Path> },
}

pub struct FederatingExecutor {
    context: ProcessorContext,
    federation: Arc<Federation>,
    cache: CacheProjection,
    factory: Arc<dyn ConnectionFactory>,
    connections: HashMap<String, Box<dyn Connection>>,
    source_names: BTreeSet<String>,
    /// Flag of the request being served; interrupts connection waits
    cancel: CancelFlag,
}

impl FederatingExecutor {
    pub fn new(
        federation: Arc<Federation>,
        factory: Arc<dyn ConnectionFactory>,
        execution: ExecutionContext,
    ) -> Result<Self, GraphError> {
        let cache = federation.cache().cloned().ok_or_else(|| {
            GraphError::InvalidRequest(format!(
                "federation '{}' has no cache source",
                federation.name()
            ))
        })?;
        let context = ProcessorContext::new(federation.name(), execution, Utc::now())
            .with_default_cache_policy(federation.default_cache_policy());
        Ok(FederatingExecutor {
            context,
            source_names: federation.source_names(),
            federation,
            cache,
            factory,
            connections: HashMap::new(),
            cancel: CancelFlag::new(),
        })
    }

    /// Keep successful changes for a later `Changes` batch
    pub fn recording_changes(mut self) -> Self {
        self.context = self.context.clone().recording_changes();
        self
    }

    pub fn federation(&self) -> &Federation {
        &self.federation
    }

    /// Sources this executor currently holds a connection to
    pub fn open_sources(&self) -> BTreeSet<String> {
        self.connections.keys().cloned().collect()
    }

    /// Merged node at `location`, served from the cache when still valid
    pub fn get_node(
        &mut self,
        location: &Location,
        cancel: &CancelFlag,
    ) -> Result<FederatedNode, GraphError> {
        self.cancel = cancel.clone();
        match self.read_cache(location)? {
            CacheLookup::Hit(data) => self.refresh_if_needed(data, cancel),
            CacheLookup::Miss { lowest_existing } => {
                let Some(path) = location.path().cloned() else {
                    return Err(GraphError::path_not_found(location.clone(), None));
                };
                if let (Some(parent), Some(lowest)) = (path.parent(), lowest_existing) {
                    for len in lowest.len() + 1..=parent.len() {
                        let Some(ancestor) = path.ancestor_of_len(len) else {
                            break;
                        };
                        trace!(ancestor = %ancestor, "Loading uncached ancestor");
                        self.resolve_path(&ancestor, cancel)
                            .map_err(|err| relocate(err, location))?;
                    }
                }
                self.resolve_path(&path, cancel)
                    .map_err(|err| relocate(err, location))
            }
        }
    }

    fn resolve_path(&mut self, path: &Path, cancel: &CancelFlag) -> Result<FederatedNode, GraphError> {
        match self.read_cache(&Location::from_path(path.clone()))? {
            CacheLookup::Hit(data) => self.refresh_if_needed(data, cancel),
            CacheLookup::Miss { .. } => self.load(path, None, cancel),
        }
    }

    fn refresh_if_needed(
        &mut self,
        data: NodeData,
        cancel: &CancelFlag,
    ) -> Result<FederatedNode, GraphError> {
        let Some(path) = data.location.path().cloned() else {
            return Err(GraphError::InvalidRequest(format!(
                "cache returned {} without a path",
                data.location
            )));
        };
        let now = self.context.now();
        let plan = data
            .properties
            .get(&Name::from(lexicon::MERGE_PLAN))
            .and_then(MergePlan::from_property);
        match plan {
            Some(plan) if plan.is_valid(now, &self.source_names) => {
                trace!(path = %path, "Merged node served from cache");
                let id = data.location.id().unwrap_or_default();
                let mut node = FederatedNode::from_cached(data, id, plan).ok_or_else(|| {
                    GraphError::InvalidRequest(format!("cached node at {} has no path", path))
                })?;
                node.set_cache_policy(self.federation.default_cache_policy());
                Ok(node)
            }
            Some(plan) => {
                debug!(
                    path = %path,
                    expired = plan.is_expired(now),
                    unknown = ?plan.unknown_sources(&self.source_names),
                    missing = ?plan.missing_sources(&self.source_names),
                    "Cached merge plan is stale"
                );
                self.load(&path, Some(data), cancel)
            }
            None => self.load(&path, Some(data), cancel),
        }
    }

    /// Fetch, merge and cache the node at `path`
    fn load(
        &mut self,
        path: &Path,
        cached: Option<NodeData>,
        cancel: &CancelFlag,
    ) -> Result<FederatedNode, GraphError> {
        let (contributions, omitted) = self.load_contributions(path, cancel)?;
        if contributions.iter().all(Contribution::is_empty) {
            if let Some(err) = omitted {
                return Err(err);
            }
            if cached.is_some() {
                self.evict(path);
            }
            return Err(GraphError::path_not_found(
                Location::from_path(path.clone()),
                path.parent(),
            ));
        }
        for (i, contribution) in contributions.iter().enumerate() {
            trace!(path = %path, index = i + 1, contribution = %contribution, "Loaded contribution");
        }

        // another unit of work may have cached the node since it was read
        let federation = Arc::clone(&self.federation);
        let _writing = federation.lock_cache_writes();
        let current = match self.read_cache(&Location::from_path(path.clone()))? {
            CacheLookup::Hit(data) => Some(data),
            CacheLookup::Miss { .. } => None,
        };

        let id = current
            .as_ref()
            .and_then(|d| d.location.id())
            .unwrap_or_else(NodeId::new);
        let mut node = FederatedNode::new(path.clone(), id);
        let context = MergeContext::new(self.federation.identity_property().clone(), self.context.now());
        self.federation
            .strategy()
            .merge(&mut node, &contributions, &context);
        if node.cache_policy().is_none() {
            node.set_cache_policy(self.federation.default_cache_policy());
        }
        for conflict in node.conflicts() {
            warn!(path = %path, conflict = %conflict, "Merge conflict");
        }

        self.update_cache(&mut node, current.as_ref())?;
        Ok(node)
    }

    /// One contribution per projection, and per source path it maps to
    ///
    /// Also returns the last error of a source whose contribution was omitted.
    fn load_contributions(
        &mut self,
        path: &Path,
        cancel: &CancelFlag,
    ) -> Result<(Vec<Contribution>, Option<GraphError>), GraphError> {
        let federation = Arc::clone(&self.federation);
        let now = self.context.now();
        let default_expiry = federation
            .default_cache_policy()
            .map(|p| p.expiration_from(now));
        let mut contributions = Vec::new();
        let mut omitted = None;

        for projection in federation.projections() {
            if cancel.is_cancelled() {
                return Err(GraphError::Interrupted(format!("loading {}", path)));
            }
            let source = projection.source_name();
            let paths = projection.paths_in_source(path);
            if paths.is_empty() {
                let children: Vec<Location> = projection
                    .placeholder_children(path)
                    .into_iter()
                    .map(|segment| Location::from_path(path.child_segment(segment)))
                    .collect();
                contributions.push(if children.is_empty() {
                    Contribution::empty(source, projection.workspace(), default_expiry)
                } else {
                    Contribution::placeholder(source, projection.workspace(), default_expiry, children)
                });
                continue;
            }

            match self.read_from_source(projection, &paths) {
                Ok(mut found) => {
                    if found.is_empty() {
                        found.push(Contribution::empty(source, projection.workspace(), default_expiry));
                    }
                    contributions.append(&mut found);
                }
                Err(err @ GraphError::Interrupted(_)) => return Err(err),
                Err(err) => match (federation.fan_out_failure(), err.attributed_to(source)) {
                    (FanOutFailurePolicy::Omit, err) => {
                        warn!(
                            source = source,
                            path = %path,
                            error = %err,
                            "Omitting contribution of failed source"
                        );
                        omitted = Some(err);
                    }
                    (FanOutFailurePolicy::Fail, err) => return Err(err),
                },
            }
        }
        Ok((contributions, omitted))
    }

    /// Read every source path of one projection in a single call
    fn read_from_source(
        &mut self,
        projection: &Projection,
        paths: &BTreeSet<Path>,
    ) -> Result<Vec<Contribution>, GraphError> {
        let source = projection.source_name();
        let workspace = projection.workspace();
        let mut reads: Vec<Request> = paths
            .iter()
            .map(|p| ReadNodeRequest::new(p.clone()).in_workspace(workspace).into())
            .collect();
        let mut request = match reads.len() {
            1 => reads.remove(0),
            _ => CompositeRequest::new(reads).into(),
        };
        self.execute_on(source, &mut request)?;

        let reads: Vec<ReadNodeRequest> = match request {
            Request::ReadNode(read) => vec![read],
            Request::Composite(composite) => composite
                .into_requests()
                .into_iter()
                .filter_map(|r| match r {
                    Request::ReadNode(read) => Some(read),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };

        let now = self.context.now();
        let default_policy = self.federation.default_cache_policy();
        let mut contributions = Vec::with_capacity(reads.len());
        for read in reads {
            let expires_at = read
                .cache_info()
                .expiration()
                .or_else(|| default_policy.map(|p| p.expiration_from(now)));
            match read.into_outcome() {
                Outcome::Completed(data) => contributions.push(Contribution::node(
                    source,
                    workspace,
                    data.location,
                    expires_at,
                    data.properties,
                    data.children,
                )),
                Outcome::Failed(err) if err.is_path_not_found() => continue,
                Outcome::Failed(err) => return Err(err),
                Outcome::Pending => {
                    return Err(GraphError::InvalidRequest(format!(
                        "source '{}' left a read pending",
                        source
                    )))
                }
            }
        }
        if !self.federation.reads_child_identities() {
            return Ok(contributions);
        }
        let mut identified = Vec::with_capacity(contributions.len());
        for contribution in contributions {
            let identities = self.read_child_identities(source, workspace, contribution.children())?;
            identified.push(contribution.with_child_identities(identities));
        }
        Ok(identified)
    }

    /// Identity-property value of each child, read in a single call
    ///
    /// A child that cannot be read has no identity value.
    fn read_child_identities(
        &mut self,
        source: &str,
        workspace: &str,
        children: &[Location],
    ) -> Result<Vec<Option<Value>>, GraphError> {
        if children.is_empty() {
            return Ok(Vec::new());
        }
        let reads: Vec<Request> = children
            .iter()
            .map(|child| ReadAllPropertiesRequest::new(child.clone()).in_workspace(workspace).into())
            .collect();
        let mut request: Request = CompositeRequest::new(reads).into();
        self.execute_on(source, &mut request)?;
        let Request::Composite(composite) = request else {
            return Ok(vec![None; children.len()]);
        };
        let identity = self.federation.identity_property();
        Ok(composite
            .into_requests()
            .into_iter()
            .map(|read| match read {
                Request::ReadAllProperties(read) => match read.into_outcome() {
                    Outcome::Completed(data) => data
                        .properties
                        .get(identity)
                        .and_then(|p| p.first_value())
                        .cloned(),
                    _ => None,
                },
                _ => None,
            })
            .collect())
    }

    fn read_cache(&mut self, location: &Location) -> Result<CacheLookup, GraphError> {
        let target = location.path_only().unwrap_or_else(|| location.clone());
        let mut request: Request = ReadNodeRequest::new(target)
            .in_workspace(self.cache.workspace())
            .into();
        let cache_source = self.cache.source_name().to_string();
        self.execute_on(&cache_source, &mut request)?;
        let Request::ReadNode(read) = request else {
            return Err(GraphError::InvalidRequest("cache read changed kind".to_string()));
        };
        match read.into_outcome() {
            Outcome::Completed(data) => Ok(CacheLookup::Hit(data)),
            Outcome::Failed(GraphError::PathNotFound {
                lowest_existing, ..
            }) => Ok(CacheLookup::Miss { lowest_existing }),
            Outcome::Failed(err) => Err(err),
            Outcome::Pending => Err(GraphError::InvalidRequest(
                "cache left a read pending".to_string(),
            )),
        }
    }

    /// Write a merged node and its child placeholders to the cache
    ///
    /// Cached children that already match the front of the merged children
    /// are kept along with anything cached below them; otherwise the cached
    /// children are replaced wholesale.
    fn update_cache(
        &mut self,
        node: &mut FederatedNode,
        cached: Option<&NodeData>,
    ) -> Result<(), GraphError> {
        let workspace = self.cache.workspace().to_string();
        let path = node.path().clone();
        let mut properties: Vec<_> = node.properties().values().cloned().collect();
        if let Some(plan) = node.merge_plan() {
            properties.push(plan.to_property()?);
        }
        let wanted: Vec<Path> = node
            .children()
            .iter()
            .filter_map(|c| c.path().cloned())
            .collect();

        let mut requests: Vec<Request> = Vec::new();
        let to_create: &[Path] = match cached {
            Some(data) => {
                let mut update = UpdatePropertiesRequest::new(path.clone()).in_workspace(&workspace);
                for property in properties {
                    update = update.set(property);
                }
                for name in data.properties.keys() {
                    if !node.properties().contains_key(name) && name.as_str() != lexicon::MERGE_PLAN {
                        update = update.remove(name.clone());
                    }
                }
                requests.push(update.into());

                let existing: Vec<Path> = data
                    .children
                    .iter()
                    .filter_map(|c| c.path().cloned())
                    .collect();
                if wanted.starts_with(&existing) {
                    &wanted[existing.len()..]
                } else {
                    requests.push(
                        DeleteChildrenRequest::new(path.clone())
                            .in_workspace(&workspace)
                            .into(),
                    );
                    &wanted[..]
                }
            }
            None => {
                let (Some(parent), Some(segment)) = (path.parent(), path.last_segment()) else {
                    return Err(GraphError::InvalidRequest(
                        "the cache root is always present".to_string(),
                    ));
                };
                requests.push(
                    CreateNodeRequest::new(parent, segment.name().clone())
                        .with_properties(properties)
                        .on_conflict(NodeConflictBehavior::Append)
                        .in_workspace(&workspace)
                        .into(),
                );
                &wanted[..]
            }
        };
        for child in to_create {
            if let Some(segment) = child.last_segment() {
                requests.push(
                    CreateNodeRequest::new(path.clone(), segment.name().clone())
                        .on_conflict(NodeConflictBehavior::Append)
                        .in_workspace(&workspace)
                        .into(),
                );
            }
        }

        let cache_source = self.cache.source_name().to_string();
        let mut batch: Request = CompositeRequest::new(requests).into();
        self.execute_on(&cache_source, &mut batch)?;
        if let Some(err) = batch.error() {
            return Err(err.clone());
        }

        // placeholders get their identifiers from the cache
        let mut children: Request = ReadAllChildrenRequest::new(path.clone())
            .in_workspace(&workspace)
            .into();
        self.execute_on(&cache_source, &mut children)?;
        if let Request::ReadAllChildren(read) = children {
            match read.into_outcome() {
                Outcome::Completed(data) => node.set_children(data.children),
                Outcome::Failed(err) => return Err(err),
                Outcome::Pending => {}
            }
        }
        trace!(path = %path, children = node.children().len(), "Cached merged node");
        Ok(())
    }

    /// Drop a cached branch; failures only cost a later reload
    fn evict(&mut self, path: &Path) {
        let cache_source = self.cache.source_name().to_string();
        let mut request: Request = DeleteBranchRequest::new(path.clone())
            .in_workspace(self.cache.workspace())
            .into();
        let result = self.execute_on(&cache_source, &mut request);
        if let Some(err) = result.err().or_else(|| request.error().cloned()) {
            if !err.is_path_not_found() {
                debug!(path = %path, error = %err, "Could not evict cached branch");
            }
        }
    }

    /// Remove the merge plan so the next read reloads the node
    fn invalidate(&mut self, path: &Path) {
        let cache_source = self.cache.source_name().to_string();
        let mut request: Request = UpdatePropertiesRequest::new(path.clone())
            .remove(lexicon::MERGE_PLAN)
            .in_workspace(self.cache.workspace())
            .into();
        let result = self.execute_on(&cache_source, &mut request);
        if let Some(err) = result.err().or_else(|| request.error().cloned()) {
            if !err.is_path_not_found() {
                debug!(path = %path, error = %err, "Could not invalidate cached node");
            }
        }
    }

    fn connection(&mut self, source: &str) -> Result<&mut Box<dyn Connection>, GraphError> {
        if !self.connections.contains_key(source) {
            let connection = self.factory.create_connection(source, &self.cancel)?;
            trace!(source = source, federation = %self.federation.name(), "Opened connection");
            self.connections.insert(source.to_string(), connection);
        }
        self.connections
            .get_mut(source)
            .ok_or_else(|| GraphError::SourceUnavailable(source.to_string()))
    }

    /// Run a request on a source; a connection that fails is closed and
    /// reopened on next use
    fn execute_on(&mut self, source: &str, request: &mut Request) -> Result<(), GraphError> {
        let execution = self.context.execution().clone();
        let result = self.connection(source)?.execute(&execution, request);
        if result.is_err() {
            if let Some(mut connection) = self.connections.remove(source) {
                close_quietly(source, &mut connection);
            }
        }
        result
    }

    fn check_workspace(&self, workspace: &str) -> Result<(), GraphError> {
        if workspace == self.federation.workspace() {
            Ok(())
        } else {
            Err(GraphError::InvalidRequest(format!(
                "federation '{}' has no workspace '{}'",
                self.federation.name(),
                workspace
            )))
        }
    }

    /// Merged node for a read request, failing the request when unavailable
    fn node_for<R: Operation>(
        &mut self,
        request: &mut R,
        workspace: &str,
        location: &Location,
    ) -> Option<FederatedNode> {
        if let Err(err) = self.check_workspace(workspace) {
            request.fail(err);
            return None;
        }
        let cancel = request.cancel_flag().clone();
        match self.get_node(location, &cancel) {
            Ok(node) => {
                if let Some(info) = request.cache_info_mut() {
                    info.record(node.cache_policy(), self.context.now());
                }
                Some(node)
            }
            Err(err) => {
                request.fail(err);
                None
            }
        }
    }

    /// Federated path of a location, resolving identifiers through the cache
    fn path_of<R: Operation>(&mut self, request: &mut R, location: &Location) -> Option<Path> {
        self.cancel = request.cancel_flag().clone();
        if let Some(path) = location.path() {
            return Some(path.clone());
        }
        let cancel = request.cancel_flag().clone();
        match self.get_node(location, &cancel) {
            Ok(node) => Some(node.path().clone()),
            Err(err) => {
                request.fail(err);
                None
            }
        }
    }

    /// The one writable projection covering `path`, with the path in its source
    fn writable_projection(&self, path: &Path) -> Result<(Projection, Path), GraphError> {
        let covering: Vec<&Projection> = self
            .federation
            .projections()
            .iter()
            .filter(|p| p.covers(path))
            .collect();
        let writable: Vec<&Projection> = covering
            .iter()
            .copied()
            .filter(|p| !p.is_read_only())
            .collect();
        match writable.as_slice() {
            [projection] => {
                let source_path = projection
                    .rule_for(path)
                    .and_then(|rule| rule.path_in_source(path))
                    .ok_or_else(|| {
                        GraphError::InvalidRequest(format!("{} is not mapped to a source", path))
                    })?;
                Ok(((*projection).clone(), source_path))
            }
            [] if covering.is_empty() => Err(GraphError::InvalidRequest(format!(
                "no projection covers {}",
                path
            ))),
            [] => Err(GraphError::InvalidRequest(format!(
                "{} is only covered by read-only projections",
                path
            ))),
            many => Err(GraphError::InvalidRequest(format!(
                "{} is covered by {} writable projections",
                path,
                many.len()
            ))),
        }
    }

    /// Translate a source location back to the federated tree
    fn to_federated(projection: &Projection, location: &Location, near: &Path) -> Option<Path> {
        let source_path = location.path()?;
        let candidates = projection.paths_in_repository(source_path);
        candidates
            .iter()
            .find(|p| near.is_at_or_above(p) || p.is_at_or_above(near))
            .or_else(|| candidates.iter().next())
            .cloned()
    }

    /// Run a change on the single writable projection covering `path`
    fn forward_change(
        &mut self,
        path: &Path,
        build: impl FnOnce(&Projection, Path) -> Request,
    ) -> Result<(Projection, Request), GraphError> {
        let (projection, source_path) = self.writable_projection(path)?;
        let mut request = build(&projection, source_path);
        self.execute_on(projection.source_name(), &mut request)?;
        if let Some(err) = request.error() {
            return Err(err.clone());
        }
        Ok((projection, request))
    }
}

/// Report a miss on an ancestor as a miss on the requested location
fn relocate(err: GraphError, location: &Location) -> GraphError {
    match err {
        GraphError::PathNotFound {
            lowest_existing, ..
        } => GraphError::path_not_found(location.clone(), lowest_existing),
        other => other,
    }
}

fn close_quietly(source: &str, connection: &mut Box<dyn Connection>) {
    if let Err(err) = connection.close() {
        warn!(source = source, error = %err, "Failed to close connection");
    }
}

impl RequestProcessor for FederatingExecutor {
    fn context(&self) -> &ProcessorContext {
        &self.context
    }

    fn context_mut(&mut self) -> &mut ProcessorContext {
        &mut self.context
    }

    fn close(&mut self) {
        for (source, mut connection) in self.connections.drain() {
            close_quietly(&source, &mut connection);
        }
    }

    fn read_node(&mut self, request: &mut ReadNodeRequest) {
        let (workspace, at) = (request.workspace().to_string(), request.at().clone());
        if let Some(node) = self.node_for(request, &workspace, &at) {
            request.complete(node.to_node_data());
        }
    }

    fn read_all_properties(&mut self, request: &mut ReadAllPropertiesRequest) {
        let (workspace, at) = (request.workspace().to_string(), request.at().clone());
        if let Some(node) = self.node_for(request, &workspace, &at) {
            request.complete(PropertiesData {
                location: node.location(),
                properties: node.properties().clone(),
            });
        }
    }

    fn read_all_children(&mut self, request: &mut ReadAllChildrenRequest) {
        let (workspace, of) = (request.workspace().to_string(), request.of().clone());
        if let Some(node) = self.node_for(request, &workspace, &of) {
            request.complete(ChildrenData {
                location: node.location(),
                children: node.children().to_vec(),
            });
        }
    }

    fn create_node(&mut self, request: &mut CreateNodeRequest) {
        if let Err(err) = self.check_workspace(request.workspace()) {
            return request.fail(err);
        }
        let under = request.under().clone();
        let Some(parent) = self.path_of(request, &under) else {
            return;
        };
        let name = request.name().clone();
        let properties = request.properties().to_vec();
        let conflict = request.conflict();
        let forwarded = self.forward_change(&parent, |projection, source_parent| {
            CreateNodeRequest::new(source_parent, name.clone())
                .with_properties(properties)
                .on_conflict(conflict)
                .in_workspace(projection.workspace())
                .into()
        });
        match forwarded {
            Ok((projection, Request::CreateNode(created))) => {
                let path = created
                    .result()
                    .and_then(|l| Self::to_federated(&projection, l, &parent))
                    .unwrap_or_else(|| parent.child(name));
                self.invalidate(&parent);
                request.complete(Location::from_path(path));
            }
            Ok(_) => request.fail(GraphError::InvalidRequest(
                "create changed kind in flight".to_string(),
            )),
            Err(err) => request.fail(err),
        }
    }

    fn update_properties(&mut self, request: &mut UpdatePropertiesRequest) {
        if let Err(err) = self.check_workspace(request.workspace()) {
            return request.fail(err);
        }
        let on = request.on().clone();
        let Some(path) = self.path_of(request, &on) else {
            return;
        };
        let changes = request.properties().clone();
        let forwarded = self.forward_change(&path, |projection, source_path| {
            let mut update =
                UpdatePropertiesRequest::new(source_path).in_workspace(projection.workspace());
            for (name, change) in changes {
                update = match change {
                    Some(property) => update.set(property),
                    None => update.remove(name),
                };
            }
            update.into()
        });
        match forwarded {
            Ok((_, Request::UpdateProperties(updated))) => {
                let created = updated
                    .result()
                    .map(|d| d.created.clone())
                    .unwrap_or_default();
                self.invalidate(&path);
                request.complete(UpdatedProperties {
                    location: Location::from_path(path),
                    created,
                });
            }
            Ok(_) => request.fail(GraphError::InvalidRequest(
                "update changed kind in flight".to_string(),
            )),
            Err(err) => request.fail(err),
        }
    }

    fn delete_branch(&mut self, request: &mut DeleteBranchRequest) {
        if let Err(err) = self.check_workspace(request.workspace()) {
            return request.fail(err);
        }
        let at = request.at().clone();
        let Some(path) = self.path_of(request, &at) else {
            return;
        };
        if path.is_root() {
            return request.fail(GraphError::InvalidRequest(
                "the federated root cannot be deleted".to_string(),
            ));
        }
        let forwarded = self.forward_change(&path, |projection, source_path| {
            DeleteBranchRequest::new(source_path)
                .in_workspace(projection.workspace())
                .into()
        });
        match forwarded {
            Ok(_) => {
                self.evict(&path);
                if let Some(parent) = path.parent() {
                    self.invalidate(&parent);
                }
                request.complete(Location::from_path(path));
            }
            Err(err) => request.fail(err),
        }
    }
}

impl Drop for FederatingExecutor {
    fn drop(&mut self) {
        RequestProcessor::close(self);
    }
}
