//! In-memory repository source
//!
//! Workspaces of nodes keyed by `NodeId`, created on first use. Used as a test
//! source and as the federation's cache source.

use crate::connector::{Connection, RepositorySource};
use crate::error::GraphError;
use crate::execution::ExecutionContext;
use crate::graph::{
    lexicon, CachePolicy, Location, Name, NodeId, Path, Properties, Property, Segment, Value,
};
use crate::observe::Observer;
use crate::processor::{ProcessorContext, RequestProcessor};
use crate::request::{
    ChildrenData, CopyBranchRequest, CopyData, CreateNodeRequest, DeleteBranchRequest,
    MoveBranchRequest, MoveData, NodeConflictBehavior, Operation, PropertiesData,
    ReadAllChildrenRequest, ReadAllPropertiesRequest, Request, UpdatePropertiesRequest,
    UpdatedProperties,
};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
struct MemNode {
    name: Name,
    parent: Option<NodeId>,
    properties: Properties,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
struct Workspace {
    root: NodeId,
    nodes: HashMap<NodeId, MemNode>,
}

impl Workspace {
    fn new() -> Self {
        let root = NodeId::new();
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            MemNode {
                name: Name::from(""),
                parent: None,
                properties: Properties::new(),
                children: Vec::new(),
            },
        );
        Workspace { root, nodes }
    }

    fn node(&self, id: NodeId) -> Result<&MemNode, GraphError> {
        self.nodes.get(&id).ok_or_else(|| {
            GraphError::path_not_found(Location::from_id(id), None)
        })
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut MemNode, GraphError> {
        self.nodes.get_mut(&id).ok_or_else(|| {
            GraphError::path_not_found(Location::from_id(id), None)
        })
    }

    fn segment_of(&self, id: NodeId) -> Option<Segment> {
        let node = self.nodes.get(&id)?;
        let parent = self.nodes.get(&node.parent?)?;
        let index = parent
            .children
            .iter()
            .take_while(|c| **c != id)
            .filter(|c| self.nodes.get(*c).map(|n| &n.name) == Some(&node.name))
            .count();
        Some(Segment::with_index(
            node.name.clone(),
            u32::try_from(index + 1).unwrap_or(u32::MAX),
        ))
    }

    fn path_of(&self, id: NodeId) -> Path {
        let mut segments = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            match self.segment_of(node_id) {
                Some(segment) => segments.push(segment),
                None => break,
            }
            current = self.nodes.get(&node_id).and_then(|n| n.parent);
        }
        segments
            .into_iter()
            .rev()
            .fold(Path::root(), |path, segment| path.child_segment(segment))
    }

    fn location_of(&self, id: NodeId) -> Location {
        Location::new(self.path_of(id), id)
    }

    fn child_at(&self, parent: NodeId, segment: &Segment) -> Option<NodeId> {
        let node = self.nodes.get(&parent)?;
        node.children
            .iter()
            .filter(|c| self.nodes.get(*c).map(|n| &n.name) == Some(segment.name()))
            .nth(segment.index().saturating_sub(1) as usize)
            .copied()
    }

    fn find(&self, location: &Location) -> Result<NodeId, GraphError> {
        if let Some(id) = location.id() {
            if self.nodes.contains_key(&id) {
                return Ok(id);
            }
            if !location.has_path() {
                return Err(GraphError::path_not_found(location.clone(), None));
            }
        }
        let Some(path) = location.path() else {
            return Err(GraphError::InvalidRequest(format!(
                "location {} has neither path nor identifier",
                location
            )));
        };
        if !path.is_absolute() {
            return Err(GraphError::InvalidPath(format!(
                "expected an absolute path but got '{}'",
                path
            )));
        }
        let mut current = self.root;
        let mut existing = Path::root();
        for segment in path.segments() {
            match self.child_at(current, segment) {
                Some(child) => {
                    current = child;
                    existing = existing.child_segment(segment.clone());
                }
                None => {
                    return Err(GraphError::path_not_found(
                        location.clone(),
                        Some(existing),
                    ))
                }
            }
        }
        Ok(current)
    }

    /// The node and all of its descendants, top first
    fn branch_ids(&self, id: NodeId) -> Vec<NodeId> {
        let mut ids = vec![id];
        let mut i = 0;
        while i < ids.len() {
            if let Some(node) = self.nodes.get(&ids[i]) {
                ids.extend(node.children.iter().copied());
            }
            i += 1;
        }
        ids
    }

    fn add_child(
        &mut self,
        parent: NodeId,
        name: Name,
        id: NodeId,
        properties: Properties,
    ) -> Result<NodeId, GraphError> {
        if self.nodes.contains_key(&id) {
            return Err(GraphError::NodeExists(self.location_of(id)));
        }
        self.node_mut(parent)?.children.push(id);
        self.nodes.insert(
            id,
            MemNode {
                name,
                parent: Some(parent),
                properties,
                children: Vec::new(),
            },
        );
        Ok(id)
    }

    fn remove_branch(&mut self, id: NodeId) {
        let parent = self.nodes.get(&id).and_then(|n| n.parent);
        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.retain(|c| *c != id);
        }
        for node_id in self.branch_ids(id) {
            self.nodes.remove(&node_id);
        }
    }

    /// First node outside the branch whose reference values point into it
    fn referrer_into(&self, branch: &HashSet<NodeId>) -> Option<(NodeId, NodeId)> {
        self.nodes
            .iter()
            .filter(|(id, _)| !branch.contains(*id))
            .find_map(|(id, node)| {
                node.properties
                    .values()
                    .flat_map(|p| p.values())
                    .filter_map(Value::as_reference)
                    .find(|target| branch.contains(target))
                    .map(|target| (*id, target))
            })
    }
}

/// Identifier requested through the identity property, if any
fn requested_id(properties: &[Property]) -> Result<Option<NodeId>, GraphError> {
    let Some(identity) = properties
        .iter()
        .find(|p| p.name().as_str() == lexicon::UUID)
    else {
        return Ok(None);
    };
    match identity.first_value() {
        Some(Value::Reference(id)) => Ok(Some(*id)),
        Some(Value::String(text)) => NodeId::parse(text).map(Some).ok_or_else(|| {
            GraphError::InvalidRequest(format!("'{}' is not a valid node identifier", text))
        }),
        Some(other) => Err(GraphError::InvalidRequest(format!(
            "'{}' is not a valid node identifier",
            other
        ))),
        None => Ok(None),
    }
}

fn stored_properties(properties: &[Property]) -> Properties {
    properties
        .iter()
        .filter(|p| p.name().as_str() != lexicon::UUID)
        .map(|p| (p.name().clone(), p.clone()))
        .collect()
}

#[derive(Default)]
struct Store {
    workspaces: HashMap<String, Workspace>,
}

impl Store {
    fn workspace(&mut self, name: &str) -> &mut Workspace {
        self.workspaces
            .entry(name.to_string())
            .or_insert_with(Workspace::new)
    }
}

struct Shared {
    name: String,
    retry_limit: u32,
    default_cache_policy: Option<CachePolicy>,
    store: Mutex<Store>,
    available: AtomicBool,
    observer: RwLock<Option<Arc<dyn Observer>>>,
    connect_attempts: AtomicUsize,
    open_connections: AtomicUsize,
}

/// In-memory repository source
///
/// Clones share the same content.
#[derive(Clone)]
pub struct InMemorySource {
    shared: Arc<Shared>,
}

impl InMemorySource {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_options(name, 0, None)
    }

    pub fn with_options(
        name: impl Into<String>,
        retry_limit: u32,
        default_cache_policy: Option<CachePolicy>,
    ) -> Self {
        InMemorySource {
            shared: Arc::new(Shared {
                name: name.into(),
                retry_limit,
                default_cache_policy,
                store: Mutex::new(Store::default()),
                available: AtomicBool::new(true),
                observer: RwLock::new(None),
                connect_attempts: AtomicUsize::new(0),
                open_connections: AtomicUsize::new(0),
            }),
        }
    }

    /// Make the source refuse (or accept again) connections and requests
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.shared.available.load(Ordering::SeqCst)
    }

    /// Publish every committed batch of changes to `observer`
    pub fn set_observer(&self, observer: Option<Arc<dyn Observer>>) {
        *self.shared.observer.write() = observer;
    }

    pub fn connect_attempts(&self) -> usize {
        self.shared.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn open_connections(&self) -> usize {
        self.shared.open_connections.load(Ordering::SeqCst)
    }

    /// Create `path` and any missing ancestors, then set `properties` on it
    pub fn create_path(
        &self,
        workspace: &str,
        path: &Path,
        properties: Vec<Property>,
    ) -> Result<Location, GraphError> {
        let mut store = self.shared.store.lock();
        let ws = store.workspace(workspace);
        let mut current = ws.root;
        for segment in path.segments() {
            current = match ws.child_at(current, segment) {
                Some(child) => child,
                None => ws.add_child(current, segment.name().clone(), NodeId::new(), Properties::new())?,
            };
        }
        let node = ws.node_mut(current)?;
        node.properties.extend(stored_properties(&properties));
        Ok(ws.location_of(current))
    }

    /// Number of nodes in a workspace, the root included
    pub fn node_count(&self, workspace: &str) -> usize {
        self.shared
            .store
            .lock()
            .workspaces
            .get(workspace)
            .map(|ws| ws.nodes.len())
            .unwrap_or(0)
    }
}

impl RepositorySource for InMemorySource {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn connect(&self) -> Result<Box<dyn Connection>, GraphError> {
        self.shared.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if !self.is_available() {
            return Err(GraphError::SourceUnavailable(self.shared.name.clone()));
        }
        self.shared.open_connections.fetch_add(1, Ordering::SeqCst);
        trace!(source = %self.shared.name, "Opened in-memory connection");
        Ok(Box::new(InMemoryConnection {
            shared: Arc::clone(&self.shared),
            closed: false,
        }))
    }

    fn retry_limit(&self) -> u32 {
        self.shared.retry_limit
    }
}

struct InMemoryConnection {
    shared: Arc<Shared>,
    closed: bool,
}

impl Connection for InMemoryConnection {
    fn source_name(&self) -> &str {
        &self.shared.name
    }

    fn execute(
        &mut self,
        context: &ExecutionContext,
        request: &mut Request,
    ) -> Result<(), GraphError> {
        if self.closed {
            return Err(GraphError::InvalidRequest(format!(
                "connection to '{}' is closed",
                self.shared.name
            )));
        }
        if !self.shared.available.load(Ordering::SeqCst) {
            return Err(GraphError::SourceUnavailable(self.shared.name.clone()));
        }

        let observer = self.shared.observer.read().clone();
        let changes = {
            let mut store = self.shared.store.lock();
            let mut processor_context =
                ProcessorContext::new(self.shared.name.clone(), context.clone(), Utc::now())
                    .with_default_cache_policy(self.shared.default_cache_policy);
            if observer.is_some() {
                processor_context = processor_context.recording_changes();
            }
            let mut processor = MemoryProcessor {
                context: processor_context,
                store: &mut *store,
            };
            processor.process(request);
            processor.context.take_changes()
        };
        if let (Some(observer), Some(changes)) = (observer, changes) {
            observer.notify(&changes);
        }
        Ok(())
    }

    fn default_cache_policy(&self) -> Option<CachePolicy> {
        self.shared.default_cache_policy
    }

    fn ping(&mut self, _timeout: Duration) -> bool {
        !self.closed && self.shared.available.load(Ordering::SeqCst)
    }

    fn close(&mut self) -> Result<(), GraphError> {
        if !self.closed {
            self.closed = true;
            self.shared.open_connections.fetch_sub(1, Ordering::SeqCst);
            trace!(source = %self.shared.name, "Closed in-memory connection");
        }
        Ok(())
    }
}

struct MemoryProcessor<'a> {
    context: ProcessorContext,
    store: &'a mut Store,
}

impl MemoryProcessor<'_> {
    fn resolve<R: Operation>(
        &mut self,
        request: &mut R,
        workspace: &str,
        location: &Location,
    ) -> Option<NodeId> {
        match self.store.workspace(workspace).find(location) {
            Ok(id) => Some(id),
            Err(err) => {
                request.fail(err);
                None
            }
        }
    }
}

impl RequestProcessor for MemoryProcessor<'_> {
    fn context(&self) -> &ProcessorContext {
        &self.context
    }

    fn context_mut(&mut self) -> &mut ProcessorContext {
        &mut self.context
    }

    fn read_all_properties(&mut self, request: &mut ReadAllPropertiesRequest) {
        let at = request.at().clone();
        let workspace = request.workspace().to_string();
        let Some(id) = self.resolve(request, &workspace, &at) else {
            return;
        };
        let ws = self.store.workspace(&workspace);
        let mut properties = match ws.node(id) {
            Ok(node) => node.properties.clone(),
            Err(err) => return request.fail(err),
        };
        properties.insert(
            Name::from(lexicon::UUID),
            Property::single(lexicon::UUID, Value::Reference(id)),
        );
        request.complete(PropertiesData {
            location: ws.location_of(id),
            properties,
        });
    }

    fn read_all_children(&mut self, request: &mut ReadAllChildrenRequest) {
        let of = request.of().clone();
        let workspace = request.workspace().to_string();
        let Some(id) = self.resolve(request, &workspace, &of) else {
            return;
        };
        let ws = self.store.workspace(&workspace);
        let children = match ws.node(id) {
            Ok(node) => node.children.clone(),
            Err(err) => return request.fail(err),
        };
        request.complete(ChildrenData {
            location: ws.location_of(id),
            children: children.into_iter().map(|c| ws.location_of(c)).collect(),
        });
    }

    fn create_node(&mut self, request: &mut CreateNodeRequest) {
        let under = request.under().clone();
        let workspace = request.workspace().to_string();
        let Some(parent) = self.resolve(request, &workspace, &under) else {
            return;
        };
        let requested = match requested_id(request.properties()) {
            Ok(id) => id,
            Err(err) => return request.fail(err),
        };
        let properties = stored_properties(request.properties());
        let name = request.name().clone();
        let ws = self.store.workspace(&workspace);
        let existing = ws.child_at(parent, &Segment::new(name.clone()));

        let id = match (existing, request.conflict()) {
            (Some(existing), NodeConflictBehavior::DoNotReplace) => existing,
            (Some(existing), NodeConflictBehavior::Update) => {
                match ws.node_mut(existing) {
                    Ok(node) => node.properties.extend(properties),
                    Err(err) => return request.fail(err),
                }
                existing
            }
            (Some(existing), NodeConflictBehavior::Replace) => {
                let reuse = requested.unwrap_or(existing);
                ws.remove_branch(existing);
                match ws.add_child(parent, name, reuse, properties) {
                    Ok(id) => id,
                    Err(err) => return request.fail(err),
                }
            }
            _ => match ws.add_child(parent, name, requested.unwrap_or_default(), properties) {
                Ok(id) => id,
                Err(err) => return request.fail(err),
            },
        };
        request.complete(ws.location_of(id));
    }

    fn update_properties(&mut self, request: &mut UpdatePropertiesRequest) {
        let on = request.on().clone();
        let workspace = request.workspace().to_string();
        let Some(id) = self.resolve(request, &workspace, &on) else {
            return;
        };
        let ws = self.store.workspace(&workspace);
        let node = match ws.node_mut(id) {
            Ok(node) => node,
            Err(err) => return request.fail(err),
        };
        let mut created = BTreeSet::new();
        for (name, update) in request.properties() {
            if name.as_str() == lexicon::UUID {
                continue;
            }
            match update {
                Some(property) => {
                    if node.properties.insert(name.clone(), property.clone()).is_none() {
                        created.insert(name.clone());
                    }
                }
                None => {
                    node.properties.remove(name);
                }
            }
        }
        request.complete(UpdatedProperties {
            location: ws.location_of(id),
            created,
        });
    }

    fn delete_branch(&mut self, request: &mut DeleteBranchRequest) {
        let at = request.at().clone();
        let workspace = request.workspace().to_string();
        let Some(id) = self.resolve(request, &workspace, &at) else {
            return;
        };
        let ws = self.store.workspace(&workspace);
        if id == ws.root {
            return request.fail(GraphError::InvalidRequest(
                "the root node cannot be deleted".to_string(),
            ));
        }
        let branch: HashSet<NodeId> = ws.branch_ids(id).into_iter().collect();
        if let Some((referrer, target)) = ws.referrer_into(&branch) {
            return request.fail(GraphError::ReferentialIntegrity(format!(
                "{} is referenced from {} outside the deleted branch",
                ws.location_of(target),
                ws.location_of(referrer)
            )));
        }
        let location = ws.location_of(id);
        ws.remove_branch(id);
        debug!(source = %self.context.source_name(), location = %location, "Deleted branch");
        request.complete(location);
    }

    fn copy_branch(&mut self, request: &mut CopyBranchRequest) {
        let from = request.from().clone();
        let into = request.destination().clone();
        let from_workspace = request.source_workspace().to_string();
        let into_workspace = request.into_workspace().to_string();
        let Some(original) = self.resolve(request, &from_workspace, &from) else {
            return;
        };
        let Some(parent) = self.resolve(request, &into_workspace, &into) else {
            return;
        };

        let source = self.store.workspace(&from_workspace).clone();
        let original_location = source.location_of(original);
        let Some(top_name) = request
            .desired_name()
            .cloned()
            .or_else(|| source.nodes.get(&original).map(|n| n.name.clone()))
        else {
            return request.fail(GraphError::path_not_found(from, None));
        };

        let target = self.store.workspace(&into_workspace);
        let mut pending = vec![(original, parent, Some(top_name))];
        let mut copy_top = None;
        while let Some((source_id, new_parent, rename)) = pending.pop() {
            let Some(node) = source.nodes.get(&source_id) else {
                continue;
            };
            let name = rename.unwrap_or_else(|| node.name.clone());
            let copied = match target.add_child(new_parent, name, NodeId::new(), node.properties.clone()) {
                Ok(id) => id,
                Err(err) => return request.fail(err),
            };
            copy_top.get_or_insert(copied);
            pending.extend(node.children.iter().rev().map(|c| (*c, copied, None)));
        }
        let Some(copy_top) = copy_top else {
            return request.fail(GraphError::path_not_found(from, None));
        };
        request.complete(CopyData {
            original: original_location,
            copy: target.location_of(copy_top),
        });
    }

    fn move_branch(&mut self, request: &mut MoveBranchRequest) {
        let from = request.from().clone();
        let into = request.destination().clone();
        let workspace = request.workspace().to_string();
        let Some(id) = self.resolve(request, &workspace, &from) else {
            return;
        };
        let Some(new_parent) = self.resolve(request, &workspace, &into) else {
            return;
        };
        let ws = self.store.workspace(&workspace);
        if ws.branch_ids(id).contains(&new_parent) {
            return request.fail(GraphError::InvalidRequest(format!(
                "cannot move {} into its own branch",
                ws.location_of(id)
            )));
        }
        let before = ws.location_of(id);
        let old_parent = ws.nodes.get(&id).and_then(|n| n.parent);
        if let Some(old) = old_parent.and_then(|p| ws.nodes.get_mut(&p)) {
            old.children.retain(|c| *c != id);
        }
        if let Some(parent) = ws.nodes.get_mut(&new_parent) {
            parent.children.push(id);
        }
        if let Some(node) = ws.nodes.get_mut(&id) {
            node.parent = Some(new_parent);
            if let Some(name) = request.desired_name() {
                node.name = name.clone();
            }
        }
        request.complete(MoveData {
            before,
            after: ws.location_of(id),
        });
    }
}
