//! Shared test utilities for integration tests
//!
//! Builds federations over in-memory sources and offers terse helpers for
//! paths, seeding and one-shot requests.

use graft::config::{CacheConfig, GraftConfig, ProjectionConfig, SourceConfig};
use graft::connector::{InMemorySource, RepositorySource};
use graft::execution::ExecutionContext;
use graft::graph::{Location, Path, Property};
use graft::request::{
    NodeData, Operation, ReadAllChildrenRequest, ReadNodeRequest, Request,
};
use graft::{FederatedRepository, GraphError};
use std::sync::Arc;
use std::time::Duration;

pub const WORKSPACE: &str = "default";

pub fn path(text: &str) -> Path {
    Path::parse(text).unwrap()
}

pub fn loc(text: &str) -> Location {
    Location::from_path(path(text))
}

/// Create `at` (and its ancestors) in the default workspace of `source`
pub fn seed(source: &InMemorySource, at: &str, properties: &[(&str, &str)]) -> Location {
    let properties = properties
        .iter()
        .map(|(name, value)| Property::single(*name, *value))
        .collect();
    source.create_path(WORKSPACE, &path(at), properties).unwrap()
}

pub fn projection(source: &str, rules: &[&str]) -> ProjectionConfig {
    ProjectionConfig {
        source: source.to_string(),
        workspace: WORKSPACE.to_string(),
        rules: rules.iter().map(|r| r.to_string()).collect(),
        read_only: false,
    }
}

/// Federation of `projections` cached in the source named "cache"
pub fn federated_config(projections: Vec<ProjectionConfig>) -> GraftConfig {
    let mut config = GraftConfig::default();
    config.federation.name = "test".to_string();
    config.federation.projections = projections;
    config.federation.cache = Some(CacheConfig {
        source: "cache".to_string(),
        workspace: WORKSPACE.to_string(),
    });
    config
}

pub fn with_retry_limit(mut config: GraftConfig, source: &str, retry_limit: u32) -> GraftConfig {
    config.sources.insert(
        source.to_string(),
        SourceConfig {
            retry_limit,
            ..SourceConfig::default()
        },
    );
    config
}

/// Two writable sources `a` and `b` plus a cache
pub struct Federated {
    pub a: InMemorySource,
    pub b: InMemorySource,
    pub cache: InMemorySource,
    pub repository: FederatedRepository,
}

impl Federated {
    pub fn new(config: GraftConfig) -> Self {
        let a = InMemorySource::new("a");
        let b = InMemorySource::new("b");
        let cache = InMemorySource::new("cache");
        Self::with_sources(config, a, b, cache)
    }

    pub fn with_sources(
        config: GraftConfig,
        a: InMemorySource,
        b: InMemorySource,
        cache: InMemorySource,
    ) -> Self {
        let sources: Vec<Arc<dyn RepositorySource>> = vec![
            Arc::new(a.clone()),
            Arc::new(b.clone()),
            Arc::new(cache.clone()),
        ];
        let repository = FederatedRepository::new(config, sources)
            .unwrap()
            .with_retry_backoff(Duration::from_millis(1));
        Federated {
            a,
            b,
            cache,
            repository,
        }
    }
}

/// Run one request through the repository and hand it back
pub fn execute(repository: &FederatedRepository, request: impl Into<Request>) -> Request {
    let mut request = request.into();
    repository
        .execute(ExecutionContext::new().with_user("tester"), &mut request)
        .unwrap();
    request
}

pub fn read_node(repository: &FederatedRepository, at: &str) -> Result<NodeData, GraphError> {
    match execute(repository, ReadNodeRequest::new(loc(at))) {
        Request::ReadNode(read) => match read.error() {
            Some(err) => Err(err.clone()),
            None => Ok(read.result().cloned().unwrap()),
        },
        other => panic!("read changed kind: {:?}", other.kind()),
    }
}

/// Names of the children at `at`, in order
pub fn child_names(repository: &FederatedRepository, at: &str) -> Vec<String> {
    match execute(repository, ReadAllChildrenRequest::new(loc(at))) {
        Request::ReadAllChildren(read) => read
            .result()
            .unwrap_or_else(|| panic!("reading children of {} failed: {:?}", at, read.error()))
            .children
            .iter()
            .map(|c| c.path().unwrap().last_segment().unwrap().to_string())
            .collect(),
        other => panic!("read changed kind: {:?}", other.kind()),
    }
}

/// String value of `name` on a node
pub fn string_property(data: &NodeData, name: &str) -> Option<String> {
    data.properties
        .get(&graft::graph::Name::from(name))
        .and_then(|p| p.first_value())
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Read a path straight from a source, bypassing any federation
pub fn read_direct(source: &InMemorySource, at: &str) -> Result<NodeData, GraphError> {
    let mut request: Request = ReadNodeRequest::new(loc(at)).into();
    let mut connection = source.connect().unwrap();
    connection
        .execute(&ExecutionContext::new(), &mut request)
        .unwrap();
    connection.close().unwrap();
    match request {
        Request::ReadNode(read) => match read.error() {
            Some(err) => Err(err.clone()),
            None => Ok(read.result().cloned().unwrap()),
        },
        _ => unreachable!(),
    }
}
