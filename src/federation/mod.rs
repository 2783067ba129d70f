//! Federation
//!
//! A federation presents one workspace whose branches are served by several
//! sources. `Federation` holds the immutable description: projections, the
//! cache source, policies and the merge strategy chosen for them. Executors
//! are built per unit of work on top of a shared `Federation`.

pub mod contribution;
pub mod executor;
pub mod merge;
pub mod node;
pub mod projection;
pub mod repository;
pub mod single;

pub use contribution::{Contribution, ContributionKind};
pub use executor::FederatingExecutor;
pub use merge::{
    select_strategy, MergeConflict, MergeConflictKind, MergeContext, MergePlan, MergeStrategy,
    OneContributionMergeStrategy, StandardMergeStrategy,
};
pub use node::FederatedNode;
pub use projection::{PathRule, Projection};
pub use repository::FederatedRepository;
pub use single::SingleProjectionExecutor;

use crate::config::{FanOutFailurePolicy, FederationConfig};
use crate::error::ConfigError;
use crate::graph::{lexicon, CachePolicy, Name};
use crate::request::DEFAULT_WORKSPACE;
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Where merged nodes are cached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheProjection {
    source_name: String,
    workspace: String,
}

impl CacheProjection {
    pub fn new(source_name: impl Into<String>, workspace: impl Into<String>) -> Self {
        CacheProjection {
            source_name: source_name.into(),
            workspace: workspace.into(),
        }
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn workspace(&self) -> &str {
        &self.workspace
    }
}

#[derive(Debug, Clone)]
pub struct Federation {
    name: String,
    workspace: String,
    projections: Vec<Projection>,
    cache: Option<CacheProjection>,
    default_cache_policy: Option<CachePolicy>,
    fan_out_failure: FanOutFailurePolicy,
    identity_property: Name,
    strategy: Arc<dyn MergeStrategy>,
    /// Held while an executor writes a merged node to the cache
    cache_writes: Arc<Mutex<()>>,
}

impl Federation {
    pub fn new(name: impl Into<String>, projections: Vec<Projection>) -> Result<Self, ConfigError> {
        let name = name.into();
        if projections.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "federation '{}' has no projections",
                name
            )));
        }
        let strategy = select_strategy(&projections);
        Ok(Federation {
            name,
            workspace: DEFAULT_WORKSPACE.to_string(),
            projections,
            cache: None,
            default_cache_policy: None,
            fan_out_failure: FanOutFailurePolicy::default(),
            identity_property: Name::from(lexicon::IDENTITY),
            strategy,
            cache_writes: Arc::new(Mutex::new(())),
        })
    }

    pub fn from_config(config: &FederationConfig) -> Result<Self, ConfigError> {
        let projections = config
            .projections
            .iter()
            .map(|p| Projection::parse(&p.source, &p.workspace, &p.rules, p.read_only))
            .collect::<Result<Vec<_>, _>>()?;
        let mut federation = Federation::new(&config.name, projections)?
            .in_workspace(&config.default_workspace)
            .with_default_cache_policy(config.default_cache_ttl_ms.map(CachePolicy::from_millis))
            .with_fan_out_failure(config.fan_out_failure)
            .with_identity_property(config.identity_property.as_str());
        if let Some(cache) = &config.cache {
            federation = federation.with_cache(CacheProjection::new(&cache.source, &cache.workspace));
        }
        federation.check()?;
        Ok(federation)
    }

    pub fn in_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = workspace.into();
        self
    }

    pub fn with_cache(mut self, cache: CacheProjection) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_default_cache_policy(mut self, policy: Option<CachePolicy>) -> Self {
        self.default_cache_policy = policy;
        self
    }

    pub fn with_fan_out_failure(mut self, policy: FanOutFailurePolicy) -> Self {
        self.fan_out_failure = policy;
        self
    }

    pub fn with_identity_property(mut self, name: impl Into<Name>) -> Self {
        self.identity_property = name.into();
        self
    }

    /// Fail unless the federation can be executed
    ///
    /// Anything beyond a single one-rule projection merges, and merged nodes
    /// need a cache.
    pub fn check(&self) -> Result<(), ConfigError> {
        if !self.is_single_projection() && self.cache.is_none() {
            return Err(ConfigError::MissingField(format!(
                "cache source of federation '{}'",
                self.name
            )));
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the one workspace the federation exposes
    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    pub fn projections(&self) -> &[Projection] {
        &self.projections
    }

    pub fn cache(&self) -> Option<&CacheProjection> {
        self.cache.as_ref()
    }

    pub fn default_cache_policy(&self) -> Option<CachePolicy> {
        self.default_cache_policy
    }

    pub fn fan_out_failure(&self) -> FanOutFailurePolicy {
        self.fan_out_failure
    }

    pub fn identity_property(&self) -> &Name {
        &self.identity_property
    }

    pub fn strategy(&self) -> &Arc<dyn MergeStrategy> {
        &self.strategy
    }

    /// Names of the sources the projections read from
    pub fn source_names(&self) -> BTreeSet<String> {
        self.projections
            .iter()
            .map(|p| p.source_name().to_string())
            .collect()
    }

    /// Serialize cache writes across every executor of this federation
    pub(crate) fn lock_cache_writes(&self) -> MutexGuard<'_, ()> {
        self.cache_writes.lock()
    }

    /// Whether merging needs the identity-property value of every child
    ///
    /// Node identifiers travel with child locations; any other identity
    /// property has to be read from the children themselves.
    pub fn reads_child_identities(&self) -> bool {
        self.identity_property.as_str() != lexicon::UUID
            && !matches!(self.projections.as_slice(), [only] if only.is_simple())
    }

    /// One projection with one rule: paths translate without merging
    pub fn is_single_projection(&self) -> bool {
        matches!(self.projections.as_slice(), [only] if only.rules().len() == 1)
    }
}
