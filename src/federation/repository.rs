//! Federated repository
//!
//! Owns everything that outlives a unit of work: the validated
//! configuration, one connection pool per source, the connection factory
//! that retries across them, and the observation bus. Each unit of work gets
//! a fresh executor.

use crate::config::GraftConfig;
use crate::connector::{
    ConnectionPool, PoolMetrics, PooledConnectionFactory, RepositorySource,
};
use crate::error::{ConfigError, GraphError};
use crate::execution::ExecutionContext;
use crate::federation::{FederatedNode, FederatingExecutor, Federation, SingleProjectionExecutor};
use crate::graph::Location;
use crate::observe::{ObservationBus, Observer};
use crate::processor::{LoggingProcessor, RequestProcessor};
use crate::request::{CancelFlag, Request};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub struct FederatedRepository {
    config: GraftConfig,
    federation: Arc<Federation>,
    factory: Arc<PooledConnectionFactory>,
    bus: Arc<ObservationBus>,
}

impl FederatedRepository {
    /// Build a repository over `sources`
    ///
    /// Fails if the configuration does not validate or names a source that
    /// is not supplied.
    pub fn new(
        config: GraftConfig,
        sources: Vec<Arc<dyn RepositorySource>>,
    ) -> Result<Self, ConfigError> {
        config.validate().map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            ConfigError::Invalid(format!(
                "Configuration validation failed:\n{}",
                messages.join("\n")
            ))
        })?;
        let federation = Federation::from_config(&config.federation)?;

        let by_name: HashMap<String, Arc<dyn RepositorySource>> = sources
            .into_iter()
            .map(|source| (source.name().to_string(), source))
            .collect();
        let mut factory = PooledConnectionFactory::new();
        for name in config.federation.referenced_sources() {
            let source = by_name.get(name).ok_or_else(|| {
                ConfigError::MissingField(format!("repository source '{}'", name))
            })?;
            let options = match config.sources.get(name) {
                Some(source_config) => source_config.pool_options(),
                None => Default::default(),
            };
            factory.add_pool(ConnectionPool::new(Arc::clone(source), options)?);
        }

        info!(
            federation = %federation.name(),
            projections = federation.projections().len(),
            strategy = federation.strategy().name(),
            "Federated repository ready"
        );
        Ok(FederatedRepository {
            config,
            federation: Arc::new(federation),
            factory: Arc::new(factory),
            bus: Arc::new(ObservationBus::new()),
        })
    }

    /// Use a different base delay between connection retries
    pub fn with_retry_backoff(mut self, base: Duration) -> Self {
        let factory = (*self.factory).clone().with_backoff_base(base);
        self.factory = Arc::new(factory);
        self
    }

    pub fn config(&self) -> &GraftConfig {
        &self.config
    }

    pub fn federation(&self) -> &Arc<Federation> {
        &self.federation
    }

    pub fn bus(&self) -> &Arc<ObservationBus> {
        &self.bus
    }

    pub fn register_observer(&self, observer: Arc<dyn Observer>) -> bool {
        self.bus.register(observer)
    }

    pub fn unregister_observer(&self, observer: &Arc<dyn Observer>) -> bool {
        self.bus.unregister(observer)
    }

    pub fn pool(&self, source_name: &str) -> Option<&ConnectionPool> {
        self.factory.pool(source_name)
    }

    /// Metrics of every pool, ordered by source name
    pub fn pool_metrics(&self) -> Vec<PoolMetrics> {
        let mut metrics: Vec<PoolMetrics> = self.factory.pools().map(|p| p.metrics()).collect();
        metrics.sort_by(|a, b| a.source_name.cmp(&b.source_name));
        metrics
    }

    /// Fresh executor for one unit of work, recording the changes it makes
    pub fn executor(
        &self,
        execution: ExecutionContext,
    ) -> Result<Box<dyn RequestProcessor>, GraphError> {
        let factory = Arc::clone(&self.factory) as Arc<dyn crate::connector::ConnectionFactory>;
        if self.federation.is_single_projection() {
            let executor =
                SingleProjectionExecutor::new(Arc::clone(&self.federation), factory, execution)?
                    .recording_changes();
            Ok(Box::new(LoggingProcessor::new(executor)))
        } else {
            let executor =
                FederatingExecutor::new(Arc::clone(&self.federation), factory, execution)?
                    .recording_changes();
            Ok(Box::new(LoggingProcessor::new(executor)))
        }
    }

    /// Process one request as its own unit of work
    ///
    /// The executor is closed before the recorded changes are published, so
    /// observers see a batch only once every connection is released.
    pub fn execute(
        &self,
        execution: ExecutionContext,
        request: &mut Request,
    ) -> Result<(), GraphError> {
        let mut executor = self.executor(execution)?;
        executor.process(request);
        executor.close();
        if let Some(changes) = executor.context_mut().take_changes() {
            debug!(
                federation = %self.federation.name(),
                count = changes.len(),
                "Publishing federated changes"
            );
            self.bus.notify(&changes);
        }
        Ok(())
    }

    /// Merged view of one node, with its merge provenance and conflicts
    ///
    /// Single-projection federations do not merge, so they have no such view.
    pub fn get_node(
        &self,
        execution: ExecutionContext,
        location: &Location,
    ) -> Result<FederatedNode, GraphError> {
        if self.federation.is_single_projection() {
            return Err(GraphError::UnsupportedRequest(format!(
                "federation '{}' does not merge",
                self.federation.name()
            )));
        }
        let factory = Arc::clone(&self.factory) as Arc<dyn crate::connector::ConnectionFactory>;
        let mut executor = FederatingExecutor::new(Arc::clone(&self.federation), factory, execution)?;
        let node = executor.get_node(location, &CancelFlag::new());
        executor.close();
        node
    }

    /// Stop handing out connections and stop delivering changes
    pub fn shutdown(&self) {
        info!(federation = %self.federation.name(), "Shutting down federated repository");
        self.factory.shutdown_all();
        self.bus.shutdown();
    }

    /// Wait until every pool has closed its connections
    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.factory
            .pools()
            .all(|pool| pool.await_termination(timeout))
    }
}
