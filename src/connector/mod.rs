//! Connector boundary
//!
//! A `RepositorySource` hands out `Connection`s; each connection executes
//! requests against one backing store. Errors that concern the request itself
//! land in the request's outcome. `execute` only returns `Err` when the
//! connection could not process anything at all.

pub mod memory;
pub mod pool;

pub use memory::InMemorySource;
pub use pool::{
    ConnectionPool, PoolMetrics, PoolOptions, PoolState, PooledConnection,
    PooledConnectionFactory,
};

use crate::error::GraphError;
use crate::execution::ExecutionContext;
use crate::graph::CachePolicy;
use crate::request::{CancelFlag, Request};
use std::time::Duration;

/// Live handle to one backing source
///
/// Whoever acquires a connection closes it exactly once.
pub trait Connection: Send {
    fn source_name(&self) -> &str;

    fn execute(
        &mut self,
        context: &ExecutionContext,
        request: &mut Request,
    ) -> Result<(), GraphError>;

    /// Policy applied to reads that do not carry their own
    fn default_cache_policy(&self) -> Option<CachePolicy> {
        None
    }

    /// True if the connection is still usable
    fn ping(&mut self, timeout: Duration) -> bool;

    fn close(&mut self) -> Result<(), GraphError>;
}

/// Backing source that can be connected to
pub trait RepositorySource: Send + Sync {
    fn name(&self) -> &str;

    fn connect(&self) -> Result<Box<dyn Connection>, GraphError>;

    /// How many times a caller may retry a failed connection attempt
    fn retry_limit(&self) -> u32 {
        0
    }
}

/// Source of connections by source name
pub trait ConnectionFactory: Send + Sync {
    /// Connection to `source_name`; a set `cancel` interrupts any wait
    fn create_connection(
        &self,
        source_name: &str,
        cancel: &CancelFlag,
    ) -> Result<Box<dyn Connection>, GraphError>;
}
