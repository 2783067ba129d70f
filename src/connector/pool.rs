//! Connection pool
//!
//! One bounded pool per source. Connections are created lazily up to
//! `max_size`, kept idle up to `core_size`, and optionally validated with a
//! ping before reuse. The pool never retries a failed connection attempt;
//! `PooledConnectionFactory` does, up to each source's retry limit.
//!
//! # Lifecycle
//!
//! `Running` -> (`shutdown` | `shutdown_now`) -> terminating -> `Terminated`
//! once every outstanding connection has been returned or closed.
//! `shutdown` lets in-flight work finish; `shutdown_now` also closes idle
//! in-use connections and interrupts busy ones at their next request.

use crate::connector::{Connection, ConnectionFactory, RepositorySource};
use crate::error::{ConfigError, GraphError};
use crate::execution::ExecutionContext;
use crate::graph::CachePolicy;
use crate::request::{CancelFlag, Request};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Idle connections kept by default
pub const DEFAULT_CORE_SIZE: usize = 1;

/// Connections allowed to exist at once by default
pub const DEFAULT_MAX_SIZE: usize = 10;

/// Timeout of the validation ping by default
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(1);

/// Base backoff between connection retries (100ms, 200ms, 400ms, ...)
pub const RETRY_BACKOFF_BASE_MS: u64 = 100;

/// Upper bound on one retry backoff
pub const RETRY_BACKOFF_MAX_MS: u64 = 5_000;

/// Longest single wait before re-checking cancellation and deadlines
const WAIT_SLICE: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Running,
    /// `shutdown` called; outstanding connections may finish
    ShuttingDown,
    /// `shutdown_now` called; outstanding connections are interrupted
    Stopping,
    Terminated,
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PoolState::Running => "running",
            PoolState::ShuttingDown => "shutting down",
            PoolState::Stopping => "stopping",
            PoolState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    pub core_size: usize,
    pub max_size: usize,
    pub validate_before_use: bool,
    pub ping_timeout: Duration,
    /// How long `get_connection` waits for a free connection; `None` waits
    /// until one is returned or the pool shuts down
    pub acquire_timeout: Option<Duration>,
    /// Replaces the source's own retry limit when set
    pub retry_limit: Option<u32>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        PoolOptions {
            core_size: DEFAULT_CORE_SIZE,
            max_size: DEFAULT_MAX_SIZE,
            validate_before_use: false,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            acquire_timeout: None,
            retry_limit: None,
        }
    }
}

/// Point-in-time view of a pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolMetrics {
    pub source_name: String,
    pub state: PoolState,
    /// Connections that exist, idle or in use, including ones being opened
    pub pool_size: usize,
    pub available: usize,
    pub in_use: usize,
    pub total_created: u64,
    pub total_used: u64,
}

/// In-use connection shared with the pool so `shutdown_now` can reach it
struct Slot {
    id: u64,
    connection: Mutex<Option<Box<dyn Connection>>>,
    interrupted: AtomicBool,
}

struct PoolInner {
    state: PoolState,
    pool_size: usize,
    available: VecDeque<Box<dyn Connection>>,
    in_use: HashMap<u64, Arc<Slot>>,
    next_id: u64,
}

struct PoolShared {
    source: Arc<dyn RepositorySource>,
    name: String,
    options: PoolOptions,
    inner: Mutex<PoolInner>,
    returned: Condvar,
    terminated: Condvar,
    total_created: AtomicU64,
    total_used: AtomicU64,
}

/// Bounded pool of connections to one source
///
/// Safe to share across threads; clones refer to the same pool.
#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
}

fn close_quietly(source_name: &str, mut connection: Box<dyn Connection>) {
    if let Err(err) = connection.close() {
        warn!(source = %source_name, error = %err, "Failed to close pooled connection");
    }
}

impl ConnectionPool {
    pub fn new(
        source: Arc<dyn RepositorySource>,
        options: PoolOptions,
    ) -> Result<Self, ConfigError> {
        if options.max_size == 0 {
            return Err(ConfigError::Invalid(format!(
                "maximum pool size for '{}' must be at least 1",
                source.name()
            )));
        }
        if options.core_size > options.max_size {
            return Err(ConfigError::Invalid(format!(
                "core pool size {} for '{}' exceeds the maximum {}",
                options.core_size,
                source.name(),
                options.max_size
            )));
        }
        let name = source.name().to_string();
        Ok(ConnectionPool {
            shared: Arc::new(PoolShared {
                source,
                name,
                options,
                inner: Mutex::new(PoolInner {
                    state: PoolState::Running,
                    pool_size: 0,
                    available: VecDeque::new(),
                    in_use: HashMap::new(),
                    next_id: 0,
                }),
                returned: Condvar::new(),
                terminated: Condvar::new(),
                total_created: AtomicU64::new(0),
                total_used: AtomicU64::new(0),
            }),
        })
    }

    pub fn source_name(&self) -> &str {
        &self.shared.name
    }

    pub fn options(&self) -> &PoolOptions {
        &self.shared.options
    }

    /// Retry limit of the pooled source, for callers that retry
    pub fn retry_limit(&self) -> u32 {
        self.shared
            .options
            .retry_limit
            .unwrap_or_else(|| self.shared.source.retry_limit())
    }

    pub fn state(&self) -> PoolState {
        self.shared.inner.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == PoolState::Running
    }

    /// True once `shutdown` or `shutdown_now` has been called
    pub fn is_shutdown(&self) -> bool {
        self.state() != PoolState::Running
    }

    /// Shut down but with connections still outstanding
    pub fn is_terminating(&self) -> bool {
        matches!(
            self.state(),
            PoolState::ShuttingDown | PoolState::Stopping
        )
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == PoolState::Terminated
    }

    pub fn metrics(&self) -> PoolMetrics {
        let inner = self.shared.inner.lock();
        PoolMetrics {
            source_name: self.shared.name.clone(),
            state: inner.state,
            pool_size: inner.pool_size,
            available: inner.available.len(),
            in_use: inner.in_use.len(),
            total_created: self.shared.total_created.load(Ordering::Relaxed),
            total_used: self.shared.total_used.load(Ordering::Relaxed),
        }
    }

    /// Acquire a connection with the pool's configured timeout
    pub fn get_connection(&self) -> Result<PooledConnection, GraphError> {
        self.acquire(None, self.shared.options.acquire_timeout)
    }

    /// Acquire a connection, waiting at most `timeout` and giving up with
    /// `Interrupted` as soon as `cancel` is set
    pub fn acquire(
        &self,
        cancel: Option<&CancelFlag>,
        timeout: Option<Duration>,
    ) -> Result<PooledConnection, GraphError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let mut inner = self.shared.inner.lock();
            if inner.state != PoolState::Running {
                return Err(self.unavailable(inner.state));
            }

            if let Some(connection) = inner.available.pop_front() {
                drop(inner);
                match self.validate(connection) {
                    Some(connection) => return self.check_out(connection),
                    None => continue,
                }
            }

            if inner.pool_size < self.shared.options.max_size {
                // reserve the slot, then connect without holding the lock
                inner.pool_size += 1;
                drop(inner);
                return match self.shared.source.connect() {
                    Ok(connection) => {
                        self.shared.total_created.fetch_add(1, Ordering::Relaxed);
                        trace!(source = %self.shared.name, "Created pooled connection");
                        self.check_out(connection)
                    }
                    Err(err) => {
                        let mut inner = self.shared.inner.lock();
                        inner.pool_size -= 1;
                        self.try_terminate(&mut inner);
                        self.shared.returned.notify_one();
                        debug!(source = %self.shared.name, error = %err, "Failed to create connection");
                        Err(err)
                    }
                };
            }

            if cancel.is_some_and(CancelFlag::is_cancelled) {
                return Err(GraphError::Interrupted(format!(
                    "waiting for a connection to '{}'",
                    self.shared.name
                )));
            }
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(GraphError::SourceUnavailable(format!(
                            "timed out waiting for a connection to '{}'",
                            self.shared.name
                        )));
                    }
                    WAIT_SLICE.min(deadline - now)
                }
                None => WAIT_SLICE,
            };
            self.shared.returned.wait_for(&mut inner, slice);
        }
    }

    /// Open connections until `core_size` exist; returns how many were opened
    pub fn prestart_core_connections(&self) -> Result<usize, GraphError> {
        let mut started = 0;
        loop {
            {
                let mut inner = self.shared.inner.lock();
                if inner.state != PoolState::Running {
                    return Err(self.unavailable(inner.state));
                }
                if inner.pool_size >= self.shared.options.core_size {
                    return Ok(started);
                }
                inner.pool_size += 1;
            }
            match self.shared.source.connect() {
                Ok(connection) => {
                    self.shared.total_created.fetch_add(1, Ordering::Relaxed);
                    let mut inner = self.shared.inner.lock();
                    if inner.state == PoolState::Running {
                        inner.available.push_back(connection);
                        self.shared.returned.notify_one();
                        started += 1;
                    } else {
                        inner.pool_size -= 1;
                        self.try_terminate(&mut inner);
                        drop(inner);
                        close_quietly(&self.shared.name, connection);
                    }
                }
                Err(err) => {
                    let mut inner = self.shared.inner.lock();
                    inner.pool_size -= 1;
                    self.try_terminate(&mut inner);
                    return Err(err);
                }
            }
        }
    }

    /// Stop admitting acquisitions; outstanding connections may finish
    pub fn shutdown(&self) {
        let idle = {
            let mut inner = self.shared.inner.lock();
            if inner.state != PoolState::Running {
                return;
            }
            inner.state = PoolState::ShuttingDown;
            let idle: Vec<_> = inner.available.drain(..).collect();
            inner.pool_size -= idle.len();
            self.try_terminate(&mut inner);
            self.shared.returned.notify_all();
            idle
        };
        debug!(source = %self.shared.name, "Connection pool shutting down");
        for connection in idle {
            close_quietly(&self.shared.name, connection);
        }
    }

    /// Stop admitting acquisitions and interrupt outstanding connections
    ///
    /// In-use connections that are between requests are closed right away;
    /// busy ones fail their next request and are closed when returned.
    pub fn shutdown_now(&self) {
        let closing = {
            let mut inner = self.shared.inner.lock();
            if matches!(inner.state, PoolState::Stopping | PoolState::Terminated) {
                return;
            }
            inner.state = PoolState::Stopping;
            let mut closing: Vec<_> = inner.available.drain(..).collect();
            for slot in inner.in_use.values() {
                slot.interrupted.store(true, Ordering::SeqCst);
                if let Some(mut guard) = slot.connection.try_lock() {
                    if let Some(connection) = guard.take() {
                        closing.push(connection);
                    }
                }
            }
            inner.pool_size -= closing.len();
            self.try_terminate(&mut inner);
            self.shared.returned.notify_all();
            closing
        };
        debug!(
            source = %self.shared.name,
            closing = closing.len(),
            "Connection pool stopping"
        );
        for connection in closing {
            close_quietly(&self.shared.name, connection);
        }
    }

    /// Block until terminated or `timeout` elapses; true if terminated
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.shared.inner.lock();
        while inner.state != PoolState::Terminated {
            if self
                .shared
                .terminated
                .wait_until(&mut inner, deadline)
                .timed_out()
            {
                return inner.state == PoolState::Terminated;
            }
        }
        true
    }

    fn unavailable(&self, state: PoolState) -> GraphError {
        GraphError::SourceUnavailable(format!(
            "connection pool for '{}' is {}",
            self.shared.name, state
        ))
    }

    fn validate(&self, mut connection: Box<dyn Connection>) -> Option<Box<dyn Connection>> {
        if !self.shared.options.validate_before_use
            || connection.ping(self.shared.options.ping_timeout)
        {
            return Some(connection);
        }
        debug!(source = %self.shared.name, "Discarding connection that failed validation");
        {
            let mut inner = self.shared.inner.lock();
            inner.pool_size -= 1;
            self.try_terminate(&mut inner);
        }
        close_quietly(&self.shared.name, connection);
        None
    }

    fn check_out(&self, connection: Box<dyn Connection>) -> Result<PooledConnection, GraphError> {
        let mut inner = self.shared.inner.lock();
        if inner.state != PoolState::Running {
            // shut down while the connection was being opened or validated
            let state = inner.state;
            inner.pool_size -= 1;
            self.try_terminate(&mut inner);
            drop(inner);
            close_quietly(&self.shared.name, connection);
            return Err(self.unavailable(state));
        }
        inner.next_id += 1;
        let slot = Arc::new(Slot {
            id: inner.next_id,
            connection: Mutex::new(Some(connection)),
            interrupted: AtomicBool::new(false),
        });
        inner.in_use.insert(slot.id, Arc::clone(&slot));
        self.shared.total_used.fetch_add(1, Ordering::Relaxed);
        Ok(PooledConnection {
            pool: self.clone(),
            slot: Some(slot),
        })
    }

    fn release(&self, slot: Arc<Slot>) {
        let connection = slot.connection.lock().take();
        let mut inner = self.shared.inner.lock();
        inner.in_use.remove(&slot.id);
        let Some(connection) = connection else {
            // closed and accounted for by shutdown_now
            self.try_terminate(&mut inner);
            return;
        };
        // connections beyond the core size are closed rather than kept idle
        let keep = inner.state == PoolState::Running
            && !slot.interrupted.load(Ordering::SeqCst)
            && inner.pool_size <= self.shared.options.core_size;
        if keep {
            inner.available.push_back(connection);
            self.shared.returned.notify_one();
            return;
        }
        inner.pool_size -= 1;
        self.try_terminate(&mut inner);
        self.shared.returned.notify_one();
        drop(inner);
        close_quietly(&self.shared.name, connection);
    }

    fn try_terminate(&self, inner: &mut MutexGuard<'_, PoolInner>) {
        if matches!(inner.state, PoolState::ShuttingDown | PoolState::Stopping)
            && inner.pool_size == 0
        {
            inner.state = PoolState::Terminated;
            self.shared.terminated.notify_all();
            debug!(source = %self.shared.name, "Connection pool terminated");
        }
    }
}

/// Connection checked out of a pool
///
/// Closing returns it to the pool (or closes it when the pool is shutting
/// down). Dropping an unclosed handle does the same.
pub struct PooledConnection {
    pool: ConnectionPool,
    slot: Option<Arc<Slot>>,
}

impl PooledConnection {
    fn slot(&self) -> Result<&Arc<Slot>, GraphError> {
        self.slot.as_ref().ok_or_else(|| {
            GraphError::InvalidRequest(format!(
                "connection to '{}' was already returned to its pool",
                self.pool.source_name()
            ))
        })
    }

    fn interrupted(&self) -> GraphError {
        GraphError::Interrupted(format!(
            "using a connection to '{}' after the pool was stopped",
            self.pool.source_name()
        ))
    }
}

impl Connection for PooledConnection {
    fn source_name(&self) -> &str {
        self.pool.source_name()
    }

    fn execute(
        &mut self,
        context: &ExecutionContext,
        request: &mut Request,
    ) -> Result<(), GraphError> {
        let slot = self.slot()?;
        if slot.interrupted.load(Ordering::SeqCst) {
            return Err(self.interrupted());
        }
        let mut guard = slot.connection.lock();
        match guard.as_mut() {
            Some(connection) => connection.execute(context, request),
            None => Err(self.interrupted()),
        }
    }

    fn default_cache_policy(&self) -> Option<CachePolicy> {
        let slot = self.slot.as_ref()?;
        let guard = slot.connection.lock();
        guard.as_ref().and_then(|c| c.default_cache_policy())
    }

    fn ping(&mut self, timeout: Duration) -> bool {
        let Some(slot) = self.slot.as_ref() else {
            return false;
        };
        if slot.interrupted.load(Ordering::SeqCst) {
            return false;
        }
        let mut guard = slot.connection.lock();
        guard.as_mut().is_some_and(|c| c.ping(timeout))
    }

    fn close(&mut self) -> Result<(), GraphError> {
        if let Some(slot) = self.slot.take() {
            self.pool.release(slot);
        }
        Ok(())
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.release(slot);
        }
    }
}

/// Exponential backoff before retry number `attempt` (zero-based)
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    let millis = u64::try_from(base.as_millis())
        .unwrap_or(u64::MAX)
        .saturating_mul(factor);
    Duration::from_millis(millis.min(RETRY_BACKOFF_MAX_MS))
}

/// Connection factory over one pool per source
///
/// Retries retryable acquisition failures up to the source's retry limit
/// with exponential backoff.
#[derive(Clone)]
pub struct PooledConnectionFactory {
    pools: HashMap<String, ConnectionPool>,
    backoff_base: Duration,
}

impl PooledConnectionFactory {
    pub fn new() -> Self {
        PooledConnectionFactory {
            pools: HashMap::new(),
            backoff_base: Duration::from_millis(RETRY_BACKOFF_BASE_MS),
        }
    }

    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn add_pool(&mut self, pool: ConnectionPool) {
        self.pools.insert(pool.source_name().to_string(), pool);
    }

    pub fn pool(&self, source_name: &str) -> Option<&ConnectionPool> {
        self.pools.get(source_name)
    }

    pub fn pools(&self) -> impl Iterator<Item = &ConnectionPool> {
        self.pools.values()
    }

    pub fn shutdown_all(&self) {
        for pool in self.pools.values() {
            pool.shutdown();
        }
    }

    /// Acquire a connection to `source_name`
    ///
    /// Waiting for a free connection and the backoff between retries both
    /// give up with `Interrupted` once `cancel` is set.
    pub fn get_connection(
        &self,
        source_name: &str,
        cancel: &CancelFlag,
    ) -> Result<PooledConnection, GraphError> {
        let pool = self.pools.get(source_name).ok_or_else(|| {
            GraphError::SourceUnavailable(format!("no source named '{}'", source_name))
        })?;
        let limit = pool.retry_limit();
        let mut attempt = 0;
        loop {
            match pool.acquire(Some(cancel), pool.options().acquire_timeout) {
                Ok(connection) => return Ok(connection),
                Err(err) if err.is_retryable() && attempt < limit && pool.is_running() => {
                    let delay = backoff_delay(self.backoff_base, attempt);
                    warn!(
                        source = %source_name,
                        attempt = attempt + 1,
                        limit,
                        delay = ?delay,
                        error = %err,
                        "Retrying connection"
                    );
                    wait_unless_cancelled(delay, cancel, source_name)?;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Sleep for `delay` in short slices, stopping early once `cancel` is set
fn wait_unless_cancelled(
    delay: Duration,
    cancel: &CancelFlag,
    source_name: &str,
) -> Result<(), GraphError> {
    let until = Instant::now() + delay;
    loop {
        if cancel.is_cancelled() {
            return Err(GraphError::Interrupted(format!(
                "retrying a connection to '{}'",
                source_name
            )));
        }
        let now = Instant::now();
        if now >= until {
            return Ok(());
        }
        std::thread::sleep(WAIT_SLICE.min(until - now));
    }
}

impl Default for PooledConnectionFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionFactory for PooledConnectionFactory {
    fn create_connection(
        &self,
        source_name: &str,
        cancel: &CancelFlag,
    ) -> Result<Box<dyn Connection>, GraphError> {
        Ok(Box::new(self.get_connection(source_name, cancel)?))
    }
}
