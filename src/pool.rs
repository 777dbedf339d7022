//! Adaptive connection pool
//!
//! Bounds the number of open connections to one embedded database file,
//! shares them fairly among concurrent callers, and resizes itself from
//! live load. One mutex guards all structural state (idle queue, registry,
//! waiter queue, counters); freed connections are handed directly to the
//! next waiter under that lock, so an assignment can never race a timeout
//! and no two releasers can deliver the same connection.

use crate::adaptive::{AdaptiveEngine, PoolSample, ScalingDecision, SizingDecision};
use crate::config::PoolConfig;
use crate::connection::{ConnectionInfo, ConnectionStatus, ConnectionWrapper};
use crate::db::{DatabaseManager, QueryResult, SqliteManager, Value};
use crate::error::{Error, Result};
use crate::metrics::{MetricsStore, PerformanceReport};
use crate::scheduler::{SchedulerStats, WaiterQueue};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch};

/// Point-in-time pool statistics
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub timestamp: DateTime<Utc>,
    pub active_connections: usize,
    pub idle_connections: usize,
    pub waiting_requests: usize,
    pub max_connections: usize,
    pub total_connections_created: u64,
    pub total_requests_served: u64,
    pub error_count: u64,
    /// Percent of requests served without error
    pub success_rate: f64,
    pub average_wait_time_ms: f64,
}

/// Per-call acquisition options
#[derive(Debug, Clone, Copy, Default)]
pub struct AcquireOptions {
    /// Higher priority waiters are served first
    pub priority: u8,
    /// Overrides the pool's acquire timeout for this call
    pub timeout: Option<Duration>,
}

/// Adaptive connection pool for a single embedded database file
#[derive(Clone)]
pub struct Pool {
    shared: Arc<PoolShared>,
}

pub(crate) struct PoolShared {
    pub(crate) config: PoolConfig,
    db: Arc<dyn DatabaseManager>,
    state: Mutex<PoolState>,
    metrics: MetricsStore,
    engine: AdaptiveEngine,
    running: AtomicBool,
}

struct PoolState {
    connections: HashMap<String, Arc<ConnectionWrapper>>,
    idle: VecDeque<Arc<ConnectionWrapper>>,
    waiters: WaiterQueue,
    total_created: u64,
    monitor_task: Option<tokio::task::JoinHandle<()>>,
    cleanup_task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<watch::Sender<bool>>,
}

impl Pool {
    /// Create a pool over an injected database capability. The configuration
    /// is validated here; nothing is opened until [`Pool::start`].
    pub fn new(config: PoolConfig, db: Arc<dyn DatabaseManager>) -> Result<Self> {
        config.validate()?;

        let engine = AdaptiveEngine::new(config.min_connections, config.max_connections);

        Ok(Self {
            shared: Arc::new(PoolShared {
                config,
                db,
                state: Mutex::new(PoolState {
                    connections: HashMap::new(),
                    idle: VecDeque::new(),
                    waiters: WaiterQueue::new(),
                    total_created: 0,
                    monitor_task: None,
                    cleanup_task: None,
                    shutdown_tx: None,
                }),
                metrics: MetricsStore::new(),
                engine,
                running: AtomicBool::new(false),
            }),
        })
    }

    /// Create a pool over a SQLite database file
    pub fn sqlite(path: impl AsRef<Path>, config: PoolConfig) -> Result<Self> {
        Self::new(config, Arc::new(SqliteManager::new(path)))
    }

    /// Start the pool: create the minimum connections and spawn the
    /// background loops. Idempotent. Fails only when not a single
    /// connection can be opened (e.g. an invalid database path).
    pub async fn start(&self) -> Result<()> {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        {
            let mut state = self.shared.state.lock();
            if let Err(e) = self.shared.ensure_min(&mut state) {
                if state.connections.is_empty() && self.shared.config.min_connections > 0 {
                    self.shared.running.store(false, Ordering::Release);
                    return Err(e);
                }
                tracing::warn!("partial start: {}", e);
            }

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            if self.shared.config.enable_monitoring {
                state.monitor_task = Some(crate::maintenance::spawn_monitor(
                    Arc::clone(&self.shared),
                    shutdown_rx.clone(),
                ));
            }
            state.cleanup_task = Some(crate::maintenance::spawn_cleanup(
                Arc::clone(&self.shared),
                shutdown_rx,
            ));
            state.shutdown_tx = Some(shutdown_tx);
        }

        tracing::info!(
            min = self.shared.config.min_connections,
            max = self.shared.config.max_connections,
            "connection pool started"
        );
        Ok(())
    }

    /// Stop the pool: cancel the background loops, fail pending waiters
    /// with [`Error::PoolClosed`], close every connection. Idempotent.
    pub async fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }

        let (monitor, cleanup, shutdown_tx) = {
            let mut state = self.shared.state.lock();
            (
                state.monitor_task.take(),
                state.cleanup_task.take(),
                state.shutdown_tx.take(),
            )
        };

        if let Some(tx) = shutdown_tx {
            let _ = tx.send(true);
        }
        if let Some(task) = monitor {
            let _ = task.await;
        }
        if let Some(task) = cleanup {
            let _ = task.await;
        }

        let mut state = self.shared.state.lock();
        state.waiters.clear();
        for wrapper in state.connections.values() {
            wrapper.close();
        }
        state.connections.clear();
        state.idle.clear();

        tracing::info!("connection pool stopped");
    }

    /// Acquire a connection with default priority and timeout
    pub async fn acquire(&self) -> Result<PooledConnection> {
        self.acquire_with(AcquireOptions::default()).await
    }

    /// Acquire a connection.
    ///
    /// Serves from the idle queue first (unhealthy heads are replaced),
    /// creates a new connection below the cap, and otherwise enqueues a
    /// waiter and suspends until a releaser hands a connection over or the
    /// timeout fires.
    pub async fn acquire_with(&self, options: AcquireOptions) -> Result<PooledConnection> {
        if !self.shared.is_running() {
            return Err(Error::PoolClosed);
        }

        let started = Instant::now();
        let timeout = options.timeout.unwrap_or(self.shared.config.acquire_timeout);

        let (waiter_id, mut rx) = {
            let mut state = self.shared.state.lock();

            while let Some(wrapper) = state.idle.pop_front() {
                if wrapper.is_healthy() {
                    wrapper.set_status(ConnectionStatus::Active);
                    self.shared
                        .metrics
                        .record_success(started.elapsed().as_secs_f64() * 1000.0);
                    return Ok(PooledConnection::new(wrapper, Arc::clone(&self.shared)));
                }
                tracing::debug!(id = wrapper.id(), "dropping unhealthy idle connection");
                state.connections.remove(wrapper.id());
                wrapper.close();
            }

            if state.connections.len() < self.shared.config.max_connections {
                match self.shared.create_wrapper(&mut state) {
                    Ok(wrapper) => {
                        wrapper.set_status(ConnectionStatus::Active);
                        self.shared
                            .metrics
                            .record_success(started.elapsed().as_secs_f64() * 1000.0);
                        return Ok(PooledConnection::new(wrapper, Arc::clone(&self.shared)));
                    }
                    Err(e) => {
                        self.shared.metrics.record_failure();
                        return Err(e);
                    }
                }
            }

            let (tx, rx) = oneshot::channel();
            let id = state
                .waiters
                .enqueue(options.priority, Instant::now() + timeout, tx);
            (id, rx)
        };

        // Suspend with the lock released; the hand-off resolves the channel.
        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(wrapper)) => {
                self.shared
                    .metrics
                    .record_success(started.elapsed().as_secs_f64() * 1000.0);
                Ok(PooledConnection::new(wrapper, Arc::clone(&self.shared)))
            }
            Ok(Err(_)) => {
                self.shared.metrics.record_failure();
                if self.shared.is_running() {
                    Err(Error::Timeout)
                } else {
                    Err(Error::PoolClosed)
                }
            }
            Err(_) => {
                let removed = {
                    let mut state = self.shared.state.lock();
                    state.waiters.remove(waiter_id)
                };
                if !removed {
                    // The hand-off won the race; take the delivered
                    // connection back so it is not leaked.
                    if let Ok(wrapper) = rx.try_recv() {
                        self.shared.release_wrapper(&wrapper);
                    }
                }
                self.shared.metrics.record_failure();
                Err(Error::Timeout)
            }
        }
    }

    /// Release a connection back to the pool. Equivalent to dropping the
    /// guard; provided for callers that want the hand-back to be explicit.
    pub fn release(&self, conn: PooledConnection) {
        drop(conn);
    }

    /// Run `f` on an acquired connection, releasing it on every exit path
    pub async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&PooledConnection) -> Result<T>,
    {
        self.with_connection_opts(AcquireOptions::default(), f).await
    }

    /// [`Pool::with_connection`] with explicit priority/timeout
    pub async fn with_connection_opts<T, F>(&self, options: AcquireOptions, f: F) -> Result<T>
    where
        F: FnOnce(&PooledConnection) -> Result<T>,
    {
        let conn = self.acquire_with(options).await?;
        let result = f(&conn);
        drop(conn);
        result
    }

    /// Consistent stats snapshot, taken under one brief lock acquisition
    pub fn stats(&self) -> PoolStats {
        self.shared.stats()
    }

    /// Aggregated response-time and throughput report
    pub fn performance_metrics(&self) -> PerformanceReport {
        self.shared.metrics.report()
    }

    /// Waiter-queue stats view
    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.shared.state.lock().waiters.stats()
    }

    /// Sizing-engine diagnostics
    pub fn engine_status(&self) -> crate::adaptive::EngineStatus {
        self.shared.engine.status()
    }

    /// Per-connection views for health tooling
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        let wrappers: Vec<Arc<ConnectionWrapper>> = {
            let state = self.shared.state.lock();
            state.connections.values().cloned().collect()
        };
        wrappers.iter().map(|w| w.info()).collect()
    }

    /// Force one sizing cycle, then health-check every connection and
    /// replace the failures
    pub fn optimize(&self) {
        if !self.shared.is_running() {
            return;
        }
        self.shared.maybe_adjust_size();
        self.shared.health_sweep();
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }
}

impl PoolShared {
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Open a new connection and register it. Caller decides the status.
    fn create_wrapper(&self, state: &mut PoolState) -> Result<Arc<ConnectionWrapper>> {
        let handle = self.db.open(self.config.connection_creation_timeout)?;
        let wrapper = Arc::new(ConnectionWrapper::new(handle));
        state
            .connections
            .insert(wrapper.id().to_string(), Arc::clone(&wrapper));
        state.total_created += 1;
        tracing::debug!(id = wrapper.id(), total = state.connections.len(), "created connection");
        Ok(wrapper)
    }

    /// Create connections until the minimum is met. Stops at the first
    /// failure and reports it; already-created connections are kept.
    fn ensure_min(&self, state: &mut PoolState) -> Result<()> {
        while state.connections.len() < self.config.min_connections {
            let wrapper = self.create_wrapper(state)?;
            state.idle.push_back(wrapper);
        }
        Ok(())
    }

    /// Return a connection to the pool: hand it to the next waiter, or
    /// queue it idle, or destroy and replace it if unhealthy.
    pub(crate) fn release_wrapper(&self, wrapper: &Arc<ConnectionWrapper>) {
        {
            let mut state = self.state.lock();

            if !state.connections.contains_key(wrapper.id())
                || wrapper.status() == ConnectionStatus::Closed
            {
                return;
            }

            // An errored wrapper is terminal even if the probe would pass.
            let healthy = wrapper.status() != ConnectionStatus::Error && wrapper.is_healthy();

            if healthy {
                wrapper.touch();
                self.hand_off_or_park(&mut state, Arc::clone(wrapper));
            } else {
                tracing::warn!(id = wrapper.id(), "destroying unhealthy connection on release");
                state.connections.remove(wrapper.id());
                wrapper.close();

                if state.connections.len() < self.config.min_connections {
                    match self.create_wrapper(&mut state) {
                        Ok(replacement) => self.hand_off_or_park(&mut state, replacement),
                        Err(e) => tracing::warn!("replacement creation failed: {}", e),
                    }
                }
            }
        }

        if self.is_running() {
            self.maybe_adjust_size();
        }
    }

    /// Direct hand-off to the next live waiter; the idle queue is only the
    /// fallback. Runs under the pool lock. A connection is marked Active
    /// only once a hand-off is actually attempted, so fresh capacity enters
    /// the idle queue in idle state.
    fn hand_off_or_park(&self, state: &mut PoolState, wrapper: Arc<ConnectionWrapper>) {
        if state.waiters.is_empty() {
            wrapper.set_status(ConnectionStatus::Idle);
            state.idle.push_back(wrapper);
            return;
        }

        wrapper.set_status(ConnectionStatus::Active);
        if let Err(wrapper) = state.waiters.assign(wrapper) {
            wrapper.set_status(ConnectionStatus::Idle);
            state.idle.push_back(wrapper);
        }
    }

    pub(crate) fn stats(&self) -> PoolStats {
        let (active, idle, waiting, total_created) = {
            let state = self.state.lock();
            (
                state.connections.len() - state.idle.len(),
                state.idle.len(),
                state.waiters.len(),
                state.total_created,
            )
        };

        PoolStats {
            timestamp: Utc::now(),
            active_connections: active,
            idle_connections: idle,
            waiting_requests: waiting,
            max_connections: self.config.max_connections,
            total_connections_created: total_created,
            total_requests_served: self.metrics.total_served(),
            error_count: self.metrics.error_count(),
            success_rate: self.metrics.success_rate(),
            average_wait_time_ms: self.metrics.average_wait_ms(),
        }
    }

    /// Sample the pool, run one sizing cycle, and apply the decision
    pub(crate) fn maybe_adjust_size(&self) {
        let sample = {
            let state = self.state.lock();
            PoolSample {
                active: state.connections.len() - state.idle.len(),
                idle: state.idle.len(),
                waiting: state.waiters.len(),
                success_rate: self.metrics.success_rate(),
                recent_average_wait_ms: self.metrics.recent_average_wait_ms(10),
                total_served: self.metrics.total_served(),
            }
        };

        let decision = self.engine.analyze(&sample);
        self.metrics.record_load_score(decision.load_score);
        self.apply_decision(&decision);
    }

    fn apply_decision(&self, decision: &SizingDecision) {
        if !self.is_running() {
            return;
        }

        match decision.decision {
            ScalingDecision::ScaleUp | ScalingDecision::Emergency => {
                let mut state = self.state.lock();
                while state.connections.len() < decision.target_size
                    && state.connections.len() < self.config.max_connections
                {
                    match self.create_wrapper(&mut state) {
                        // New connections enter the idle queue directly.
                        Ok(wrapper) => self.hand_off_or_park(&mut state, wrapper),
                        Err(e) => {
                            tracing::warn!("scale-up aborted: {}", e);
                            break;
                        }
                    }
                }
            }
            ScalingDecision::ScaleDown => {
                let mut state = self.state.lock();
                while state.connections.len() > decision.target_size
                    && state.connections.len() > self.config.min_connections
                {
                    match state.idle.pop_front() {
                        Some(wrapper) => {
                            state.connections.remove(wrapper.id());
                            wrapper.close();
                            tracing::debug!(id = wrapper.id(), "scaled down idle connection");
                        }
                        None => break,
                    }
                }
            }
            ScalingDecision::Maintain => {}
        }
    }

    /// Destroy idle connections that have outlived the idle timeout while
    /// the pool is above its minimum
    pub(crate) fn reap_idle(&self) {
        let mut state = self.state.lock();

        let candidates: Vec<String> = state
            .idle
            .iter()
            .filter(|w| {
                w.idle_for()
                    .map_or(false, |idle| idle > self.config.idle_timeout)
            })
            .map(|w| w.id().to_string())
            .collect();

        for id in candidates {
            if state.connections.len() <= self.config.min_connections {
                break;
            }
            let at = state.idle.iter().position(|w| w.id() == id);
            if let Some(wrapper) = at.and_then(|at| state.idle.remove(at)) {
                state.connections.remove(wrapper.id());
                wrapper.close();
                tracing::debug!(id = wrapper.id(), "reaped idle connection");
            }
        }
    }

    /// Probe every connection, destroy the failures, and restore the
    /// minimum
    pub(crate) fn health_sweep(&self) {
        let wrappers: Vec<Arc<ConnectionWrapper>> = {
            let state = self.state.lock();
            state.connections.values().cloned().collect()
        };

        let unhealthy: Vec<Arc<ConnectionWrapper>> = wrappers
            .into_iter()
            .filter(|w| w.status() == ConnectionStatus::Error || !w.is_healthy())
            .collect();

        if unhealthy.is_empty() {
            return;
        }

        let mut state = self.state.lock();
        for wrapper in unhealthy {
            if state.connections.remove(wrapper.id()).is_some() {
                if let Some(at) = state.idle.iter().position(|w| w.id() == wrapper.id()) {
                    state.idle.remove(at);
                }
                wrapper.close();
                tracing::warn!(id = wrapper.id(), "removed unhealthy connection");
            }
        }

        if let Err(e) = self.ensure_min(&mut state) {
            tracing::warn!("failed to restore minimum connections: {}", e);
        }
    }
}

/// A connection checked out of the pool. Dropping it returns the
/// connection; [`Pool::release`] makes that explicit.
pub struct PooledConnection {
    wrapper: Option<Arc<ConnectionWrapper>>,
    shared: Arc<PoolShared>,
}

impl PooledConnection {
    fn new(wrapper: Arc<ConnectionWrapper>, shared: Arc<PoolShared>) -> Self {
        Self {
            wrapper: Some(wrapper),
            shared,
        }
    }

    fn wrapper(&self) -> &Arc<ConnectionWrapper> {
        self.wrapper
            .as_ref()
            .expect("wrapper present until drop")
    }

    pub fn id(&self) -> &str {
        self.wrapper().id()
    }

    /// Execute a statement. SQL errors propagate unchanged.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.wrapper().execute(sql, params)
    }

    pub fn usage_count(&self) -> u64 {
        self.wrapper().usage_count()
    }

    pub fn error_count(&self) -> u64 {
        self.wrapper().error_count()
    }

    pub fn info(&self) -> ConnectionInfo {
        self.wrapper().info()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(wrapper) = self.wrapper.take() {
            self.shared.release_wrapper(&wrapper);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbHandle;

    fn test_config() -> PoolConfig {
        PoolConfig {
            min_connections: 2,
            max_connections: 5,
            acquire_timeout: Duration::from_millis(500),
            ..Default::default()
        }
    }

    fn sqlite_pool(config: PoolConfig) -> (tempfile::TempDir, Pool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::sqlite(dir.path().join("pool.db"), config).unwrap();
        (dir, pool)
    }

    /// Manager whose handles can be flipped unhealthy for failure tests
    struct FlakyManager {
        healthy: Arc<AtomicBool>,
    }

    struct FlakyHandle {
        healthy: Arc<AtomicBool>,
    }

    impl FlakyManager {
        fn new() -> (Arc<Self>, Arc<AtomicBool>) {
            let healthy = Arc::new(AtomicBool::new(true));
            (
                Arc::new(Self {
                    healthy: Arc::clone(&healthy),
                }),
                healthy,
            )
        }
    }

    impl DatabaseManager for FlakyManager {
        fn open(&self, _timeout: Duration) -> Result<Box<dyn DbHandle>> {
            Ok(Box::new(FlakyHandle {
                healthy: Arc::clone(&self.healthy),
            }))
        }
    }

    impl DbHandle for FlakyHandle {
        fn execute(&mut self, _sql: &str, _params: &[Value]) -> Result<QueryResult> {
            Ok(QueryResult::default())
        }

        fn probe(&mut self) -> Result<()> {
            if self.healthy.load(Ordering::Relaxed) {
                Ok(())
            } else {
                Err(Error::Unhealthy("probe failed".to_string()))
            }
        }

        fn close(&mut self) {}
    }

    #[tokio::test]
    async fn acquire_release_round_trip() {
        let (_dir, pool) = sqlite_pool(test_config());
        pool.start().await.unwrap();

        let conn = pool.acquire().await.unwrap();
        conn.execute("CREATE TABLE t (x INTEGER)", &[]).unwrap();

        let stats = pool.stats();
        assert_eq!(stats.active_connections, 1);
        assert_eq!(stats.idle_connections, 1);
        assert!(stats.total_connections_created <= 2);

        drop(conn);
        let stats = pool.stats();
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.idle_connections, 2);

        pool.stop().await;
    }

    #[tokio::test]
    async fn acquire_before_start_is_pool_closed() {
        let (_dir, pool) = sqlite_pool(test_config());
        assert!(matches!(pool.acquire().await, Err(Error::PoolClosed)));
    }

    #[tokio::test]
    async fn acquire_after_stop_is_pool_closed() {
        let (_dir, pool) = sqlite_pool(test_config());
        pool.start().await.unwrap();
        pool.stop().await;
        assert!(matches!(pool.acquire().await, Err(Error::PoolClosed)));
    }

    #[tokio::test]
    async fn start_fails_on_invalid_path() {
        let pool = Pool::sqlite("/definitely/not/a/real/dir/pool.db", test_config()).unwrap();
        assert!(matches!(pool.start().await, Err(Error::CreateFailed(_))));
        assert!(!pool.is_running());
    }

    #[tokio::test]
    async fn grows_to_cap_then_queues() {
        let (_dir, pool) = sqlite_pool(test_config());
        pool.start().await.unwrap();

        let mut held = Vec::new();
        for _ in 0..5 {
            held.push(pool.acquire().await.unwrap());
        }
        assert_eq!(pool.stats().active_connections, 5);

        // Sixth acquire must wait; release one to let it through.
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.stats().waiting_requests, 1);

        held.pop();
        let conn = waiter.await.unwrap().unwrap();
        assert_eq!(pool.stats().waiting_requests, 0);

        drop(conn);
        drop(held);
        pool.stop().await;
    }

    #[tokio::test]
    async fn acquire_times_out_at_capacity() {
        let (_dir, pool) = sqlite_pool(test_config());
        pool.start().await.unwrap();

        let mut held = Vec::new();
        for _ in 0..5 {
            held.push(pool.acquire().await.unwrap());
        }

        let started = Instant::now();
        let result = pool.acquire().await;
        let waited = started.elapsed();

        assert!(matches!(result, Err(Error::Timeout)));
        assert!(waited >= Duration::from_millis(450));
        assert!(waited < Duration::from_millis(2000));
        assert_eq!(pool.stats().waiting_requests, 0);

        // No leak: every held connection comes back.
        drop(held);
        assert_eq!(pool.stats().idle_connections, 5);

        pool.stop().await;
    }

    #[tokio::test]
    async fn unhealthy_connection_is_replaced_on_release() {
        let (manager, healthy) = FlakyManager::new();
        let pool = Pool::new(test_config(), manager.clone()).unwrap();
        pool.start().await.unwrap();

        let conn = pool.acquire().await.unwrap();
        let sick_id = conn.id().to_string();
        let created_before = pool.stats().total_connections_created;

        healthy.store(false, Ordering::Relaxed);
        drop(conn);
        healthy.store(true, Ordering::Relaxed);

        let stats = pool.stats();
        assert_eq!(stats.active_connections, 0);
        // Destroyed and replaced to hold the minimum.
        assert_eq!(stats.idle_connections, 2);
        assert!(stats.total_connections_created > created_before);
        assert!(pool.connections().iter().all(|c| c.id != sick_id));

        pool.stop().await;
    }

    #[tokio::test]
    async fn errored_connection_is_terminal() {
        let (_dir, pool) = sqlite_pool(test_config());
        pool.start().await.unwrap();

        let conn = pool.acquire().await.unwrap();
        let id = conn.id().to_string();
        assert!(conn.execute("DEFINITELY NOT SQL", &[]).is_err());
        drop(conn);

        // The errored wrapper was destroyed, not parked.
        assert!(pool.connections().iter().all(|c| c.id != id));
        assert_eq!(pool.stats().idle_connections, 2);

        pool.stop().await;
    }

    #[tokio::test]
    async fn reap_idle_respects_minimum() {
        let (_dir, pool) = sqlite_pool(PoolConfig {
            min_connections: 2,
            max_connections: 10,
            idle_timeout: Duration::from_millis(10),
            ..Default::default()
        });
        pool.start().await.unwrap();

        // Grow to 8 by holding, then release everything.
        let mut held = Vec::new();
        for _ in 0..8 {
            held.push(pool.acquire().await.unwrap());
        }
        for conn in held.drain(..) {
            conn.execute("SELECT 1", &[]).unwrap();
            drop(conn);
        }
        assert_eq!(pool.stats().idle_connections, 8);

        tokio::time::sleep(Duration::from_millis(30)).await;
        pool.shared.reap_idle();

        let stats = pool.stats();
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.idle_connections, 2);

        pool.stop().await;
    }

    #[tokio::test]
    async fn stop_wakes_pending_waiters_with_pool_closed() {
        let (_dir, pool) = sqlite_pool(PoolConfig {
            min_connections: 1,
            max_connections: 2,
            acquire_timeout: Duration::from_secs(30),
            ..Default::default()
        });
        pool.start().await.unwrap();

        let held_a = pool.acquire().await.unwrap();
        let held_b = pool.acquire().await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        pool.stop().await;
        assert!(matches!(waiter.await.unwrap(), Err(Error::PoolClosed)));

        drop(held_a);
        drop(held_b);
    }

    #[tokio::test]
    async fn optimize_replaces_unhealthy_connections() {
        let (manager, healthy) = FlakyManager::new();
        let pool = Pool::new(test_config(), manager).unwrap();
        pool.start().await.unwrap();

        let before = pool.stats().total_connections_created;

        // The sweep destroys both idle connections, then restores the
        // minimum with fresh ones.
        healthy.store(false, Ordering::Relaxed);
        pool.optimize();
        healthy.store(true, Ordering::Relaxed);

        let stats = pool.stats();
        assert_eq!(stats.idle_connections + stats.active_connections, 2);
        assert_eq!(stats.total_connections_created, before + 2);

        pool.stop().await;
    }

    #[tokio::test]
    async fn stats_snapshot_serializes() {
        let (_dir, pool) = sqlite_pool(test_config());
        pool.start().await.unwrap();

        let json = serde_json::to_value(pool.stats()).unwrap();
        assert_eq!(json["idle_connections"], 2);
        assert_eq!(json["max_connections"], 5);

        pool.stop().await;
    }
}
