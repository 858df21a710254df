//! Bounded, health-checked connection pool for a single service.
//!
//! A pool eagerly dials a fixed number of connections against each configured
//! endpoint and parks them in a bounded idle queue. Acquisition never waits for
//! availability: it pops an idle connection, probes it, and either hands it out
//! or replaces it with a fresh connection to the same endpoint.
//!
//! # How Acquisition Works
//!
//! 1. Pops an idle connection; an empty queue is reported as
//!    [`Error::PoolExhausted`] right away
//! 2. Runs the health prober against it
//! 3. A healthy connection is returned to the caller
//! 4. An unhealthy one is closed and its endpoint is redialed; on success the
//!    replacement is returned, otherwise the next idle connection is tried
//!
//! The number of attempts is bounded by the idle queue length observed when
//! `acquire` starts, so a persistently failing endpoint cannot keep a caller
//! spinning.
//!
//! Dropping an `acquire` future while a heartbeat is in flight returns the
//! connection under test to the idle queue.

use std::fmt;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};

use crate::connector::{ConnectionFactory, HealthProber};
use crate::endpoint::EndpointDescriptor;
use crate::error::{BoxError, Error, Result};

/// Sizing and deadlines for a [`ConnectionPool`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    /// Connections dialed against every endpoint at creation.
    pub connections_per_endpoint: usize,

    /// Upper bound for a single dial. If `None`, dials may run indefinitely.
    pub dial_timeout: Option<Duration>,

    /// Upper bound for a single heartbeat. A probe that exceeds it counts as
    /// a failed heartbeat.
    pub heartbeat_timeout: Option<Duration>,
}

impl PoolConfig {
    /// Creates a configuration with the given number of connections per endpoint
    /// and no deadlines.
    #[must_use]
    pub fn new(connections_per_endpoint: usize) -> Self {
        Self {
            connections_per_endpoint,
            dial_timeout: None,
            heartbeat_timeout: None,
        }
    }

    /// Sets the deadline applied to every dial.
    #[must_use]
    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = Some(timeout);
        self
    }

    /// Sets the deadline applied to every heartbeat.
    #[must_use]
    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = Some(timeout);
        self
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new(1)
    }
}

/// A connection on loan from a [`ConnectionPool`].
///
/// Dereferences to the underlying connection. Hand it back with
/// [`ConnectionPool::release`]; dropping it instead closes the connection and
/// removes it from the pool for good.
pub struct PooledConnection<C> {
    connection: C,
    endpoint: usize,
    live: Arc<AtomicUsize>,
}

impl<C> PooledConnection<C> {
    fn new(connection: C, endpoint: usize, live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::Relaxed);
        Self {
            connection,
            endpoint,
            live: Arc::clone(live),
        }
    }

    /// Index of the endpoint this connection was dialed against.
    #[must_use]
    pub fn endpoint_index(&self) -> usize {
        self.endpoint
    }

    /// Returns a reference to the underlying connection.
    #[must_use]
    pub fn get_ref(&self) -> &C {
        &self.connection
    }

    /// Returns a mutable reference to the underlying connection.
    pub fn get_mut(&mut self) -> &mut C {
        &mut self.connection
    }

    fn belongs_to(&self, live: &Arc<AtomicUsize>) -> bool {
        Arc::ptr_eq(&self.live, live)
    }
}

impl<C> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.connection
    }
}

impl<C> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.connection
    }
}

impl<C> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::Relaxed);
    }
}

impl<C: fmt::Debug> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("connection", &self.connection)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// A bounded pool of connections to the endpoints of one service.
///
/// The pool is `Send + Sync` when `C` is, and is meant to be shared through an
/// `Arc` by many concurrent callers.
pub struct ConnectionPool<C> {
    name: String,
    endpoints: Vec<EndpointDescriptor>,
    config: PoolConfig,
    capacity: usize,
    idle_tx: Sender<PooledConnection<C>>,
    idle_rx: Mutex<Receiver<PooledConnection<C>>>,
    live: Arc<AtomicUsize>,
    factory: Arc<dyn ConnectionFactory<C>>,
    prober: Arc<dyn HealthProber<C>>,
}

impl<C> ConnectionPool<C>
where
    C: Send + Sync + 'static,
{
    /// Creates a pool and dials `connections_per_endpoint` connections against
    /// every endpoint.
    ///
    /// Dials run concurrently. Failed attempts are logged and skipped; the pool
    /// is created as long as at least one connection was established.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `endpoints` is empty, an address is
    /// blank, or `connections_per_endpoint` is zero, and [`Error::Fatal`] if no
    /// connection could be established.
    pub async fn new(
        name: impl Into<String>,
        endpoints: Vec<EndpointDescriptor>,
        config: PoolConfig,
        factory: Arc<dyn ConnectionFactory<C>>,
        prober: Arc<dyn HealthProber<C>>,
    ) -> Result<Self> {
        let name = name.into();

        if endpoints.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "no endpoints configured for `{name}`"
            )));
        }

        if config.connections_per_endpoint == 0 {
            return Err(Error::InvalidConfig(format!(
                "connections per endpoint must be positive for `{name}`"
            )));
        }

        if endpoints.iter().any(|ep| ep.address.trim().is_empty()) {
            return Err(Error::InvalidConfig(format!(
                "blank endpoint address configured for `{name}`"
            )));
        }

        let capacity = config
            .connections_per_endpoint
            .checked_mul(endpoints.len())
            .filter(|capacity| *capacity <= Semaphore::MAX_PERMITS)
            .ok_or_else(|| {
                Error::InvalidConfig(format!("pool capacity overflows for `{name}`"))
            })?;

        let (idle_tx, idle_rx) = mpsc::channel(capacity);
        let pool = Self {
            name,
            endpoints,
            config,
            capacity,
            idle_tx,
            idle_rx: Mutex::new(idle_rx),
            live: Arc::new(AtomicUsize::new(0)),
            factory,
            prober,
        };

        let per_endpoint = pool.config.connections_per_endpoint;
        let slots = (0..pool.endpoints.len())
            .flat_map(|index| std::iter::repeat_n(index, per_endpoint));
        let dialed = join_all(slots.map(|index| pool.dial(index))).await;

        for result in dialed {
            match result {
                Ok(connection) => pool.park(connection),
                Err(e) => tracing::warn!("{e}; skipping connection slot for `{}`", pool.name),
            }
        }

        let established = pool.live_connections();
        if established == 0 {
            tracing::error!("failed creating any connection for `{}`", pool.name);
            return Err(Error::Fatal(pool.name));
        }

        tracing::debug!(
            "created pool `{}` with {established} of {capacity} connections",
            pool.name
        );

        Ok(pool)
    }

    /// Takes a healthy connection from the pool without waiting.
    ///
    /// Each idle connection is probed before being handed out. A connection that
    /// fails its heartbeat is closed and replaced by a fresh connection to the
    /// same endpoint; if that dial fails too, the next idle connection is tried,
    /// up to as many attempts as there were idle connections on entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`] if the idle queue is empty or every
    /// attempt ended with a failed redial.
    pub async fn acquire(&self) -> Result<PooledConnection<C>> {
        let attempts = self.idle_connections().max(1);

        for _ in 0..attempts {
            let Some(pooled) = self.take_idle() else {
                break;
            };

            let index = pooled.endpoint;
            let address = &self.endpoints[index].address;

            let checkout = Checkout::new(self, pooled);
            let heartbeat = checkout.heartbeat().await;
            let Some(pooled) = checkout.disarm() else {
                break;
            };

            match heartbeat {
                Ok(()) => return Ok(pooled),
                Err(e) => tracing::warn!("heartbeat failed for connection to {address}: {e}"),
            }

            drop(pooled);

            match self.dial(index).await {
                Ok(replacement) => {
                    tracing::debug!("re-established connection to {address}");
                    return Ok(replacement);
                }

                Err(e) => tracing::warn!("{e}; trying another connection for `{}`", self.name),
            }
        }

        tracing::debug!("no connection available for `{}`", self.name);
        Err(Error::PoolExhausted(self.name.clone()))
    }

    /// Returns a connection to the idle queue without waiting.
    ///
    /// If the queue is already full the connection is closed instead; that is
    /// not an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReleaseMismatch`] if the connection was acquired from a
    /// different pool. The connection is closed in that case.
    pub fn release(&self, connection: PooledConnection<C>) -> Result<()> {
        if !connection.belongs_to(&self.live) {
            tracing::warn!("rejecting foreign connection released to `{}`", self.name);
            return Err(Error::ReleaseMismatch(self.name.clone()));
        }

        self.park(connection);
        Ok(())
    }

    /// The name this pool was created with.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum number of idle connections: connections per endpoint times the
    /// number of endpoints.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of connections currently waiting in the idle queue.
    #[must_use]
    pub fn idle_connections(&self) -> usize {
        self.idle_tx.max_capacity() - self.idle_tx.capacity()
    }

    /// Number of connections tracked by the pool, idle or on loan.
    #[must_use]
    pub fn live_connections(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    /// The endpoint table, indexed by [`PooledConnection::endpoint_index`].
    #[must_use]
    pub fn endpoints(&self) -> &[EndpointDescriptor] {
        &self.endpoints
    }

    /// The configuration this pool was created with.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    async fn dial(&self, index: usize) -> Result<PooledConnection<C>> {
        let endpoint = &self.endpoints[index];

        match within(self.config.dial_timeout, self.factory.connect(endpoint)).await {
            Ok(connection) => {
                tracing::debug!("established new connection to {}", endpoint.address);
                Ok(PooledConnection::new(connection, index, &self.live))
            }

            Err(source) => Err(Error::Dial {
                address: endpoint.address.clone(),
                source,
            }),
        }
    }

    fn take_idle(&self) -> Option<PooledConnection<C>> {
        let mut idle = self.idle_rx.lock().unwrap_or_else(PoisonError::into_inner);
        idle.try_recv().ok()
    }
}

impl<C> ConnectionPool<C> {
    fn park(&self, connection: PooledConnection<C>) {
        if let Err(TrySendError::Full(connection) | TrySendError::Closed(connection)) =
            self.idle_tx.try_send(connection)
        {
            tracing::debug!(
                "idle queue for `{}` is full, closing connection to {}",
                self.name,
                self.endpoints[connection.endpoint].address
            );
        }
    }
}

impl<C> fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("name", &self.name)
            .field("endpoints", &self.endpoints)
            .field("capacity", &self.capacity)
            .field("live", &self.live.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// An idle connection taken out for a heartbeat.
///
/// If the acquiring future is dropped before the heartbeat settles, the
/// connection goes back to the idle queue instead of being closed.
struct Checkout<'a, C> {
    pool: &'a ConnectionPool<C>,
    pooled: Option<PooledConnection<C>>,
}

impl<'a, C> Checkout<'a, C> {
    fn new(pool: &'a ConnectionPool<C>, pooled: PooledConnection<C>) -> Self {
        Self {
            pool,
            pooled: Some(pooled),
        }
    }

    async fn heartbeat(&self) -> Result<(), BoxError> {
        let Some(pooled) = &self.pooled else {
            return Ok(());
        };

        let probe = self.pool.prober.probe(&pooled.connection);
        within(self.pool.config.heartbeat_timeout, probe).await
    }

    fn disarm(mut self) -> Option<PooledConnection<C>> {
        self.pooled.take()
    }
}

impl<C> Drop for Checkout<'_, C> {
    fn drop(&mut self) {
        if let Some(pooled) = self.pooled.take() {
            tracing::debug!(
                "acquire on `{}` was cancelled, returning connection to {}",
                self.pool.name,
                self.pool.endpoints[pooled.endpoint].address
            );
            self.pool.park(pooled);
        }
    }
}

/// Runs `fut`, failing it once `limit` elapses.
async fn within<T, F>(limit: Option<Duration>, fut: F) -> Result<T, BoxError>
where
    F: Future<Output = Result<T, BoxError>>,
{
    let Some(limit) = limit else {
        return fut.await;
    };

    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(elapsed) => Err(elapsed.into()),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashSet, VecDeque};
    use std::sync::atomic::AtomicBool;

    use futures::FutureExt;
    use futures::future::{self, BoxFuture};

    use super::*;

    #[derive(Debug)]
    struct TestConn {
        id: usize,
        address: String,
    }

    // Factory whose outcomes are scripted per dial call, in call order.
    #[derive(Default)]
    struct ScriptedFactory {
        dials: AtomicUsize,
        script: Mutex<VecDeque<bool>>,
        down: Mutex<HashSet<String>>,
        stalled: Mutex<HashSet<String>>,
    }

    impl ScriptedFactory {
        fn scripted(outcomes: impl IntoIterator<Item = bool>) -> Self {
            Self {
                script: Mutex::new(outcomes.into_iter().collect()),
                ..Default::default()
            }
        }

        fn take_down(&self, address: &str) {
            self.down.lock().unwrap().insert(address.to_string());
        }

        fn stall(&self, address: &str) {
            self.stalled.lock().unwrap().insert(address.to_string());
        }

        fn dials(&self) -> usize {
            self.dials.load(Ordering::SeqCst)
        }
    }

    impl ConnectionFactory<TestConn> for ScriptedFactory {
        fn connect<'a>(
            &'a self,
            endpoint: &'a EndpointDescriptor,
        ) -> BoxFuture<'a, Result<TestConn, BoxError>> {
            let id = self.dials.fetch_add(1, Ordering::SeqCst);
            let address = endpoint.address.clone();

            if self.stalled.lock().unwrap().contains(&address) {
                return future::pending().boxed();
            }

            let scripted = self.script.lock().unwrap().pop_front().unwrap_or(true);
            let up = scripted && !self.down.lock().unwrap().contains(&address);

            let result = if up {
                Ok(TestConn { id, address })
            } else {
                Err(format!("{address}: connection refused").into())
            };

            future::ready(result).boxed()
        }
    }

    #[derive(Default)]
    struct TestProber {
        probes: AtomicUsize,
        unhealthy: Mutex<HashSet<String>>,
        fail_every: usize,
        stall: AtomicBool,
    }

    impl TestProber {
        fn failing_every(n: usize) -> Self {
            Self {
                fail_every: n,
                ..Default::default()
            }
        }

        fn mark_unhealthy(&self, address: &str) {
            self.unhealthy.lock().unwrap().insert(address.to_string());
        }

        fn probes(&self) -> usize {
            self.probes.load(Ordering::SeqCst)
        }
    }

    impl HealthProber<TestConn> for TestProber {
        fn probe<'a>(&'a self, connection: &'a TestConn) -> BoxFuture<'a, Result<(), BoxError>> {
            let n = self.probes.fetch_add(1, Ordering::SeqCst) + 1;

            if self.stall.load(Ordering::SeqCst) {
                return future::pending().boxed();
            }

            let unhealthy = self.unhealthy.lock().unwrap().contains(&connection.address)
                || (self.fail_every > 0 && n % self.fail_every == 0);

            let result = if unhealthy {
                Err(format!("heartbeat to {} failed", connection.address).into())
            } else {
                Ok(())
            };

            future::ready(result).boxed()
        }
    }

    fn descriptors(addresses: &[&str]) -> Vec<EndpointDescriptor> {
        addresses.iter().copied().map(EndpointDescriptor::new).collect()
    }

    async fn create_pool(
        factory: &Arc<ScriptedFactory>,
        prober: &Arc<TestProber>,
        addresses: &[&str],
        config: PoolConfig,
    ) -> Result<ConnectionPool<TestConn>> {
        let factory: Arc<dyn ConnectionFactory<TestConn>> = factory.clone();
        let prober: Arc<dyn HealthProber<TestConn>> = prober.clone();
        ConnectionPool::new("test", descriptors(addresses), config, factory, prober).await
    }

    // PoolConfig tests

    #[test]
    fn config_defaults() {
        let config = PoolConfig::default();

        assert_eq!(config.connections_per_endpoint, 1);
        assert!(config.dial_timeout.is_none());
        assert!(config.heartbeat_timeout.is_none());
    }

    #[test]
    fn config_with_deadlines() {
        let config = PoolConfig::new(4)
            .dial_timeout(Duration::from_secs(5))
            .heartbeat_timeout(Duration::from_millis(500));

        assert_eq!(config.connections_per_endpoint, 4);
        assert_eq!(config.dial_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.heartbeat_timeout, Some(Duration::from_millis(500)));
    }

    // Creation tests

    #[tokio::test]
    async fn create_rejects_empty_endpoints() {
        let factory = Arc::new(ScriptedFactory::default());
        let prober = Arc::new(TestProber::default());

        let err = create_pool(&factory, &prober, &[], PoolConfig::new(2)).await.unwrap_err();

        assert!(matches!(err, Error::InvalidConfig(_)));
        assert_eq!(factory.dials(), 0);
    }

    #[tokio::test]
    async fn create_rejects_zero_connections_per_endpoint() {
        let factory = Arc::new(ScriptedFactory::default());
        let prober = Arc::new(TestProber::default());

        let err = create_pool(&factory, &prober, &["a:1"], PoolConfig::new(0)).await.unwrap_err();

        assert!(matches!(err, Error::InvalidConfig(_)));
        assert_eq!(factory.dials(), 0);
    }

    #[tokio::test]
    async fn create_rejects_capacity_beyond_queue_limit() {
        let factory = Arc::new(ScriptedFactory::default());
        let prober = Arc::new(TestProber::default());

        let config = PoolConfig::new(Semaphore::MAX_PERMITS + 1);
        let err = create_pool(&factory, &prober, &["a:1"], config).await.unwrap_err();

        assert!(matches!(err, Error::InvalidConfig(_)));
        assert_eq!(factory.dials(), 0);
    }

    #[tokio::test]
    async fn create_rejects_blank_address() {
        let factory = Arc::new(ScriptedFactory::default());
        let prober = Arc::new(TestProber::default());

        let err = create_pool(&factory, &prober, &["a:1", " "], PoolConfig::new(1)).await.unwrap_err();

        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn create_fails_when_nothing_connects() {
        let factory = Arc::new(ScriptedFactory::scripted([false; 4]));
        let prober = Arc::new(TestProber::default());

        let err = create_pool(&factory, &prober, &["a:1", "b:1"], PoolConfig::new(2)).await.unwrap_err();

        assert!(matches!(err, Error::Fatal(ref name) if name == "test"));
        assert_eq!(factory.dials(), 4);
    }

    #[tokio::test]
    async fn create_tracks_exactly_the_established_connections() {
        let factory = Arc::new(ScriptedFactory::scripted([true, false, true, false, false, true]));
        let prober = Arc::new(TestProber::default());

        let pool = create_pool(&factory, &prober, &["a:1", "b:1", "c:1"], PoolConfig::new(2))
            .await
            .unwrap();

        assert_eq!(pool.capacity(), 6);
        assert_eq!(pool.live_connections(), 3);
        assert_eq!(pool.idle_connections(), 3);
    }

    #[tokio::test]
    async fn create_dials_every_slot_in_order() {
        let factory = Arc::new(ScriptedFactory::default());
        let prober = Arc::new(TestProber::default());

        let pool = create_pool(&factory, &prober, &["a:1", "b:1"], PoolConfig::new(2))
            .await
            .unwrap();

        let mut held = Vec::new();
        while let Ok(conn) = pool.acquire().await {
            held.push(conn);
        }

        let seen: Vec<(usize, String)> = held
            .iter()
            .map(|conn| (conn.endpoint_index(), conn.address.clone()))
            .collect();

        assert_eq!(
            seen,
            vec![
                (0, "a:1".to_string()),
                (0, "a:1".to_string()),
                (1, "b:1".to_string()),
                (1, "b:1".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn create_skips_timed_out_dials() {
        let factory = Arc::new(ScriptedFactory::default());
        factory.stall("slow:1");
        let prober = Arc::new(TestProber::default());

        let config = PoolConfig::new(1).dial_timeout(Duration::from_millis(20));
        let pool = create_pool(&factory, &prober, &["slow:1", "fast:1"], config).await.unwrap();

        assert_eq!(pool.live_connections(), 1);
        let conn = pool.acquire().await.unwrap();
        assert_eq!(conn.address, "fast:1");
    }

    // Acquire / release tests

    #[tokio::test]
    async fn three_of_four_scenario() {
        // Endpoint b's second slot fails.
        let factory = Arc::new(ScriptedFactory::scripted([true, true, true, false]));
        let prober = Arc::new(TestProber::default());

        let pool = create_pool(&factory, &prober, &["a:1", "b:1"], PoolConfig::new(2))
            .await
            .unwrap();

        assert_eq!(pool.capacity(), 4);
        assert_eq!(pool.live_connections(), 3);

        let first = pool.acquire().await.unwrap();
        let second = pool.acquire().await.unwrap();
        let third = pool.acquire().await.unwrap();

        let ids: HashSet<usize> = [first.id, second.id, third.id].into_iter().collect();
        assert_eq!(ids.len(), 3);

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, Error::PoolExhausted(_)));

        pool.release(second).unwrap();
        let again = pool.acquire().await.unwrap();

        assert!(ids.contains(&again.id));
        assert_eq!(factory.dials(), 4);
    }

    #[tokio::test]
    async fn acquire_on_empty_queue_returns_immediately() {
        let factory = Arc::new(ScriptedFactory::default());
        let prober = Arc::new(TestProber::default());

        let pool = create_pool(&factory, &prober, &["a:1"], PoolConfig::new(1)).await.unwrap();
        let _held = pool.acquire().await.unwrap();

        let probes = prober.probes();
        let err = pool.acquire().await.unwrap_err();

        assert!(matches!(err, Error::PoolExhausted(ref name) if name == "test"));
        assert_eq!(prober.probes(), probes);
        assert_eq!(factory.dials(), 1);
    }

    #[tokio::test]
    async fn healthy_heartbeat_never_redials() {
        let factory = Arc::new(ScriptedFactory::default());
        let prober = Arc::new(TestProber::default());

        let pool = create_pool(&factory, &prober, &["a:1", "b:1"], PoolConfig::new(3))
            .await
            .unwrap();

        for _ in 0..50 {
            let conn = pool.acquire().await.unwrap();
            pool.release(conn).unwrap();
        }

        assert_eq!(factory.dials(), 6);
        assert_eq!(prober.probes(), 50);
        assert_eq!(pool.live_connections(), 6);
    }

    #[tokio::test]
    async fn failed_heartbeat_redials_the_same_endpoint() {
        let factory = Arc::new(ScriptedFactory::default());
        let prober = Arc::new(TestProber::default());

        let pool = create_pool(&factory, &prober, &["a:1", "b:1"], PoolConfig::new(1))
            .await
            .unwrap();

        prober.mark_unhealthy("a:1");

        let conn = pool.acquire().await.unwrap();

        // Connection 0 went to a:1 and failed its heartbeat; 2 is its replacement.
        assert_eq!(conn.id, 2);
        assert_eq!(conn.endpoint_index(), 0);
        assert_eq!(conn.address, "a:1");
        assert_eq!(factory.dials(), 3);
        assert_eq!(pool.live_connections(), 2);
    }

    #[tokio::test]
    async fn failed_redial_moves_on_to_the_next_connection() {
        let factory = Arc::new(ScriptedFactory::default());
        let prober = Arc::new(TestProber::default());

        let pool = create_pool(&factory, &prober, &["a:1", "b:1"], PoolConfig::new(1))
            .await
            .unwrap();

        prober.mark_unhealthy("a:1");
        factory.take_down("a:1");

        let conn = pool.acquire().await.unwrap();

        assert_eq!(conn.address, "b:1");
        assert_eq!(pool.live_connections(), 1);
    }

    #[tokio::test]
    async fn persistent_failure_is_bounded() {
        let factory = Arc::new(ScriptedFactory::default());
        let prober = Arc::new(TestProber::default());

        let pool = create_pool(&factory, &prober, &["a:1"], PoolConfig::new(3)).await.unwrap();

        prober.mark_unhealthy("a:1");
        factory.take_down("a:1");

        let err = pool.acquire().await.unwrap_err();

        assert!(matches!(err, Error::PoolExhausted(_)));
        // One redial per idle connection, then give up.
        assert_eq!(factory.dials(), 3 + 3);
        assert_eq!(prober.probes(), 3);
        assert_eq!(pool.live_connections(), 0);

        // Once drained, later calls report exhaustion without dialing.
        assert!(pool.acquire().await.is_err());
        assert_eq!(factory.dials(), 6);
    }

    #[tokio::test]
    async fn heartbeat_timeout_counts_as_failure() {
        let factory = Arc::new(ScriptedFactory::default());
        let prober = Arc::new(TestProber::default());

        let config = PoolConfig::new(1).heartbeat_timeout(Duration::from_millis(20));
        let pool = create_pool(&factory, &prober, &["a:1"], config).await.unwrap();

        prober.stall.store(true, Ordering::SeqCst);
        let conn = pool.acquire().await.unwrap();

        assert_eq!(conn.id, 1);
        assert_eq!(factory.dials(), 2);
    }

    #[tokio::test]
    async fn cancelled_acquire_returns_the_connection() {
        let factory = Arc::new(ScriptedFactory::default());
        let prober = Arc::new(TestProber::default());

        let pool = create_pool(&factory, &prober, &["a:1"], PoolConfig::new(1)).await.unwrap();

        prober.stall.store(true, Ordering::SeqCst);
        let cancelled = tokio::time::timeout(Duration::from_millis(20), pool.acquire()).await;
        assert!(cancelled.is_err());

        assert_eq!(pool.live_connections(), 1);
        assert_eq!(pool.idle_connections(), 1);

        prober.stall.store(false, Ordering::SeqCst);
        let conn = pool.acquire().await.unwrap();

        assert_eq!(conn.id, 0);
        assert_eq!(factory.dials(), 1);
    }

    #[tokio::test]
    async fn release_beyond_capacity_drops_the_connection() {
        let factory = Arc::new(ScriptedFactory::default());
        let prober = Arc::new(TestProber::default());

        let pool = create_pool(&factory, &prober, &["a:1", "b:1"], PoolConfig::new(1))
            .await
            .unwrap();

        let extra = PooledConnection::new(
            TestConn {
                id: 99,
                address: "a:1".to_string(),
            },
            0,
            &pool.live,
        );
        assert_eq!(pool.live_connections(), 3);

        pool.release(extra).unwrap();

        assert_eq!(pool.idle_connections(), pool.capacity());
        assert_eq!(pool.live_connections(), 2);
    }

    #[tokio::test]
    async fn release_from_another_pool_is_rejected() {
        let factory = Arc::new(ScriptedFactory::default());
        let prober = Arc::new(TestProber::default());

        let left = create_pool(&factory, &prober, &["a:1"], PoolConfig::new(1)).await.unwrap();
        let right = create_pool(&factory, &prober, &["b:1"], PoolConfig::new(1)).await.unwrap();

        let conn = left.acquire().await.unwrap();
        let err = right.release(conn).unwrap_err();

        assert!(matches!(err, Error::ReleaseMismatch(_)));
        assert_eq!(right.idle_connections(), 1);
        assert_eq!(left.live_connections(), 0);
    }

    #[tokio::test]
    async fn dropping_a_loan_untracks_it() {
        let factory = Arc::new(ScriptedFactory::default());
        let prober = Arc::new(TestProber::default());

        let pool = create_pool(&factory, &prober, &["a:1"], PoolConfig::new(2)).await.unwrap();
        let conn = pool.acquire().await.unwrap();
        drop(conn);

        assert_eq!(pool.live_connections(), 1);
        assert_eq!(pool.idle_connections(), 1);
    }

    // Concurrency tests

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_keep_ownership_consistent() {
        let factory = Arc::new(ScriptedFactory::default());
        let prober = Arc::new(TestProber::failing_every(5));

        let pool = Arc::new(
            create_pool(&factory, &prober, &["a:1", "b:1", "c:1"], PoolConfig::new(4))
                .await
                .unwrap(),
        );

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let pool = Arc::clone(&pool);
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    assert!(pool.idle_connections() <= pool.capacity());
                    assert!(pool.live_connections() <= pool.capacity());

                    match pool.acquire().await {
                        Ok(conn) => {
                            let endpoint = &pool.endpoints()[conn.endpoint_index()];
                            assert_eq!(conn.address, endpoint.address);
                            tokio::task::yield_now().await;
                            pool.release(conn).unwrap();
                        }

                        Err(Error::PoolExhausted(_)) => tokio::task::yield_now().await,
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }

        assert!(factory.dials() > 12, "expected some redials");
        assert_eq!(pool.live_connections(), 12);
        assert_eq!(pool.idle_connections(), 12);
    }
}
