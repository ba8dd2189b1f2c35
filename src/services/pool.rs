use crate::errors::ToolError;
use crate::services::keystore::Credential;
use crate::services::logger::Logger;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

/// Partition key for every piece of per-target state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostKey {
    pub host: String,
    pub port: u16,
    pub username: String,
}

impl HostKey {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
        }
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

/// One authenticated connection, able to spawn multiple channels. Owned
/// exclusively by its current lessee between lease and release.
pub struct Transport<C> {
    pub conn: C,
    pub key: HostKey,
    pub seq: u64,
    pub created_at: Instant,
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Conn: Send + 'static;

    /// One authentication attempt. Retry policy lives in the pool.
    async fn connect(&self, key: &HostKey, credential: &Credential) -> Result<Self::Conn, ToolError>;

    fn close(&self, conn: Self::Conn);
}

struct IdleTransport<C> {
    transport: Transport<C>,
    since: Instant,
}

struct PoolEntry<C> {
    idle: Vec<IdleTransport<C>>,
    in_use: usize,
    connecting: bool,
    sem: Arc<Semaphore>,
    notify: Arc<Notify>,
}

impl<C> PoolEntry<C> {
    fn new(max_per_host: usize) -> Self {
        Self {
            idle: Vec::new(),
            in_use: 0,
            connecting: false,
            sem: Arc::new(Semaphore::new(max_per_host)),
            notify: Arc::new(Notify::new()),
        }
    }
}

struct PoolInner<C: Connector> {
    connector: Arc<C>,
    max_per_host: usize,
    idle_ttl: Duration,
    retry_count: u32,
    retry_delay: Duration,
    entries: Mutex<HashMap<HostKey, PoolEntry<C::Conn>>>,
    shutting_down: AtomicBool,
    transport_seq: AtomicU64,
    logger: Logger,
}

/// Per-host bounded pool of authenticated transports.
///
/// Concurrency is bounded by a fair semaphore per HostKey, so waiters are
/// served in FIFO order and `in_use + idle` can never exceed the per-host
/// quota (a transport is only dialed while holding a permit and the idle set
/// is empty). Concurrent first connects coalesce: whoever flips the
/// `connecting` flag performs the only authentication attempt, everyone else
/// parks on the entry's Notify and picks the transport up once it is
/// released.
pub struct ConnectionPool<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Exclusive borrow of a Transport. Must be settled with `release` or
/// `discard`; dropping it unsettled (a panicked task) closes the connection
/// and repairs the quota bookkeeping.
pub struct Lease<C: Connector> {
    inner: Arc<PoolInner<C>>,
    key: HostKey,
    transport: Option<Transport<C::Conn>>,
    _permit: OwnedSemaphorePermit,
    settled: bool,
}

impl<C: Connector> fmt::Debug for Lease<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("key", &self.key)
            .field("has_transport", &self.transport.is_some())
            .finish()
    }
}

impl<C> fmt::Debug for Transport<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("key", &self.key)
            .field("seq", &self.seq)
            .finish()
    }
}

impl<C: Connector> Lease<C> {
    pub fn key(&self) -> &HostKey {
        &self.key
    }

    /// Moves the transport out so it can travel into a blocking task.
    /// `put_back` must follow before release, otherwise release degrades to
    /// forget-and-repair.
    pub fn take_transport(&mut self) -> Option<Transport<C::Conn>> {
        self.transport.take()
    }

    pub fn put_back(&mut self, transport: Transport<C::Conn>) {
        self.transport = Some(transport);
    }

    /// Returns the transport to the pool (or hands it to the sweeper on
    /// shutdown).
    pub fn release(mut self) {
        self.settled = true;
        let transport = self.transport.take();
        self.inner.checkin(&self.key, transport);
    }

    /// Closes the transport instead of pooling it (broken channel, failed
    /// handshake mid-command).
    pub fn discard(mut self) {
        self.settled = true;
        let transport = self.transport.take();
        self.inner.forget(&self.key, transport);
    }
}

impl<C: Connector> Drop for Lease<C> {
    fn drop(&mut self) {
        if !self.settled {
            let transport = self.transport.take();
            self.inner.forget(&self.key, transport);
        }
    }
}

/// Clears the `connecting` flag if the dialing future is dropped mid-flight.
struct DialGuard<C: Connector> {
    inner: Arc<PoolInner<C>>,
    key: HostKey,
    armed: bool,
}

impl<C: Connector> Drop for DialGuard<C> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.clear_connecting(&self.key);
        }
    }
}

impl<C: Connector> ConnectionPool<C> {
    pub fn new(
        connector: C,
        max_per_host: usize,
        idle_ttl: Duration,
        retry_count: u32,
        retry_delay: Duration,
        logger: Logger,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                connector: Arc::new(connector),
                max_per_host: max_per_host.max(1),
                idle_ttl,
                retry_count: retry_count.max(1),
                retry_delay,
                entries: Mutex::new(HashMap::new()),
                shutting_down: AtomicBool::new(false),
                transport_seq: AtomicU64::new(0),
                logger: logger.child("pool"),
            }),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    pub async fn lease(&self, key: &HostKey, credential: &Credential) -> Result<Lease<C>, ToolError> {
        let inner = &self.inner;
        if inner.shutting_down.load(Ordering::SeqCst) {
            return Err(pool_down(key));
        }

        let (sem, notify) = {
            let mut entries = inner.entries.lock().unwrap_or_else(|e| e.into_inner());
            let entry = entries
                .entry(key.clone())
                .or_insert_with(|| PoolEntry::new(inner.max_per_host));
            (entry.sem.clone(), entry.notify.clone())
        };

        // Fair queue: dropping this future while waiting removes us from it.
        let permit = sem
            .acquire_owned()
            .await
            .map_err(|_| pool_down(key))?;

        loop {
            if inner.shutting_down.load(Ordering::SeqCst) {
                return Err(pool_down(key));
            }

            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            enum Plan<T> {
                Take(T),
                Dial,
                Park,
            }

            let plan = {
                let mut entries = inner.entries.lock().unwrap_or_else(|e| e.into_inner());
                let entry = entries
                    .entry(key.clone())
                    .or_insert_with(|| PoolEntry::new(inner.max_per_host));
                if let Some(idle) = entry.idle.pop() {
                    entry.in_use += 1;
                    Plan::Take(idle.transport)
                } else if !entry.connecting {
                    entry.connecting = true;
                    Plan::Dial
                } else {
                    Plan::Park
                }
            };

            match plan {
                Plan::Take(transport) => {
                    return Ok(Lease {
                        inner: inner.clone(),
                        key: key.clone(),
                        transport: Some(transport),
                        _permit: permit,
                        settled: false,
                    });
                }
                Plan::Dial => {
                    let mut guard = DialGuard {
                        inner: inner.clone(),
                        key: key.clone(),
                        armed: true,
                    };
                    let dialed = self.dial(key, credential).await;
                    guard.armed = false;
                    drop(guard);

                    let mut entries = inner.entries.lock().unwrap_or_else(|e| e.into_inner());
                    let entry = entries
                        .entry(key.clone())
                        .or_insert_with(|| PoolEntry::new(inner.max_per_host));
                    entry.connecting = false;
                    match dialed {
                        Ok(conn) => {
                            entry.in_use += 1;
                            let seq = inner.transport_seq.fetch_add(1, Ordering::SeqCst) + 1;
                            let transport = Transport {
                                conn,
                                key: key.clone(),
                                seq,
                                created_at: Instant::now(),
                            };
                            // No wake-up here: parked waiters want a pooled
                            // transport, which appears at release time.
                            return Ok(Lease {
                                inner: inner.clone(),
                                key: key.clone(),
                                transport: Some(transport),
                                _permit: permit,
                                settled: false,
                            });
                        }
                        Err(err) => {
                            // Parked waiters observe the failure by waking
                            // up and dialing on their own, per retry policy.
                            entry.notify.notify_waiters();
                            return Err(err);
                        }
                    }
                }
                Plan::Park => {
                    notified.await;
                }
            }
        }
    }

    async fn dial(&self, key: &HostKey, credential: &Credential) -> Result<C::Conn, ToolError> {
        let inner = &self.inner;
        let mut last_err: Option<ToolError> = None;
        for attempt in 0..inner.retry_count {
            if attempt > 0 {
                tokio::time::sleep(inner.retry_delay).await;
            }
            if inner.shutting_down.load(Ordering::SeqCst) {
                return Err(pool_down(key));
            }
            match inner.connector.connect(key, credential).await {
                Ok(conn) => {
                    inner.logger.debug(
                        "connected",
                        Some(&serde_json::json!({"target": key.to_string(), "attempt": attempt + 1})),
                    );
                    return Ok(conn);
                }
                Err(err) if err.kind == crate::errors::ToolErrorKind::ConnectError => {
                    inner.logger.warn(
                        "connect attempt failed",
                        Some(&serde_json::json!({
                            "target": key.to_string(),
                            "attempt": attempt + 1,
                            "error": err.message,
                        })),
                    );
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err
            .unwrap_or_else(|| ToolError::connect("connection failed").with_host(key.host.clone())))
    }

    /// One reaper pass: closes idle transports older than the TTL. Closing
    /// happens outside the entries lock.
    pub fn reap_idle_once(&self) -> usize {
        let inner = &self.inner;
        let now = Instant::now();
        let mut expired = Vec::new();
        {
            let mut entries = inner.entries.lock().unwrap_or_else(|e| e.into_inner());
            for entry in entries.values_mut() {
                let (old, kept): (Vec<_>, Vec<_>) = entry
                    .idle
                    .drain(..)
                    .partition(|idle| now.duration_since(idle.since) > inner.idle_ttl);
                entry.idle = kept;
                expired.extend(old);
            }
        }
        let count = expired.len();
        for idle in expired {
            inner.logger.debug(
                "reaped idle transport",
                Some(&serde_json::json!({
                    "target": idle.transport.key.to_string(),
                    "seq": idle.transport.seq,
                })),
            );
            inner.connector.close(idle.transport.conn);
        }
        count
    }

    /// Background reaper; wakes at most every idle_ttl/2.
    pub fn spawn_reaper(&self) -> tokio::task::JoinHandle<()> {
        use crate::constants::pool::{REAP_INTERVAL_MAX_SECONDS, REAP_INTERVAL_MIN_SECONDS};
        let pool = self.clone();
        let interval = Duration::from_secs(
            (pool.inner.idle_ttl.as_secs() / 2).clamp(REAP_INTERVAL_MIN_SECONDS, REAP_INTERVAL_MAX_SECONDS),
        );
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if pool.inner.shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                let pool = pool.clone();
                let _ = tokio::task::spawn_blocking(move || pool.reap_idle_once()).await;
            }
        })
    }

    /// Refuses new leases, cancels waiters, closes idle transports, then
    /// waits a grace period for in-flight work before returning.
    pub async fn shutdown(&self) {
        use crate::constants::pool::{SHUTDOWN_GRACE_MS, SHUTDOWN_POLL_MS};
        let inner = &self.inner;
        inner.shutting_down.store(true, Ordering::SeqCst);

        let mut to_close = Vec::new();
        let mut sems = Vec::new();
        {
            let mut entries = inner.entries.lock().unwrap_or_else(|e| e.into_inner());
            for entry in entries.values_mut() {
                sems.push(entry.sem.clone());
                entry.notify.notify_waiters();
                to_close.extend(entry.idle.drain(..));
            }
        }
        for sem in sems {
            sem.close();
        }
        for idle in to_close {
            inner.connector.close(idle.transport.conn);
        }

        let deadline = Instant::now() + Duration::from_millis(SHUTDOWN_GRACE_MS);
        loop {
            let busy: usize = {
                let entries = inner.entries.lock().unwrap_or_else(|e| e.into_inner());
                entries.values().map(|entry| entry.in_use).sum()
            };
            if busy == 0 || Instant::now() >= deadline {
                if busy > 0 {
                    inner.logger.warn(
                        "shutdown grace expired with transports in use",
                        Some(&serde_json::json!({"in_use": busy})),
                    );
                }
                break;
            }
            tokio::time::sleep(Duration::from_millis(SHUTDOWN_POLL_MS)).await;
        }
        inner.logger.info("pool shut down", None);
    }

    pub fn stats(&self) -> Value {
        let inner = &self.inner;
        let entries = inner.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut hosts = Vec::new();
        let mut idle_total = 0usize;
        let mut in_use_total = 0usize;
        for (key, entry) in entries.iter() {
            idle_total += entry.idle.len();
            in_use_total += entry.in_use;
            hosts.push(serde_json::json!({
                "target": key.to_string(),
                "idle": entry.idle.len(),
                "in_use": entry.in_use,
                "connecting": entry.connecting,
            }));
        }
        serde_json::json!({
            "max_per_host": inner.max_per_host,
            "idle": idle_total,
            "in_use": in_use_total,
            "hosts": hosts,
        })
    }
}

impl<C: Connector> PoolInner<C> {
    fn checkin(self: &Arc<Self>, key: &HostKey, transport: Option<Transport<C::Conn>>) {
        let Some(transport) = transport else {
            self.forget(key, None);
            return;
        };
        if self.shutting_down.load(Ordering::SeqCst) {
            self.forget(key, Some(transport));
            return;
        }
        let notify = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            let Some(entry) = entries.get_mut(key) else {
                drop(entries);
                self.connector.close(transport.conn);
                return;
            };
            entry.in_use = entry.in_use.saturating_sub(1);
            entry.idle.push(IdleTransport {
                transport,
                since: Instant::now(),
            });
            entry.notify.clone()
        };
        notify.notify_waiters();
    }

    /// Drops the transport (if any survived) and repairs the accounting.
    fn forget(self: &Arc<Self>, key: &HostKey, transport: Option<Transport<C::Conn>>) {
        let notify = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.get_mut(key).map(|entry| {
                entry.in_use = entry.in_use.saturating_sub(1);
                entry.notify.clone()
            })
        };
        if let Some(transport) = transport {
            self.connector.close(transport.conn);
        }
        if let Some(notify) = notify {
            notify.notify_waiters();
        }
    }

    fn clear_connecting(self: &Arc<Self>, key: &HostKey) {
        let notify = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.get_mut(key).map(|entry| {
                entry.connecting = false;
                entry.notify.clone()
            })
        };
        if let Some(notify) = notify {
            notify.notify_waiters();
        }
    }
}

fn pool_down(key: &HostKey) -> ToolError {
    ToolError::pool_shutting_down("service is shutting down; no new connections")
        .with_host(key.host.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct FakeConnector {
        connects: AtomicUsize,
        closes: AtomicUsize,
        fail: AtomicBool,
        delay: Duration,
        conn_seq: AtomicUsize,
    }

    impl FakeConnector {
        fn new() -> Self {
            Self {
                connects: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                delay: Duration::from_millis(0),
                conn_seq: AtomicUsize::new(0),
            }
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl Connector for Arc<FakeConnector> {
        type Conn = usize;

        async fn connect(&self, key: &HostKey, _credential: &Credential) -> Result<usize, ToolError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(ToolError::connect("dial refused").with_host(key.host.clone()));
            }
            Ok(self.conn_seq.fetch_add(1, Ordering::SeqCst) + 1)
        }

        fn close(&self, _conn: usize) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pool_with(
        connector: Arc<FakeConnector>,
        max_per_host: usize,
        idle_ttl: Duration,
    ) -> ConnectionPool<Arc<FakeConnector>> {
        ConnectionPool::new(
            connector,
            max_per_host,
            idle_ttl,
            1,
            Duration::from_millis(1),
            Logger::new("test", "error"),
        )
    }

    fn key() -> HostKey {
        HostKey::new("h1", 22, "u")
    }

    fn cred() -> Credential {
        Credential::Password("pw".to_string())
    }

    #[tokio::test]
    async fn lease_reuses_released_transport() {
        let connector = Arc::new(FakeConnector::new());
        let pool = pool_with(connector.clone(), 5, Duration::from_secs(300));

        let lease = pool.lease(&key(), &cred()).await.expect("lease");
        lease.release();
        let lease = pool.lease(&key(), &cred()).await.expect("lease");
        lease.release();

        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn quota_blocks_excess_lease_until_release() {
        let connector = Arc::new(FakeConnector::new());
        let pool = pool_with(connector.clone(), 2, Duration::from_secs(300));

        let first = pool.lease(&key(), &cred()).await.expect("lease 1");
        let second = pool.lease(&key(), &cred()).await.expect("lease 2");

        let blocked = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.lease(&key(), &cred()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished(), "third lease must wait at quota");

        first.release();
        let third = blocked.await.expect("join").expect("lease 3");
        third.release();
        second.release();

        // quota never required a third connection
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_first_connects_authenticate_once() {
        let connector = Arc::new(FakeConnector::new().slow(Duration::from_millis(50)));
        let pool = pool_with(connector.clone(), 5, Duration::from_secs(300));

        let mut tasks = Vec::new();
        for _ in 0..2 {
            let pool = pool.clone();
            tasks.push(tokio::spawn(async move {
                let lease = pool.lease(&key(), &cred()).await.expect("lease");
                tokio::time::sleep(Duration::from_millis(10)).await;
                lease.release();
            }));
        }
        for task in tasks {
            task.await.expect("join");
        }

        assert_eq!(
            connector.connects.load(Ordering::SeqCst),
            1,
            "request storm must collapse into one authentication"
        );
    }

    #[tokio::test]
    async fn coalesced_waiter_observes_connect_failure() {
        let connector = Arc::new(FakeConnector::new().slow(Duration::from_millis(30)));
        connector.fail.store(true, Ordering::SeqCst);
        let pool = pool_with(connector.clone(), 5, Duration::from_secs(300));

        let loser = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.lease(&key(), &cred()).await })
        };
        let winner = pool.lease(&key(), &cred()).await;
        let loser = loser.await.expect("join");

        assert!(winner.is_err());
        let err = loser.expect_err("loser must fail too");
        assert_eq!(err.kind, crate::errors::ToolErrorKind::ConnectError);
    }

    #[tokio::test]
    async fn discard_frees_quota_for_waiting_lease() {
        let connector = Arc::new(FakeConnector::new());
        let pool = pool_with(connector.clone(), 1, Duration::from_secs(300));

        let holder = pool.lease(&key(), &cred()).await.expect("lease");
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.lease(&key(), &cred()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished(), "waiter must block at quota");

        holder.discard();
        let lease = waiter.await.expect("join").expect("waiter lease after discard");
        lease.release();
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
        assert_eq!(connector.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reaper_closes_only_expired_idle() {
        let connector = Arc::new(FakeConnector::new());
        let pool = pool_with(connector.clone(), 5, Duration::from_millis(20));

        let lease = pool.lease(&key(), &cred()).await.expect("lease");
        lease.release();
        assert_eq!(pool.reap_idle_once(), 0, "fresh idle survives");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.reap_idle_once(), 1);
        assert_eq!(connector.closes.load(Ordering::SeqCst), 1);

        // reaped space allows a fresh connect
        let lease = pool.lease(&key(), &cred()).await.expect("lease");
        lease.release();
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn reaper_never_touches_leased_transports() {
        let connector = Arc::new(FakeConnector::new());
        let pool = pool_with(connector.clone(), 5, Duration::from_millis(1));

        let lease = pool.lease(&key(), &cred()).await.expect("lease");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.reap_idle_once(), 0);
        lease.release();
    }

    #[tokio::test]
    async fn shutdown_refuses_leases_and_cancels_waiters() {
        let connector = Arc::new(FakeConnector::new());
        let pool = pool_with(connector.clone(), 1, Duration::from_secs(300));

        let holder = pool.lease(&key(), &cred()).await.expect("lease");
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.lease(&key(), &cred()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let shutdown = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.shutdown().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = waiter.await.expect("join").expect_err("waiter must be cancelled");
        assert_eq!(err.kind, crate::errors::ToolErrorKind::PoolShuttingDown);

        holder.release();
        shutdown.await.expect("join");

        let err = pool.lease(&key(), &cred()).await.expect_err("no leases after shutdown");
        assert_eq!(err.kind, crate::errors::ToolErrorKind::PoolShuttingDown);
        // the in-flight transport was closed on release
        assert_eq!(connector.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_lease_repairs_quota() {
        let connector = Arc::new(FakeConnector::new());
        let pool = pool_with(connector.clone(), 1, Duration::from_secs(300));

        {
            let _lease = pool.lease(&key(), &cred()).await.expect("lease");
            // dropped without release: simulates a panicked task
        }
        let lease = pool.lease(&key(), &cred()).await.expect("quota must recover");
        lease.release();
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stats_reflect_idle_and_in_use() {
        let connector = Arc::new(FakeConnector::new());
        let pool = pool_with(connector.clone(), 5, Duration::from_secs(300));

        let lease = pool.lease(&key(), &cred()).await.expect("lease");
        let stats = pool.stats();
        assert_eq!(stats.get("in_use").and_then(|v| v.as_u64()), Some(1));
        lease.release();
        let stats = pool.stats();
        assert_eq!(stats.get("idle").and_then(|v| v.as_u64()), Some(1));
        assert_eq!(stats.get("in_use").and_then(|v| v.as_u64()), Some(0));
    }
}
