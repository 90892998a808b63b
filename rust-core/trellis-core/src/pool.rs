//! # Connection Pool
//!
//! Keyed pool of lazily-opened connections.
//!
//! - `acquire` never performs I/O: new connections start unconnected and only
//!   open on [`PooledConnection::ensure_connected`]
//! - Each key has its own capacity; live connections (leased + idle) never
//!   exceed `max_size`
//! - An identity index maps every live connection id to its key, so release
//!   finds the owning pool in O(1). Ids leave the index only when a connection
//!   is discarded, never on release
//! - Dropping a lease returns it to its pool
//!
//! All bookkeeping for a call happens under one lock acquisition, so pools can
//! be shared across tasks.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Opens connections for a pool
pub trait Connector: Send + Sync + 'static {
    /// Connection handle
    type Handle: Send + 'static;

    /// Open a connection to `target`
    ///
    /// Called at most once per pooled connection, on first use.
    fn connect(&self, target: &str) -> impl Future<Output = Result<Self::Handle>> + Send;
}

/// Identifies a pool: driver, target and a credential fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoolKey(String);

impl PoolKey {
    /// Use a literal key
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Derive a key from connection parameters
    ///
    /// Credentials are folded in as a short SHA-256 fingerprint, so the same
    /// target with different credentials gets a separate pool while the
    /// secret never appears in keys or logs.
    #[must_use]
    pub fn derive(driver: &str, target: &str, credentials: Option<&str>) -> Self {
        match credentials {
            None => Self(format!("{driver}:{target}")),
            Some(secret) => {
                let digest = Sha256::digest(secret.as_bytes());
                let fingerprint: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
                Self(format!("{driver}:{target}#{fingerprint}"))
            }
        }
    }

    /// The key as a string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PoolKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Which idle connection `acquire` hands out at capacity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdlePolicy {
    /// Least recently released first
    #[default]
    LeastRecentlyReleased,
    /// Most recently released first
    MostRecentlyReleased,
}

/// What `acquire_wait` does when a pool is exhausted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExhaustionPolicy {
    /// Fail immediately with `PoolExhausted`
    #[default]
    Reject,
    /// Wait for a release, up to `wait_timeout_ms`
    Wait,
}

/// Per-key pool settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum live connections (leased + idle)
    pub max_size: usize,
    /// Idle selection order
    pub idle_policy: IdlePolicy,
    /// Behaviour of `acquire_wait` at capacity
    pub on_exhausted: ExhaustionPolicy,
    /// Wait bound for [`ExhaustionPolicy::Wait`]
    pub wait_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            idle_policy: IdlePolicy::default(),
            on_exhausted: ExhaustionPolicy::default(),
            wait_timeout_ms: 5_000,
        }
    }
}

impl PoolConfig {
    /// Config with the given capacity and defaults otherwise
    #[must_use]
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            max_size,
            ..Self::default()
        }
    }

    /// Wait bound as a duration
    #[must_use]
    pub const fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

/// Observed pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Live connections (leased + idle)
    pub live: usize,
    /// Configured capacity
    pub max_size: usize,
    /// Idle connections
    pub idle: usize,
}

/// Connection lifecycle state
pub enum ConnectionState<H> {
    /// Not opened yet
    Unconnected,
    /// Opened
    Connected(H),
}

impl<H> ConnectionState<H> {
    /// Whether the connection is open
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }
}

impl<H> fmt::Debug for ConnectionState<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unconnected => f.write_str("Unconnected"),
            Self::Connected(_) => f.write_str("Connected"),
        }
    }
}

struct IdleSlot<H> {
    id: u64,
    state: ConnectionState<H>,
}

struct KeyPool<H> {
    target: String,
    config: PoolConfig,
    live: usize,
    idle: VecDeque<IdleSlot<H>>,
    notify: Arc<Notify>,
}

impl<H> KeyPool<H> {
    fn take_idle(&mut self) -> Option<IdleSlot<H>> {
        match self.config.idle_policy {
            IdlePolicy::LeastRecentlyReleased => self.idle.pop_front(),
            IdlePolicy::MostRecentlyReleased => self.idle.pop_back(),
        }
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            live: self.live,
            max_size: self.config.max_size,
            idle: self.idle.len(),
        }
    }
}

struct Inner<H> {
    pools: HashMap<PoolKey, KeyPool<H>>,
    index: HashMap<u64, PoolKey>,
}

struct Shared<C: Connector> {
    connector: Arc<C>,
    inner: Mutex<Inner<C::Handle>>,
    next_id: AtomicU64,
}

impl<C: Connector> Shared<C> {
    fn lock(&self) -> MutexGuard<'_, Inner<C::Handle>> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn check_in(&self, id: u64, state: ConnectionState<C::Handle>) -> Result<()> {
        let mut inner = self.lock();
        let Inner { pools, index } = &mut *inner;
        let key = index.get(&id).ok_or(Error::UnknownConnection { id })?;
        let pool = pools
            .get_mut(key)
            .ok_or_else(|| Error::UnknownPool { key: key.to_string() })?;

        let connected = state.is_connected();
        pool.idle.push_back(IdleSlot { id, state });
        pool.notify.notify_one();
        debug!(pool = %key, connection_id = id, connected, idle = pool.idle.len(), "Connection released");
        Ok(())
    }
}

/// A leased connection
///
/// Returned to its pool on [`ConnectionPool::release`] or on drop.
pub struct PooledConnection<C: Connector> {
    id: u64,
    key: PoolKey,
    target: String,
    state: Option<ConnectionState<C::Handle>>,
    connector: Arc<C>,
    pool: Weak<Shared<C>>,
}

impl<C: Connector> PooledConnection<C> {
    /// Identity token, unique per connection for the pool's lifetime
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Owning pool key
    #[must_use]
    pub const fn key(&self) -> &PoolKey {
        &self.key
    }

    /// Whether the underlying handle has been opened
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.as_ref().is_some_and(ConnectionState::is_connected)
    }

    /// The open handle, if connected
    pub fn handle_mut(&mut self) -> Option<&mut C::Handle> {
        match self.state.as_mut() {
            Some(ConnectionState::Connected(handle)) => Some(handle),
            _ => None,
        }
    }

    /// Open the connection on first use and return the handle
    ///
    /// # Errors
    ///
    /// Propagates the connector's error; the connection stays unconnected
    /// and may be retried.
    pub async fn ensure_connected(&mut self) -> Result<&mut C::Handle> {
        if !self.is_connected() {
            let handle = self.connector.connect(&self.target).await?;
            info!(pool = %self.key, connection_id = self.id, "Connection opened");
            self.state = Some(ConnectionState::Connected(handle));
        }
        match self.state.as_mut() {
            Some(ConnectionState::Connected(handle)) => Ok(handle),
            _ => Err(Error::UnknownConnection { id: self.id }),
        }
    }

    fn belongs_to(&self, shared: &Arc<Shared<C>>) -> bool {
        std::ptr::eq(self.pool.as_ptr(), Arc::as_ptr(shared))
    }
}

impl<C: Connector> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        let Some(state) = self.state.take() else {
            return;
        };
        if let Some(shared) = self.pool.upgrade() {
            if let Err(e) = shared.check_in(self.id, state) {
                warn!(connection_id = self.id, error = %e, "Dropped connection could not be returned");
            }
        }
    }
}

/// Keyed connection pool
pub struct ConnectionPool<C: Connector> {
    shared: Arc<Shared<C>>,
}

impl<C: Connector> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Connector> fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("ConnectionPool")
            .field("pools", &inner.pools.keys().collect::<Vec<_>>())
            .field("connections", &inner.index.len())
            .finish()
    }
}

impl<C: Connector> ConnectionPool<C> {
    /// Create a pool manager without any keys
    pub fn new(connector: C) -> Self {
        Self {
            shared: Arc::new(Shared {
                connector: Arc::new(connector),
                inner: Mutex::new(Inner {
                    pools: HashMap::new(),
                    index: HashMap::new(),
                }),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Configure a key with its connection target
    ///
    /// Reconfiguring an existing key keeps its connections and applies the new
    /// limits to future acquires.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `max_size` is zero.
    pub fn configure(
        &self,
        key: PoolKey,
        target: impl Into<String>,
        config: PoolConfig,
    ) -> Result<()> {
        if config.max_size == 0 {
            return Err(Error::Config {
                message: format!("pool '{key}' must allow at least one connection"),
            });
        }

        let target = target.into();
        let mut inner = self.shared.lock();
        info!(pool = %key, max_size = config.max_size, policy = ?config.idle_policy, "Pool configured");
        match inner.pools.get_mut(&key) {
            Some(pool) => {
                pool.target = target;
                pool.config = config;
            }
            None => {
                inner.pools.insert(
                    key,
                    KeyPool {
                        target,
                        config,
                        live: 0,
                        idle: VecDeque::new(),
                        notify: Arc::new(Notify::new()),
                    },
                );
            }
        }
        Ok(())
    }

    /// Whether a key is configured
    #[must_use]
    pub fn contains(&self, key: &PoolKey) -> bool {
        self.shared.lock().pools.contains_key(key)
    }

    /// Lease a connection without performing I/O
    ///
    /// Below capacity a new, unconnected connection is created; at capacity an
    /// idle one is reused per the key's [`IdlePolicy`].
    ///
    /// # Errors
    ///
    /// - `Error::UnknownPool` if the key is not configured
    /// - `Error::PoolExhausted` if the key is at capacity with nothing idle
    pub fn acquire(&self, key: &PoolKey) -> Result<PooledConnection<C>> {
        let mut inner = self.shared.lock();
        let Inner { pools, index } = &mut *inner;
        let pool = pools
            .get_mut(key)
            .ok_or_else(|| Error::UnknownPool { key: key.to_string() })?;

        let (id, state) = if pool.live < pool.config.max_size {
            let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
            pool.live += 1;
            index.insert(id, key.clone());
            debug!(pool = %key, connection_id = id, live = pool.live, "Connection created");
            (id, ConnectionState::Unconnected)
        } else if let Some(slot) = pool.take_idle() {
            debug!(pool = %key, connection_id = slot.id, "Idle connection reused");
            (slot.id, slot.state)
        } else {
            warn!(pool = %key, max_size = pool.config.max_size, "Pool exhausted");
            return Err(Error::PoolExhausted {
                key: key.to_string(),
                max_size: pool.config.max_size,
            });
        };

        Ok(PooledConnection {
            id,
            key: key.clone(),
            target: pool.target.clone(),
            state: Some(state),
            connector: Arc::clone(&self.shared.connector),
            pool: Arc::downgrade(&self.shared),
        })
    }

    /// Lease a connection, honouring the key's [`ExhaustionPolicy`]
    ///
    /// With `Wait`, an exhausted pool is retried on every release until the
    /// key's wait timeout elapses.
    ///
    /// # Errors
    ///
    /// Same as [`ConnectionPool::acquire`]; `PoolExhausted` after the timeout.
    pub async fn acquire_wait(&self, key: &PoolKey) -> Result<PooledConnection<C>> {
        let (notify, policy, timeout) = {
            let inner = self.shared.lock();
            let pool = inner
                .pools
                .get(key)
                .ok_or_else(|| Error::UnknownPool { key: key.to_string() })?;
            (
                Arc::clone(&pool.notify),
                pool.config.on_exhausted,
                pool.config.wait_timeout(),
            )
        };

        if policy == ExhaustionPolicy::Reject {
            return self.acquire(key);
        }

        let deadline = Instant::now() + timeout;
        loop {
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.acquire(key) {
                Err(Error::PoolExhausted { key, max_size }) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Err(Error::PoolExhausted { key, max_size });
                    }
                }
                other => return other,
            }
        }
    }

    /// Return a connection to its pool
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownConnection` if the connection was leased from a
    /// different pool manager; it is then returned to that manager instead.
    pub fn release(&self, mut conn: PooledConnection<C>) -> Result<()> {
        if !conn.belongs_to(&self.shared) {
            return Err(Error::UnknownConnection { id: conn.id });
        }
        match conn.state.take() {
            Some(state) => self.shared.check_in(conn.id, state),
            None => Ok(()),
        }
    }

    /// Permanently destroy a connection, freeing its capacity
    ///
    /// This is the only path that removes an id from the identity index.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownConnection` if the connection is not indexed here.
    pub fn discard(&self, mut conn: PooledConnection<C>) -> Result<()> {
        if !conn.belongs_to(&self.shared) {
            return Err(Error::UnknownConnection { id: conn.id });
        }
        drop(conn.state.take());

        let mut inner = self.shared.lock();
        let Inner { pools, index } = &mut *inner;
        let key = index
            .remove(&conn.id)
            .ok_or(Error::UnknownConnection { id: conn.id })?;
        if let Some(pool) = pools.get_mut(&key) {
            pool.live = pool.live.saturating_sub(1);
            pool.notify.notify_one();
            debug!(pool = %key, connection_id = conn.id, live = pool.live, "Connection discarded");
        }
        Ok(())
    }

    /// Current counters for a key
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownPool` if the key is not configured.
    pub fn stats(&self, key: &PoolKey) -> Result<PoolStats> {
        self.shared
            .lock()
            .pools
            .get(key)
            .map(KeyPool::stats)
            .ok_or_else(|| Error::UnknownPool { key: key.to_string() })
    }

    /// Owning key of a live connection id
    #[must_use]
    pub fn owner_of(&self, id: u64) -> Option<PoolKey> {
        self.shared.lock().index.get(&id).cloned()
    }
}
