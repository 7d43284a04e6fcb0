//! Session pool for concurrent automation
//!
//! Hands out and reclaims headless sessions under configurable acquisition,
//! validation and eviction policies. All idle/active bookkeeping lives under
//! one mutex paired with a condvar for blocked borrowers; factory calls and
//! session disconnects happen outside that lock so slow session setup never
//! serializes unrelated borrows. Capacity for an in-flight factory call is
//! reserved first and rolled back on failure, keeping the
//! idle + active = pool size invariant intact.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, warn};

use crate::error::{ConfigError, PoolError};
use crate::session::HeadlessSession;

/// What a borrower experiences when no session is immediately available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcquisitionMode {
    /// Fail immediately with PoolError::Exhausted
    #[default]
    Immediate,
    /// Block up to the configured acquisition timeout, then fail
    TimeoutOnFull,
    /// Block until a session is available or the pool shuts down
    Queued,
}

/// When sessions are checked for liveness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationStrategy {
    #[default]
    None,
    OnBorrow,
    OnReturn,
    Periodic,
}

/// Which idle sessions the maintenance sweep removes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    #[default]
    None,
    /// Idle longer than max_idle_time
    IdleTime,
    /// Older than max_age, however recently used
    MaxAge,
}

/// Creates sessions on demand for the pool; injected so stub and real
/// network sessions pool identically
pub trait SessionFactory: Send + Sync {
    fn create_session(
        &self,
        name: &str,
        config_resource: &str,
        connection_props: &HashMap<String, String>,
    ) -> anyhow::Result<Arc<dyn HeadlessSession>>;
}

/// Immutable pool configuration; construct through the builder
#[derive(Clone)]
pub struct PoolConfig {
    max_size: usize,
    min_idle: usize,
    acquisition_mode: AcquisitionMode,
    acquisition_timeout: Duration,
    validation_strategy: ValidationStrategy,
    validation_interval: Duration,
    eviction_policy: EvictionPolicy,
    max_idle_time: Duration,
    max_age: Duration,
    session_factory: Arc<dyn SessionFactory>,
    config_resource: String,
    connection_props: HashMap<String, String>,
}

impl std::fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolConfig")
            .field("max_size", &self.max_size)
            .field("min_idle", &self.min_idle)
            .field("acquisition_mode", &self.acquisition_mode)
            .field("acquisition_timeout", &self.acquisition_timeout)
            .field("validation_strategy", &self.validation_strategy)
            .field("eviction_policy", &self.eviction_policy)
            .finish()
    }
}

impl PoolConfig {
    pub fn builder(session_factory: Arc<dyn SessionFactory>) -> PoolConfigBuilder {
        PoolConfigBuilder {
            max_size: 10,
            min_idle: 0,
            acquisition_mode: AcquisitionMode::Immediate,
            acquisition_timeout: Duration::from_secs(5),
            validation_strategy: ValidationStrategy::None,
            validation_interval: Duration::from_secs(60),
            eviction_policy: EvictionPolicy::None,
            max_idle_time: Duration::from_secs(300),
            max_age: Duration::from_secs(1800),
            session_factory,
            config_resource: "TN5250HDefaults.props".to_string(),
            connection_props: HashMap::new(),
        }
    }

    /// Maximum pool size; 0 means unlimited
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn min_idle(&self) -> usize {
        self.min_idle
    }

    pub fn acquisition_mode(&self) -> AcquisitionMode {
        self.acquisition_mode
    }
}

/// Builder for PoolConfig
pub struct PoolConfigBuilder {
    max_size: usize,
    min_idle: usize,
    acquisition_mode: AcquisitionMode,
    acquisition_timeout: Duration,
    validation_strategy: ValidationStrategy,
    validation_interval: Duration,
    eviction_policy: EvictionPolicy,
    max_idle_time: Duration,
    max_age: Duration,
    session_factory: Arc<dyn SessionFactory>,
    config_resource: String,
    connection_props: HashMap<String, String>,
}

impl PoolConfigBuilder {
    /// 0 = unlimited
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn min_idle(mut self, min_idle: usize) -> Self {
        self.min_idle = min_idle;
        self
    }

    pub fn acquisition_mode(mut self, mode: AcquisitionMode) -> Self {
        self.acquisition_mode = mode;
        self
    }

    pub fn acquisition_timeout(mut self, timeout: Duration) -> Self {
        self.acquisition_timeout = timeout;
        self
    }

    pub fn validation_strategy(mut self, strategy: ValidationStrategy) -> Self {
        self.validation_strategy = strategy;
        self
    }

    pub fn validation_interval(mut self, interval: Duration) -> Self {
        self.validation_interval = interval;
        self
    }

    pub fn eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }

    pub fn max_idle_time(mut self, max_idle_time: Duration) -> Self {
        self.max_idle_time = max_idle_time;
        self
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn config_resource(mut self, resource: impl Into<String>) -> Self {
        self.config_resource = resource.into();
        self
    }

    pub fn connection_props(mut self, props: HashMap<String, String>) -> Self {
        self.connection_props = props;
        self
    }

    pub fn build(self) -> Result<PoolConfig, ConfigError> {
        if self.max_size > 0 && self.min_idle > self.max_size {
            return Err(ConfigError::MinIdleExceedsMax {
                min_idle: self.min_idle,
                max_size: self.max_size,
            });
        }
        for (parameter, duration) in [
            ("acquisition_timeout", self.acquisition_timeout),
            ("validation_interval", self.validation_interval),
            ("max_idle_time", self.max_idle_time),
            ("max_age", self.max_age),
        ] {
            if duration.is_zero() {
                return Err(ConfigError::ZeroDuration { parameter });
            }
        }
        Ok(PoolConfig {
            max_size: self.max_size,
            min_idle: self.min_idle,
            acquisition_mode: self.acquisition_mode,
            acquisition_timeout: self.acquisition_timeout,
            validation_strategy: self.validation_strategy,
            validation_interval: self.validation_interval,
            eviction_policy: self.eviction_policy,
            max_idle_time: self.max_idle_time,
            max_age: self.max_age,
            session_factory: self.session_factory,
            config_resource: self.config_resource,
            connection_props: self.connection_props,
        })
    }
}

/// Sessions are tracked by Arc pointer identity; names are advisory
fn key_of(session: &Arc<dyn HeadlessSession>) -> usize {
    Arc::as_ptr(session) as *const () as usize
}

struct IdleEntry {
    session: Arc<dyn HeadlessSession>,
    created: Instant,
    idle_since: Instant,
}

struct ActiveEntry {
    session: Arc<dyn HeadlessSession>,
    created: Instant,
}

struct MaintenanceHandle {
    stop_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

#[derive(Default)]
struct PoolState {
    config: Option<Arc<PoolConfig>>,
    idle: VecDeque<IdleEntry>,
    active: HashMap<usize, ActiveEntry>,
    /// Capacity reserved for factory calls currently running outside the lock
    reserved: usize,
    session_counter: u64,
    shutdown: bool,
    maintenance: Option<MaintenanceHandle>,
}

#[derive(Default)]
struct PoolMetrics {
    borrow_count: AtomicU64,
    return_count: AtomicU64,
    eviction_count: AtomicU64,
    idle_len: AtomicUsize,
    active_len: AtomicUsize,
    shutdown: AtomicBool,
}

struct PoolInner {
    state: Mutex<PoolState>,
    available: Condvar,
    metrics: PoolMetrics,
}

/// How long an exhausted borrow is allowed to wait
enum WaitPolicy {
    FailFast,
    Deadline(Instant),
    Forever,
}

/// Concurrency-controlled pool of headless sessions.
///
/// configure() initializes (or, after shutdown(), re-initializes) the pool;
/// borrow_session()/return_session() follow the configured policies;
/// shutdown() is idempotent and releases every blocked borrower.
pub struct SessionPool {
    inner: Arc<PoolInner>,
}

impl Default for SessionPool {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionPool {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState::default()),
                available: Condvar::new(),
                metrics: PoolMetrics::default(),
            }),
        }
    }

    /// Apply a configuration, pre-creating min_idle sessions.
    ///
    /// Any sessions left from a previous configuration are disconnected. A
    /// factory failure during pre-creation is logged and skipped; the pool
    /// starts with fewer idle sessions rather than failing.
    pub fn configure(&self, config: PoolConfig) {
        let config = Arc::new(config);
        let (old_maintenance, old_sessions) = {
            let mut state = self.inner.state.lock().unwrap();
            let old_maintenance = state.maintenance.take();
            let mut old_sessions: Vec<Arc<dyn HeadlessSession>> = Vec::new();
            if !state.idle.is_empty() || !state.active.is_empty() {
                warn!(
                    "reconfiguring pool with {} idle and {} borrowed sessions; all will be disconnected",
                    state.idle.len(),
                    state.active.len()
                );
            }
            old_sessions.extend(state.idle.drain(..).map(|e| e.session));
            old_sessions.extend(state.active.drain().map(|(_, e)| e.session));
            state.shutdown = false;
            state.config = Some(config.clone());
            self.inner.metrics.idle_len.store(0, Ordering::SeqCst);
            self.inner.metrics.active_len.store(0, Ordering::SeqCst);
            self.inner.metrics.shutdown.store(false, Ordering::SeqCst);
            (old_maintenance, old_sessions)
        };

        if let Some(handle) = old_maintenance {
            let _ = handle.stop_tx.send(());
            let _ = handle.join.join();
        }
        for session in old_sessions {
            session.disconnect();
        }

        // Pre-create min_idle sessions, capped at max_size on bounded pools
        let mut pre_create = config.min_idle;
        if config.max_size > 0 {
            pre_create = pre_create.min(config.max_size);
        }
        for i in 0..pre_create {
            let name = {
                let mut state = self.inner.state.lock().unwrap();
                state.session_counter += 1;
                format!("pool-session-{}", state.session_counter)
            };
            match config.session_factory.create_session(
                &name,
                &config.config_resource,
                &config.connection_props,
            ) {
                Ok(session) => {
                    let now = Instant::now();
                    let mut state = self.inner.state.lock().unwrap();
                    state.idle.push_back(IdleEntry { session, created: now, idle_since: now });
                    self.inner.metrics.idle_len.store(state.idle.len(), Ordering::SeqCst);
                }
                Err(err) => {
                    error!(
                        "failed to pre-create session {} of {pre_create} during pool configuration: {err}",
                        i + 1
                    );
                }
            }
        }

        // Borrowers parked before the reconfiguration must see the new
        // capacity and idle sessions
        self.inner.available.notify_all();

        self.start_maintenance(&config);
    }

    /// Borrow a session under the configured acquisition mode
    pub fn borrow_session(&self) -> Result<Arc<dyn HeadlessSession>, PoolError> {
        let policy = {
            let state = self.inner.state.lock().unwrap();
            let config = state.config.as_ref().ok_or(PoolError::NotConfigured)?;
            match config.acquisition_mode {
                AcquisitionMode::Immediate => WaitPolicy::FailFast,
                AcquisitionMode::TimeoutOnFull => {
                    WaitPolicy::Deadline(Instant::now() + config.acquisition_timeout)
                }
                AcquisitionMode::Queued => WaitPolicy::Forever,
            }
        };
        self.borrow_with_policy(policy)
    }

    /// Borrow with an explicit wait bound, regardless of the configured mode
    pub fn borrow_session_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Arc<dyn HeadlessSession>, PoolError> {
        self.borrow_with_policy(WaitPolicy::Deadline(Instant::now() + timeout))
    }

    fn borrow_with_policy(
        &self,
        policy: WaitPolicy,
    ) -> Result<Arc<dyn HeadlessSession>, PoolError> {
        let inner = &self.inner;
        let mut state = inner.state.lock().unwrap();
        loop {
            let config = match &state.config {
                Some(c) => c.clone(),
                None => return Err(PoolError::NotConfigured),
            };
            if state.shutdown {
                return Err(PoolError::Exhausted {
                    reason: "pool has been shut down".to_string(),
                });
            }

            // Reuse an idle session, validating it first when configured
            if let Some(entry) = state.idle.pop_front() {
                inner.metrics.idle_len.store(state.idle.len(), Ordering::SeqCst);
                let IdleEntry { session, created, .. } = entry;
                if config.validation_strategy == ValidationStrategy::OnBorrow {
                    // The popped session still occupies capacity while it is
                    // probed outside the lock
                    state.reserved += 1;
                    drop(state);
                    let valid = session_valid(&session);
                    state = inner.state.lock().unwrap();
                    state.reserved -= 1;
                    if !valid {
                        drop(state);
                        debug!("evicting invalid idle session '{}' on borrow", session.name());
                        session.disconnect();
                        inner.metrics.eviction_count.fetch_add(1, Ordering::SeqCst);
                        // Capacity freed; a blocked borrower may now create
                        inner.available.notify_all();
                        state = inner.state.lock().unwrap();
                        continue;
                    }
                    if state.shutdown {
                        drop(state);
                        session.disconnect();
                        return Err(PoolError::Exhausted {
                            reason: "pool has been shut down".to_string(),
                        });
                    }
                }
                state.active.insert(key_of(&session), ActiveEntry { session: session.clone(), created });
                inner.metrics.active_len.store(state.active.len(), Ordering::SeqCst);
                inner.metrics.borrow_count.fetch_add(1, Ordering::SeqCst);
                return Ok(session);
            }

            // Create a fresh session when under capacity; the factory runs
            // outside the lock against a reserved slot
            let total = state.idle.len() + state.active.len() + state.reserved;
            if config.max_size == 0 || total < config.max_size {
                state.session_counter += 1;
                let name = format!("pool-session-{}", state.session_counter);
                state.reserved += 1;
                drop(state);

                let created = config.session_factory.create_session(
                    &name,
                    &config.config_resource,
                    &config.connection_props,
                );

                state = inner.state.lock().unwrap();
                state.reserved -= 1;
                match created {
                    Ok(session) => {
                        if state.shutdown {
                            drop(state);
                            session.disconnect();
                            return Err(PoolError::Exhausted {
                                reason: "pool has been shut down".to_string(),
                            });
                        }
                        state.active.insert(
                            key_of(&session),
                            ActiveEntry { session: session.clone(), created: Instant::now() },
                        );
                        inner.metrics.active_len.store(state.active.len(), Ordering::SeqCst);
                        inner.metrics.borrow_count.fetch_add(1, Ordering::SeqCst);
                        return Ok(session);
                    }
                    Err(err) => {
                        // Reservation rolled back; wake anyone who was
                        // waiting on the slot we no longer hold
                        inner.available.notify_all();
                        return Err(PoolError::Factory(err));
                    }
                }
            }

            // Exhausted; wait per policy
            match policy {
                WaitPolicy::FailFast => {
                    return Err(PoolError::Exhausted {
                        reason: format!(
                            "max={}, active={}",
                            config.max_size,
                            state.active.len()
                        ),
                    });
                }
                WaitPolicy::Deadline(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(PoolError::Exhausted {
                            reason: "acquisition timeout, pool full".to_string(),
                        });
                    }
                    let (guard, _) = inner
                        .available
                        .wait_timeout(state, deadline - now)
                        .unwrap();
                    state = guard;
                }
                WaitPolicy::Forever => {
                    state = inner.available.wait(state).unwrap();
                }
            }
        }
    }

    /// Return a borrowed session.
    ///
    /// Foreign or already-returned sessions are a safe no-op; returning to
    /// an unconfigured pool disconnects the orphan.
    pub fn return_session(&self, session: Arc<dyn HeadlessSession>) {
        let inner = &self.inner;
        let mut state = inner.state.lock().unwrap();

        if state.config.is_none() {
            drop(state);
            session.disconnect();
            return;
        }
        let config = state.config.as_ref().unwrap().clone();

        let Some(active_entry) = state.active.remove(&key_of(&session)) else {
            drop(state);
            warn!("attempted to return a session not borrowed from this pool: {}", session.name());
            return;
        };
        let created = active_entry.created;
        inner.metrics.active_len.store(state.active.len(), Ordering::SeqCst);

        if state.shutdown {
            drop(state);
            session.disconnect();
            return;
        }

        if config.validation_strategy == ValidationStrategy::OnReturn {
            // The session keeps its slot while it is probed outside the lock
            state.reserved += 1;
            drop(state);
            let valid = session_valid(&session);
            state = inner.state.lock().unwrap();
            state.reserved -= 1;
            if !valid {
                drop(state);
                session.disconnect();
                inner.metrics.eviction_count.fetch_add(1, Ordering::SeqCst);
                inner.metrics.return_count.fetch_add(1, Ordering::SeqCst);
                inner.available.notify_all();
                return;
            }
            if state.shutdown {
                drop(state);
                session.disconnect();
                return;
            }
        }

        state.idle.push_back(IdleEntry {
            session,
            created,
            idle_since: Instant::now(),
        });
        inner.metrics.idle_len.store(state.idle.len(), Ordering::SeqCst);
        inner.metrics.return_count.fetch_add(1, Ordering::SeqCst);
        drop(state);
        inner.available.notify_all();
    }

    /// Idempotent: disconnects every session, stops maintenance and wakes
    /// all blocked borrowers with PoolError::Exhausted
    pub fn shutdown(&self) {
        let (maintenance, sessions) = {
            let mut state = self.inner.state.lock().unwrap();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            self.inner.metrics.shutdown.store(true, Ordering::SeqCst);
            let maintenance = state.maintenance.take();
            let mut sessions: Vec<Arc<dyn HeadlessSession>> = Vec::new();
            sessions.extend(state.idle.drain(..).map(|e| e.session));
            sessions.extend(state.active.drain().map(|(_, e)| e.session));
            self.inner.metrics.idle_len.store(0, Ordering::SeqCst);
            self.inner.metrics.active_len.store(0, Ordering::SeqCst);
            (maintenance, sessions)
        };

        self.inner.available.notify_all();

        if let Some(handle) = maintenance {
            let _ = handle.stop_tx.send(());
            let _ = handle.join.join();
        }
        for session in sessions {
            session.disconnect();
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.metrics.shutdown.load(Ordering::SeqCst)
    }

    // ===== Metrics (lock-free reads) =====

    pub fn idle_count(&self) -> usize {
        self.inner.metrics.idle_len.load(Ordering::SeqCst)
    }

    pub fn active_count(&self) -> usize {
        self.inner.metrics.active_len.load(Ordering::SeqCst)
    }

    /// Total sessions managed (idle + active)
    pub fn pool_size(&self) -> usize {
        self.idle_count() + self.active_count()
    }

    pub fn borrow_count(&self) -> u64 {
        self.inner.metrics.borrow_count.load(Ordering::SeqCst)
    }

    pub fn return_count(&self) -> u64 {
        self.inner.metrics.return_count.load(Ordering::SeqCst)
    }

    pub fn eviction_count(&self) -> u64 {
        self.inner.metrics.eviction_count.load(Ordering::SeqCst)
    }

    // ===== Background maintenance =====

    fn start_maintenance(&self, config: &PoolConfig) {
        let eviction_tick = match config.eviction_policy {
            EvictionPolicy::None => None,
            EvictionPolicy::IdleTime => Some(config.max_idle_time / 2),
            EvictionPolicy::MaxAge => Some(config.max_age / 2),
        };
        let validation_tick = match config.validation_strategy {
            ValidationStrategy::Periodic => Some(config.validation_interval),
            _ => None,
        };
        let tick = match (eviction_tick, validation_tick) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => return,
        };
        let tick = tick.max(Duration::from_millis(100));

        let (stop_tx, stop_rx) = mpsc::channel();
        let weak: Weak<PoolInner> = Arc::downgrade(&self.inner);
        let join = thread::Builder::new()
            .name("session-pool-maintenance".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(tick) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                    Err(RecvTimeoutError::Timeout) => {}
                }
                let Some(inner) = weak.upgrade() else { return };
                sweep(&inner);
            })
            .expect("failed to spawn pool maintenance thread");

        let mut state = self.inner.state.lock().unwrap();
        state.maintenance = Some(MaintenanceHandle { stop_tx, join });
    }
}

impl Drop for SessionPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn session_valid(session: &Arc<dyn HeadlessSession>) -> bool {
    session.is_connected()
}

/// One maintenance pass: time-based eviction under the lock, liveness
/// validation against a snapshot so session calls never run under the lock
fn sweep(inner: &PoolInner) {
    let (config, expired) = {
        let mut state = inner.state.lock().unwrap();
        if state.shutdown {
            return;
        }
        let Some(config) = state.config.clone() else { return };
        let now = Instant::now();

        let expired: Vec<IdleEntry> = match config.eviction_policy {
            EvictionPolicy::None => Vec::new(),
            EvictionPolicy::IdleTime => {
                let cutoff = config.max_idle_time;
                drain_idle(&mut state, |e| now.duration_since(e.idle_since) > cutoff)
            }
            EvictionPolicy::MaxAge => {
                let cutoff = config.max_age;
                drain_idle(&mut state, |e| now.duration_since(e.created) > cutoff)
            }
        };
        inner.metrics.idle_len.store(state.idle.len(), Ordering::SeqCst);
        (config, expired)
    };

    let evicted_by_time = expired.len();
    for entry in expired {
        debug!("evicting idle session '{}'", entry.session.name());
        entry.session.disconnect();
        inner.metrics.eviction_count.fetch_add(1, Ordering::SeqCst);
    }

    if config.validation_strategy == ValidationStrategy::Periodic {
        // Snapshot, probe without the lock, then remove the ones still idle
        let snapshot: Vec<Arc<dyn HeadlessSession>> = {
            let state = inner.state.lock().unwrap();
            state.idle.iter().map(|e| e.session.clone()).collect()
        };
        let invalid: Vec<usize> = snapshot
            .iter()
            .filter(|s| !session_valid(s))
            .map(key_of)
            .collect();
        if !invalid.is_empty() {
            let removed = {
                let mut state = inner.state.lock().unwrap();
                if state.shutdown {
                    return;
                }
                let removed = drain_idle(&mut state, |e| invalid.contains(&key_of(&e.session)));
                inner.metrics.idle_len.store(state.idle.len(), Ordering::SeqCst);
                removed
            };
            for entry in removed {
                warn!("periodic validation evicting dead session '{}'", entry.session.name());
                entry.session.disconnect();
                inner.metrics.eviction_count.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    if evicted_by_time > 0 {
        // Capacity freed for blocked borrowers
        inner.available.notify_all();
    }
}

fn drain_idle<F>(state: &mut PoolState, mut predicate: F) -> Vec<IdleEntry>
where
    F: FnMut(&IdleEntry) -> bool,
{
    let mut kept = VecDeque::with_capacity(state.idle.len());
    let mut removed = Vec::new();
    for entry in state.idle.drain(..) {
        if predicate(&entry) {
            removed.push(entry);
        } else {
            kept.push_back(entry);
        }
    }
    state.idle = kept;
    removed
}
