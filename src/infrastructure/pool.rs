use crate::error::{MarketError, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Budget for a single liveness probe; a handle that cannot answer within
/// this bound is treated as dead.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// A reusable persistence handle managed by the pool.
#[async_trait]
pub trait PooledConnection: Send + Sync + 'static {
    /// Trivial round-trip probe. `false` marks the handle for disposal.
    async fn ping(&self) -> bool;
    /// Dispose the underlying handle.
    async fn close(&self);
}

#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    type Conn: PooledConnection;
    async fn connect(&self) -> Result<Self::Conn>;
}

/// A checked-out handle. Cloning shares the underlying connection; the pool
/// tracks checked-out ids, so releasing the same handle twice is a no-op
/// rather than a double-dispose.
pub struct PoolHandle<C> {
    id: u64,
    conn: Arc<C>,
    shared: bool,
}

impl<C> Clone for PoolHandle<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            conn: Arc::clone(&self.conn),
            shared: self.shared,
        }
    }
}

impl<C> Deref for PoolHandle<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.conn
    }
}

struct PoolState<C> {
    idle: Vec<PoolHandle<C>>,
    checked_out: HashSet<u64>,
    fallback: Option<PoolHandle<C>>,
    draining: bool,
}

/// Bounded pool of persistence handles with validation, lazy creation and
/// graceful draining.
///
/// Exhaustion is not an error: once `max_size` handles are live, `acquire`
/// degrades to a single shared fallback handle instead of blocking or
/// failing, trading isolation for availability under load.
pub struct ConnectionPool<F: ConnectionFactory> {
    factory: F,
    max_size: usize,
    next_id: AtomicU64,
    state: Mutex<PoolState<F::Conn>>,
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    pub fn new(factory: F, max_size: usize) -> Self {
        Self {
            factory,
            max_size: max_size.max(1),
            next_id: AtomicU64::new(1),
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                checked_out: HashSet::new(),
                fallback: None,
                draining: false,
            }),
        }
    }

    /// Pre-creates `n` idle handles to avoid cold-start latency, capped at
    /// `max_size`.
    pub async fn warm(&self, n: usize) -> Result<()> {
        for _ in 0..n {
            let has_room = {
                let state = self.state.lock().await;
                !state.draining && state.idle.len() + state.checked_out.len() < self.max_size
            };
            if !has_room {
                break;
            }
            let conn = self.factory.connect().await?;
            let handle = self.wrap(conn, false);
            self.state.lock().await.idle.push(handle);
        }
        Ok(())
    }

    /// Returns a validated handle: a live idle one, a freshly created one
    /// while under `max_size`, or the shared fallback when saturated.
    pub async fn acquire(&self) -> Result<PoolHandle<F::Conn>> {
        loop {
            let candidate = {
                let mut state = self.state.lock().await;
                if state.draining {
                    return Err(MarketError::Persistence("connection pool is draining".into()));
                }
                state.idle.pop()
            };
            let Some(handle) = candidate else { break };
            // Probe outside the lock; the pool must never hand out a dead handle.
            if probe(&*handle).await {
                self.state.lock().await.checked_out.insert(handle.id);
                return Ok(handle);
            }
            debug!(handle = handle.id, "disposing idle connection that failed its liveness probe");
            handle.conn.close().await;
        }

        // Reserve a slot before connecting so racing acquires cannot blow the cap.
        let reserved = {
            let mut state = self.state.lock().await;
            if state.idle.len() + state.checked_out.len() < self.max_size {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                state.checked_out.insert(id);
                Some(id)
            } else {
                None
            }
        };
        if let Some(id) = reserved {
            match self.factory.connect().await {
                Ok(conn) => {
                    return Ok(PoolHandle {
                        id,
                        conn: Arc::new(conn),
                        shared: false,
                    });
                }
                Err(e) => {
                    self.state.lock().await.checked_out.remove(&id);
                    return Err(e);
                }
            }
        }

        warn!(
            max_size = self.max_size,
            "connection pool saturated; degrading to the shared fallback handle"
        );
        self.fallback().await
    }

    /// Returns a handle to the idle set, or disposes it when it fails
    /// validation, the pool is draining, or the idle set is full. Releasing a
    /// handle that is not checked out (a second release) does nothing.
    pub async fn release(&self, handle: PoolHandle<F::Conn>) {
        if handle.shared {
            return;
        }
        {
            let mut state = self.state.lock().await;
            if !state.checked_out.remove(&handle.id) {
                debug!(handle = handle.id, "ignoring release of a handle that is not checked out");
                return;
            }
            if state.draining {
                drop(state);
                handle.conn.close().await;
                return;
            }
        }
        if !probe(&*handle).await {
            debug!(handle = handle.id, "disposing connection that failed validation on release");
            handle.conn.close().await;
            return;
        }
        let push = {
            let mut state = self.state.lock().await;
            if state.idle.len() < self.max_size {
                state.idle.push(handle.clone());
                true
            } else {
                false
            }
        };
        if !push {
            handle.conn.close().await;
        }
    }

    /// Disposes every idle handle and the fallback; called once at shutdown.
    /// Outstanding handles are disposed when they are later released.
    pub async fn drain_all(&self) {
        let (idle, fallback) = {
            let mut state = self.state.lock().await;
            state.draining = true;
            (std::mem::take(&mut state.idle), state.fallback.take())
        };
        for handle in &idle {
            handle.conn.close().await;
        }
        if let Some(handle) = fallback {
            handle.conn.close().await;
        }
    }

    pub async fn idle_count(&self) -> usize {
        self.state.lock().await.idle.len()
    }

    pub async fn in_use_count(&self) -> usize {
        self.state.lock().await.checked_out.len()
    }

    fn wrap(&self, conn: F::Conn, shared: bool) -> PoolHandle<F::Conn> {
        PoolHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            conn: Arc::new(conn),
            shared,
        }
    }

    async fn fallback(&self) -> Result<PoolHandle<F::Conn>> {
        {
            let state = self.state.lock().await;
            if let Some(handle) = &state.fallback {
                return Ok(handle.clone());
            }
        }
        let conn = self.factory.connect().await?;
        let handle = self.wrap(conn, true);
        let mut state = self.state.lock().await;
        match &state.fallback {
            // Another caller installed the fallback while we were connecting.
            Some(existing) => {
                let existing = existing.clone();
                drop(state);
                handle.conn.close().await;
                Ok(existing)
            }
            None => {
                state.fallback = Some(handle.clone());
                Ok(handle)
            }
        }
    }
}

async fn probe<C: PooledConnection>(conn: &C) -> bool {
    matches!(
        tokio::time::timeout(PROBE_TIMEOUT, conn.ping()).await,
        Ok(true)
    )
}
