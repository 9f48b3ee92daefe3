//! Bounded connection pool.
//!
//! The pool owns at most `capacity` live connections. Connections are created
//! lazily, handed out exclusively through [`PooledConnection`] and returned
//! with [`ConnectionPool::release`] (or by dropping the handle).
//!
//! Accounting: every semaphore permit stands for either an idle connection or
//! a connection that may still be created, so a caller that wins a permit is
//! guaranteed one or the other. Callers that find no permit wait in FIFO
//! order until a connection is released or the pool is shut down.

use crate::db::connection::{Connection, Driver};
use crate::error::{DbError, DbResult};
use crate::models::ConnectTarget;
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, info, warn};

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PoolStatus {
    /// Zero once the pool has been shut down
    pub capacity: usize,
    pub created: usize,
    pub idle: usize,
    pub in_use: usize,
}

struct Idle<C> {
    id: u64,
    conn: C,
}

struct PoolState<C> {
    capacity: usize,
    created: usize,
    free: VecDeque<Idle<C>>,
    checked_out: HashSet<u64>,
    shut_down: bool,
}

struct SharedPool<D: Driver> {
    driver: D,
    target: ConnectTarget,
    state: Mutex<PoolState<D::Connection>>,
    permits: Semaphore,
    /// Signalled whenever a connection comes back or a creation is abandoned
    drained: Notify,
    next_id: AtomicU64,
}

impl<D: Driver> SharedPool<D> {
    fn lock_state(&self) -> MutexGuard<'_, PoolState<D::Connection>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn put_back(&self, id: u64, conn: D::Connection, dirty: bool) {
        let mut state = self.lock_state();
        if !state.checked_out.remove(&id) {
            warn!(connection_id = id, "Returned connection was not checked out");
        }

        if state.shut_down {
            // Shutdown closes everything that shows up in the free set.
            state.free.push_back(Idle { id, conn });
            drop(state);
            self.drained.notify_one();
            return;
        }

        if dirty || conn.is_closed() {
            state.created -= 1;
            drop(state);
            self.permits.add_permits(1);
            warn!(
                connection_id = id,
                dirty,
                "Discarding connection instead of returning it to the pool"
            );
            discard(id, conn);
            return;
        }

        state.free.push_back(Idle { id, conn });
        drop(state);
        self.permits.add_permits(1);
    }
}

/// Close a connection that will not be reused.
fn discard<C: Connection>(id: u64, conn: C) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(e) = conn.close().await {
                    warn!(connection_id = id, error = %e, "Failed to close discarded connection");
                }
            });
        }
        // No runtime to close on; dropping the session tears it down.
        Err(_) => drop(conn),
    }
}

/// A bounded, lazily filled pool of connections produced by one driver.
pub struct ConnectionPool<D: Driver> {
    shared: Arc<SharedPool<D>>,
}

impl<D: Driver> Clone for ConnectionPool<D> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<D: Driver> std::fmt::Debug for ConnectionPool<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("driver", &self.shared.driver.name())
            .field("url", &self.shared.target.masked_url())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl<D: Driver> ConnectionPool<D> {
    /// Create an empty pool. No connection is opened until the first acquire.
    pub fn new(driver: D, target: ConnectTarget, capacity: usize) -> DbResult<Self> {
        if capacity == 0 {
            return Err(DbError::invalid_argument("Pool capacity must be at least 1"));
        }
        if capacity > Semaphore::MAX_PERMITS {
            return Err(DbError::invalid_argument(format!(
                "Pool capacity must not exceed {}",
                Semaphore::MAX_PERMITS
            )));
        }

        Ok(Self {
            shared: Arc::new(SharedPool {
                driver,
                target,
                state: Mutex::new(PoolState {
                    capacity,
                    created: 0,
                    free: VecDeque::with_capacity(capacity),
                    checked_out: HashSet::with_capacity(capacity),
                    shut_down: false,
                }),
                permits: Semaphore::new(capacity),
                drained: Notify::new(),
                next_id: AtomicU64::new(1),
            }),
        })
    }

    pub fn driver(&self) -> &D {
        &self.shared.driver
    }

    /// Check out a connection, waiting until one is free.
    ///
    /// Fails with `PoolClosed` if the pool is shut down before or while
    /// waiting. Dropping the returned future leaks nothing.
    pub async fn acquire(&self) -> DbResult<PooledConnection<D>> {
        if self.shared.lock_state().shut_down {
            return Err(DbError::PoolClosed);
        }

        let permit = self
            .shared
            .permits
            .acquire()
            .await
            .map_err(|_| DbError::PoolClosed)?;

        {
            let mut state = self.shared.lock_state();
            if state.shut_down {
                return Err(DbError::PoolClosed);
            }
            if let Some(Idle { id, conn }) = state.free.pop_front() {
                state.checked_out.insert(id);
                permit.forget();
                return Ok(PooledConnection::new(id, conn, Arc::clone(&self.shared)));
            }
            debug_assert!(state.created < state.capacity);
            state.created += 1;
        }

        let reservation = Reservation {
            shared: &self.shared,
            armed: true,
        };
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let conn = self.shared.driver.connect(&self.shared.target).await?;
        let created = reservation.fulfil(id);
        permit.forget();

        debug!(
            connection_id = id,
            created,
            driver = self.shared.driver.name(),
            "Opened new pooled connection"
        );
        Ok(PooledConnection::new(id, conn, Arc::clone(&self.shared)))
    }

    /// Like [`acquire`](Self::acquire), but gives up with `Interrupted` as
    /// soon as `interrupt` completes.
    pub async fn acquire_until<F>(&self, interrupt: F) -> DbResult<PooledConnection<D>>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            result = self.acquire() => result,
            _ = interrupt => {
                debug!("Connection acquire interrupted");
                Err(DbError::Interrupted)
            }
        }
    }

    /// Return a connection to the pool, waking one waiting acquirer.
    ///
    /// A handle that belongs to a different pool is rejected with
    /// `InvalidArgument` and goes back to its own pool instead.
    pub fn release(&self, mut conn: PooledConnection<D>) -> DbResult<()> {
        if !Arc::ptr_eq(&self.shared, &conn.pool) {
            return Err(DbError::invalid_argument(
                "Connection does not belong to this pool",
            ));
        }
        conn.released = true;
        drop(conn);
        Ok(())
    }

    /// Close the pool.
    ///
    /// New and waiting acquirers fail with `PoolClosed`. The call then waits,
    /// without a timeout, until every checked-out connection has been
    /// released, and closes each connection exactly once. A connection that
    /// is never released keeps this call pending forever.
    ///
    /// The first close failure is returned after all connections are closed.
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) -> DbResult<()> {
        {
            let mut state = self.shared.lock_state();
            if state.shut_down {
                return Ok(());
            }
            state.shut_down = true;
            state.capacity = 0;
            info!(
                created = state.created,
                idle = state.free.len(),
                "Shutting down connection pool"
            );
        }
        self.shared.permits.close();

        let mut first_error = None;
        let mut closed = 0usize;
        loop {
            let (batch, outstanding) = {
                let mut state = self.shared.lock_state();
                let batch: Vec<_> = state.free.drain(..).collect();
                state.created -= batch.len();
                (batch, state.created)
            };

            for Idle { id, conn } in batch {
                closed += 1;
                if let Err(e) = conn.close().await {
                    warn!(connection_id = id, error = %e, "Failed to close connection");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }

            if outstanding == 0 {
                break;
            }
            debug!(outstanding, "Waiting for checked-out connections");
            self.shared.drained.notified().await;
        }

        info!(closed, "Connection pool shut down");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock_state().shut_down
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.shared.lock_state();
        PoolStatus {
            capacity: state.capacity,
            created: state.created,
            idle: state.free.len(),
            in_use: state.checked_out.len(),
        }
    }
}

/// Undoes a `created` reservation if the connect fails or is cancelled.
struct Reservation<'a, D: Driver> {
    shared: &'a SharedPool<D>,
    armed: bool,
}

impl<D: Driver> Reservation<'_, D> {
    fn fulfil(mut self, id: u64) -> usize {
        self.armed = false;
        let mut state = self.shared.lock_state();
        state.checked_out.insert(id);
        state.created
    }
}

impl<D: Driver> Drop for Reservation<'_, D> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.shared.lock_state().created -= 1;
        self.shared.drained.notify_one();
    }
}

/// Exclusive checkout of one pooled connection.
///
/// Dereferences to the driver connection. Prefer
/// [`ConnectionPool::release`]; dropping the handle also returns it, which
/// covers panics and cancelled tasks. A handle marked dirty is closed instead
/// of being reused.
pub struct PooledConnection<D: Driver> {
    id: u64,
    conn: Option<D::Connection>,
    pool: Arc<SharedPool<D>>,
    dirty: bool,
    released: bool,
}

const RELEASED: &str = "(bug) connection used after being returned to the pool";

impl<D: Driver> PooledConnection<D> {
    fn new(id: u64, conn: D::Connection, pool: Arc<SharedPool<D>>) -> Self {
        Self {
            id,
            conn: Some(conn),
            pool,
            dirty: false,
            released: false,
        }
    }

    /// Pool-unique connection id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Session state may differ from what the pool handed out.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Session state has been restored.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

impl<D: Driver> Deref for PooledConnection<D> {
    type Target = D::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect(RELEASED)
    }
}

impl<D: Driver> DerefMut for PooledConnection<D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect(RELEASED)
    }
}

impl<D: Driver> std::fmt::Debug for PooledConnection<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}

impl<D: Driver> Drop for PooledConnection<D> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if !self.released {
            debug!(
                connection_id = self.id,
                dirty = self.dirty,
                "Connection returned via Drop"
            );
        }
        self.pool.put_back(self.id, conn, self.dirty);
    }
}
