// src/pool.rs
// Bounded connection pool and the store-wide write gate

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use rusqlite::Connection;
use tracing::{debug, trace, warn};

use crate::config::{Config, LockingMode};
use crate::error::{DocLiteError, Result};
use crate::storage;

/// Fixed-size pool of engine connections.
///
/// Connections are opened lazily up to `pool_size`. `acquire()` waits at most
/// `acquire_timeout` for one to become free and fails with `Busy` afterwards.
pub struct ConnectionPool {
    path: PathBuf,
    config: Config,
    idle_tx: Sender<Connection>,
    idle_rx: Receiver<Connection>,
    open: AtomicUsize,
    closed: AtomicBool,
    write_gate: Arc<WriteGate>,
}

/// Snapshot of pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub size: usize,
    pub open: usize,
    pub idle: usize,
}

impl ConnectionPool {
    /// Open the pool and create the schema through the first connection.
    pub fn open<P: AsRef<Path>>(path: P, config: Config) -> Result<Self> {
        config.validate()?;
        if config.locking_mode == LockingMode::Exclusive && config.pool_size > 1 {
            warn!(
                "Exclusive locking with pool_size {}: the first writing connection keeps the file lock",
                config.pool_size
            );
        }

        let (idle_tx, idle_rx) = channel::unbounded();
        let pool = ConnectionPool {
            path: path.as_ref().to_path_buf(),
            config,
            idle_tx,
            idle_rx,
            open: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            write_gate: Arc::new(WriteGate::new()),
        };

        let first = pool.connect()?;
        storage::init_schema(&first)?;
        pool.open.store(1, Ordering::SeqCst);
        pool.release(first);

        debug!("Opened pool for {} (size {})", pool.path.display(), pool.config.pool_size);
        Ok(pool)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_gate(&self) -> Arc<WriteGate> {
        Arc::clone(&self.write_gate)
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            size: self.config.pool_size,
            open: self.open.load(Ordering::SeqCst),
            idle: self.idle_rx.len(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Borrow a connection for exclusive use until the guard is dropped.
    pub fn acquire(&self) -> Result<PooledConnection<'_>> {
        self.acquire_timeout(self.config.acquire_timeout())
    }

    pub fn acquire_timeout(&self, timeout: Duration) -> Result<PooledConnection<'_>> {
        let deadline = Instant::now().checked_add(timeout);

        loop {
            if self.is_closed() {
                return Err(DocLiteError::PoolClosed);
            }

            if let Ok(conn) = self.idle_rx.try_recv() {
                if let Some(conn) = self.checked(conn) {
                    return Ok(self.guard(conn));
                }
                continue;
            }

            let current = self.open.load(Ordering::SeqCst);
            if current < self.config.pool_size {
                if self
                    .open
                    .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    continue;
                }
                return match self.connect() {
                    Ok(conn) => {
                        debug!("Pool grew to {} connections", current + 1);
                        Ok(self.guard(conn))
                    }
                    Err(e) => {
                        self.open.fetch_sub(1, Ordering::SeqCst);
                        Err(e)
                    }
                };
            }

            // Unrepresentable deadlines wait without a bound
            let received = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(self.busy(timeout));
                    }
                    self.idle_rx.recv_timeout(remaining)
                }
                None => self.idle_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };

            match received {
                Ok(conn) => {
                    if let Some(conn) = self.checked(conn) {
                        return Ok(self.guard(conn));
                    }
                }
                Err(RecvTimeoutError::Timeout) => return Err(self.busy(timeout)),
                Err(RecvTimeoutError::Disconnected) => return Err(DocLiteError::PoolClosed),
            }
        }
    }

    /// Close the pool. Idle connections are closed now, borrowed ones when returned.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut drained = 0;
        while let Ok(conn) = self.idle_rx.try_recv() {
            drop(conn);
            drained += 1;
        }
        self.open.fetch_sub(drained, Ordering::SeqCst);
        debug!("Pool shut down, closed {} idle connections", drained);
    }

    fn busy(&self, timeout: Duration) -> DocLiteError {
        DocLiteError::Busy(format!(
            "no connection available within {}ms ({} open)",
            timeout.as_millis(),
            self.open.load(Ordering::SeqCst)
        ))
    }

    fn guard(&self, conn: Connection) -> PooledConnection<'_> {
        PooledConnection {
            conn: Some(conn),
            pool: self,
        }
    }

    /// Health check before reuse. Unhealthy connections are discarded.
    fn checked(&self, conn: Connection) -> Option<Connection> {
        if !self.config.health_check_on_acquire {
            return Some(conn);
        }
        match conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)) {
            Ok(_) => Some(conn),
            Err(e) => {
                warn!("Discarding unhealthy connection: {}", e);
                drop(conn);
                self.open.fetch_sub(1, Ordering::SeqCst);
                None
            }
        }
    }

    fn release(&self, conn: Connection) {
        if self.is_closed() {
            drop(conn);
            self.open.fetch_sub(1, Ordering::SeqCst);
            return;
        }
        if let Err(returned) = self.idle_tx.send(conn) {
            drop(returned.into_inner());
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.config.busy_timeout())?;

        let journal: String = conn.pragma_update_and_check(
            None,
            "journal_mode",
            self.config.journal_mode.as_pragma(),
            |row| row.get(0),
        )?;
        let locking: String = conn.pragma_update_and_check(
            None,
            "locking_mode",
            self.config.locking_mode.as_pragma(),
            |row| row.get(0),
        )?;
        conn.pragma_update(None, "synchronous", self.config.synchronous.as_pragma())?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        conn.pragma_update(None, "cache_size", -self.config.cache_size_kib)?;

        trace!("Connection ready (journal_mode={}, locking_mode={})", journal, locking);
        Ok(conn)
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A connection on loan from the pool; returned on drop, including on error paths.
pub struct PooledConnection<'a> {
    conn: Option<Connection>,
    pool: &'a ConnectionPool,
}

impl std::fmt::Debug for PooledConnection<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection").field("conn", &self.conn).finish_non_exhaustive()
    }
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only `None` after drop
        self.conn.as_ref().unwrap_or_else(|| unreachable!("connection already returned"))
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().unwrap_or_else(|| unreachable!("connection already returned"))
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

/// Store-wide single-writer gate.
///
/// Held for the whole life of a write transaction, so at most one write unit of work is
/// active at a time and waiting writers time out with `Busy` instead of spinning in the
/// engine's busy handler.
#[derive(Debug, Default)]
pub struct WriteGate {
    held: Mutex<bool>,
    released: Condvar,
}

impl WriteGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(self: &Arc<Self>, timeout: Duration) -> Result<WriteLease> {
        let deadline = Instant::now().checked_add(timeout);
        let mut held = self.held.lock();
        while *held {
            trace!("Waiting for write gate");
            let Some(deadline) = deadline else {
                self.released.wait(&mut held);
                continue;
            };
            if self.released.wait_until(&mut held, deadline).timed_out() && *held {
                return Err(DocLiteError::Busy(format!(
                    "write lock not acquired within {}ms",
                    timeout.as_millis()
                )));
            }
        }
        *held = true;
        Ok(WriteLease {
            gate: Arc::clone(self),
        })
    }

    pub fn is_held(&self) -> bool {
        *self.held.lock()
    }

    fn release(&self) {
        *self.held.lock() = false;
        self.released.notify_one();
    }
}

/// Exclusive write intent; released on drop.
#[derive(Debug)]
pub struct WriteLease {
    gate: Arc<WriteGate>,
}

impl Drop for WriteLease {
    fn drop(&mut self) {
        self.gate.release();
    }
}
