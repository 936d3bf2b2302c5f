// src/transaction.rs
// Unit of work: immediate write transactions over one pooled connection

use std::mem;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::{DocLiteError, Result};
use crate::pool::{ConnectionPool, WriteGate, WriteLease};

/// Transaction state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    /// Connection borrowed, no write intent yet
    Idle,
    /// Write lock held, mutations pending
    Active,
    Committed,
    RolledBack,
}

enum Slot<'c> {
    Idle(&'c mut Connection),
    Active(Transaction<'c>),
    Closed,
}

/// One atomic unit of work on a borrowed connection.
///
/// `begin()` takes the store-wide write gate and opens `BEGIN IMMEDIATE`. Dropping an
/// active unit of work rolls it back, so an early `?` return never leaves partial writes.
pub struct UnitOfWork<'c> {
    // Dropped before the lease
    slot: Slot<'c>,
    lease: Option<WriteLease>,
    gate: Arc<WriteGate>,
    timeout: Duration,
    state: TransactionState,
}

impl<'c> UnitOfWork<'c> {
    pub fn new(conn: &'c mut Connection, gate: Arc<WriteGate>, timeout: Duration) -> Self {
        UnitOfWork {
            slot: Slot::Idle(conn),
            lease: None,
            gate,
            timeout,
            state: TransactionState::Idle,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// IDLE → ACTIVE: acquire write intent.
    pub fn begin(&mut self) -> Result<()> {
        if self.state != TransactionState::Idle {
            return Err(DocLiteError::Engine(format!(
                "cannot begin a transaction in state {:?}",
                self.state
            )));
        }

        let lease = self.gate.acquire(self.timeout)?;
        let conn = match mem::replace(&mut self.slot, Slot::Closed) {
            Slot::Idle(conn) => conn,
            other => {
                self.slot = other;
                return Err(DocLiteError::Engine("connection is not idle".into()));
            }
        };

        match conn.transaction_with_behavior(TransactionBehavior::Immediate) {
            Ok(tx) => {
                self.slot = Slot::Active(tx);
                self.lease = Some(lease);
                self.state = TransactionState::Active;
                trace!("Transaction started");
                Ok(())
            }
            Err(e) => {
                self.state = TransactionState::RolledBack;
                Err(e.into())
            }
        }
    }

    /// Connection to run statements on (inside the transaction once active).
    pub fn conn(&self) -> Result<&Connection> {
        match &self.slot {
            Slot::Idle(conn) => Ok(&**conn),
            Slot::Active(tx) => Ok(&**tx),
            Slot::Closed => Err(DocLiteError::Engine("transaction already finished".into())),
        }
    }

    /// ACTIVE → COMMITTED. A failed commit leaves nothing applied.
    pub fn commit(mut self) -> Result<()> {
        let result = match mem::replace(&mut self.slot, Slot::Closed) {
            Slot::Active(tx) => tx.commit().map_err(DocLiteError::from),
            Slot::Idle(_) => Ok(()),
            Slot::Closed => Err(DocLiteError::Engine("transaction already finished".into())),
        };
        self.lease.take();

        match result {
            Ok(()) => {
                self.state = TransactionState::Committed;
                debug!("Transaction committed");
                Ok(())
            }
            Err(e) => {
                self.state = TransactionState::RolledBack;
                warn!("Commit failed, transaction rolled back: {}", e);
                Err(e)
            }
        }
    }

    /// ACTIVE → ROLLED_BACK
    pub fn rollback(mut self) -> Result<()> {
        self.rollback_in_place()
    }

    fn rollback_in_place(&mut self) -> Result<()> {
        let result = match mem::replace(&mut self.slot, Slot::Closed) {
            Slot::Active(tx) => tx.rollback().map_err(DocLiteError::from),
            _ => Ok(()),
        };
        self.lease.take();
        self.state = TransactionState::RolledBack;
        debug!("Transaction rolled back");
        result
    }
}

impl Drop for UnitOfWork<'_> {
    fn drop(&mut self) {
        if self.state == TransactionState::Active {
            if let Err(e) = self.rollback_in_place() {
                warn!("Rollback of abandoned transaction failed: {}", e);
            }
        }
    }
}

/// Run `f` inside one immediate write transaction on a pooled connection.
///
/// Commits when `f` succeeds; any error rolls the whole unit of work back before it is
/// returned.
pub fn write_transaction<T, F>(pool: &ConnectionPool, f: F) -> Result<T>
where
    F: FnOnce(&Connection) -> Result<T>,
{
    let mut conn = pool.acquire()?;
    let mut uow = UnitOfWork::new(&mut conn, pool.write_gate(), pool.config().acquire_timeout());
    uow.begin()?;

    let outcome = f(uow.conn()?);
    match outcome {
        Ok(value) => {
            uow.commit()?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = uow.rollback() {
                warn!("Rollback after error failed: {}", rollback_err);
            }
            Err(e)
        }
    }
}

/// Run `f` on a pooled connection without write intent.
pub fn read<T, F>(pool: &ConnectionPool, f: F) -> Result<T>
where
    F: FnOnce(&Connection) -> Result<T>,
{
    let conn = pool.acquire()?;
    f(&conn)
}
