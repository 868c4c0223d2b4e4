//! Nested transaction coordination
//!
//! The coordinator maps propagation policies onto resource connections. Each
//! execution context carries a [`TransactionContext`]: a stack of frames, one
//! per `begin`, where each frame records the connection in use and whether
//! this frame opened it.
//!
//! # Propagation
//!
//! ```text
//! REQUIRED,     empty stack  -> new connection, frame owns it
//! REQUIRED,     active frame -> reuse top connection, frame does not own it
//! REQUIRES_NEW, any stack    -> new connection, frame owns it
//! ```
//!
//! Only an owning frame commits, rolls back and releases its connection when
//! it ends; joined frames just pop.
//!
//! # Thread Safety
//!
//! The coordinator itself is stateless apart from its pool and is shared
//! behind an `Arc`. A `TransactionContext` belongs to exactly one execution
//! context and is threaded through calls as `&mut`.

use super::lock_manager::LockOwner;
use super::traits::{ConnectionPool, ResourceConnection};
use crate::types::{LedgerError, Propagation};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};

#[derive(Debug)]
struct Frame {
    connection: Arc<dyn ResourceConnection>,
    owned: bool,
}

/// Per-execution-context transaction state
///
/// Holds the stack of active transaction frames and the lock-owner token
/// used for key locks taken on behalf of this context.
#[derive(Debug)]
pub struct TransactionContext {
    frames: Vec<Frame>,
    owner: LockOwner,
}

impl Default for TransactionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionContext {
    pub fn new() -> Self {
        Self {
            frames: Vec::new(),
            owner: LockOwner::next(),
        }
    }

    /// Lock-owner token of this context
    pub fn owner(&self) -> LockOwner {
        self.owner
    }

    /// Number of frames currently on the stack
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Whether a transaction is active
    pub fn is_active(&self) -> bool {
        !self.frames.is_empty()
    }
}

impl Drop for TransactionContext {
    fn drop(&mut self) {
        if !self.frames.is_empty() {
            warn!(
                depth = self.frames.len(),
                "Transaction context dropped with active frames"
            );
        }
    }
}

/// Begins and ends transactions according to propagation policies
pub struct TransactionCoordinator {
    pool: Arc<dyn ConnectionPool>,
}

impl fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionCoordinator").finish_non_exhaustive()
    }
}

impl TransactionCoordinator {
    pub fn new(pool: Arc<dyn ConnectionPool>) -> Self {
        Self { pool }
    }

    /// Open a transaction frame on `ctx`
    ///
    /// # Errors
    ///
    /// - `UnsupportedPropagation` for any policy other than `Required` or
    ///   `RequiresNew`; the stack is left unchanged
    /// - `Resource` if a connection cannot be acquired or configured; a
    ///   connection acquired here is released again and no frame is pushed
    pub fn begin(
        &self,
        ctx: &mut TransactionContext,
        propagation: Propagation,
    ) -> Result<(), LedgerError> {
        if !propagation.is_supported() {
            error!(%propagation, "Unsupported transaction propagation");
            return Err(LedgerError::UnsupportedPropagation { propagation });
        }

        if propagation == Propagation::Required {
            if let Some(top) = ctx.frames.last() {
                let connection = Arc::clone(&top.connection);
                debug!(
                    connection = connection.id(),
                    depth = ctx.frames.len() + 1,
                    "Joining active transaction"
                );
                ctx.frames.push(Frame {
                    connection,
                    owned: false,
                });
                return Ok(());
            }
        }

        let connection = self.pool.acquire()?;
        if let Err(e) = connection.set_auto_commit(false) {
            self.pool.release(connection);
            return Err(e.into());
        }

        debug!(
            connection = connection.id(),
            %propagation,
            depth = ctx.frames.len() + 1,
            "Began transaction"
        );
        ctx.frames.push(Frame {
            connection,
            owned: true,
        });
        Ok(())
    }

    /// Connection of the innermost active frame
    ///
    /// # Errors
    ///
    /// `NoActiveTransaction` if the stack is empty
    pub fn current_connection(
        &self,
        ctx: &TransactionContext,
    ) -> Result<Arc<dyn ResourceConnection>, LedgerError> {
        ctx.frames
            .last()
            .map(|frame| Arc::clone(&frame.connection))
            .ok_or(LedgerError::NoActiveTransaction)
    }

    /// Close the innermost frame on `ctx`
    ///
    /// An owning frame commits (`successful`) or rolls back, then releases its
    /// connection whatever the outcome. A joined frame only pops.
    ///
    /// # Errors
    ///
    /// - `NoActiveTransaction` if the stack is empty
    /// - `Resource` if commit or rollback failed; the connection has still
    ///   been released
    pub fn end(&self, ctx: &mut TransactionContext, successful: bool) -> Result<(), LedgerError> {
        let Some(frame) = ctx.frames.pop() else {
            error!("End called with no active transaction");
            return Err(LedgerError::NoActiveTransaction);
        };

        if !frame.owned {
            debug!(
                connection = frame.connection.id(),
                depth = ctx.frames.len(),
                "Left joined transaction"
            );
            return Ok(());
        }

        let id = frame.connection.id();
        let outcome = if successful {
            frame.connection.commit()
        } else {
            frame.connection.rollback()
        };
        self.pool.release(frame.connection);

        match outcome {
            Ok(()) => {
                debug!(
                    connection = id,
                    committed = successful,
                    depth = ctx.frames.len(),
                    "Ended transaction"
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    connection = id,
                    committed = successful,
                    error = %e,
                    "Ending transaction failed"
                );
                Err(e.into())
            }
        }
    }
}
