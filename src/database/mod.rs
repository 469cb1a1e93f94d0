//! Database layer: request-scoped connections drawn from a shared pool.
//!
//! A [`Database`] owns one connection pool and drives a three-step lifecycle
//! for every request:
//!
//! 1. [`on_request_start`](Database::on_request_start) leases a connection,
//!    begins a transaction when configured to, and binds it to the request
//!    [`Context`] through a [`ConnectionSlot`].
//! 2. The handler runs queries through the slot, or takes the connection out
//!    of it to manage it by itself.
//! 3. [`on_response_finalize`](Database::on_response_finalize) commits or
//!    rolls back according to the response [`Outcome`] and returns the
//!    connection to the pool.
//!
//! [`DatabaseMiddleware`] wires those hooks into an rttp middleware stack.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use rttp_sql::{Router, Response, StatusCode};
//! use rttp_sql::database::{Database, Driver, PoolConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PoolConfig::new(Driver::Mysql, "test")
//!     .credentials("root", "")
//!     .use_transactions(true);
//! let database = Arc::new(Database::initialize(config)?);
//!
//! let mut router = Router::new();
//! router.layer(database.middleware());
//! router.get("/ping", |_ctx| async { Response::new(StatusCode::Ok) });
//!
//! // ... serve requests ...
//!
//! database.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::StatusCode;
use crate::context::Context;

pub mod config;
pub mod error;
pub mod middleware;
pub mod pool;
pub mod slot;

pub use config::{Driver, PoolConfig};
pub use error::{BoxError, DatabaseError};
pub use middleware::DatabaseMiddleware;
pub use pool::{ConnectionPool, SqlConnection, SqlPool};
pub use slot::ConnectionSlot;

/// The slot type handlers look up when the database was created by [`Database::initialize`].
pub type SqlSlot = ConnectionSlot<SqlConnection>;

/// How a request ended, as far as its transaction is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    /// Classifies a response: any 4xx or 5xx status is a failure.
    pub fn from_status(status: StatusCode) -> Self {
        if status.is_error() {
            Self::Failure
        } else {
            Self::Success
        }
    }
}

/// A connection bound to one request, together with the pool it came from.
///
/// Returned by [`Database::on_request_start`] and consumed by
/// [`Database::on_response_finalize`].
pub struct Lease<P: ConnectionPool> {
    slot: ConnectionSlot<P::Connection>,
    pool: Arc<P>,
}

impl<P: ConnectionPool> Lease<P> {
    /// The slot shared with the request context.
    pub fn slot(&self) -> &ConnectionSlot<P::Connection> {
        &self.slot
    }
}

/// Owns a connection pool and binds its connections to requests.
///
/// The pool is held until [`shutdown`](Self::shutdown); afterwards every hook
/// fails with [`DatabaseError::PoolClosed`] or does nothing, and no connection
/// can be leased through this instance again.
pub struct Database<P: ConnectionPool> {
    pool: RwLock<Option<Arc<P>>>,
    use_transactions: bool,
}

impl Database<SqlPool> {
    /// Creates the pool described by `config`.
    ///
    /// The pool connects lazily, so an unreachable server surfaces on the
    /// first request rather than here.
    ///
    /// # Errors
    ///
    /// [`DatabaseError::Config`] or [`DatabaseError::Initialization`] when the
    /// pool cannot be built from `config`.
    pub fn initialize(config: PoolConfig) -> Result<Self, DatabaseError> {
        let pool = SqlPool::connect_lazy(&config)?;
        Ok(Self::with_pool(pool, config.use_transactions))
    }
}

impl<P: ConnectionPool> Database<P> {
    /// Wraps an already constructed pool.
    pub fn with_pool(pool: P, use_transactions: bool) -> Self {
        Self {
            pool: RwLock::new(Some(Arc::new(pool))),
            use_transactions,
        }
    }

    pub fn use_transactions(&self) -> bool {
        self.use_transactions
    }

    /// Returns the pool, or `None` once [`shutdown`](Self::shutdown) has run.
    pub async fn pool(&self) -> Option<Arc<P>> {
        self.pool.read().await.clone()
    }

    pub async fn is_shut_down(&self) -> bool {
        self.pool.read().await.is_none()
    }

    /// Leases a connection outside any request, e.g. to prepare a schema at startup.
    ///
    /// The caller owns the connection and hands it back with
    /// [`ConnectionPool::release`].
    pub async fn acquire(&self) -> Result<P::Connection, DatabaseError> {
        let pool = self.live_pool().await?;
        pool.acquire().await.map_err(acquisition_error)
    }

    /// Closes the pool and forgets it. Calling it again is a no-op.
    ///
    /// The pool is detached before it is closed, so requests starting while the
    /// close is in progress already see a shut-down database.
    pub async fn shutdown(&self) {
        let pool = self.pool.write().await.take();
        match pool {
            Some(pool) => {
                pool.close().await;
                info!("connection pool shut down");
            }
            None => debug!("connection pool already shut down"),
        }
    }

    /// Leases a connection for the request and binds it to `ctx`.
    ///
    /// In transactional mode the transaction is begun before the connection
    /// becomes visible to the handler. The returned [`Lease`] shares its slot
    /// with the context extensions; pass it to
    /// [`on_response_finalize`](Self::on_response_finalize) once the response
    /// is known.
    ///
    /// # Errors
    ///
    /// - [`DatabaseError::PoolClosed`]: the database has been shut down.
    /// - [`DatabaseError::Acquisition`]: no connection could be leased.
    /// - [`DatabaseError::TransactionBegin`]: `BEGIN` failed; the connection
    ///   has already been released.
    ///
    /// Nothing is bound to `ctx` on error.
    pub async fn on_request_start(
        &self,
        ctx: &mut Context,
    ) -> Result<Lease<P>, DatabaseError> {
        let pool = self.live_pool().await?;
        let mut conn = pool.acquire().await.map_err(acquisition_error)?;

        if self.use_transactions {
            if let Err(e) = pool.begin(&mut conn).await {
                pool.release(conn);
                return Err(DatabaseError::TransactionBegin(e));
            }
        }

        let slot = ConnectionSlot::new(conn);
        ctx.extensions_mut().insert(slot.clone());
        debug!(
            path = ctx.request().path(),
            transactional = self.use_transactions,
            "connection bound to request"
        );
        Ok(Lease { slot, pool })
    }

    /// Ends the request's use of its connection.
    ///
    /// An empty slot means the handler took the connection and is a no-op.
    /// Otherwise, in transactional mode the transaction is committed on
    /// [`Outcome::Success`] and rolled back on [`Outcome::Failure`]; the
    /// connection is then released whether or not that succeeded. A failed
    /// commit is followed by a rollback attempt. Errors are logged, never
    /// returned: the response goes out regardless.
    ///
    /// The work goes through the pool captured by the lease, so a request
    /// still in flight when [`shutdown`](Self::shutdown) runs is finished
    /// normally; closing the pool waits for that connection to come back.
    pub async fn on_response_finalize(&self, lease: &Lease<P>, outcome: Outcome) {
        let Some(mut conn) = lease.slot.take().await else {
            debug!("connection slot empty at finalize");
            return;
        };
        let pool = &*lease.pool;

        if self.use_transactions {
            match outcome {
                Outcome::Success => {
                    if let Err(e) = pool.commit(&mut conn).await {
                        warn!(error = %DatabaseError::Commit(e), "rolling back instead");
                        rollback(pool, &mut conn).await;
                    }
                }
                Outcome::Failure => rollback(pool, &mut conn).await,
            }
        }

        pool.release(conn);
        debug!(?outcome, "connection released");
    }

    /// Builds the middleware that runs both hooks around the rest of the stack.
    pub fn middleware(self: &Arc<Self>) -> crate::middleware::MiddlewareHandler {
        DatabaseMiddleware::new(Arc::clone(self)).into_handler()
    }

    async fn live_pool(&self) -> Result<Arc<P>, DatabaseError> {
        self.pool().await.ok_or(DatabaseError::PoolClosed)
    }
}

// A pool closed underneath us reports `PoolClosed` like a detached one does.
fn acquisition_error(error: BoxError) -> DatabaseError {
    match error.downcast::<DatabaseError>() {
        Ok(closed) if matches!(*closed, DatabaseError::PoolClosed) => DatabaseError::PoolClosed,
        Ok(other) => DatabaseError::Acquisition(other),
        Err(error) => DatabaseError::Acquisition(error),
    }
}

async fn rollback<P: ConnectionPool>(pool: &P, conn: &mut P::Connection) {
    if let Err(e) = pool.rollback(conn).await {
        warn!(error = %DatabaseError::Rollback(e), "rollback failed");
    }
}
