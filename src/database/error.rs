//! Error taxonomy for the database lifecycle.

use thiserror::Error;

/// A driver-level error, boxed so the lifecycle does not depend on any one driver.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced while creating the pool or binding a connection to a request.
///
/// Only [`Config`](Self::Config), [`Initialization`](Self::Initialization),
/// [`Acquisition`](Self::Acquisition), [`TransactionBegin`](Self::TransactionBegin)
/// and [`PoolClosed`](Self::PoolClosed) ever reach a caller. Commit and rollback
/// failures happen during finalization, where they are logged and swallowed;
/// the variants exist so those log records carry a typed error.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("invalid database configuration: {0}")]
    Config(String),

    #[error("failed to initialize connection pool: {0}")]
    Initialization(#[source] BoxError),

    #[error("failed to acquire a connection: {0}")]
    Acquisition(#[source] BoxError),

    #[error("failed to begin transaction: {0}")]
    TransactionBegin(#[source] BoxError),

    #[error("failed to commit transaction: {0}")]
    Commit(#[source] BoxError),

    #[error("failed to roll back transaction: {0}")]
    Rollback(#[source] BoxError),

    #[error("connection pool has been shut down")]
    PoolClosed,
}
