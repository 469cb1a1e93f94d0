//! Connection pool abstraction and its sqlx-backed implementation.

use std::future::Future;
use std::ops::{Deref, DerefMut};

use sqlx::any::AnyPoolOptions;
use sqlx::pool::PoolConnection;
use sqlx::{Any, AnyConnection, AnyPool, Connection, Executor};
use tracing::{debug, info};

use super::{BoxError, DatabaseError, PoolConfig};

/// The operations the request lifecycle needs from a connection pool.
///
/// The pool is shared by every in-flight request and must synchronize
/// `acquire` and `release` internally. Transaction calls operate on a
/// connection the caller has exclusively leased.
///
/// `release` takes the connection by value: once released it can no longer
/// be used or released again.
pub trait ConnectionPool: Send + Sync + 'static {
    /// A leased connection.
    type Connection: Send + 'static;

    /// Waits for a free connection.
    fn acquire(&self) -> impl Future<Output = Result<Self::Connection, BoxError>> + Send;

    fn begin(&self, conn: &mut Self::Connection)
    -> impl Future<Output = Result<(), BoxError>> + Send;

    fn commit(&self, conn: &mut Self::Connection)
    -> impl Future<Output = Result<(), BoxError>> + Send;

    fn rollback(&self, conn: &mut Self::Connection)
    -> impl Future<Output = Result<(), BoxError>> + Send;

    /// Hands the connection back to the pool.
    fn release(&self, conn: Self::Connection);

    /// Stops handing out connections and closes the idle ones.
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// A pool of sqlx connections to MySQL, PostgreSQL, or SQLite.
///
/// The backend is selected at runtime from the connection URL scheme. The pool
/// is created lazily: no connection is opened until the first `acquire`.
#[derive(Debug, Clone)]
pub struct SqlPool {
    inner: AnyPool,
}

impl SqlPool {
    /// Builds a pool from `config` without connecting.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`DatabaseError::Config`]: the config does not form a valid URL.
    /// - [`DatabaseError::Initialization`]: the driver rejects the URL.
    pub fn connect_lazy(config: &PoolConfig) -> Result<Self, DatabaseError> {
        sqlx::any::install_default_drivers();

        let url = config.connection_url()?;
        let inner = AnyPoolOptions::new()
            .max_connections(config.connection_limit)
            .acquire_timeout(config.acquire_wait())
            .connect_lazy(url.as_str())
            .map_err(|e| DatabaseError::Initialization(e.into()))?;

        info!(
            driver = url.scheme(),
            host = url.host_str().unwrap_or(""),
            max_connections = config.connection_limit,
            "connection pool created"
        );

        Ok(Self { inner })
    }

    /// Returns the underlying sqlx pool for queries issued outside a request.
    pub fn inner(&self) -> &AnyPool {
        &self.inner
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

impl ConnectionPool for SqlPool {
    type Connection = SqlConnection;

    async fn acquire(&self) -> Result<SqlConnection, BoxError> {
        match self.inner.acquire().await {
            Ok(conn) => Ok(SqlConnection::new(conn)),
            Err(sqlx::Error::PoolClosed) => Err(DatabaseError::PoolClosed.into()),
            Err(e) => Err(e.into()),
        }
    }

    async fn begin(&self, conn: &mut SqlConnection) -> Result<(), BoxError> {
        conn.execute("BEGIN").await?;
        conn.in_transaction = true;
        Ok(())
    }

    async fn commit(&self, conn: &mut SqlConnection) -> Result<(), BoxError> {
        conn.execute("COMMIT").await?;
        conn.in_transaction = false;
        Ok(())
    }

    async fn rollback(&self, conn: &mut SqlConnection) -> Result<(), BoxError> {
        conn.execute("ROLLBACK").await?;
        conn.in_transaction = false;
        Ok(())
    }

    fn release(&self, conn: SqlConnection) {
        drop(conn);
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}

/// A connection leased from a [`SqlPool`].
///
/// Dereferences to [`AnyConnection`], so any sqlx query can run against it:
///
/// ```rust,no_run
/// # async fn example(conn: &mut rttp_sql::database::SqlConnection) -> Result<(), sqlx::Error> {
/// let result = sqlx::query("INSERT INTO test (id) VALUES (1)")
///     .execute(&mut **conn)
///     .await?;
/// assert_eq!(result.rows_affected(), 1);
/// # Ok(())
/// # }
/// ```
///
/// Dropping it returns it to the pool. A connection dropped while a transaction
/// begun by the pool is still open is closed instead, so the server discards
/// the uncommitted work and the next lease starts clean.
#[derive(Debug)]
pub struct SqlConnection {
    // Only `None` while being dropped.
    conn: Option<PoolConnection<Any>>,
    in_transaction: bool,
}

impl SqlConnection {
    fn new(conn: PoolConnection<Any>) -> Self {
        Self {
            conn: Some(conn),
            in_transaction: false,
        }
    }

    /// Returns `true` between a successful `BEGIN` and the matching
    /// `COMMIT`/`ROLLBACK`.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    async fn execute(&mut self, statement: &'static str) -> Result<(), sqlx::Error> {
        debug!(statement, "transaction control");
        Executor::execute(&mut **self, statement).await?;
        Ok(())
    }
}

impl Deref for SqlConnection {
    type Target = AnyConnection;

    fn deref(&self) -> &AnyConnection {
        self.conn.as_deref().expect("connection used after release")
    }
}

impl DerefMut for SqlConnection {
    fn deref_mut(&mut self) -> &mut AnyConnection {
        self.conn
            .as_deref_mut()
            .expect("connection used after release")
    }
}

impl Drop for SqlConnection {
    fn drop(&mut self) {
        if !self.in_transaction {
            return;
        }
        if let Some(conn) = self.conn.take() {
            debug!("closing connection with an open transaction instead of recycling it");
            let raw = conn.detach();
            // Closing gracefully needs a runtime; a bare drop still closes the socket.
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(e) = raw.close().await {
                            debug!(error = %e, "closing connection with an open transaction failed");
                        }
                    });
                }
                Err(_) => drop(raw),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Driver;
    use sqlx::Row;

    fn memory_pool() -> SqlPool {
        let mut config = PoolConfig::new(Driver::Sqlite, ":memory:");
        config.connection_limit = 1;
        SqlPool::connect_lazy(&config).unwrap()
    }

    #[tokio::test]
    async fn lazy_pool_opens_no_connection_until_acquire() {
        let pool = memory_pool();
        assert_eq!(pool.inner().size(), 0);

        let conn = pool.acquire().await.unwrap();
        assert_eq!(pool.inner().size(), 1);
        pool.release(conn);
    }

    #[tokio::test]
    async fn commit_and_rollback_track_transaction_state() {
        let pool = memory_pool();
        let mut conn = pool.acquire().await.unwrap();
        sqlx::query("CREATE TABLE t (id INTEGER)")
            .execute(&mut *conn)
            .await
            .unwrap();

        pool.begin(&mut conn).await.unwrap();
        assert!(conn.in_transaction());
        sqlx::query("INSERT INTO t (id) VALUES (1)")
            .execute(&mut *conn)
            .await
            .unwrap();
        pool.rollback(&mut conn).await.unwrap();
        assert!(!conn.in_transaction());

        pool.begin(&mut conn).await.unwrap();
        sqlx::query("INSERT INTO t (id) VALUES (2)")
            .execute(&mut *conn)
            .await
            .unwrap();
        pool.commit(&mut conn).await.unwrap();

        let rows = sqlx::query("SELECT id FROM t")
            .fetch_all(&mut *conn)
            .await
            .unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r.get::<i64, _>("id")).collect();
        assert_eq!(ids, vec![2]);
        pool.release(conn);
    }

    #[tokio::test]
    async fn closed_pool_refuses_acquire_as_pool_closed() {
        let pool = memory_pool();
        pool.close().await;
        assert!(pool.is_closed());

        let err = pool.acquire().await.err().unwrap();
        assert!(matches!(
            err.downcast_ref::<DatabaseError>(),
            Some(DatabaseError::PoolClosed)
        ));
    }

    #[test]
    fn invalid_config_is_rejected_before_driver() {
        let config = PoolConfig::new(Driver::Mysql, "");
        assert!(matches!(
            SqlPool::connect_lazy(&config),
            Err(DatabaseError::Config(_))
        ));
    }
}
