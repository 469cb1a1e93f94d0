//! The per-request connection slot handlers read from.

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::context::Context;

/// Holds the connection leased for one request.
///
/// The slot is inserted into the request [`Context`] extensions when the
/// connection is bound, and a clone travels in the [`Lease`](super::Lease)
/// used to finalize the request. Handlers lock it to run queries:
///
/// ```rust,no_run
/// use rttp_sql::{Response, StatusCode, context::Context, database::SqlSlot};
///
/// async fn handler(ctx: Context) -> Response {
///     let Some(slot) = SqlSlot::from_context(&ctx) else {
///         return Response::new(StatusCode::InternalServerError);
///     };
///     let mut guard = slot.lock().await;
///     let Some(conn) = guard.as_mut() else {
///         return Response::new(StatusCode::InternalServerError);
///     };
///     match sqlx::query("SELECT 1").execute(&mut **conn).await {
///         Ok(_) => Response::new(StatusCode::Ok),
///         Err(_) => Response::new(StatusCode::InternalServerError),
///     }
/// }
/// ```
///
/// A handler that calls [`take`](Self::take) becomes the owner of the
/// connection. The finalizer then finds the slot empty and does nothing; the
/// connection goes back to the pool whenever the handler drops it.
pub struct ConnectionSlot<C> {
    inner: Arc<Mutex<Option<C>>>,
}

impl<C> Clone for ConnectionSlot<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> ConnectionSlot<C>
where
    C: Send + 'static,
{
    pub fn new(conn: C) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(conn))),
        }
    }

    /// Returns the slot bound to `ctx`, if a connection was bound for this request.
    pub fn from_context(ctx: &Context) -> Option<Self> {
        ctx.extensions().get::<Self>().cloned()
    }

    /// Locks the slot for the duration of a query.
    pub async fn lock(&self) -> MutexGuard<'_, Option<C>> {
        self.inner.lock().await
    }

    /// Removes the connection, leaving the slot empty.
    pub async fn take(&self) -> Option<C> {
        self.inner.lock().await.take()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_none()
    }
}
