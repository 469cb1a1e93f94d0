//! Middleware that leases a connection around every request.

use std::{future::Future, pin::Pin, sync::Arc};

use tracing::warn;

use super::{ConnectionPool, Database, DatabaseError, Outcome};
use crate::{
    Response, StatusCode,
    context::Context,
    middleware::{Middleware, MiddlewareHandler, Next, from_middleware},
};

/// Runs [`Database::on_request_start`] before the rest of the stack and
/// [`Database::on_response_finalize`] once the response is known.
///
/// # Behavior
///
/// - If no connection can be bound the handler is **not** called. The client
///   gets `503 Service Unavailable` once the database has been shut down and
///   `500 Internal Server Error` for any other failure.
/// - Otherwise the downstream response decides the [`Outcome`]: any 4xx or 5xx
///   status rolls the transaction back, anything else commits it.
/// - The response is returned unchanged; finalization errors are only logged.
pub struct DatabaseMiddleware<P: ConnectionPool> {
    database: Arc<Database<P>>,
}

impl<P: ConnectionPool> DatabaseMiddleware<P> {
    pub fn new(database: Arc<Database<P>>) -> Self {
        Self { database }
    }

    pub fn into_handler(self) -> MiddlewareHandler {
        from_middleware(Arc::new(self))
    }
}

impl<P: ConnectionPool> Middleware for DatabaseMiddleware<P> {
    fn handle(
        &self,
        mut ctx: Context,
        next: Next,
    ) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let database = Arc::clone(&self.database);
        Box::pin(async move {
            let lease = match database.on_request_start(&mut ctx).await {
                Ok(lease) => lease,
                Err(e) => {
                    warn!(path = ctx.request().path(), error = %e, "no database connection for request");
                    return bind_failure(&e);
                }
            };

            let response = next.run(ctx).await;

            database
                .on_response_finalize(&lease, Outcome::from_status(response.status()))
                .await;

            response
        })
    }
}

fn bind_failure(error: &DatabaseError) -> Response {
    let status = match error {
        DatabaseError::PoolClosed => StatusCode::ServiceUnavailable,
        _ => StatusCode::InternalServerError,
    };
    Response::new(status).body(status.canonical_reason())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing::{Call, FakeConnection, RecordingPool};
    use crate::database::ConnectionSlot;
    use crate::{Method, Request, Router};

    fn router(database: &Arc<Database<RecordingPool>>) -> Router {
        let mut router = Router::new();
        router.layer(database.middleware());
        router.get("/ok", |ctx: Context| async move {
            let present = match ConnectionSlot::<FakeConnection>::from_context(&ctx) {
                Some(slot) => !slot.is_empty().await,
                None => false,
            };
            Response::new(StatusCode::Ok).body(present.to_string())
        });
        router.get("/fail", |_ctx| async {
            Response::new(StatusCode::BadRequest)
        });
        router.get("/discard", |ctx: Context| async move {
            if let Some(slot) = ConnectionSlot::<FakeConnection>::from_context(&ctx) {
                drop(slot.take().await);
            }
            Response::new(StatusCode::Ok).body("ok")
        });
        router
    }

    #[tokio::test]
    async fn handler_sees_bound_connection_and_commit_follows() {
        let database = Arc::new(Database::with_pool(RecordingPool::default(), true));
        let router = router(&database);

        let res = router.route(Request::new(Method::Get, "/ok")).await;

        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.body_text(), Some("true"));
        assert_eq!(
            database.pool().await.unwrap().calls(),
            vec![
                Call::Acquire(0),
                Call::Begin(0),
                Call::Commit(0),
                Call::Release(0)
            ]
        );
    }

    #[tokio::test]
    async fn error_response_rolls_back() {
        let database = Arc::new(Database::with_pool(RecordingPool::default(), true));
        let router = router(&database);

        let res = router.route(Request::new(Method::Get, "/fail")).await;

        assert_eq!(res.status(), StatusCode::BadRequest);
        assert_eq!(
            database.pool().await.unwrap().calls(),
            vec![
                Call::Acquire(0),
                Call::Begin(0),
                Call::Rollback(0),
                Call::Release(0)
            ]
        );
    }

    #[tokio::test]
    async fn discarded_connection_still_returns_handler_response() {
        let database = Arc::new(Database::with_pool(RecordingPool::default(), false));
        let router = router(&database);

        let res = router.route(Request::new(Method::Get, "/discard")).await;

        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.body_text(), Some("ok"));
        assert_eq!(database.pool().await.unwrap().calls(), vec![Call::Acquire(0)]);
    }

    #[tokio::test]
    async fn acquire_failure_skips_handler() {
        let pool = RecordingPool {
            fail_acquire: true,
            ..Default::default()
        };
        let database = Arc::new(Database::with_pool(pool, false));
        let router = router(&database);

        let res = router.route(Request::new(Method::Get, "/ok")).await;

        assert_eq!(res.status(), StatusCode::InternalServerError);
        assert_ne!(res.body_text(), Some("true"));
    }

    #[tokio::test]
    async fn shut_down_database_answers_503() {
        let database = Arc::new(Database::with_pool(RecordingPool::default(), false));
        let router = router(&database);
        database.shutdown().await;

        let res = router.route(Request::new(Method::Get, "/ok")).await;

        assert_eq!(res.status(), StatusCode::ServiceUnavailable);
    }

    #[tokio::test]
    async fn pool_closing_under_a_request_answers_503() {
        let database = Arc::new(Database::with_pool(RecordingPool::default(), false));
        let router = router(&database);
        database
            .pool()
            .await
            .unwrap()
            .closed
            .store(true, std::sync::atomic::Ordering::SeqCst);

        let res = router.route(Request::new(Method::Get, "/ok")).await;

        assert_eq!(res.status(), StatusCode::ServiceUnavailable);
    }

    #[tokio::test]
    async fn unmatched_route_leases_nothing() {
        let database = Arc::new(Database::with_pool(RecordingPool::default(), false));
        let router = router(&database);

        let res = router.route(Request::new(Method::Get, "/missing")).await;

        assert_eq!(res.status(), StatusCode::NotFound);
        assert!(database.pool().await.unwrap().calls().is_empty());
    }
}
