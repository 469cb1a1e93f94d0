//! # rttp-sql
//!
//! An async HTTP/1.1 framework whose requests each get a pooled SQL
//! connection, optionally wrapped in a transaction that commits or rolls
//! back with the response.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use rttp_sql::database::{Database, Driver, PoolConfig, SqlSlot};
//! use rttp_sql::{Response, Router, Server, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PoolConfig::new(Driver::Sqlite, "app.db").use_transactions(true);
//!     let database = Arc::new(Database::initialize(config)?);
//!
//!     let mut router = Router::new();
//!     router.layer(database.middleware());
//!     router.post("/hits", |ctx| async move {
//!         let Some(slot) = SqlSlot::from_context(&ctx) else {
//!             return Response::new(StatusCode::InternalServerError);
//!         };
//!         let mut guard = slot.lock().await;
//!         let Some(conn) = guard.as_mut() else {
//!             return Response::new(StatusCode::InternalServerError);
//!         };
//!         match sqlx::query("INSERT INTO hits DEFAULT VALUES").execute(&mut **conn).await {
//!             Ok(_) => Response::new(StatusCode::Created),
//!             Err(_) => Response::new(StatusCode::InternalServerError),
//!         }
//!     });
//!
//!     let server = Server::bind("127.0.0.1:8080").await?;
//!     server
//!         .serve_with_shutdown(router, async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!     database.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod database;
pub mod http;
pub mod middleware;
pub mod router;
pub mod server;

pub use context::Context;
pub use database::{Database, DatabaseError, DatabaseMiddleware, Outcome, PoolConfig};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::Router;
pub use server::{Server, ServerError};
