//! A small todo service backed by a transactional SQLite database.
//!
//! ```text
//! cargo run --example todo [config.json]
//! curl -X POST localhost:8080/todos -d '{"title":"write docs"}'
//! curl localhost:8080/todos
//! curl -X DELETE localhost:8080/todos/1
//! ```
//!
//! The optional argument is a JSON file holding a pool configuration, e.g.
//! `{"driver":"sqlite","database":"/var/lib/todo.db","useTransactions":true}`.
//! Without one the service uses `todo.db` in the working directory. The
//! statements are written for SQLite.

use std::sync::Arc;

use rttp_sql::database::{Database, Driver, PoolConfig, SqlSlot};
use rttp_sql::{Context, Response, Router, Server, StatusCode};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Deserialize)]
struct NewTodo {
    title: String,
}

#[derive(Serialize)]
struct Todo {
    id: i64,
    title: String,
}

fn load_config() -> Result<PoolConfig, Box<dyn std::error::Error>> {
    match std::env::args().nth(1) {
        Some(path) => Ok(serde_json::from_slice(&std::fs::read(path)?)?),
        None => Ok(PoolConfig::new(Driver::Sqlite, "todo.db").use_transactions(true)),
    }
}

fn error(status: StatusCode, message: impl std::fmt::Display) -> Response {
    Response::json(status, &serde_json::json!({ "error": message.to_string() }))
}

async fn create(ctx: Context) -> Response {
    let todo: NewTodo = match ctx.json() {
        Ok(todo) => todo,
        Err(e) => return error(StatusCode::BadRequest, e),
    };
    let Some(slot) = SqlSlot::from_context(&ctx) else {
        return error(StatusCode::InternalServerError, "no database connection");
    };
    let mut guard = slot.lock().await;
    let Some(conn) = guard.as_mut() else {
        return error(StatusCode::InternalServerError, "no database connection");
    };

    match sqlx::query("INSERT INTO todos (title) VALUES ($1)")
        .bind(todo.title)
        .execute(&mut **conn)
        .await
    {
        Ok(result) => Response::json(
            StatusCode::Created,
            &serde_json::json!({ "affectedRows": result.rows_affected() }),
        ),
        Err(e) => error(StatusCode::InternalServerError, e),
    }
}

async fn list(ctx: Context) -> Response {
    let Some(slot) = SqlSlot::from_context(&ctx) else {
        return error(StatusCode::InternalServerError, "no database connection");
    };
    let mut guard = slot.lock().await;
    let Some(conn) = guard.as_mut() else {
        return error(StatusCode::InternalServerError, "no database connection");
    };

    let rows = match sqlx::query("SELECT id, title FROM todos ORDER BY id")
        .fetch_all(&mut **conn)
        .await
    {
        Ok(rows) => rows,
        Err(e) => return error(StatusCode::InternalServerError, e),
    };
    let todos: Vec<Todo> = rows
        .iter()
        .map(|row| Todo {
            id: row.get("id"),
            title: row.get("title"),
        })
        .collect();
    Response::json(StatusCode::Ok, &todos)
}

async fn remove(ctx: Context) -> Response {
    let Some(id) = ctx.params().get("id").and_then(|id| id.parse::<i64>().ok()) else {
        return error(StatusCode::BadRequest, "id must be an integer");
    };
    let Some(slot) = SqlSlot::from_context(&ctx) else {
        return error(StatusCode::InternalServerError, "no database connection");
    };
    let mut guard = slot.lock().await;
    let Some(conn) = guard.as_mut() else {
        return error(StatusCode::InternalServerError, "no database connection");
    };

    match sqlx::query("DELETE FROM todos WHERE id = $1")
        .bind(id)
        .execute(&mut **conn)
        .await
    {
        Ok(result) if result.rows_affected() == 0 => error(StatusCode::NotFound, "no such todo"),
        Ok(_) => Response::new(StatusCode::NoContent),
        Err(e) => error(StatusCode::InternalServerError, e),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .compact()
        .init();

    let database = Arc::new(Database::initialize(load_config()?)?);

    let mut conn = database.acquire().await?;
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS todos (id INTEGER PRIMARY KEY AUTOINCREMENT, title TEXT NOT NULL)",
    )
    .execute(&mut *conn)
    .await?;
    drop(conn);

    let mut router = Router::new();
    router.layer(database.middleware());
    router.post("/todos", create);
    router.get("/todos", list);
    router.delete("/todos/:id", remove);

    let server = Server::bind("127.0.0.1:8080").await?;
    info!(address = %server.local_addr(), "todo service ready");
    server
        .serve_with_shutdown(router, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    database.shutdown().await;
    Ok(())
}
