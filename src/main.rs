//! db-access - command-line entry point.
//!
//! Runs queries, updates and transactions through the pooled executor, and
//! includes a concurrent-counter check that exercises serializable
//! transactions end to end.

use db_access::config::{Command, Config};
use db_access::db::DbAccess;
use db_access::error::{DbError, DbResult};
use db_access::models::DatabaseType;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const COUNTER_MAX_ATTEMPTS: usize = 50;

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse_args();

    // Initialize logging
    init_tracing(&config);

    let access = config.access_config()?;
    let db_type = access.database_type();
    info!(
        driver = %access.driver,
        pool_size = access.pool_size,
        "Starting db-access v{}",
        env!("CARGO_PKG_VERSION")
    );

    let db = Arc::new(DbAccess::new(access)?);
    let result = run(&config.command, &db, db_type).await;

    if let Err(e) = db.close().await {
        warn!(error = %e, "Failed to close connection pool");
    }

    if let Err(e) = result {
        error!(error = %e, suggestion = ?e.suggestion(), "Command failed");
        return Err(e.into());
    }
    Ok(())
}

async fn run(command: &Command, db: &Arc<DbAccess>, db_type: Option<DatabaseType>) -> DbResult<()> {
    match command {
        Command::Query { sql } => {
            let rows = db.execute_select(sql, rows_as_json).await?;
            for row in &rows {
                println!("{}", row);
            }
            info!(rows = rows.len(), "Query finished");
        }
        Command::Execute { sql } => {
            let affected = db.execute_update(sql).await?;
            println!("{} row(s) affected", affected);
        }
        Command::Metadata => {
            let metadata = db.metadata().await?;
            let json = serde_json::to_string_pretty(&metadata)
                .map_err(|e| DbError::internal(e.to_string()))?;
            println!("{}", json);
        }
        Command::Counter { tasks } => {
            let locking_clause = db_type.map(|t| t.locking_clause()).unwrap_or_default();
            run_counter(db, *tasks, locking_clause).await?;
        }
    }
    Ok(())
}

fn rows_as_json(cursor: &mut db_access::Cursor) -> DbResult<Vec<serde_json::Value>> {
    let columns = cursor.columns().to_vec();
    let mut rows = Vec::new();
    while cursor.advance()? {
        let mut row = serde_json::Map::with_capacity(columns.len());
        for (idx, name) in columns.iter().enumerate() {
            let value = serde_json::to_value(cursor.value(idx)?)
                .map_err(|e| DbError::internal(e.to_string()))?;
            row.insert(name.clone(), value);
        }
        rows.push(serde_json::Value::Object(row));
    }
    Ok(rows)
}

/// Increment a shared counter from `tasks` concurrent transactions, each doing
/// locking read, delay, write. Fails unless the final value equals `tasks`.
async fn run_counter(db: &Arc<DbAccess>, tasks: usize, locking_clause: &'static str) -> DbResult<()> {
    db.execute_update(
        "CREATE TABLE IF NOT EXISTS accum (id INTEGER PRIMARY KEY, value INTEGER NOT NULL)",
    )
    .await?;
    db.execute_update("DELETE FROM accum").await?;
    db.execute_update("INSERT INTO accum (id, value) VALUES (1, 0)")
        .await?;

    info!(tasks, "Starting concurrent increments");
    let mut handles = Vec::with_capacity(tasks);
    for task in 0..tasks {
        let db = Arc::clone(db);
        handles.push(tokio::spawn(async move {
            increment_with_retry(&db, task, locking_clause).await
        }));
    }

    for handle in handles {
        handle
            .await
            .map_err(|e| DbError::internal(format!("Counter task failed: {}", e)))??;
    }

    let value = db
        .execute_select("SELECT value FROM accum WHERE id = 1", |cursor| {
            cursor.advance()?;
            cursor.get::<i64>("value")
        })
        .await?;

    println!("counter = {} (expected {})", value, tasks);
    if value != tasks as i64 {
        return Err(DbError::internal(format!(
            "Lost updates: counter is {} after {} increments",
            value, tasks
        )));
    }
    Ok(())
}

async fn increment_with_retry(db: &DbAccess, task: usize, locking_clause: &'static str) -> DbResult<()> {
    let mut attempt = 1;
    loop {
        let select_sql = format!("SELECT value FROM accum WHERE id = 1{}", locking_clause);
        let delay = Duration::from_millis(rand::thread_rng().gen_range(10..=110));

        let result = db
            .execute_in_transaction(move |tx| {
                Box::pin(async move {
                    let mut cursor = tx.execute_select(&select_sql).await?;
                    if !cursor.advance()? {
                        return Err(DbError::internal("Counter row is missing"));
                    }
                    let value: i64 = cursor.get("value")?;
                    tokio::time::sleep(delay).await;
                    tx.execute_update(&format!(
                        "UPDATE accum SET value = {} WHERE id = 1",
                        value + 1
                    ))
                    .await?;
                    Ok(value + 1)
                })
            })
            .await;

        match result {
            Ok(value) => {
                info!(task, attempt, value, "Increment committed");
                return Ok(());
            }
            Err(e) if e.is_retryable() && attempt < COUNTER_MAX_ATTEMPTS => {
                warn!(task, attempt, error = %e, "Retrying increment");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
