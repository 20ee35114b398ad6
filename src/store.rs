use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::error::StoreError;

/// Open the SQLite store owned by one ingestion run.
///
/// The pool holds a single connection: a run is one sequential flow, and an
/// in-memory database only lives as long as its connection.
pub async fn open_store(location: &str) -> Result<SqlitePool, StoreError> {
    let open_err = |source: sqlx::Error| StoreError::Open {
        location: location.to_string(),
        source,
    };

    let options = if location == ":memory:" || location.starts_with("sqlite:") {
        SqliteConnectOptions::from_str(location).map_err(open_err)?
    } else {
        SqliteConnectOptions::new().filename(location)
    }
    .create_if_missing(true)
    .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .map_err(open_err)?;

    info!(location, "Connected to SQLite store");
    Ok(pool)
}

pub async fn close_store(pool: SqlitePool) {
    pool.close().await;
    info!("Store connection closed");
}
