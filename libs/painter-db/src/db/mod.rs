use anyhow::{Context, Result};
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::sync::Arc;
use tracing::{info, warn};

use crate::repositories::PgStore;
use crate::store::{LedgerStore, MemoryStore};

pub async fn init_db(database_url: &str, max_connections: u32) -> Result<PgPool> {
    if !database_url.starts_with("postgres://") && !database_url.starts_with("postgresql://") {
        return Err(anyhow::anyhow!(
            "database_url must start with postgres:// or postgresql://"
        ));
    }

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    Ok(pool)
}

/// Open the ledger store. An empty URL selects the in-memory reference store.
pub async fn open_store(database_url: &str, max_connections: u32) -> Result<Arc<dyn LedgerStore>> {
    if database_url.trim().is_empty() {
        warn!("No database_url configured; using the in-memory store, nothing will persist");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let pool = init_db(database_url, max_connections).await?;
    info!("Connected to PostgreSQL ledger store");
    Ok(Arc::new(PgStore::new(pool)))
}
