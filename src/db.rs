//! Optional relational persistence for parsed receipts.
//!
//! The JSON results file is the primary store. When `DATABASE_URL` is set,
//! every completed parse is additionally written to Postgres so receipts can
//! be queried across restarts and rotations of the results file.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::results::ResultEntry;

/// A stored receipt row
#[derive(Debug, Clone, PartialEq)]
pub struct StoredReceipt {
    pub id: i64,
    pub file: String,
    pub engine: String,
    pub store_name: String,
    pub total: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// A stored line item row
#[derive(Debug, Clone, PartialEq)]
pub struct StoredLineItem {
    pub id: i64,
    pub receipt_id: i64,
    pub name: String,
    pub quantity: f64,
    pub price: f64,
}

/// Create a connection pool from database configuration.
///
/// Callers must only invoke this when persistence is enabled.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let url = config
        .url
        .as_deref()
        .context("Database URL is not configured")?;

    let mut options = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs));

    if let Some(max_lifetime) = config.max_lifetime_secs {
        options = options.max_lifetime(Duration::from_secs(max_lifetime));
    }
    if let Some(idle_timeout) = config.idle_timeout_secs {
        options = options.idle_timeout(Duration::from_secs(idle_timeout));
    }

    let pool = options
        .connect(url)
        .await
        .context("Failed to connect to database")?;

    info!("Database connection pool created");
    Ok(pool)
}

/// Initialize the database schema
pub async fn init_database_schema(pool: &PgPool) -> Result<()> {
    info!("Initializing database schema");

    // Create receipts table
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS receipts (
            id BIGSERIAL PRIMARY KEY,
            file VARCHAR(255) NOT NULL,
            engine VARCHAR(50) NOT NULL,
            store_name VARCHAR(255) NOT NULL DEFAULT '',
            total DECIMAL(10,2),
            created_at TIMESTAMPTZ DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create receipts table")?;

    // Create receipt_items table
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS receipt_items (
            id BIGSERIAL PRIMARY KEY,
            receipt_id BIGINT NOT NULL REFERENCES receipts(id) ON DELETE CASCADE,
            name VARCHAR(255) NOT NULL,
            quantity DECIMAL(10,3) NOT NULL DEFAULT 1,
            price DECIMAL(10,2) NOT NULL
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create receipt_items table")?;

    // Create indexes for performance
    sqlx::query("CREATE INDEX IF NOT EXISTS receipts_file_idx ON receipts(file)")
        .execute(pool)
        .await
        .context("Failed to create receipts file index")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS receipt_items_receipt_id_idx ON receipt_items(receipt_id)",
    )
    .execute(pool)
    .await
    .context("Failed to create receipt_items receipt_id index")?;

    info!("Database schema initialized successfully");
    Ok(())
}

/// Store a parsed receipt with its line items
pub async fn store_receipt(pool: &PgPool, entry: &ResultEntry) -> Result<i64> {
    debug!(file = %entry.file, engine = %entry.engine, "Storing receipt");
    let started = std::time::Instant::now();

    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let row = sqlx::query(
        "INSERT INTO receipts (file, engine, store_name, total) VALUES ($1, $2, $3, $4) RETURNING id"
    )
    .bind(&entry.file)
    .bind(&entry.engine)
    .bind(&entry.receipt.store)
    .bind(entry.receipt.total)
    .fetch_one(&mut *tx)
    .await
    .context("Failed to insert receipt")?;

    let receipt_id: i64 = row.get(0);

    for item in &entry.receipt.items {
        sqlx::query(
            "INSERT INTO receipt_items (receipt_id, name, quantity, price) VALUES ($1, $2, $3, $4)",
        )
        .bind(receipt_id)
        .bind(&item.name)
        .bind(item.quantity)
        .bind(item.price)
        .execute(&mut *tx)
        .await
        .context("Failed to insert receipt item")?;
    }

    tx.commit().await.context("Failed to commit receipt")?;

    crate::observability::record_db_metrics("store_receipt", started.elapsed());
    debug!(receipt_id = %receipt_id, items = entry.receipt.items.len(), "Receipt stored successfully");
    Ok(receipt_id)
}

/// List the most recently stored receipts
pub async fn recent_receipts(pool: &PgPool, limit: i64) -> Result<Vec<StoredReceipt>> {
    debug!(limit = %limit, "Listing recent receipts");

    let rows = sqlx::query(
        "SELECT id, file, engine, store_name, total::FLOAT8, created_at FROM receipts ORDER BY created_at DESC, id DESC LIMIT $1"
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("Failed to list recent receipts")?;

    let receipts: Vec<StoredReceipt> = rows
        .into_iter()
        .map(|row| StoredReceipt {
            id: row.get(0),
            file: row.get(1),
            engine: row.get(2),
            store_name: row.get(3),
            total: row.get(4),
            created_at: row.get(5),
        })
        .collect();

    debug!("Found {} recent receipts", receipts.len());
    Ok(receipts)
}

/// List all line items of a stored receipt
pub async fn receipt_items(pool: &PgPool, receipt_id: i64) -> Result<Vec<StoredLineItem>> {
    debug!(receipt_id = %receipt_id, "Listing receipt items");

    let rows = sqlx::query(
        "SELECT id, receipt_id, name, quantity::FLOAT8, price::FLOAT8 FROM receipt_items WHERE receipt_id = $1 ORDER BY id"
    )
    .bind(receipt_id)
    .fetch_all(pool)
    .await
    .context("Failed to list receipt items")?;

    let items: Vec<StoredLineItem> = rows
        .into_iter()
        .map(|row| StoredLineItem {
            id: row.get(0),
            receipt_id: row.get(1),
            name: row.get(2),
            quantity: row.get(3),
            price: row.get(4),
        })
        .collect();

    debug!(
        "Found {} items for receipt_id: {receipt_id}",
        items.len()
    );
    Ok(items)
}
