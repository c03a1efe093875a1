//! SQLite storage backend.
//!
//! Persists checkpoints and indexed events to a single SQLite file.
//! Uses `sqlx` with WAL mode for concurrent read performance.
//!
//! # Usage
//! ```rust,no_run
//! use chaincrawl_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./crawl.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use chaincrawl_core::checkpoint::CheckpointStore;
use chaincrawl_core::error::CrawlError;
use chaincrawl_core::handler::EventHandler;
use chaincrawl_core::types::{EventType, IndexedEvent};

fn storage_err(e: impl std::fmt::Display) -> CrawlError {
    CrawlError::Storage(e.to_string())
}

/// SQLite-backed storage for checkpoints and events.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./crawl.db"`) or a full
    /// SQLite URL (`"sqlite:./crawl.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, CrawlError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };
        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;
        let storage = Self { pool };
        storage.init_schema(true).await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Limited to one connection so every query sees the same database.
    pub async fn in_memory() -> Result<Self, CrawlError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;
        let storage = Self { pool };
        storage.init_schema(false).await?;
        Ok(storage)
    }

    async fn init_schema(&self, wal: bool) -> Result<(), CrawlError> {
        if wal {
            sqlx::query("PRAGMA journal_mode=WAL;")
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;
        }

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS indexer (
                chain_id           INTEGER PRIMARY KEY,
                last_indexed_block INTEGER NOT NULL,
                updated_at         INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS events (
                chain_id     INTEGER NOT NULL,
                tx_hash      TEXT    NOT NULL,
                log_index    INTEGER NOT NULL,
                event_type   TEXT    NOT NULL,
                address      TEXT    NOT NULL,
                block_number INTEGER NOT NULL,
                topics_json  TEXT    NOT NULL,
                data         TEXT    NOT NULL,
                PRIMARY KEY (chain_id, tx_hash, log_index)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_type ON events (chain_id, event_type);")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(())
    }

    // ─── Event storage ──────────────────────────────────────────────────────────

    /// Insert or replace the event at `(chain_id, tx_hash, log_index)`.
    pub async fn upsert_event(&self, event: &IndexedEvent) -> Result<(), CrawlError> {
        let topics = serde_json::to_string(&event.topics).map_err(storage_err)?;
        sqlx::query(
            "INSERT INTO events
                (chain_id, tx_hash, log_index, event_type, address, block_number, topics_json, data)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (chain_id, tx_hash, log_index) DO UPDATE SET
                event_type   = excluded.event_type,
                address      = excluded.address,
                block_number = excluded.block_number,
                topics_json  = excluded.topics_json,
                data         = excluded.data",
        )
        .bind(event.chain_id as i64)
        .bind(&event.tx_hash)
        .bind(event.log_index as i64)
        .bind(event.event_type.as_str())
        .bind(&event.address)
        .bind(event.block_number as i64)
        .bind(&topics)
        .bind(&event.data)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(
            chain_id = event.chain_id,
            event_type = %event.event_type,
            block = event.block_number,
            "event stored"
        );
        Ok(())
    }

    /// Events of one type on one chain, ordered by block and log index.
    pub async fn events_by_type(
        &self,
        chain_id: u64,
        event_type: EventType,
    ) -> Result<Vec<IndexedEvent>, CrawlError> {
        let rows = sqlx::query(
            "SELECT chain_id, tx_hash, log_index, event_type, address, block_number,
                    topics_json, data
             FROM events WHERE chain_id = ? AND event_type = ?
             ORDER BY block_number, log_index",
        )
        .bind(chain_id as i64)
        .bind(event_type.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let topics_json: String = row.get("topics_json");
            let event_type: String = row.get("event_type");
            events.push(IndexedEvent {
                event_type: event_type.parse().map_err(storage_err)?,
                chain_id: row.get::<i64, _>("chain_id") as u64,
                address: row.get("address"),
                tx_hash: row.get("tx_hash"),
                block_number: row.get::<i64, _>("block_number") as u64,
                log_index: row.get::<i64, _>("log_index") as u64,
                topics: serde_json::from_str(&topics_json).map_err(storage_err)?,
                data: row.get("data"),
            });
        }
        Ok(events)
    }

    /// Total number of stored events across all chains.
    pub async fn event_count(&self) -> Result<u64, CrawlError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM events")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }
}

#[async_trait]
impl CheckpointStore for SqliteStorage {
    async fn get_last_indexed_block(&self, chain_id: u64) -> Result<Option<u64>, CrawlError> {
        let row = sqlx::query("SELECT last_indexed_block FROM indexer WHERE chain_id = ?")
            .bind(chain_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.map(|r| r.get::<i64, _>("last_indexed_block") as u64))
    }

    async fn set_last_indexed_block(&self, chain_id: u64, block: u64) -> Result<u64, CrawlError> {
        sqlx::query(
            "INSERT INTO indexer (chain_id, last_indexed_block, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT (chain_id) DO UPDATE SET
                last_indexed_block = excluded.last_indexed_block,
                updated_at         = excluded.updated_at",
        )
        .bind(chain_id as i64)
        .bind(block as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(block)
    }
}

#[async_trait]
impl EventHandler for SqliteStorage {
    async fn handle(&self, event: &IndexedEvent) -> Result<(), CrawlError> {
        self.upsert_event(event).await
    }

    fn name(&self) -> &str {
        "sqlite-store"
    }
}
