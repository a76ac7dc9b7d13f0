//! Durable dedup ledger of submissions that have already been notified.
//!
//! Backed by SQLite. Every id is also kept in memory so `has` never touches the
//! database; the table is the source of truth across restarts.

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::Arc;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, thiserror::Error)]
pub enum SeenStoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("Corrupt seen record for {id}: {reason}")]
    CorruptRecord { id: String, reason: String },
}

/// Why a submission id ended up in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SeenOutcome {
    Delivered,
    /// Retries were exhausted and the id was marked seen anyway.
    DispatchFailed,
}

impl SeenOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeenOutcome::Delivered => "delivered",
            SeenOutcome::DispatchFailed => "dispatch_failed",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "delivered" => Some(SeenOutcome::Delivered),
            "dispatch_failed" => Some(SeenOutcome::DispatchFailed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeenRecord {
    pub submission_id: String,
    pub notified_at: DateTime<Utc>,
    pub outcome: SeenOutcome,
}

/// Exclusive in-flight marker for one submission id. Released on drop.
#[derive(Debug)]
pub struct Claim {
    id: String,
    in_flight: Arc<DashSet<String>>,
}

impl Claim {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.in_flight.remove(&self.id);
    }
}

#[derive(Clone)]
pub struct SeenStore {
    pool: SqlitePool,
    seen: Arc<DashSet<String>>,
    in_flight: Arc<DashSet<String>>,
}

impl SeenStore {
    /// Connect, apply pending migrations and load every known id.
    ///
    /// Fails if the database cannot be opened or migrated. Callers treat that as fatal.
    pub async fn open(database_url: &str) -> Result<Self, SeenStoreError> {
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

        let mut options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // An in-memory database only lives as long as its connection.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options.connect_with(options).await?;

        let store = Self {
            pool,
            seen: Arc::new(DashSet::new()),
            in_flight: Arc::new(DashSet::new()),
        };
        store.migrate().await?;
        store.load().await?;

        Ok(store)
    }

    /// Apply pending schema migrations. Migrations only ever add tables or columns.
    pub async fn migrate(&self) -> Result<(), SeenStoreError> {
        MIGRATOR.run(&self.pool).await?;
        tracing::debug!("Seen-store schema is up to date");
        Ok(())
    }

    async fn load(&self) -> Result<(), SeenStoreError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT submission_id FROM seen_submission")
            .fetch_all(&self.pool)
            .await?;

        for (id,) in rows {
            self.seen.insert(id);
        }

        tracing::info!("Seen-store loaded {} submission ids", self.seen.len());
        Ok(())
    }

    /// Whether `id` has already been recorded. Never blocks on I/O.
    pub fn has(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Mark `id` as in flight. Returns `None` if another worker already holds it.
    ///
    /// Holding the claim across `has` → dispatch → `record` makes that sequence
    /// atomic per id.
    pub fn try_claim(&self, id: &str) -> Option<Claim> {
        if self.in_flight.insert(id.to_string()) {
            Some(Claim {
                id: id.to_string(),
                in_flight: Arc::clone(&self.in_flight),
            })
        } else {
            None
        }
    }

    /// Persist `id`. Recording an id that is already present is a no-op.
    ///
    /// The id is marked seen in memory before the write, so a failed write still
    /// suppresses repeats for the life of the process. The error is returned so the
    /// caller can report that durability was lost.
    pub async fn record(
        &self,
        id: &str,
        notified_at: DateTime<Utc>,
        outcome: SeenOutcome,
    ) -> Result<(), SeenStoreError> {
        self.seen.insert(id.to_string());

        let result = sqlx::query(
            "INSERT INTO seen_submission (submission_id, notified_at, outcome) VALUES (?, ?, ?)
             ON CONFLICT(submission_id) DO NOTHING",
        )
        .bind(id)
        .bind(notified_at.to_rfc3339())
        .bind(outcome.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!("Submission {} was already recorded", id);
        }

        Ok(())
    }

    /// Read the stored record for `id`, if any.
    pub async fn get(&self, id: &str) -> Result<Option<SeenRecord>, SeenStoreError> {
        let row: Option<(String, String, String)> = sqlx::query_as(
            "SELECT submission_id, notified_at, outcome FROM seen_submission WHERE submission_id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((submission_id, notified_at, outcome)) = row else {
            return Ok(None);
        };

        let notified_at = DateTime::parse_from_rfc3339(&notified_at)
            .map_err(|e| SeenStoreError::CorruptRecord {
                id: submission_id.clone(),
                reason: format!("bad notified_at {notified_at:?}: {e}"),
            })?
            .with_timezone(&Utc);
        let outcome = SeenOutcome::parse(&outcome).ok_or_else(|| SeenStoreError::CorruptRecord {
            id: submission_id.clone(),
            reason: format!("unknown outcome {outcome:?}"),
        })?;

        Ok(Some(SeenRecord {
            submission_id,
            notified_at,
            outcome,
        }))
    }

    /// Number of ids currently known.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
