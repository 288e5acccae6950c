//! PostgreSQL sink
//!
//! Rows go to `user_events`, whose `UNIQUE (event_id)` constraint is the
//! final duplicate backstop. A batch is written in one transaction as a series
//! of multi-row `INSERT ... ON CONFLICT (event_id) DO NOTHING RETURNING
//! event_id` statements; rows not returned were already present.

use async_trait::async_trait;
use esp_common::types::Event;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder, Row, Transaction};
use std::time::Duration;
use tracing::{debug, info};

use super::{EventSink, InsertOutcome, SinkError};
use crate::config::DatabaseConfig;

/// Rows per INSERT statement; 8 binds per row keeps well under the 65535 limit
pub const DEFAULT_INSERT_CHUNK_SIZE: usize = 1_000;

/// SQLSTATE codes worth retrying besides class 08 (connection exceptions)
const TRANSIENT_SQLSTATES: &[&str] = &[
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "53300", // too_many_connections
    "57P01", // admin_shutdown
    "57P02", // crash_shutdown
    "57P03", // cannot_connect_now
];

/// Build the connection pool without connecting
///
/// Connections are opened on first use, so an unreachable database shows up
/// in [`EventSink::health_check`] rather than here.
pub fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect_lazy(&config.url)?;

    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

/// Map a driver error onto the sink's retry classification
pub fn classify(err: sqlx::Error) -> SinkError {
    let transient = match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db
            .code()
            .map(|code| code.starts_with("08") || TRANSIENT_SQLSTATES.iter().any(|c| code == *c))
            .unwrap_or(false),
        _ => false,
    };

    if transient {
        SinkError::Transient(err.to_string())
    } else {
        SinkError::Permanent(err.to_string())
    }
}

pub struct PgEventSink {
    pool: PgPool,
    chunk_size: usize,
}

impl PgEventSink {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            chunk_size: DEFAULT_INSERT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(pool: PgPool, chunk_size: usize) -> Self {
        Self {
            pool,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the workspace migrations
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn insert_chunk(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        events: &[Event],
    ) -> Result<usize, sqlx::Error> {
        let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"
            INSERT INTO user_events (
                event_id,
                user_id,
                product_id,
                product_name,
                category,
                price,
                event_type,
                event_timestamp
            )
            "#,
        );

        query_builder.push_values(events, |mut b, event| {
            b.push_bind(&event.event_id)
                .push_bind(&event.user_id)
                .push_bind(&event.product_id)
                .push_bind(&event.product_name)
                .push_bind(&event.category)
                .push_bind(&event.price)
                .push_bind(event.event_type.as_str())
                .push_bind(event.event_timestamp);
        });

        query_builder.push(" ON CONFLICT (event_id) DO NOTHING RETURNING event_id");

        let rows = query_builder.build().fetch_all(&mut **tx).await?;
        Ok(rows.len())
    }

    /// Number of stored events
    pub async fn count(&self) -> Result<i64, sqlx::Error> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM user_events")
            .fetch_one(&self.pool)
            .await?;
        row.try_get("n")
    }
}

#[async_trait]
impl EventSink for PgEventSink {
    async fn insert_batch(&self, events: &[Event]) -> Result<InsertOutcome, SinkError> {
        if events.is_empty() {
            return Ok(InsertOutcome::default());
        }

        let mut tx = self.pool.begin().await.map_err(classify)?;
        let mut inserted = 0;

        for chunk in events.chunks(self.chunk_size) {
            inserted += self.insert_chunk(&mut tx, chunk).await.map_err(classify)?;
        }

        tx.commit().await.map_err(classify)?;

        let outcome = InsertOutcome {
            inserted,
            already_present: events.len() - inserted,
        };
        debug!(
            rows = events.len(),
            inserted = outcome.inserted,
            already_present = outcome.already_present,
            "Batch committed to user_events"
        );

        Ok(outcome)
    }

    async fn health_check(&self) -> Result<(), SinkError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(classify)
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}
