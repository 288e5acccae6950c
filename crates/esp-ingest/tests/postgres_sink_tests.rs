//! PostgreSQL sink tests using testcontainers
//!
//! These tests require Docker to be running. Run with:
//!
//! ```bash
//! cargo test --test postgres_sink_tests -- --ignored --nocapture
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod helpers;

use anyhow::{Context, Result};
use bigdecimal::BigDecimal;
use chrono::{TimeZone, Utc};
use esp_common::types::{Event, EventType};
use esp_ingest::config::DatabaseConfig;
use esp_ingest::sink::postgres::create_pool;
use esp_ingest::sink::{EventSink, PgEventSink};
use esp_ingest::BatchOrchestrator;
use helpers::*;
use serial_test::serial;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::core::IntoContainerPort;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::info;

/// PostgreSQL container with the event schema migrated
struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    sink: Arc<PgEventSink>,
}

impl TestPostgres {
    async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container.get_host().await.context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let config = DatabaseConfig {
            url: format!("postgresql://postgres:postgres@{}:{}/postgres", host, port),
            max_connections: 4,
            min_connections: 0,
            connect_timeout_secs: 10,
        };
        let pool = create_pool(&config).context("Failed to create pool")?;
        let sink = Arc::new(PgEventSink::with_chunk_size(pool, 3));
        sink.run_migrations().await.context("Failed to run migrations")?;

        info!("PostgreSQL ready on port {}", port);
        Ok(Self {
            _container: container,
            sink,
        })
    }
}

fn event(id: &str, price: &str) -> Event {
    Event {
        event_id: id.to_string(),
        user_id: "user_1".to_string(),
        product_id: "prod_9".to_string(),
        product_name: "Desk Lamp".to_string(),
        category: "Home".to_string(),
        price: BigDecimal::from_str(price).unwrap(),
        event_type: EventType::Purchase,
        event_timestamp: Utc.with_ymd_and_hms(2026, 1, 15, 8, 30, 0).unwrap(),
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_insert_batch_is_idempotent() {
    init_tracing();
    let pg = TestPostgres::start().await.unwrap();
    pg.sink.health_check().await.unwrap();

    let events: Vec<Event> = (0..7).map(|i| event(&format!("e-{}", i), "9.99")).collect();

    let first = pg.sink.insert_batch(&events).await.unwrap();
    assert_eq!(first.inserted, 7);
    assert_eq!(first.already_present, 0);

    let second = pg.sink.insert_batch(&events).await.unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.already_present, 7);

    assert_eq!(pg.sink.count().await.unwrap(), 7);
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_partial_overlap_counts_conflicts() {
    init_tracing();
    let pg = TestPostgres::start().await.unwrap();

    let earlier = vec![event("a", "1.00"), event("b", "2.00")];
    pg.sink.insert_batch(&earlier).await.unwrap();

    let later = vec![event("b", "2.00"), event("c", "3.00"), event("d", "4.00")];
    let outcome = pg.sink.insert_batch(&later).await.unwrap();
    assert_eq!(outcome.inserted, 2);
    assert_eq!(outcome.already_present, 1);

    let price: BigDecimal = sqlx::query_scalar("SELECT price FROM user_events WHERE event_id = $1")
        .bind("d")
        .fetch_one(pg.sink.pool())
        .await
        .unwrap();
    assert_eq!(price, BigDecimal::from_str("4.00").unwrap());
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_check_constraint_is_permanent() {
    init_tracing();
    let pg = TestPostgres::start().await.unwrap();

    let err = pg.sink.insert_batch(&[event("neg", "-1")]).await.unwrap_err();
    assert!(!err.is_transient());
    assert_eq!(pg.sink.count().await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
#[serial]
async fn test_orchestrator_against_postgres() {
    init_tracing();
    let pg = TestPostgres::start().await.unwrap();
    let env = TestEnv::new();

    env.drop_file("a.csv", &valid_rows("a", 5), Duration::from_secs(200));
    let mut b = valid_rows("b", 4);
    b.push(valid_row("a-2"));
    env.drop_file("b.csv", &b, Duration::from_secs(100));

    let mut orchestrator = BatchOrchestrator::new(&env.config, pg.sink.clone()).unwrap();
    orchestrator.wait_for_sink(3, Duration::from_millis(100)).await.unwrap();

    let report = orchestrator.run_cycle().await.unwrap().report().cloned().unwrap();
    assert_eq!(report.accepted, 9);
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.inserted, 9);
    assert_eq!(pg.sink.count().await.unwrap(), 9);

    // a fresh engine over an empty ledger replays into the same table
    std::fs::remove_dir_all(env.checkpoint_dir()).unwrap();
    let mut replay = BatchOrchestrator::new(&env.config, pg.sink.clone()).unwrap();
    let report = replay.run_cycle().await.unwrap().report().cloned().unwrap();
    assert_eq!(report.inserted, 0);
    assert_eq!(report.already_present, 9);
    assert_eq!(pg.sink.count().await.unwrap(), 9);
}
