//! Shared container harness for DB-backed integration tests.
//!
//! One Postgres container is started on first use and reused by every
//! test; migrations run once against it. Tests that claim from the
//! shared queue are order-sensitive, so run this suite with
//! `cargo test -- --ignored --test-threads=1`.

use anyhow::{Context, Result};
use sqlx::PgPool;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct SharedTestInfra {
    db_url: String,
    _postgres: ContainerAsync<Postgres>,
}

static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();

impl SharedTestInfra {
    async fn init() -> Result<Self> {
        let postgres = Postgres::default()
            .start()
            .await
            .context("Failed to start Postgres container")?;

        let host = postgres.get_host().await?;
        let port = postgres.get_host_port_ipv4(5432).await?;
        let db_url = format!("postgresql://postgres:postgres@{host}:{port}/postgres");

        let pool = PgPool::connect(&db_url)
            .await
            .context("Failed to connect for migrations")?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            db_url,
            _postgres: postgres,
        })
    }
}

/// Pool against the shared migrated database.
pub async fn test_pool() -> PgPool {
    let infra = SHARED_INFRA
        .get_or_init(|| async { SharedTestInfra::init().await.expect("test infra") })
        .await;
    PgPool::connect(&infra.db_url).await.expect("test pool")
}

/// Wipe both tables; call at the top of order-sensitive tests.
pub async fn truncate_all(pool: &PgPool) {
    sqlx::query("TRUNCATE jobs, incidents")
        .execute(pool)
        .await
        .expect("truncate");
}
