#![allow(dead_code)]

use std::sync::Once;

use anyhow::{Context, Result};
use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;
use tempfile::TempDir;

static TRACING: Once = Once::new();

/// Route watcher logs to the test writer. Override verbosity via RUST_LOG.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "condwatch=debug".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// SQLite database file in a temp directory, reached through `AnyPool`.
pub struct TestDb {
    pub pool: AnyPool,
    _dir: TempDir,
}

impl TestDb {
    /// Fresh database with an empty `tt (id, name)` table.
    pub async fn new() -> Result<Self> {
        init_tracing();
        sqlx::any::install_default_drivers();

        let dir = tempfile::tempdir().context("create temp dir")?;
        let url =
            format!("sqlite://{}?mode=rwc", dir.path().join("cond.db").display());
        let pool = AnyPoolOptions::new()
            .max_connections(4)
            .connect(&url)
            .await
            .with_context(|| format!("connect to {url}"))?;

        sqlx::query("CREATE TABLE tt (id INTEGER NOT NULL, name TEXT)")
            .execute(&pool)
            .await
            .context("create table tt")?;

        Ok(Self { pool, _dir: dir })
    }

    pub async fn insert(&self, id: i64, name: &str) -> Result<()> {
        sqlx::query("INSERT INTO tt (id, name) VALUES (?, ?)")
            .bind(id)
            .bind(name.to_string())
            .execute(&self.pool)
            .await
            .with_context(|| format!("insert row {id}"))?;
        Ok(())
    }
}
