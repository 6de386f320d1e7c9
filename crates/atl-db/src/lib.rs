//! atl-db
//!
//! Persistence for the workshop back office: the [`Store`] / [`StoreTx`]
//! unit-of-work boundary, its Postgres implementation ([`PgStore`]), and,
//! behind the `testkit` feature, an in-memory implementation with failure
//! injection.

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

mod pg;
mod store;

#[cfg(feature = "testkit")]
mod mem;

pub use pg::PgStore;
pub use store::{
    ClaimRequest, OutboxRow, OutboxStatus, Store, StoreError, StoreResult, StoreTx,
    UQ_STYLES_NAME,
};

#[cfg(feature = "testkit")]
pub use mem::{FailPoint, MemCounts, MemStore};

pub const ENV_DB_URL: &str = "ATL_DATABASE_URL";

/// Connect to Postgres using ATL_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url =
        std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect(&url).await
}

pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_commandes_table: bool,
}

/// Connectivity plus schema presence.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='commandes'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_commandes_table: exists,
    })
}
