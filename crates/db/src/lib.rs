//! Run Record Store for qarun.
//!
//! - [`RunStore`] is the authoritative two-tier store: an in-memory fast
//!   tier with one lock per run, backed by a durable [`RunArchive`].
//! - [`PgRunArchive`] persists runs to PostgreSQL via [`TestRunRepo`];
//!   [`MemoryRunArchive`] is the in-process replacement.
//! - [`persist`] owns the background writer that keeps the archive in sync
//!   without ever blocking a state transition.

use sqlx::postgres::PgPoolOptions;

pub mod archive;
pub mod models;
pub mod persist;
pub mod repositories;
pub mod store;

pub use archive::{ArchiveError, MemoryRunArchive, PgRunArchive, RunArchive};
pub use repositories::TestRunRepo;
pub use store::RunStore;

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Verify the database answers a trivial query.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply the embedded migrations under `crates/db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
