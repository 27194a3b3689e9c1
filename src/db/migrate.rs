//! Embedded Diesel migrations for the `pipeline_records` table.

use anyhow::anyhow;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing::info;

use crate::db::connection::connect_sqlite;

/// Migrations bundled with this crate; applied by [`run_sqlite`].
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Bring the record store at `url` up to date. Opens through
/// [`connect_sqlite`] so the store pragmas are in force before any DDL
/// runs.
pub fn run_sqlite(url: &str) -> anyhow::Result<()> {
    let mut conn = connect_sqlite(url)?;
    let applied = conn.run_pending_migrations(MIGRATIONS).map_err(|e| anyhow!(e))?;
    if applied.is_empty() {
        info!("record store schema already up to date");
    } else {
        for version in &applied {
            info!(%version, "applied record store migration");
        }
    }

    Ok(())
}

/// Run migrations for a database URL. Only SQLite targets are supported;
/// plain file paths are treated as SQLite.
pub fn run_all(database_url: &str) -> anyhow::Result<()> {
    if database_url.starts_with("postgres://") || database_url.starts_with("mysql://") {
        anyhow::bail!("unsupported DATABASE_URL scheme: {database_url}");
    }
    run_sqlite(database_url.strip_prefix("sqlite:").unwrap_or(database_url))
}
