//! Connection setup for the record store.
//!
//! Every mutation in this crate is a single-row compare-and-set, so the
//! connection is tuned for short contended writes rather than bulk work:
//! WAL keeps the sweeper and `status` reads from blocking a run that is
//! mid-transition, and the busy timeout makes two scheduled runs hitting
//! the same record queue on SQLite's write lock long enough for one of
//! them to lose the CAS cleanly instead of erroring with `SQLITE_BUSY`.

use diesel::connection::SimpleConnection;
use diesel::{Connection, SqliteConnection};

/// How long a contending run waits on the write lock before giving up.
/// Generously above the longest single CAS statement; phases never hold a
/// transaction across adapter I/O, so waits stay short in practice.
const BUSY_TIMEOUT_MS: u32 = 5000;

/// Open the record store and apply its connection-wide pragmas.
pub fn connect_sqlite(database_url: &str) -> anyhow::Result<SqliteConnection> {
    let mut conn = SqliteConnection::establish(database_url)?;
    conn.batch_execute(&format!(
        "PRAGMA journal_mode=WAL;\
         PRAGMA foreign_keys=ON;\
         PRAGMA busy_timeout={BUSY_TIMEOUT_MS};"
    ))?;
    Ok(conn)
}
