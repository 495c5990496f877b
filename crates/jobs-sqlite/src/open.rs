use crate::error::{Result, StoreError};
use crate::schema::MIG_0001_INIT;
use rusqlite::Connection;
use std::sync::Mutex;
use std::time::Duration;

/// Storage I/O never blocks longer than this on a locked database file.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A single SQLite connection. Every access goes through one mutex, so the handle
/// can be shared across tasks and concurrent upserts are serialized.
pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    pub fn open_or_create(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path)?;
        apply_pragmas(&conn, true)?;
        migrate(&conn)?;
        tracing::debug!(path = %path.display(), "job store opened");
        Ok(Db { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_pragmas(&conn, false)?;
        migrate(&conn)?;
        Ok(Db { conn: Mutex::new(conn) })
    }

    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&guard)
    }
}

fn apply_pragmas(conn: &Connection, on_disk: bool) -> Result<()> {
    if on_disk {
        conn.pragma_update(None, "journal_mode", &"WAL")?;
        conn.pragma_update(None, "synchronous", &"NORMAL")?;
    }
    conn.pragma_update(None, "foreign_keys", &"ON")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(())
}

fn migrate(conn: &Connection) -> Result<()> {
    // schema is created on first open
    let exists: i64 = conn.query_row(
        "SELECT COUNT(1) FROM sqlite_master WHERE type='table' AND name='jobs'",
        [],
        |r| r.get(0),
    )?;
    if exists == 0 {
        conn.execute_batch(MIG_0001_INIT)?;
    }
    Ok(())
}
