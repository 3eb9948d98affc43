//! Local SQLite handle shared by the write queue and the embedded store

use std::path::Path;

use libsql::{Builder, Connection, Database as LibSqlDatabase};

use super::migrations;
use crate::error::Result;

const IN_MEMORY: &str = ":memory:";

/// An open libSQL database with its schema brought up to date
pub struct Database {
    _db: LibSqlDatabase,
    conn: Connection,
}

impl Database {
    /// Open or create the database file at `path`, creating parent
    /// directories as needed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let database = Self::connect(&path.to_string_lossy()).await?;
        tracing::debug!(path = %path.display(), "opened local database");
        Ok(database)
    }

    /// Open a private in-memory database
    pub async fn open_in_memory() -> Result<Self> {
        Self::connect(IN_MEMORY).await
    }

    async fn connect(location: &str) -> Result<Self> {
        let db = Builder::new_local(location).build().await?;
        let conn = db.connect()?;
        apply_pragmas(&conn, location != IN_MEMORY).await?;
        migrations::run(&conn).await?;
        Ok(Self { _db: db, conn })
    }

    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Queue appends must reach the disk before `enqueue` returns.
async fn apply_pragmas(conn: &Connection, on_disk: bool) -> Result<()> {
    if on_disk {
        conn.query("PRAGMA journal_mode = WAL", ()).await?;
    }
    conn.query("PRAGMA busy_timeout = 5000", ()).await?;
    conn.execute("PRAGMA synchronous = FULL", ()).await?;
    conn.execute("PRAGMA foreign_keys = ON", ()).await?;
    Ok(())
}
