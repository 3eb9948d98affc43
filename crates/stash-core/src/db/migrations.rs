//! Versioned schema for the local database

use libsql::{params, Connection};

use crate::error::Result;
use crate::util::unix_millis_now;

struct Migration {
    version: i64,
    description: &'static str,
    statements: &'static [&'static str],
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "offline write queue and draft snapshots",
        statements: &[
            // seq orders enqueues; the highest seq per document wins
            "CREATE TABLE IF NOT EXISTS save_queue (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                document_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                base_revision INTEGER NOT NULL,
                enqueued_at INTEGER NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT
            )",
            "CREATE INDEX IF NOT EXISTS idx_save_queue_document ON save_queue(document_id, seq)",
            "CREATE TABLE IF NOT EXISTS draft_snapshots (
                document_id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                saved_at INTEGER NOT NULL
            )",
        ],
    },
    Migration {
        version: 2,
        description: "revision-checked campaign store",
        statements: &[
            "CREATE TABLE IF NOT EXISTS campaigns (
                id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                revision INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS campaign_summaries (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        ],
    },
];

/// Apply every migration newer than the recorded schema version
pub async fn run(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    let applied = applied_version(conn).await?;
    for migration in MIGRATIONS.iter().filter(|m| m.version > applied) {
        apply(conn, migration).await?;
    }
    Ok(())
}

async fn applied_version(conn: &Connection) -> Result<i64> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;
    match rows.next().await? {
        Some(row) => Ok(row.get(0)?),
        None => Ok(0),
    }
}

/// One migration per transaction; a failed statement rolls the whole step back.
async fn apply(conn: &Connection, migration: &Migration) -> Result<()> {
    let tx = conn.transaction().await?;
    for statement in migration.statements {
        tx.execute(statement, ()).await?;
    }
    tx.execute(
        "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
        params![migration.version, unix_millis_now()],
    )
    .await?;
    tx.commit().await?;

    tracing::info!(
        version = migration.version,
        "applied migration: {}",
        migration.description
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use libsql::Builder;

    async fn connection() -> Connection {
        let db = Builder::new_local(":memory:").build().await.unwrap();
        db.connect().unwrap()
    }

    async fn table_names(conn: &Connection) -> Vec<String> {
        let mut rows = conn
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
                (),
            )
            .await
            .unwrap();
        let mut names = Vec::new();
        while let Some(row) = rows.next().await.unwrap() {
            names.push(row.get::<String>(0).unwrap());
        }
        names
    }

    #[test]
    fn migration_versions_increase_by_one() {
        for (index, migration) in MIGRATIONS.iter().enumerate() {
            assert_eq!(migration.version, index as i64 + 1);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fresh_database_reaches_latest_version() {
        let conn = connection().await;
        run(&conn).await.unwrap();

        let latest = MIGRATIONS.last().map_or(0, |m| m.version);
        assert_eq!(applied_version(&conn).await.unwrap(), latest);
        let tables = table_names(&conn).await;
        for table in ["campaign_summaries", "campaigns", "draft_snapshots", "save_queue"] {
            assert!(tables.iter().any(|name| name == table), "missing table {table}");
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rerunning_applies_nothing() {
        let conn = connection().await;
        run(&conn).await.unwrap();
        run(&conn).await.unwrap();

        let mut rows = conn
            .query("SELECT COUNT(*) FROM schema_version", ())
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<i64>(0).unwrap(), MIGRATIONS.len() as i64);
    }
}
