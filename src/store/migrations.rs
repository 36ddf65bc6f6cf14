//! Version-tracked database migrations for the libSQL backend.
//!
//! Versions are recorded in `_migrations`; `run_migrations()` applies the
//! ones above the recorded maximum, in order.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "clients_and_proposals",
        sql: r#"
            CREATE TABLE IF NOT EXISTS clients (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                company TEXT,
                project_type TEXT NOT NULL,
                requirements TEXT NOT NULL DEFAULT '[]',
                timeline TEXT,
                budget TEXT,
                status TEXT NOT NULL DEFAULT 'new',
                thread_id TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS proposals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                client_id INTEGER NOT NULL REFERENCES clients(id),
                source_email_id TEXT NOT NULL,
                proposal_text TEXT NOT NULL,
                cost_min INTEGER NOT NULL,
                cost_max INTEGER NOT NULL,
                reply_subject TEXT NOT NULL,
                thread_id TEXT NOT NULL,
                workflow_step TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                sent_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_proposals_status ON proposals(status);
            CREATE INDEX IF NOT EXISTS idx_proposals_client ON proposals(client_id);
        "#,
    },
    Migration {
        version: 2,
        name: "processed_emails",
        sql: r#"
            CREATE TABLE IF NOT EXISTS processed_emails (
                email_id TEXT PRIMARY KEY,
                outcome TEXT NOT NULL,
                processed_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
        "#,
    },
];

/// Bring the schema up to the latest version.
///
/// Each pending migration runs in its own transaction together with its
/// `_migrations` record, so a failed step leaves the previous version intact.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("create _migrations: {e}")))?;

    let from = schema_version(conn).await?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > from).collect();
    if pending.is_empty() {
        tracing::debug!(version = from, "Schema up to date");
        return Ok(());
    }

    for migration in pending {
        apply(conn, migration).await?;
    }
    let to = schema_version(conn).await?;
    tracing::info!(from, to, "Schema migrated");
    Ok(())
}

/// Highest applied migration version, 0 for a fresh database.
pub async fn schema_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("schema_version: {e}")))?;

    match rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("schema_version: {e}")))?
    {
        Some(row) => row
            .get::<i64>(0)
            .map_err(|e| DatabaseError::Migration(format!("schema_version: {e}"))),
        None => Ok(0),
    }
}

async fn apply(conn: &Connection, migration: &Migration) -> Result<(), DatabaseError> {
    let fail = |e: libsql::Error| {
        DatabaseError::Migration(format!("V{} ({}): {e}", migration.version, migration.name))
    };

    tracing::info!(version = migration.version, name = migration.name, "Applying migration");
    let tx = conn.transaction().await.map_err(fail)?;
    let applied = async {
        tx.execute_batch(migration.sql).await?;
        tx.execute(
            "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
            libsql::params![migration.version, migration.name],
        )
        .await?;
        Ok::<_, libsql::Error>(())
    }
    .await;

    match applied {
        Ok(()) => tx.commit().await.map_err(fail),
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                tracing::warn!(version = migration.version, error = %rollback, "Rollback failed");
            }
            Err(fail(e))
        }
    }
}
