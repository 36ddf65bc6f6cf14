//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{
    Database, EmailOutcome, NewClient, NewProposal, ProposalStatus, StoredProposal,
};

/// libSQL store shared by intake and the approval API.
///
/// One `Connection` serves every concurrent workflow run; it is `Send + Sync`.
pub struct LibSqlBackend {
    /// Owns the database; an in-memory one disappears when this drops.
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Map a joined proposal row (see `PROPOSAL_SELECT`) to a StoredProposal.
fn row_to_proposal(row: &libsql::Row) -> Result<StoredProposal, libsql::Error> {
    let cost_min: i64 = row.get(7)?;
    let cost_max: i64 = row.get(8)?;
    let status_str: String = row.get(12)?;
    let sent_at_str: Option<String> = row.get(13).ok();
    let created_str: String = row.get(14)?;
    let updated_str: String = row.get(15)?;

    Ok(StoredProposal {
        id: row.get(0)?,
        client_id: row.get(1)?,
        client_name: row.get(2)?,
        client_email: row.get(3)?,
        project_type: row.get(4)?,
        source_email_id: row.get(5)?,
        proposal_text: row.get(6)?,
        cost_min: cost_min.max(0) as u64,
        cost_max: cost_max.max(0) as u64,
        reply_subject: row.get(9)?,
        thread_id: row.get(10)?,
        workflow_step: row.get(11)?,
        status: ProposalStatus::from_db(&status_str),
        sent_at: parse_optional_datetime(&sent_at_str),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const PROPOSAL_SELECT: &str = "SELECT p.id, p.client_id, c.name, c.email, c.project_type, \
     p.source_email_id, p.proposal_text, p.cost_min, p.cost_max, p.reply_subject, p.thread_id, \
     p.workflow_step, p.status, p.sent_at, p.created_at, p.updated_at \
     FROM proposals p JOIN clients c ON c.id = p.client_id";

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Clients ─────────────────────────────────────────────────────

    async fn upsert_client(&self, client: &NewClient) -> Result<i64, DatabaseError> {
        let requirements = serde_json::to_string(&client.requirements)
            .map_err(|e| DatabaseError::Serialization(format!("requirements: {e}")))?;
        let now = Utc::now().to_rfc3339();

        let mut rows = self
            .conn()
            .query(
                "INSERT INTO clients (name, email, company, project_type, requirements, timeline, budget, thread_id, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
                 ON CONFLICT(email) DO UPDATE SET \
                    name = excluded.name, company = excluded.company, project_type = excluded.project_type, \
                    requirements = excluded.requirements, timeline = excluded.timeline, \
                    budget = excluded.budget, thread_id = excluded.thread_id \
                 RETURNING id",
                params![
                    client.name.as_str(),
                    client.email.as_str(),
                    opt_text(client.company.as_deref()),
                    client.project_type.as_str(),
                    requirements,
                    opt_text(client.timeline.as_deref()),
                    opt_text(client.budget.as_deref()),
                    client.thread_id.as_str(),
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_client: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_client: {e}")))?
            .ok_or_else(|| DatabaseError::Query("upsert_client: no id returned".into()))?;
        let id: i64 = row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("upsert_client row parse: {e}")))?;

        debug!(client_id = id, email = %client.email, "Client upserted");
        Ok(id)
    }

    // ── Proposals ───────────────────────────────────────────────────

    async fn create_proposal(&self, proposal: &NewProposal) -> Result<i64, DatabaseError> {
        let now = Utc::now().to_rfc3339();

        let mut rows = self
            .conn()
            .query(
                "INSERT INTO proposals (client_id, source_email_id, proposal_text, cost_min, cost_max, reply_subject, thread_id, workflow_step, status, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10) RETURNING id",
                params![
                    proposal.client_id,
                    proposal.source_email_id.as_str(),
                    proposal.proposal_text.as_str(),
                    proposal.cost_min as i64,
                    proposal.cost_max as i64,
                    proposal.reply_subject.as_str(),
                    proposal.thread_id.as_str(),
                    proposal.workflow_step.as_str(),
                    ProposalStatus::Pending.as_str(),
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_proposal: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("create_proposal: {e}")))?
            .ok_or_else(|| DatabaseError::Query("create_proposal: no id returned".into()))?;
        let id: i64 = row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("create_proposal row parse: {e}")))?;

        debug!(proposal_id = id, client_id = proposal.client_id, "Proposal created");
        Ok(id)
    }

    async fn get_proposal(&self, id: i64) -> Result<Option<StoredProposal>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(&format!("{PROPOSAL_SELECT} WHERE p.id = ?1"), params![id])
            .await
            .map_err(|e| DatabaseError::Query(format!("get_proposal: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let proposal = row_to_proposal(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_proposal row parse: {e}")))?;
                Ok(Some(proposal))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_proposal: {e}"))),
        }
    }

    async fn get_pending_proposals(&self) -> Result<Vec<StoredProposal>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("{PROPOSAL_SELECT} WHERE p.status = ?1 ORDER BY p.created_at ASC, p.id ASC"),
                params![ProposalStatus::Pending.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_pending_proposals: {e}")))?;

        let mut proposals = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("get_pending_proposals: {e}")))?
        {
            match row_to_proposal(&row) {
                Ok(proposal) => proposals.push(proposal),
                Err(e) => {
                    tracing::warn!("Skipping proposal row: {e}");
                }
            }
        }
        Ok(proposals)
    }

    async fn transition_proposal_status(
        &self,
        id: i64,
        from: ProposalStatus,
        to: ProposalStatus,
    ) -> Result<bool, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let sent_at = (to == ProposalStatus::Sent).then_some(now.as_str());

        let affected = self
            .conn()
            .execute(
                "UPDATE proposals SET status = ?1, updated_at = ?2, sent_at = COALESCE(?3, sent_at) \
                 WHERE id = ?4 AND status = ?5",
                params![to.as_str(), now.as_str(), opt_text(sent_at), id, from.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("transition_proposal_status: {e}")))?;

        if affected == 0 {
            debug!(proposal_id = id, from = %from, to = %to, "Proposal not in expected status");
            return Ok(false);
        }

        debug!(proposal_id = id, from = %from, to = %to, "Proposal status updated");
        Ok(true)
    }

    // ── Intake bookkeeping ──────────────────────────────────────────

    async fn is_email_processed(&self, email_id: &str) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT 1 FROM processed_emails WHERE email_id = ?1 LIMIT 1",
                params![email_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("is_email_processed: {e}")))?;

        match rows.next().await {
            Ok(row) => Ok(row.is_some()),
            Err(e) => Err(DatabaseError::Query(format!("is_email_processed: {e}"))),
        }
    }

    async fn mark_email_processed(
        &self,
        email_id: &str,
        outcome: EmailOutcome,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO processed_emails (email_id, outcome, processed_at) VALUES (?1, ?2, ?3)",
                params![email_id, outcome.as_str(), Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_email_processed: {e}")))?;
        Ok(())
    }
}
