//! `Database` trait: single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::DatabaseError;

/// Review status of a stored proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    /// Awaiting human review.
    Pending,
    /// Approved; reply not yet confirmed sent.
    Approved,
    /// Reviewer declined it.
    Rejected,
    /// Reply went out.
    Sent,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Sent => "sent",
        }
    }

    /// Parse a DB status string. Unknown values read as pending.
    pub fn from_db(s: &str) -> Self {
        match s {
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            "sent" => Self::Sent,
            _ => Self::Pending,
        }
    }
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What intake did with an email.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailOutcome {
    Rejected,
    Proposed,
}

impl EmailOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rejected => "rejected",
            Self::Proposed => "proposed",
        }
    }
}

/// Client record written after a successful workflow run.
#[derive(Debug, Clone, PartialEq)]
pub struct NewClient {
    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub project_type: String,
    pub requirements: Vec<String>,
    pub timeline: Option<String>,
    pub budget: Option<String>,
    pub thread_id: String,
}

/// Proposal awaiting review.
#[derive(Debug, Clone, PartialEq)]
pub struct NewProposal {
    pub client_id: i64,
    pub source_email_id: String,
    pub proposal_text: String,
    pub cost_min: u64,
    pub cost_max: u64,
    pub reply_subject: String,
    pub thread_id: String,
    /// Final current-step tag of the run that produced it.
    pub workflow_step: String,
}

/// A persisted proposal joined with its client.
#[derive(Debug, Clone, Serialize)]
pub struct StoredProposal {
    pub id: i64,
    pub client_id: i64,
    pub client_name: String,
    pub client_email: String,
    pub project_type: String,
    pub source_email_id: String,
    pub proposal_text: String,
    pub cost_min: u64,
    pub cost_max: u64,
    pub reply_subject: String,
    pub thread_id: String,
    pub workflow_step: String,
    pub status: ProposalStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Backend-agnostic database trait covering clients, proposals and intake
/// bookkeeping.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Clients ─────────────────────────────────────────────────────

    /// Insert a client, or refresh the existing row with the same email.
    /// Returns the client id.
    async fn upsert_client(&self, client: &NewClient) -> Result<i64, DatabaseError>;

    // ── Proposals ───────────────────────────────────────────────────

    /// Insert a pending proposal. Returns its id.
    async fn create_proposal(&self, proposal: &NewProposal) -> Result<i64, DatabaseError>;

    async fn get_proposal(&self, id: i64) -> Result<Option<StoredProposal>, DatabaseError>;

    /// All pending proposals, oldest first.
    async fn get_pending_proposals(&self) -> Result<Vec<StoredProposal>, DatabaseError>;

    /// Move a proposal from `from` to `to` in one conditional update.
    /// Stamps `sent_at` when `to` is `Sent`.
    ///
    /// Returns `false` when the proposal is missing or no longer in `from`;
    /// of two racing callers, exactly one sees `true`.
    async fn transition_proposal_status(
        &self,
        id: i64,
        from: ProposalStatus,
        to: ProposalStatus,
    ) -> Result<bool, DatabaseError>;

    // ── Intake bookkeeping ──────────────────────────────────────────

    async fn is_email_processed(&self, email_id: &str) -> Result<bool, DatabaseError>;

    /// Record that intake handled an email. Re-recording is a no-op.
    async fn mark_email_processed(
        &self,
        email_id: &str,
        outcome: EmailOutcome,
    ) -> Result<(), DatabaseError>;
}
