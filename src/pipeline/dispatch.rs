//! Intake dispatch: turns unread mail into pending proposals.
//!
//! One check:
//! 1. `fetch_unread()` from the transport
//! 2. skip emails already recorded in `processed_emails`
//! 3. run the workflow for the rest, bounded concurrency, one state per email
//! 4. rejected → record + mark read
//! 5. accepted → upsert client, create pending proposal, record, mark read
//!
//! A failure on one email never aborts the batch.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, error, info, warn};

use crate::error::{PipelineError, WorkflowError};
use crate::pipeline::types::{DispatchReport, InboundEmail, MailTransport};
use crate::store::{Database, EmailOutcome, NewClient, NewProposal};
use crate::workflow::{WorkflowOrchestrator, WorkflowState};

const DEFAULT_MAX_EMAILS: usize = 5;
const DEFAULT_MAX_CONCURRENT: usize = 4;

/// What happened to one fetched email.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Skipped,
    Rejected,
    Proposed(i64),
}

/// Drives intake checks against one mailbox.
pub struct Dispatcher {
    orchestrator: Arc<WorkflowOrchestrator>,
    db: Arc<dyn Database>,
    transport: Arc<dyn MailTransport>,
    max_emails: usize,
    max_concurrent: usize,
}

impl Dispatcher {
    pub fn new(
        orchestrator: Arc<WorkflowOrchestrator>,
        db: Arc<dyn Database>,
        transport: Arc<dyn MailTransport>,
    ) -> Self {
        Self {
            orchestrator,
            db,
            transport,
            max_emails: DEFAULT_MAX_EMAILS,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
        }
    }

    /// Cap emails fetched per check and workflow runs in flight.
    pub fn with_limits(mut self, max_emails: usize, max_concurrent: usize) -> Self {
        self.max_emails = max_emails;
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Run one intake check. Only a failed fetch is an `Err`.
    pub async fn check_emails(&self) -> Result<DispatchReport, PipelineError> {
        let emails = self
            .transport
            .fetch_unread(self.max_emails)
            .await
            .map_err(|e| PipelineError::ChannelFetch(e.to_string()))?;

        let mut report = DispatchReport {
            fetched: emails.len(),
            ..Default::default()
        };
        if emails.is_empty() {
            debug!("No unread emails");
            return Ok(report);
        }

        info!(count = emails.len(), transport = self.transport.name(), "Processing unread emails");

        let results: Vec<(String, Result<Disposition, PipelineError>)> =
            futures::stream::iter(emails)
                .map(|email| async move {
                    let email_id = email.email_id.clone();
                    (email_id, self.handle_email(email).await)
                })
                .buffer_unordered(self.max_concurrent)
                .collect()
                .await;

        for (email_id, result) in results {
            match result {
                Ok(Disposition::Skipped) => report.skipped += 1,
                Ok(Disposition::Rejected) => report.rejected += 1,
                Ok(Disposition::Proposed(id)) => report.proposal_ids.push(id),
                Err(e) => {
                    error!(email_id = %email_id, error = %e, "Failed to process email");
                    report.failed += 1;
                }
            }
        }
        report.proposal_ids.sort_unstable();
        report.processed = report.proposal_ids.len();

        info!(
            processed = report.processed,
            skipped = report.skipped,
            rejected = report.rejected,
            failed = report.failed,
            "Intake check complete"
        );
        Ok(report)
    }

    async fn handle_email(&self, email: InboundEmail) -> Result<Disposition, PipelineError> {
        if self.db.is_email_processed(&email.email_id).await? {
            debug!(email_id = %email.email_id, "Already processed, skipping");
            return Ok(Disposition::Skipped);
        }

        let state = self
            .orchestrator
            .run_workflow(email.to_workflow_input())
            .await?;

        let disposition = if state.is_valid_inquiry {
            let proposal_id = self.persist_proposal(&state).await?;
            self.db
                .mark_email_processed(&email.email_id, EmailOutcome::Proposed)
                .await?;
            info!(
                email_id = %email.email_id,
                proposal_id,
                step = %state.current_step,
                "Proposal queued for review"
            );
            Disposition::Proposed(proposal_id)
        } else {
            self.db
                .mark_email_processed(&email.email_id, EmailOutcome::Rejected)
                .await?;
            info!(
                email_id = %email.email_id,
                reason = state.classification_reason.as_deref().or(state.error.as_deref()).unwrap_or(""),
                "Email rejected"
            );
            Disposition::Rejected
        };

        // Already recorded, so a later check skips it even if this fails.
        if let Err(e) = self.transport.mark_read(&email.email_id).await {
            warn!(email_id = %email.email_id, error = %e, "Failed to mark email read");
        }

        Ok(disposition)
    }

    async fn persist_proposal(&self, state: &WorkflowState) -> Result<i64, PipelineError> {
        let (client, proposal_text, estimate) = match (
            client_from_state(state),
            state.proposal_text.as_ref(),
            state.cost_estimate.as_ref(),
        ) {
            (Some(client), Some(text), Some(estimate)) => (client, text, estimate),
            _ => {
                return Err(WorkflowError::ContractViolation {
                    stage: "done".into(),
                    reason: "accepted run finished without client, proposal or estimate".into(),
                }
                .into());
            }
        };

        let client_id = self.db.upsert_client(&client).await?;
        let proposal = NewProposal {
            client_id,
            source_email_id: state.email_id.clone(),
            proposal_text: proposal_text.clone(),
            cost_min: estimate.min,
            cost_max: estimate.max,
            reply_subject: reply_subject(&client.project_type),
            thread_id: state.thread_id.clone(),
            workflow_step: state.current_step.as_str().to_string(),
        };
        Ok(self.db.create_proposal(&proposal).await?)
    }
}

/// Subject line used when the proposal is sent.
pub fn reply_subject(project_type: &str) -> String {
    format!("{project_type} Proposal")
}

fn client_from_state(state: &WorkflowState) -> Option<NewClient> {
    Some(NewClient {
        name: state.client_name.clone()?,
        email: state.email_from.clone(),
        company: state.company.clone(),
        project_type: state.project_type.clone()?,
        requirements: state.requirements.clone().unwrap_or_default(),
        timeline: state.timeline.clone(),
        budget: state.budget.clone(),
        thread_id: state.thread_id.clone(),
    })
}
