//! REST endpoints for intake and proposal review.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::pipeline::{Dispatcher, MailTransport, OutgoingEmail};
use crate::store::{Database, ProposalStatus};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<dyn Database>,
    /// Intake dispatcher (None if no mail transport is configured).
    pub dispatcher: Option<Arc<Dispatcher>>,
    /// Transport used to send approved proposals.
    pub transport: Option<Arc<dyn MailTransport>>,
}

/// Build the Axum router with health, intake and proposal routes.
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/check-emails", post(check_emails))
        .route("/api/proposals/pending", get(pending_proposals))
        .route("/api/proposals/{id}/approve", post(approve_proposal))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn error_body(
    status: StatusCode,
    message: impl Into<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    (status, Json(json!({ "error": message.into() })))
}

fn already_reviewed(id: i64) -> (StatusCode, Json<serde_json::Value>) {
    warn!(proposal_id = id, "Proposal already reviewed");
    error_body(StatusCode::CONFLICT, "Proposal is no longer pending")
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "proposal-copilot"
    }))
}

// ── Intake ──────────────────────────────────────────────────────────────

async fn check_emails(State(state): State<ApiState>) -> impl IntoResponse {
    let Some(dispatcher) = state.dispatcher else {
        return error_body(StatusCode::SERVICE_UNAVAILABLE, "Mail transport not configured");
    };

    match dispatcher.check_emails().await {
        Ok(report) => (StatusCode::OK, Json(json!(report))),
        Err(e) => {
            error!(error = %e, "Manual intake check failed");
            error_body(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

// ── Proposals ───────────────────────────────────────────────────────────

async fn pending_proposals(State(state): State<ApiState>) -> impl IntoResponse {
    match state.db.get_pending_proposals().await {
        Ok(proposals) => (StatusCode::OK, Json(json!(proposals))),
        Err(e) => {
            error!(error = %e, "Failed to list pending proposals");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load proposals")
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApprovalRequest {
    approved: bool,
}

async fn approve_proposal(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(body): Json<ApprovalRequest>,
) -> impl IntoResponse {
    let proposal = match state.db.get_proposal(id).await {
        Ok(Some(proposal)) => proposal,
        Ok(None) => return error_body(StatusCode::NOT_FOUND, "Proposal not found"),
        Err(e) => {
            error!(proposal_id = id, error = %e, "Failed to load proposal");
            return error_body(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load proposal");
        }
    };

    if proposal.status != ProposalStatus::Pending {
        return error_body(
            StatusCode::CONFLICT,
            format!("Proposal is already {}", proposal.status),
        );
    }

    if !body.approved {
        return match state
            .db
            .transition_proposal_status(id, ProposalStatus::Pending, ProposalStatus::Rejected)
            .await
        {
            Ok(true) => {
                info!(proposal_id = id, "Proposal rejected");
                (StatusCode::OK, Json(json!({ "message": "Proposal rejected" })))
            }
            Ok(false) => already_reviewed(id),
            Err(e) => {
                error!(proposal_id = id, error = %e, "Failed to reject proposal");
                error_body(StatusCode::INTERNAL_SERVER_ERROR, "Failed to update proposal")
            }
        };
    }

    let Some(transport) = state.transport else {
        return error_body(StatusCode::SERVICE_UNAVAILABLE, "Mail transport not configured");
    };

    // Only the request that wins this transition sends the reply.
    match state
        .db
        .transition_proposal_status(id, ProposalStatus::Pending, ProposalStatus::Approved)
        .await
    {
        Ok(true) => {}
        Ok(false) => return already_reviewed(id),
        Err(e) => {
            error!(proposal_id = id, error = %e, "Failed to approve proposal");
            return error_body(StatusCode::INTERNAL_SERVER_ERROR, "Failed to update proposal");
        }
    }

    let reply = OutgoingEmail::reply(
        &proposal.client_email,
        &proposal.reply_subject,
        &proposal.proposal_text,
        &proposal.thread_id,
    );
    if let Err(e) = transport.send(reply).await {
        warn!(proposal_id = id, error = %e, "Approved proposal could not be sent");
        return error_body(StatusCode::BAD_GATEWAY, format!("Send failed: {e}"));
    }

    match state
        .db
        .transition_proposal_status(id, ProposalStatus::Approved, ProposalStatus::Sent)
        .await
    {
        Ok(true) => {}
        // The reply is out; only the bookkeeping lags.
        Ok(false) => warn!(proposal_id = id, "Sent proposal was no longer approved"),
        Err(e) => error!(proposal_id = id, error = %e, "Sent proposal could not be marked sent"),
    }

    info!(proposal_id = id, to = %proposal.client_email, "Proposal approved and sent");
    (
        StatusCode::OK,
        Json(json!({ "message": "Proposal approved and sent!" })),
    )
}
