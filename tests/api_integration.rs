//! End-to-end tests for the HTTP API.
//!
//! Each test spins up an Axum server on a random port backed by an
//! in-memory database, the mock completion backend and a scripted mailbox,
//! then drives the REST contract with reqwest.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use proposal_copilot::api::{ApiState, api_routes};
use proposal_copilot::error::ChannelError;
use proposal_copilot::llm::MockCompletion;
use proposal_copilot::pipeline::{Dispatcher, InboundEmail, MailTransport, OutgoingEmail};
use proposal_copilot::store::{Database, LibSqlBackend};
use proposal_copilot::workflow::WorkflowOrchestrator;

/// Mailbox stub: hands out unread inbox mail, records everything sent.
#[derive(Default)]
struct ScriptedMailbox {
    inbox: Mutex<Vec<InboundEmail>>,
    /// Ignore mark-read so mail keeps coming back unread.
    sticky: bool,
    read: Mutex<Vec<String>>,
    sent: Mutex<Vec<OutgoingEmail>>,
}

impl ScriptedMailbox {
    fn with_inbox(emails: Vec<InboundEmail>) -> Self {
        Self {
            inbox: Mutex::new(emails),
            ..Default::default()
        }
    }
}

#[async_trait]
impl MailTransport for ScriptedMailbox {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch_unread(&self, limit: usize) -> Result<Vec<InboundEmail>, ChannelError> {
        let read = self.read.lock().unwrap().clone();
        Ok(self
            .inbox
            .lock()
            .unwrap()
            .iter()
            .filter(|e| !read.contains(&e.email_id))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_read(&self, email_id: &str) -> Result<(), ChannelError> {
        if self.sticky {
            return Ok(());
        }
        self.read.lock().unwrap().push(email_id.to_string());
        Ok(())
    }

    async fn send(&self, email: OutgoingEmail) -> Result<(), ChannelError> {
        self.sent.lock().unwrap().push(email);
        Ok(())
    }
}

fn inquiry(id: &str) -> InboundEmail {
    InboundEmail {
        email_id: id.to_string(),
        from: "dana@acme.io".to_string(),
        subject: "Need a booking site".to_string(),
        body: "We need a web app for bookings, budget around $5k.".to_string(),
        thread_id: format!("<{id}@acme.io>"),
        received_at: Utc::now(),
    }
}

/// Start an Axum server on a random port, return (base url, mailbox, db).
async fn start_server(
    inbox: Vec<InboundEmail>,
) -> (String, Arc<ScriptedMailbox>, Arc<LibSqlBackend>) {
    serve(ScriptedMailbox::with_inbox(inbox)).await
}

async fn serve(mailbox: ScriptedMailbox) -> (String, Arc<ScriptedMailbox>, Arc<LibSqlBackend>) {
    let mailbox = Arc::new(mailbox);
    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let orchestrator = Arc::new(WorkflowOrchestrator::new(Arc::new(MockCompletion::new())));
    let dispatcher = Arc::new(Dispatcher::new(
        orchestrator,
        db.clone(),
        mailbox.clone(),
    ));

    let app = api_routes(ApiState {
        db: db.clone(),
        dispatcher: Some(dispatcher),
        transport: Some(mailbox.clone()),
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("http://127.0.0.1:{port}"), mailbox, db)
}

#[tokio::test]
async fn health_endpoint() {
    let (base, _, _) = start_server(vec![]).await;
    let body: Value = reqwest::get(format!("{base}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"status": "ok", "service": "proposal-copilot"}));
}

#[tokio::test]
async fn intake_then_approve_sends_reply() {
    let (base, mailbox, db) = start_server(vec![inquiry("41")]).await;
    let client = reqwest::Client::new();

    let report: Value = client
        .post(format!("{base}/api/check-emails"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report["fetched"], 1);
    assert_eq!(report["processed"], 1);
    assert_eq!(mailbox.read.lock().unwrap().as_slice(), ["41"]);

    let pending: Value = client
        .get(format!("{base}/api/proposals/pending"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let pending = pending.as_array().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0]["client_name"], "Mock User");
    assert_eq!(pending[0]["client_email"], "dana@acme.io");
    assert!(pending[0]["cost_min"].as_u64().unwrap() < pending[0]["cost_max"].as_u64().unwrap());
    let id = pending[0]["id"].as_i64().unwrap();

    let resp = client
        .post(format!("{base}/api/proposals/{id}/approve"))
        .json(&json!({"approved": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let sent = mailbox.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "dana@acme.io");
    assert_eq!(sent[0].subject, "Web App Proposal");
    assert_eq!(sent[0].in_reply_to.as_deref(), Some("<41@acme.io>"));
    assert!(sent[0].body.starts_with("Dear Mock User"));

    assert!(db.get_pending_proposals().await.unwrap().is_empty());
}

#[tokio::test]
async fn mail_left_unread_is_not_proposed_twice() {
    let (base, _, db) = serve(ScriptedMailbox {
        sticky: true,
        ..ScriptedMailbox::with_inbox(vec![inquiry("7")])
    })
    .await;
    let client = reqwest::Client::new();

    let first: Value = client
        .post(format!("{base}/api/check-emails"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let second: Value = client
        .post(format!("{base}/api/check-emails"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(first["processed"], 1);
    assert_eq!(second["fetched"], 1);
    assert_eq!(second["skipped"], 1);
    assert_eq!(second["processed"], 0);
    assert_eq!(db.get_pending_proposals().await.unwrap().len(), 1);
}

#[tokio::test]
async fn malformed_approval_body_is_rejected() {
    let (base, _, _) = start_server(vec![]).await;
    let resp = reqwest::Client::new()
        .post(format!("{base}/api/proposals/1/approve"))
        .json(&json!({"approve": "yes"}))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_client_error());
}
