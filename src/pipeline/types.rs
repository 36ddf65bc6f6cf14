//! Shared types for the intake pipeline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ChannelError;
use crate::workflow::EmailInput;

// ── Inbound email ───────────────────────────────────────────────────

/// An unread email pulled from the mailbox.
///
/// Transports convert their native format into this struct.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEmail {
    /// Mailbox-native id used for mark-read and dedup (IMAP UID).
    pub email_id: String,
    /// Sender address.
    pub from: String,
    pub subject: String,
    /// Readable body, quoted reply text removed.
    pub body: String,
    /// Conversation key. A Message-ID when the mail had one, else `email_id`.
    pub thread_id: String,
    pub received_at: DateTime<Utc>,
}

impl InboundEmail {
    /// The five fields a workflow run starts from.
    pub fn to_workflow_input(&self) -> EmailInput {
        EmailInput::new(
            self.email_id.as_str(),
            self.from.as_str(),
            self.subject.as_str(),
            self.body.as_str(),
            self.thread_id.as_str(),
        )
    }
}

// ── Outgoing email ──────────────────────────────────────────────────

/// A reply ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
    /// Message-ID to thread the reply under, when known.
    pub in_reply_to: Option<String>,
}

impl OutgoingEmail {
    /// Build a reply. `thread_id` is only used for threading when it looks
    /// like a Message-ID (`<...>`); bare mailbox ids are ignored.
    pub fn reply(to: &str, subject: &str, body: &str, thread_id: &str) -> Self {
        let in_reply_to = (thread_id.starts_with('<') && thread_id.ends_with('>'))
            .then(|| thread_id.to_string());
        Self {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            in_reply_to,
        }
    }
}

// ── Transport ───────────────────────────────────────────────────────

/// Mailbox access used by intake and by the approval API.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Transport name for logging.
    fn name(&self) -> &str;

    /// Fetch up to `limit` unread emails without marking them read.
    async fn fetch_unread(&self, limit: usize) -> Result<Vec<InboundEmail>, ChannelError>;

    /// Flag an email as read.
    async fn mark_read(&self, email_id: &str) -> Result<(), ChannelError>;

    /// Send an email.
    async fn send(&self, email: OutgoingEmail) -> Result<(), ChannelError>;
}

// ── Dispatch report ─────────────────────────────────────────────────

/// Summary of one intake check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Proposals created.
    pub processed: usize,
    /// Unread emails fetched.
    pub fetched: usize,
    /// Already handled by an earlier check.
    pub skipped: usize,
    /// Not genuine inquiries.
    pub rejected: usize,
    /// Emails whose handling failed after fetch.
    pub failed: usize,
    pub proposal_ids: Vec<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_threads_only_on_message_ids() {
        let threaded = OutgoingEmail::reply("a@b.com", "Web App Proposal", "Hi", "<abc@mail>");
        assert_eq!(threaded.in_reply_to.as_deref(), Some("<abc@mail>"));

        let bare = OutgoingEmail::reply("a@b.com", "Web App Proposal", "Hi", "1234");
        assert!(bare.in_reply_to.is_none());
    }

    #[test]
    fn inbound_maps_to_workflow_input() {
        let email = InboundEmail {
            email_id: "7".into(),
            from: "a@b.com".into(),
            subject: "I want an app".into(),
            body: "need a website".into(),
            thread_id: "<x@y>".into(),
            received_at: Utc::now(),
        };
        let input = email.to_workflow_input();
        assert_eq!(input.email_id, "7");
        assert_eq!(input.from, "a@b.com");
        assert_eq!(input.thread_id, "<x@y>");
    }

    #[test]
    fn report_serializes_all_counters() {
        let report = DispatchReport {
            processed: 1,
            fetched: 3,
            skipped: 1,
            rejected: 1,
            failed: 0,
            proposal_ids: vec![9],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["processed"], 1);
        assert_eq!(json["proposal_ids"][0], 9);
    }
}
