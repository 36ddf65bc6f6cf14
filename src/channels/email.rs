//! Email transport: raw IMAP over rustls for inbound, SMTP via lettre for
//! outbound.
//!
//! All socket work is blocking and runs inside `spawn_blocking`. Each
//! operation opens its own IMAP session; nothing is held between calls.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use mail_parser::{HeaderValue, MessageParser, MimeHeaders};
use secrecy::{ExposeSecret, SecretString};

use crate::error::ChannelError;
use crate::pipeline::types::{InboundEmail, MailTransport, OutgoingEmail};

const CHANNEL: &str = "email";

// ── Configuration ───────────────────────────────────────────────────

/// Mailbox configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    /// 465 uses implicit TLS; any other port upgrades with STARTTLS.
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

impl EmailConfig {
    /// Build config from environment variables.
    /// Returns `None` if `EMAIL_IMAP_HOST` is not set (transport disabled).
    pub fn from_env() -> Option<Self> {
        let imap_host = std::env::var("EMAIL_IMAP_HOST").ok()?;

        let imap_port: u16 = std::env::var("EMAIL_IMAP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(993);

        let smtp_host =
            std::env::var("EMAIL_SMTP_HOST").unwrap_or_else(|_| imap_host.replace("imap", "smtp"));

        let smtp_port: u16 = std::env::var("EMAIL_SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(465);

        let username = std::env::var("EMAIL_USERNAME").unwrap_or_default();
        let password = SecretString::from(std::env::var("EMAIL_PASSWORD").unwrap_or_default());
        let from_address = std::env::var("EMAIL_FROM_ADDRESS").unwrap_or_else(|_| username.clone());

        Some(Self {
            imap_host,
            imap_port,
            smtp_host,
            smtp_port,
            username,
            password,
            from_address,
        })
    }
}

// ── Transport ───────────────────────────────────────────────────────

/// IMAP (fetch, mark read) + SMTP (send) mailbox transport.
pub struct ImapSmtpTransport {
    config: Arc<EmailConfig>,
}

impl ImapSmtpTransport {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl MailTransport for ImapSmtpTransport {
    fn name(&self) -> &str {
        CHANNEL
    }

    async fn fetch_unread(&self, limit: usize) -> Result<Vec<InboundEmail>, ChannelError> {
        let cfg = Arc::clone(&self.config);
        let emails = tokio::task::spawn_blocking(move || fetch_unread_imap(&cfg, limit))
            .await
            .map_err(|e| fetch_failed(format!("IMAP task panicked: {e}")))??;
        tracing::debug!(count = emails.len(), host = %self.config.imap_host, "Fetched unread emails");
        Ok(emails)
    }

    async fn mark_read(&self, email_id: &str) -> Result<(), ChannelError> {
        let cfg = Arc::clone(&self.config);
        let uid = email_id.to_string();
        tokio::task::spawn_blocking(move || mark_read_imap(&cfg, &uid))
            .await
            .map_err(|e| fetch_failed(format!("IMAP task panicked: {e}")))?
    }

    async fn send(&self, email: OutgoingEmail) -> Result<(), ChannelError> {
        let cfg = Arc::clone(&self.config);
        let to = email.to.clone();
        tokio::task::spawn_blocking(move || send_smtp(&cfg, &email))
            .await
            .map_err(|e| send_failed(format!("SMTP task panicked: {e}")))??;
        tracing::info!(to = %to, "Email sent");
        Ok(())
    }
}

fn fetch_failed(reason: impl Into<String>) -> ChannelError {
    ChannelError::FetchFailed {
        name: CHANNEL.into(),
        reason: reason.into(),
    }
}

fn send_failed(reason: impl Into<String>) -> ChannelError {
    ChannelError::SendFailed {
        name: CHANNEL.into(),
        reason: reason.into(),
    }
}

// ── SMTP ────────────────────────────────────────────────────────────

/// Build the outgoing message, threading it under `in_reply_to` when set.
fn build_message(config: &EmailConfig, email: &OutgoingEmail) -> Result<Message, ChannelError> {
    let mut builder = Message::builder()
        .from(
            config
                .from_address
                .parse()
                .map_err(|e| send_failed(format!("Invalid from address: {e}")))?,
        )
        .to(email
            .to
            .parse()
            .map_err(|e| send_failed(format!("Invalid to address: {e}")))?)
        .subject(email.subject.as_str());

    if let Some(parent) = &email.in_reply_to {
        builder = builder
            .in_reply_to(parent.clone())
            .references(parent.clone());
    }

    builder
        .body(email.body.clone())
        .map_err(|e| send_failed(format!("Failed to build email: {e}")))
}

/// Send an email via SMTP (blocking).
fn send_smtp(config: &EmailConfig, email: &OutgoingEmail) -> Result<(), ChannelError> {
    let message = build_message(config, email)?;
    let creds = Credentials::new(
        config.username.clone(),
        config.password.expose_secret().to_string(),
    );

    let relay = if config.smtp_port == 465 {
        SmtpTransport::relay(&config.smtp_host)
    } else {
        SmtpTransport::starttls_relay(&config.smtp_host)
    };
    let transport = relay
        .map_err(|e| send_failed(format!("SMTP relay error: {e}")))?
        .port(config.smtp_port)
        .credentials(creds)
        .build();

    transport
        .send(&message)
        .map_err(|e| send_failed(format!("SMTP send failed: {e}")))?;
    Ok(())
}

// ── IMAP ────────────────────────────────────────────────────────────

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Lines and literal payloads of one tagged IMAP command.
#[derive(Debug, Default)]
struct ImapResponse {
    lines: Vec<String>,
    literals: Vec<Vec<u8>>,
}

/// One authenticated IMAP session over TLS with INBOX selected.
struct ImapSession {
    tls: TlsStream,
    next_tag: u32,
}

impl ImapSession {
    fn open(config: &EmailConfig) -> Result<Self, ChannelError> {
        let tcp = TcpStream::connect((config.imap_host.as_str(), config.imap_port))
            .map_err(|e| fetch_failed(format!("IMAP connect failed: {e}")))?;
        tcp.set_read_timeout(Some(Duration::from_secs(30)))
            .map_err(|e| fetch_failed(format!("IMAP socket setup failed: {e}")))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = rustls_pki_types::ServerName::try_from(config.imap_host.clone())
            .map_err(|e| fetch_failed(format!("Invalid IMAP host name: {e}")))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| fetch_failed(format!("TLS setup failed: {e}")))?;

        let mut session = Self {
            tls: rustls::StreamOwned::new(conn, tcp),
            next_tag: 1,
        };

        let _greeting = session.read_line()?;

        let login = session.command(&format!(
            "LOGIN {} {}",
            quote(&config.username),
            quote(config.password.expose_secret())
        ))?;
        if !tagged_ok(&login) {
            return Err(ChannelError::AuthFailed {
                name: CHANNEL.into(),
                reason: "IMAP login rejected".into(),
            });
        }

        let select = session.command("SELECT \"INBOX\"")?;
        if !tagged_ok(&select) {
            return Err(fetch_failed("IMAP SELECT INBOX failed"));
        }
        Ok(session)
    }

    fn read_line(&mut self) -> Result<String, ChannelError> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match self.tls.read(&mut byte) {
                Ok(0) => return Err(fetch_failed("IMAP connection closed")),
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(String::from_utf8_lossy(&buf).to_string());
                    }
                }
                Err(e) => return Err(fetch_failed(format!("IMAP read failed: {e}"))),
            }
        }
    }

    /// Send a command and collect its response up to the tagged status line.
    fn command(&mut self, cmd: &str) -> Result<ImapResponse, ChannelError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        self.tls
            .write_all(format!("{tag} {cmd}\r\n").as_bytes())
            .and_then(|_| self.tls.flush())
            .map_err(|e| fetch_failed(format!("IMAP write failed: {e}")))?;

        let mut response = ImapResponse::default();
        loop {
            let line = self.read_line()?;
            if let Some(len) = literal_len(&line) {
                let mut literal = vec![0u8; len];
                self.tls
                    .read_exact(&mut literal)
                    .map_err(|e| fetch_failed(format!("IMAP literal read failed: {e}")))?;
                response.literals.push(literal);
            }
            let done = line.starts_with(&format!("{tag} "));
            response.lines.push(line);
            if done {
                return Ok(response);
            }
        }
    }

    fn logout(mut self) {
        let _ = self.command("LOGOUT");
    }
}

/// Fetch the newest `limit` unseen emails with `BODY.PEEK[]` so they stay
/// unread (blocking).
fn fetch_unread_imap(config: &EmailConfig, limit: usize) -> Result<Vec<InboundEmail>, ChannelError> {
    let mut session = ImapSession::open(config)?;

    let search = session.command("UID SEARCH UNSEEN")?;
    if !tagged_ok(&search) {
        return Err(fetch_failed("IMAP UID SEARCH failed"));
    }
    let mut uids = parse_search_uids(&search.lines);
    if uids.len() > limit {
        uids.drain(..uids.len() - limit);
    }

    let mut emails = Vec::with_capacity(uids.len());
    for uid in uids {
        let fetch = session.command(&format!("UID FETCH {uid} BODY.PEEK[]"))?;
        let Some(raw) = fetch.literals.first() else {
            tracing::warn!(uid, "IMAP FETCH returned no body");
            continue;
        };
        match parse_inbound(&uid.to_string(), raw) {
            Some(email) => emails.push(email),
            None => tracing::warn!(uid, "Skipping unparseable email"),
        }
    }

    session.logout();
    Ok(emails)
}

/// Set `\Seen` on one UID (blocking).
fn mark_read_imap(config: &EmailConfig, uid: &str) -> Result<(), ChannelError> {
    if uid.is_empty() || !uid.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ChannelError::InvalidMessage(format!("not an IMAP UID: {uid}")));
    }

    let mut session = ImapSession::open(config)?;
    let store = session.command(&format!("UID STORE {uid} +FLAGS (\\Seen)"))?;
    session.logout();

    if tagged_ok(&store) {
        Ok(())
    } else {
        Err(fetch_failed(format!("IMAP STORE failed for UID {uid}")))
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Quote a string for an IMAP command argument.
fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Whether the tagged status line of a response is `OK`.
fn tagged_ok(response: &ImapResponse) -> bool {
    response
        .lines
        .last()
        .and_then(|l| l.split_whitespace().nth(1))
        .is_some_and(|status| status.eq_ignore_ascii_case("OK"))
}

/// Length of a `{n}` literal announced at the end of a response line.
fn literal_len(line: &str) -> Option<usize> {
    let trimmed = line.trim_end();
    let body = trimmed.strip_suffix('}')?;
    let start = body.rfind('{')?;
    body[start + 1..].parse().ok()
}

/// UIDs from `* SEARCH` lines, ascending.
fn parse_search_uids(lines: &[String]) -> Vec<u32> {
    let mut uids: Vec<u32> = lines
        .iter()
        .filter_map(|l| l.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace())
        .filter_map(|uid| uid.parse().ok())
        .collect();
    uids.sort_unstable();
    uids
}

/// Parse a raw RFC 822 message into an [`InboundEmail`].
pub fn parse_inbound(email_id: &str, raw: &[u8]) -> Option<InboundEmail> {
    let parsed = MessageParser::default().parse(raw)?;

    let received_at = parsed
        .date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or_else(Utc::now);

    Some(InboundEmail {
        email_id: email_id.to_string(),
        from: extract_sender(&parsed),
        subject: parsed.subject().unwrap_or("(no subject)").to_string(),
        body: strip_quoted_text(&extract_text(&parsed)),
        thread_id: extract_thread_id(&parsed).unwrap_or_else(|| email_id.to_string()),
        received_at,
    })
}

/// Thread root: first `References` id, else `In-Reply-To`, else own
/// `Message-ID`. Returned in angle brackets.
fn extract_thread_id(parsed: &mail_parser::Message) -> Option<String> {
    first_header_id(parsed.references())
        .or_else(|| first_header_id(parsed.in_reply_to()))
        .or_else(|| parsed.message_id().map(str::to_string))
        .map(|id| format!("<{id}>"))
}

fn first_header_id(value: &HeaderValue<'_>) -> Option<String> {
    match value {
        HeaderValue::Text(id) => Some(id.to_string()),
        HeaderValue::TextList(ids) => ids.first().map(|id| id.to_string()),
        _ => None,
    }
}

/// Extract the sender address from a parsed email.
fn extract_sender(parsed: &mail_parser::Message) -> String {
    parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".into())
}

/// Extract readable text from a parsed email.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    for part in parsed.attachments() {
        let part: &mail_parser::MessagePart = part;
        if let Some(ct) = MimeHeaders::content_type(part)
            && ct.ctype() == "text"
            && let Ok(text) = std::str::from_utf8(part.contents())
        {
            return text.to_string();
        }
    }
    String::new()
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strip quoted reply text from an email body.
///
/// Drops `>` lines, and everything from an "On ... wrote:" attribution or an
/// "--- Original Message ---" separator onwards.
pub fn strip_quoted_text(body: &str) -> String {
    let mut result = Vec::new();

    for line in body.lines() {
        let trimmed = line.trim();

        if trimmed.starts_with('>') {
            continue;
        }
        if trimmed.starts_with("On ") && trimmed.ends_with("wrote:") {
            break;
        }
        if trimmed.starts_with("---") && trimmed.contains("Original Message") {
            break;
        }
        result.push(line);
    }

    while result.last().is_some_and(|l| l.trim().is_empty()) {
        result.pop();
    }

    result.join("\n")
}

// ── Tests ───────────────────────────────────────────────────────────
