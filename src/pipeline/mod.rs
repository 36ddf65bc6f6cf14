//! Intake pipeline.
//!
//! Unread mail flows through:
//! 1. `MailTransport::fetch_unread()`, transport-specific I/O
//! 2. `Dispatcher::check_emails()`, dedup + one workflow run per email
//! 3. storage, as a pending proposal awaiting human approval
//!
//! **No auto-send path exists.** Every reply goes out through the approval API.

pub mod dispatch;
pub mod intake;
pub mod types;

pub use dispatch::Dispatcher;
pub use intake::spawn_intake_loop;
pub use types::{DispatchReport, InboundEmail, MailTransport, OutgoingEmail};
