//! Mail transports.

pub mod email;

pub use email::{EmailConfig, ImapSmtpTransport};
