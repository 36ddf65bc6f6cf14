//! Persistence layer: libSQL-backed storage for clients, proposals and
//! intake bookkeeping.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{
    Database, EmailOutcome, NewClient, NewProposal, ProposalStatus, StoredProposal,
};
