//! HTTP API for intake and human review.

pub mod routes;

pub use routes::{ApiState, api_routes};
