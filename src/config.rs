//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Service configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// libSQL database file.
    pub db_path: PathBuf,
    /// Port the HTTP API listens on.
    pub http_port: u16,
    /// When set, run an intake check on this interval.
    pub intake_interval: Option<Duration>,
    /// Maximum unread emails fetched per check.
    pub max_emails: usize,
    /// Maximum workflow runs in flight per check.
    pub max_concurrent: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/copilot.db"),
            http_port: 8000,
            intake_interval: None,
            max_emails: 5,
            max_concurrent: 4,
        }
    }
}

impl AppConfig {
    /// Build config from `COPILOT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let db_path = std::env::var("COPILOT_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let http_port = parse_var("COPILOT_HTTP_PORT")?.unwrap_or(defaults.http_port);

        let intake_interval = parse_var::<u64>("COPILOT_INTAKE_INTERVAL_SECS")?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let max_emails = parse_var("COPILOT_MAX_EMAILS")?.unwrap_or(defaults.max_emails);

        let max_concurrent: usize =
            parse_var("COPILOT_MAX_CONCURRENT")?.unwrap_or(defaults.max_concurrent);
        if max_concurrent == 0 {
            return Err(ConfigError::InvalidValue {
                key: "COPILOT_MAX_CONCURRENT".into(),
                message: "must be at least 1".into(),
            });
        }

        Ok(Self {
            db_path,
            http_port,
            intake_interval,
            max_emails,
            max_concurrent,
        })
    }
}

/// Parse an optional environment variable. Unset is `None`; set but
/// unparseable is an error.
fn parse_var<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{e}"),
            }),
        Err(_) => Ok(None),
    }
}
