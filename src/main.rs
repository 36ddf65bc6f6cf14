use std::sync::Arc;

use anyhow::Context;

use proposal_copilot::api::{ApiState, api_routes};
use proposal_copilot::channels::{EmailConfig, ImapSmtpTransport};
use proposal_copilot::config::AppConfig;
use proposal_copilot::llm::{LlmConfig, create_service};
use proposal_copilot::pipeline::{Dispatcher, MailTransport, spawn_intake_loop};
use proposal_copilot::store::{Database, LibSqlBackend};
use proposal_copilot::workflow::WorkflowOrchestrator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let llm_config = LlmConfig::from_env().context("Invalid LLM configuration")?;
    let app_config = AppConfig::from_env().context("Invalid application configuration")?;
    let email_config = EmailConfig::from_env();

    eprintln!("📨 Proposal Copilot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   LLM: {:?} ({})", llm_config.backend, llm_config.model);
    eprintln!("   API: http://0.0.0.0:{}", app_config.http_port);
    eprintln!("   Database: {}", app_config.db_path.display());

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&app_config.db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", app_config.db_path.display()))?,
    );

    // ── Workflow ─────────────────────────────────────────────────────────
    let llm = create_service(&llm_config)?;
    let orchestrator = Arc::new(WorkflowOrchestrator::new(llm));

    // ── Mail transport ───────────────────────────────────────────────────
    let transport: Option<Arc<dyn MailTransport>> = match email_config {
        Some(config) => {
            eprintln!(
                "   Email: enabled (IMAP: {}:{}, SMTP: {}:{})",
                config.imap_host, config.imap_port, config.smtp_host, config.smtp_port
            );
            Some(Arc::new(ImapSmtpTransport::new(config)))
        }
        None => {
            eprintln!("   Email: disabled (EMAIL_IMAP_HOST not set)");
            None
        }
    };

    let dispatcher = transport.as_ref().map(|transport| {
        Arc::new(
            Dispatcher::new(
                Arc::clone(&orchestrator),
                Arc::clone(&db),
                Arc::clone(transport),
            )
            .with_limits(app_config.max_emails, app_config.max_concurrent),
        )
    });

    let _intake = match (&dispatcher, app_config.intake_interval) {
        (Some(dispatcher), Some(interval)) => {
            eprintln!("   Intake: every {}s", interval.as_secs());
            Some(spawn_intake_loop(Arc::clone(dispatcher), interval))
        }
        _ => {
            eprintln!("   Intake: manual (POST /api/check-emails)");
            None
        }
    };
    eprintln!();

    // ── HTTP API ─────────────────────────────────────────────────────────
    let app = api_routes(ApiState {
        db,
        dispatcher,
        transport,
    });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", app_config.http_port))
        .await
        .with_context(|| format!("Failed to bind port {}", app_config.http_port))?;
    tracing::info!(port = app_config.http_port, "HTTP API started");
    axum::serve(listener, app).await?;

    Ok(())
}
