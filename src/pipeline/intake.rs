//! Periodic background intake.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::pipeline::dispatch::Dispatcher;

/// Spawn a background task that runs an intake check every `interval`.
///
/// The first check runs immediately. Returns a `JoinHandle` and a shutdown
/// flag; set the flag to stop after the current tick.
pub fn spawn_intake_loop(
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "Intake loop started");

        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Intake loop shutting down");
                return;
            }

            if let Err(e) = dispatcher.check_emails().await {
                error!(error = %e, "Intake check failed");
            }
        }
    });

    (handle, shutdown_flag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChannelError;
    use crate::llm::MockCompletion;
    use crate::pipeline::types::{InboundEmail, MailTransport, OutgoingEmail};
    use crate::store::LibSqlBackend;
    use crate::workflow::WorkflowOrchestrator;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Counts fetches; mailbox is always empty.
    #[derive(Default)]
    struct CountingMailbox {
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl MailTransport for CountingMailbox {
        fn name(&self) -> &str {
            "counting"
        }

        async fn fetch_unread(&self, _limit: usize) -> Result<Vec<InboundEmail>, ChannelError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        async fn mark_read(&self, _email_id: &str) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn send(&self, _email: OutgoingEmail) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn loop_checks_until_shut_down() {
        let mailbox = Arc::new(CountingMailbox::default());
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let orchestrator = Arc::new(WorkflowOrchestrator::new(Arc::new(MockCompletion::new())));
        let dispatcher = Arc::new(Dispatcher::new(orchestrator, db, mailbox.clone()));

        let (handle, shutdown) = spawn_intake_loop(dispatcher, Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(60)).await;
        shutdown.store(true, Ordering::Relaxed);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop should stop")
            .unwrap();

        assert!(mailbox.fetches.load(Ordering::SeqCst) >= 2);
    }
}
