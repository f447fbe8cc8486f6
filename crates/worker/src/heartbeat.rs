use std::sync::Arc;
use std::time::Duration;

use ease_client::AgentClient;
use ease_core::retry::with_backoff;
use ease_core::Concurrency;

/// Spawns the background heartbeat task (§4.6). Runs for the lifetime of the
/// process; cancelled by dropping the returned handle at shutdown.
pub fn spawn(
    client: Arc<AgentClient>,
    concurrency: Arc<Concurrency>,
    interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let jobs = concurrency.get_jobs().await;
            let job_count = jobs.len();
            let result = with_backoff(|| {
                let client = client.clone();
                let jobs = jobs.clone();
                async move { client.heartbeat(&jobs).await }
            })
            .await;

            match result {
                Ok(()) => tracing::debug!(job_count, "heartbeat sent"),
                Err(e) => tracing::error!(error = %e, "failed to send heartbeat"),
            }

            tokio::time::sleep(Duration::from_secs(interval_secs)).await;
        }
    })
}
