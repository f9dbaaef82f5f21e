// ABOUTME: Fans one encoded request out to every host and aggregates the results.
// ABOUTME: All-or-nothing: one failed host fails the batch, successes are not rolled back.

use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::executor::{HostOutcome, HostResult, RemoteExecutor};
use crate::protocol::CredentialField;

/// Name of the remote credential field carrying the account name.
pub const USERNAME_FIELD: &str = "Username";

/// Unified result of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateOutcome {
    /// True iff every host succeeded.
    pub ok: bool,
    /// One `user @ <host>` field per successful host, in host order.
    pub per_host_outputs: Vec<CredentialField>,
    /// `"<host>: <message>; "` for every failed host.
    pub failure_log: String,
    /// Hosts whose remote state was changed, even if the batch failed.
    pub succeeded_hosts: Vec<String>,
}

impl AggregateOutcome {
    /// Fold per-host results, in order, into one outcome.
    pub fn from_results(results: Vec<HostResult>) -> Self {
        let total = results.len();
        let mut outcome = AggregateOutcome::default();

        for result in results {
            match result.outcome {
                HostOutcome::Ok { credential } => {
                    // The last Username field wins
                    let username = credential
                        .into_iter()
                        .filter(|field| field.name == USERNAME_FIELD)
                        .last()
                        .map(|field| field.value)
                        .unwrap_or_default();
                    outcome
                        .per_host_outputs
                        .push(CredentialField::text(format!("user @ {}", result.host), username));
                    outcome.succeeded_hosts.push(result.host);
                }
                HostOutcome::Failed { log_msg } => {
                    outcome
                        .failure_log
                        .push_str(&format!("{}: {}; ", result.host, log_msg));
                }
            }
        }

        outcome.ok = outcome.succeeded_hosts.len() == total;
        outcome
    }
}

/// Drives a `RemoteExecutor` across a host set.
pub struct FanoutCoordinator {
    executor: Arc<dyn RemoteExecutor>,
    max_parallel: usize,
}

impl FanoutCoordinator {
    pub fn new(executor: Arc<dyn RemoteExecutor>, max_parallel: usize) -> Self {
        Self {
            executor,
            max_parallel: max_parallel.max(1),
        }
    }

    /// Run `encoded_request` on every host and wait for all of them.
    ///
    /// Hosts run concurrently, at most `max_parallel` at a time. Results are
    /// aggregated in the order of `hosts`. A task that panics counts as a
    /// failed host.
    pub async fn run_batch(&self, hosts: &[String], encoded_request: &str) -> AggregateOutcome {
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let request: Arc<str> = Arc::from(encoded_request);

        let handles = hosts.iter().map(|host| {
            let executor = Arc::clone(&self.executor);
            let semaphore = Arc::clone(&semaphore);
            let request = Arc::clone(&request);
            let host = host.clone();
            tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                executor.execute(&host, &request).await
            })
        });

        let results: Vec<HostResult> = join_all(handles)
            .await
            .into_iter()
            .zip(hosts)
            .map(|(joined, host)| match joined {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(host = %host, error = %e, "Host task did not complete");
                    HostResult::failed(host.as_str(), format!("execution task for {host} failed: {e}"))
                }
            })
            .collect();

        for result in &results {
            match &result.outcome {
                HostOutcome::Ok { .. } => tracing::info!(host = %result.host, "Host succeeded"),
                HostOutcome::Failed { log_msg } => {
                    tracing::warn!(host = %result.host, error = %log_msg, "Host failed")
                }
            }
        }

        let outcome = AggregateOutcome::from_results(results);
        tracing::info!(
            hosts = hosts.len(),
            succeeded = outcome.succeeded_hosts.len(),
            ok = outcome.ok,
            "Batch complete"
        );
        outcome
    }
}
