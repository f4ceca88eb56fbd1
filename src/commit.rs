//! Commit Engine (C3): wraps the broker's commit call with bounded retry on
//! timeout, and `UnitFactory`, the override point (named in §9 of the
//! spec) that tests use to script commit failures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::broker::OffsetCommitter;
use crate::error::{BrokerError, RunnerError};
use crate::record::PartitionId;

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Builds the per-unit commit action. The default implementation computes
/// the next-offsets map and hands it to a [`CommitEngine`]; tests substitute
/// a factory wrapping a committer that fails on demand.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UnitFactory: Send + Sync {
    /// `cancel` is the driver's shutdown token: implementations that sleep
    /// between retries must race those sleeps against it so `stop()` is
    /// observed promptly instead of after the full retry budget elapses.
    async fn commit(&self, offsets: HashMap<PartitionId, i64>, cancel: &CancellationToken) -> Result<(), RunnerError>;
}

/// Default [`UnitFactory`]: retries `CommitTimeout` up to `commit_attempts`
/// times with exponential backoff (100ms doubling, capped at 2s); any other
/// error gets exactly one retry before escalating to `Fatal`.
///
/// Never commits offsets for a unit whose invocation did not return `Ok` --
/// callers only ever construct the `offsets` map from a successfully
/// processed unit, so that invariant lives at the call site in the invoker,
/// not here.
pub struct CommitEngine {
    committer: Arc<dyn OffsetCommitter>,
    commit_attempts: u32,
    attempts_made: AtomicU64,
}

impl CommitEngine {
    pub fn new(committer: Arc<dyn OffsetCommitter>, commit_attempts: u32) -> Self {
        Self {
            committer,
            commit_attempts: commit_attempts.max(1),
            attempts_made: AtomicU64::new(0),
        }
    }

    /// Total number of `commit_sync` calls issued so far, across all units.
    /// Exposed for tests that assert on retry counts.
    pub fn attempts_made(&self) -> u64 {
        self.attempts_made.load(Ordering::Relaxed)
    }

    async fn call(&self, offsets: &HashMap<PartitionId, i64>) -> Result<(), BrokerError> {
        self.attempts_made.fetch_add(1, Ordering::Relaxed);
        self.committer.commit_sync(offsets).await
    }

    pub async fn commit(
        &self,
        offsets: HashMap<PartitionId, i64>,
        cancel: &CancellationToken,
    ) -> Result<(), RunnerError> {
        let mut backoff = INITIAL_BACKOFF;
        let mut timeout_attempt = 0u32;

        loop {
            timeout_attempt += 1;
            match self.call(&offsets).await {
                Ok(()) => return Ok(()),
                Err(BrokerError::CommitTimeout) => {
                    if timeout_attempt >= self.commit_attempts {
                        return Err(RunnerError::Fatal(anyhow::anyhow!(
                            "commit timed out after {timeout_attempt} attempts"
                        )));
                    }
                    warn!(attempt = timeout_attempt, "commit timed out, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        // Cooperative shutdown mid-backoff: the returned
                        // error is never treated as `Fatal` by the driver --
                        // it checks `cancel.is_cancelled()` first and simply
                        // abandons this unit, exactly like an in-flight
                        // invocation cancelled by `stop()`.
                        _ = cancel.cancelled() => {
                            return Err(RunnerError::Fatal(anyhow::anyhow!(
                                "commit retry aborted by shutdown"
                            )));
                        }
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(other) => {
                    warn!(error = %other, "commit failed, retrying once before escalating");
                    return match self.call(&offsets).await {
                        Ok(()) => Ok(()),
                        Err(e2) => Err(RunnerError::Fatal(
                            anyhow::Error::new(e2).context("commit failed on retry"),
                        )),
                    };
                }
            }
        }
    }
}

#[async_trait]
impl UnitFactory for CommitEngine {
    async fn commit(&self, offsets: HashMap<PartitionId, i64>, cancel: &CancellationToken) -> Result<(), RunnerError> {
        CommitEngine::commit(self, offsets, cancel).await
    }
}
