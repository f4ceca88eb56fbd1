//! Process Invoker (C5): calls the user handler, awaits completion with an
//! internal timeout, and classifies the outcome.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::clock::Clock;
use crate::config::UnknownHandlerFailurePolicy;
use crate::metrics;
use crate::outcome::{ProcessOutcome, Processor};
use crate::record::{next_offsets, PartitionId, ProcessUnit};

/// What the invoker decided after calling the user handler.
pub enum InvokerOutcome {
    /// The unit processed successfully; commit these offsets.
    Success { offsets: HashMap<PartitionId, i64> },
    NeedForPause {
        reason: String,
        duration: Option<Duration>,
    },
    Fatal(anyhow::Error),
    /// `stop()` fired before the invocation resolved; no commit, no hooks.
    Cancelled,
}

pub struct ProcessInvoker<K, V> {
    processor: Arc<dyn Processor<K, V>>,
    clock: Arc<dyn Clock>,
    delay_single_record: Duration,
    invocation_timeout: Duration,
    on_unknown_handler_failure: UnknownHandlerFailurePolicy,
}

impl<K, V> ProcessInvoker<K, V>
where
    K: Send + 'static,
    V: Send + 'static,
{
    pub fn new(
        processor: Arc<dyn Processor<K, V>>,
        clock: Arc<dyn Clock>,
        poll_timeout: Duration,
        delay_single_record: Duration,
        on_unknown_handler_failure: UnknownHandlerFailurePolicy,
    ) -> Self {
        let invocation_timeout = (poll_timeout * 5).max(Duration::from_secs(30));
        Self {
            processor,
            clock,
            delay_single_record,
            invocation_timeout,
            on_unknown_handler_failure,
        }
    }

    pub async fn invoke(&self, unit: ProcessUnit<K, V>, cancel: &CancellationToken) -> InvokerOutcome {
        if !self.delay_single_record.is_zero() {
            let total = self.delay_single_record * unit.records.len() as u32;
            self.clock.sleep(total, cancel).await;
            if cancel.is_cancelled() {
                return InvokerOutcome::Cancelled;
            }
        }

        let expected_offsets = next_offsets(&unit.records);
        let expected_len = unit.records.len();
        let start = Instant::now();

        let invocation = self.processor.process(unit.records);
        let outcome = tokio::select! {
            result = tokio::time::timeout(self.invocation_timeout, invocation) => result,
            _ = cancel.cancelled() => return InvokerOutcome::Cancelled,
        };

        metrics::record_process_latency(start.elapsed());

        match outcome {
            Err(_elapsed) => InvokerOutcome::Fatal(anyhow::anyhow!(
                "process invocation exceeded internal timeout of {:?}",
                self.invocation_timeout
            )),
            Ok(ProcessOutcome::Ok(result)) => {
                if result.records.len() != expected_len {
                    warn!(
                        expected = expected_len,
                        got = result.records.len(),
                        "process result length differs from unit, committing unit's original offsets"
                    );
                }
                InvokerOutcome::Success {
                    offsets: expected_offsets,
                }
            }
            Ok(ProcessOutcome::NeedForPause { reason, duration }) => {
                InvokerOutcome::NeedForPause { reason, duration }
            }
            Ok(ProcessOutcome::Fatal(cause)) => InvokerOutcome::Fatal(cause),
            Ok(ProcessOutcome::TransientOther(cause)) => match self.on_unknown_handler_failure {
                UnknownHandlerFailurePolicy::PauseDefault => InvokerOutcome::NeedForPause {
                    reason: cause.to_string(),
                    duration: None,
                },
                UnknownHandlerFailurePolicy::Fatal => InvokerOutcome::Fatal(cause),
            },
        }
    }
}
