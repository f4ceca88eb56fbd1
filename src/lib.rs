//! A resilient streaming consumer runner: a poll/process/commit loop over a
//! Kafka-compatible broker with cooperative pause/resume, bounded commit
//! retry, and two dispatch strategies for batching processing units.

pub mod broker;
pub mod clock;
pub mod commit;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod hooks;
pub mod invoker;
pub mod metrics;
pub mod outcome;
pub mod pause;
pub mod record;
pub mod runner;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use broker::{BrokerClient, DeserializeFn, OffsetCommitter, RdKafkaBrokerClient};
pub use commit::{CommitEngine, UnitFactory};
pub use config::{AutoOffsetReset, RunnerConfig, RunnerConfigBuilder, UnknownHandlerFailurePolicy};
pub use error::{BrokerError, RunnerError};
pub use outcome::{ProcessOutcome, Processor};
pub use record::{PartitionId, PollBatch, ProcessResult, ProcessUnit, Record, Strategy};
pub use runner::{ConsumerRunner, RunnerState};
