use std::time::Duration;

/// Errors surfaced by a [`crate::broker::BrokerClient`] or
/// [`crate::broker::OffsetCommitter`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("commit timed out")]
    CommitTimeout,

    #[error("failed to deserialize record payload: {0}")]
    Deserialize(#[source] anyhow::Error),
}

impl BrokerError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, BrokerError::CommitTimeout)
            || matches!(
                self,
                BrokerError::Kafka(e) if e.rdkafka_error_code()
                    == Some(rdkafka::types::RDKafkaErrorCode::OperationTimedOut)
            )
    }
}

/// The taxonomy a user handler's outcome is classified into by the
/// [`crate::invoker::ProcessInvoker`] (C7 in the design: Outcome Taxonomy).
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("fatal error: {0}")]
    Fatal(#[source] anyhow::Error),
}

/// A cooperative pause request raised by the user handler or by the
/// invoker on an unclassified (`TransientOther`) failure.
#[derive(Debug, Clone)]
pub struct PauseRequest {
    pub reason: String,
    pub duration: Option<Duration>,
}
