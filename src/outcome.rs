//! The user-handler contract and the outcome taxonomy the Process Invoker
//! (C5) classifies it into.

use std::time::Duration;

use futures::future::BoxFuture;

use crate::record::{ProcessResult, Record};

/// What the user handler returns for a unit.
pub enum ProcessOutcome<K, V> {
    /// The unit was processed successfully; its offsets can be committed.
    Ok(ProcessResult<K, V>),
    /// A cooperative request to pause the runner. `duration` overrides the
    /// computed backoff when present.
    NeedForPause {
        reason: String,
        duration: Option<Duration>,
    },
    /// Anything that must stop the runner outright.
    Fatal(anyhow::Error),
    /// Any other failure not recognized as one of the above. Handled per
    /// `Config::on_unknown_handler_failure`.
    TransientOther(anyhow::Error),
}

/// The user's override point: given the records of a unit, asynchronously
/// produce a [`ProcessOutcome`].
///
/// A plain `async fn(Vec<Record<K, V>>) -> ProcessOutcome<K, V>` (or a
/// closure returning such a future) satisfies this trait via the blanket
/// impl below, so callers rarely need to write an impl by hand.
pub trait Processor<K, V>: Send + Sync {
    fn process<'a>(&'a self, records: Vec<Record<K, V>>) -> BoxFuture<'a, ProcessOutcome<K, V>>
    where
        K: 'a,
        V: 'a;
}

impl<K, V, F, Fut> Processor<K, V> for F
where
    F: Fn(Vec<Record<K, V>>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = ProcessOutcome<K, V>> + Send + 'static,
{
    fn process<'a>(&'a self, records: Vec<Record<K, V>>) -> BoxFuture<'a, ProcessOutcome<K, V>>
    where
        K: 'a,
        V: 'a,
    {
        Box::pin((self)(records))
    }
}
