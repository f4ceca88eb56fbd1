//! End-to-end tests driving [`ConsumerRunner`] against [`FakeBroker`],
//! covering the universal testable properties and scenario-shaped cases
//! (pass-through, pause/resume, commit retry, commit escalation).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use consumer_runner::config::{RunnerConfig, RunnerConfigBuilder};
use consumer_runner::error::{BrokerError, RunnerError};
use consumer_runner::outcome::ProcessOutcome;
use consumer_runner::record::{PartitionId, ProcessResult, Record, Strategy};
use consumer_runner::runner::{ConsumerRunner, RunnerState};
use consumer_runner::test_support::FakeBroker;

fn noop_deser() -> consumer_runner::broker::DeserializeFn<i32> {
    Arc::new(|bytes: Option<&[u8]>| {
        let bytes = bytes.unwrap_or_default();
        if bytes.is_empty() {
            Ok(0)
        } else {
            Ok(i32::from_be_bytes(bytes.try_into().unwrap_or_default()))
        }
    })
}

fn base_builder() -> RunnerConfigBuilder<i32, i32> {
    RunnerConfig::builder(noop_deser(), noop_deser())
        .bootstrap_servers("unused:9092")
        .group_id("test-group")
        .topics(["t".to_string()])
        .poll_timeout(Duration::from_millis(20))
        .pause_backoff(Duration::from_millis(20), Duration::from_millis(200))
        .commit_attempts(3)
        .force_exit(false)
}

fn rec(partition: i32, offset: i64, value: i32) -> Record<i32, i32> {
    Record {
        partition: PartitionId::new("t", partition),
        offset,
        key: 0,
        value,
        timestamp: 0,
        headers: HashMap::new(),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn wait_until(mut predicate: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn pass_through_commits_every_published_record() {
    init_tracing();
    let broker: Arc<FakeBroker<i32, i32>> = Arc::new(FakeBroker::new());
    broker.push_all((0..5).map(|i| rec(0, i, i as i32)));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen2 = seen.clone();
    let processor = Arc::new(move |records: Vec<Record<i32, i32>>| {
        let seen = seen2.clone();
        async move {
            seen.lock().unwrap().extend(records.iter().map(|r| r.value));
            ProcessOutcome::Ok(ProcessResult::new(records))
        }
    });

    let runner = Arc::new(ConsumerRunner::new(processor));
    runner.with_broker(broker.clone());
    runner.configure(base_builder().build()).unwrap();
    runner.start().await.unwrap();

    assert!(wait_until(|| runner.post_commit_count() >= 1, Duration::from_secs(2)).await);
    runner.stop().await;

    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    assert_eq!(broker.committed(&PartitionId::new("t", 0)), Some(5));
}

#[tokio::test]
async fn config_gate_rejects_empty_topics_and_never_polls() {
    init_tracing();
    let processor = Arc::new(|records: Vec<Record<i32, i32>>| async move {
        ProcessOutcome::Ok(ProcessResult::new(records))
    });
    let runner = Arc::new(ConsumerRunner::new(processor));
    let config = RunnerConfig::builder(noop_deser(), noop_deser())
        .bootstrap_servers("unused:9092")
        .group_id("g")
        // topics left empty
        .build();

    // the gate lives in configure(): a runner never reaches `Configured`
    // with empty topics.
    assert!(matches!(runner.configure(config), Err(RunnerError::InvalidConfig(_))));
    assert_eq!(runner.state(), RunnerState::New);

    // start() re-checks the same fields, so a runner that skipped (or
    // failed) configure() still fails fast and never reaches Running.
    assert!(matches!(runner.start().await, Err(RunnerError::InvalidConfig(_))));
    assert!(!runner.running());
    assert_eq!(runner.state(), RunnerState::Stopped);
}

#[tokio::test]
async fn stop_is_idempotent() {
    init_tracing();
    let processor = Arc::new(|records: Vec<Record<i32, i32>>| async move {
        ProcessOutcome::Ok(ProcessResult::new(records))
    });
    let runner = Arc::new(ConsumerRunner::new(processor));
    let broker: Arc<FakeBroker<i32, i32>> = Arc::new(FakeBroker::new());
    runner.with_broker(broker);
    runner.configure(base_builder().build()).unwrap();
    runner.start().await.unwrap();

    runner.stop().await;
    // second call must return promptly and without panicking
    runner.stop().await;
    assert!(!runner.running());
}

#[tokio::test]
async fn need_for_pause_grows_paused_and_unpaused_history() {
    init_tracing();
    let broker: Arc<FakeBroker<i32, i32>> = Arc::new(FakeBroker::new());
    broker.push(rec(0, 0, 7));

    let processor = Arc::new(|_records: Vec<Record<i32, i32>>| async move {
        ProcessOutcome::NeedForPause {
            reason: "backpressure".into(),
            duration: Some(Duration::from_millis(10)),
        }
    });

    let runner = Arc::new(ConsumerRunner::new(processor));
    runner.with_broker(broker.clone());
    runner.configure(base_builder().build()).unwrap();
    runner.start().await.unwrap();

    assert!(wait_until(|| runner.paused_history() >= 1 && runner.unpaused_history() >= 1, Duration::from_secs(2)).await);
    runner.stop().await;

    // the offset for the abandoned unit was never committed
    assert_eq!(broker.committed(&PartitionId::new("t", 0)), None);
}

#[tokio::test]
async fn all_strategy_pause_then_resume_eventually_observes_every_value() {
    init_tracing();
    let broker: Arc<FakeBroker<i32, i32>> = Arc::new(FakeBroker::new());
    let partition_count = 40;
    let published: Vec<i32> = (0..10).collect();
    broker.push_all(published.iter().enumerate().map(|(i, &v)| rec((i % partition_count) as i32, 0, v)));

    let seen = Arc::new(Mutex::new(HashSet::new()));
    let seen2 = seen.clone();
    let processor = Arc::new(move |records: Vec<Record<i32, i32>>| {
        let seen = seen2.clone();
        async move {
            seen.lock().unwrap().extend(records.iter().map(|r| r.value));
            ProcessOutcome::NeedForPause {
                reason: "always pausing".into(),
                duration: Some(Duration::from_millis(15)),
            }
        }
    });

    let runner = Arc::new(ConsumerRunner::new(processor));
    runner.with_broker(broker.clone());
    runner
        .configure(base_builder().strategy(Strategy::All).build())
        .unwrap();
    runner.start().await.unwrap();

    assert!(wait_until(
        || {
            let seen = seen.lock().unwrap();
            seen.len() == published.len() && runner.paused_history() >= 1 && runner.unpaused_history() >= 1
        },
        Duration::from_secs(3),
    )
    .await);
    runner.stop().await;

    let seen = seen.lock().unwrap();
    let expected: HashSet<i32> = published.into_iter().collect();
    assert_eq!(*seen, expected);
}

#[tokio::test]
async fn commit_timeout_retries_within_budget_then_succeeds() {
    init_tracing();
    let broker: Arc<FakeBroker<i32, i32>> = Arc::new(FakeBroker::new());
    broker.push(rec(0, 0, 1));
    broker.script_commit(Err(BrokerError::CommitTimeout));
    broker.script_commit(Err(BrokerError::CommitTimeout));

    let processor = Arc::new(|records: Vec<Record<i32, i32>>| async move {
        ProcessOutcome::Ok(ProcessResult::new(records))
    });

    let runner = Arc::new(ConsumerRunner::new(processor));
    runner.with_broker(broker.clone());
    runner.configure(base_builder().build()).unwrap();
    runner.start().await.unwrap();

    assert!(wait_until(|| runner.post_commit_count() == 1, Duration::from_secs(2)).await);
    runner.stop().await;

    assert_eq!(broker.commit_calls(), 3);
    assert_eq!(broker.committed(&PartitionId::new("t", 0)), Some(1));
}

#[tokio::test]
async fn commit_non_timeout_error_on_retry_escalates_to_fatal() {
    init_tracing();
    let broker: Arc<FakeBroker<i32, i32>> = Arc::new(FakeBroker::new());
    broker.push(rec(0, 0, 1));
    broker.script_commit(Err(BrokerError::CommitTimeout));
    broker.script_commit(Err(BrokerError::CommitTimeout));
    broker.script_commit(Err(BrokerError::Kafka(rdkafka::error::KafkaError::Global(
        rdkafka::types::RDKafkaErrorCode::InvalidArgument,
    ))));
    broker.script_commit(Err(BrokerError::Kafka(rdkafka::error::KafkaError::Global(
        rdkafka::types::RDKafkaErrorCode::InvalidArgument,
    ))));

    let fatal_seen = Arc::new(AtomicBool::new(false));
    let fatal_seen2 = fatal_seen.clone();

    let processor = Arc::new(|records: Vec<Record<i32, i32>>| async move {
        ProcessOutcome::Ok(ProcessResult::new(records))
    });

    let runner = Arc::new(ConsumerRunner::new(processor));
    runner.with_broker(broker.clone());
    runner.with_exit_signal(Arc::new(|| {}));
    runner.on_fatal(move |_cause| {
        fatal_seen2.store(true, Ordering::SeqCst);
    });
    runner.configure(base_builder().build()).unwrap();
    runner.start().await.unwrap();

    assert!(wait_until(|| runner.state() == RunnerState::Stopped, Duration::from_secs(2)).await);
    assert!(fatal_seen.load(Ordering::SeqCst));
    assert!(!runner.running());
    assert_eq!(broker.commit_calls(), 4);
}

#[tokio::test]
async fn eventual_success_after_repeated_pause_commits_every_record() {
    init_tracing();
    let broker: Arc<FakeBroker<i32, i32>> = Arc::new(FakeBroker::new());
    broker.push_all((0..10).map(|i| rec(0, i, i as i32)));

    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts2 = attempts.clone();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen2 = seen.clone();
    let processor = Arc::new(move |records: Vec<Record<i32, i32>>| {
        let attempts = attempts2.clone();
        let seen = seen2.clone();
        async move {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                ProcessOutcome::NeedForPause {
                    reason: "warming up".into(),
                    duration: Some(Duration::from_millis(10)),
                }
            } else {
                seen.lock().unwrap().extend(records.iter().map(|r| r.value));
                ProcessOutcome::Ok(ProcessResult::new(records))
            }
        }
    });

    let runner = Arc::new(ConsumerRunner::new(processor));
    runner.with_broker(broker.clone());
    runner.configure(base_builder().build()).unwrap();
    runner.start().await.unwrap();

    assert!(wait_until(|| runner.post_commit_count() >= 1, Duration::from_secs(2)).await);
    runner.stop().await;

    assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
}
