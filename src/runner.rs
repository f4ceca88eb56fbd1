//! Consumer Runner (C6): owns the poll loop, lifecycle, dispatch strategy,
//! and hook bus.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::broker::{BrokerClient, OffsetCommitter, RdKafkaBrokerClient};
use crate::clock::{Clock, SystemClock};
use crate::commit::{CommitEngine, UnitFactory};
use crate::config::RunnerConfig;
use crate::dispatch::split_batch;
use crate::error::{BrokerError, RunnerError};
use crate::hooks::HookBus;
use crate::invoker::{InvokerOutcome, ProcessInvoker};
use crate::metrics;
use crate::outcome::Processor;
use crate::pause::PauseController;
use crate::record::PartitionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    New,
    Configured,
    Running,
    Paused,
    Stopping,
    Stopped,
}

/// A per-unit commit action bridging a generic [`BrokerClient`] into the
/// non-generic [`OffsetCommitter`] the Commit Engine holds.
struct BrokerCommitter<K, V>(Arc<dyn BrokerClient<K, V>>);

#[async_trait]
impl<K, V> OffsetCommitter for BrokerCommitter<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
    async fn commit_sync(&self, offsets: &HashMap<PartitionId, i64>) -> Result<(), BrokerError> {
        self.0.commit_sync(offsets).await
    }
}

type ExitSignal = Arc<dyn Fn() + Send + Sync>;

/// The resilient streaming consumer runner (§4.1). Generic over the
/// deserialized key/value types `K`/`V`; use `Arc::new(ConsumerRunner::new(..))`
/// so `start()`/`stop()` can run the driver loop as a background task.
pub struct ConsumerRunner<K, V> {
    state: RwLock<RunnerState>,
    config: OnceLock<RunnerConfig<K, V>>,
    broker: OnceLock<Arc<dyn BrokerClient<K, V>>>,
    processor: Arc<dyn Processor<K, V>>,
    unit_factory: OnceLock<Arc<dyn UnitFactory>>,
    pause: OnceLock<Arc<PauseController>>,
    hooks: Arc<HookBus>,
    clock: OnceLock<Arc<dyn Clock>>,
    exit_signal: OnceLock<ExitSignal>,
    post_commit_count: AtomicU64,
    running: AtomicBool,
    cancel: RwLock<CancellationToken>,
    loop_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<K, V> ConsumerRunner<K, V>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn new(processor: Arc<dyn Processor<K, V>>) -> Self {
        Self {
            state: RwLock::new(RunnerState::New),
            config: OnceLock::new(),
            broker: OnceLock::new(),
            processor,
            unit_factory: OnceLock::new(),
            pause: OnceLock::new(),
            hooks: Arc::new(HookBus::new()),
            clock: OnceLock::new(),
            exit_signal: OnceLock::new(),
            post_commit_count: AtomicU64::new(0),
            running: AtomicBool::new(false),
            cancel: RwLock::new(CancellationToken::new()),
            loop_handle: std::sync::Mutex::new(None),
        }
    }

    /// Validates and stores configuration, transitioning `New -> Configured`.
    /// Fails with `InvalidConfig` when a required field (bootstrap servers,
    /// group id, topics) is missing or empty; `start()` re-checks the same
    /// fields so a runner configured directly against an invalid `Config`
    /// (bypassing this method) still fails fast there too.
    pub fn configure(&self, config: RunnerConfig<K, V>) -> Result<(), RunnerError> {
        if self.config.get().is_some() {
            return Err(RunnerError::InvalidConfig(
                "runner was already configured".into(),
            ));
        }
        config.validate()?;
        let pause = Arc::new(PauseController::new(config.pause_base, config.pause_max));
        let _ = self.pause.set(pause);
        let _ = self.config.set(config);
        *self.state.write().expect("state poisoned") = RunnerState::Configured;
        Ok(())
    }

    /// Test/embedded-broker override point: inject a [`BrokerClient`]
    /// instead of the default `rdkafka`-backed one built from config. Must
    /// be called before `start()`.
    pub fn with_broker(&self, broker: Arc<dyn BrokerClient<K, V>>) {
        let _ = self.broker.set(broker);
    }

    /// The `oneFactory` override point (§4.1, §9): inject a custom per-unit
    /// commit action, used by tests to simulate commit failures. Must be
    /// called before `start()`.
    pub fn with_unit_factory(&self, factory: Arc<dyn UnitFactory>) {
        let _ = self.unit_factory.set(factory);
    }

    pub fn with_clock(&self, clock: Arc<dyn Clock>) {
        let _ = self.clock.set(clock);
    }

    /// Overrides the "signal host exit" action fired when a `Fatal` error
    /// escalates and `force_exit` is set. Defaults to `std::process::exit(1)`;
    /// tests should override this before `start()`.
    pub fn with_exit_signal(&self, exit: ExitSignal) {
        let _ = self.exit_signal.set(exit);
    }

    pub fn on_pre_poll(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.hooks.on_pre_poll(handler);
    }

    pub fn on_post_commit(&self, handler: impl Fn(u32) + Send + Sync + 'static) {
        self.hooks.on_post_commit(handler);
    }

    pub fn on_pause(&self, handler: impl Fn(&str, Duration) + Send + Sync + 'static) {
        self.hooks.on_pause(handler);
    }

    pub fn on_resume(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.hooks.on_resume(handler);
    }

    pub fn on_fatal(&self, handler: impl Fn(&RunnerError) + Send + Sync + 'static) {
        self.hooks.on_fatal(handler);
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> RunnerState {
        *self.state.read().expect("state poisoned")
    }

    pub fn paused_history(&self) -> u64 {
        self.pause.get().map(|p| p.paused_history()).unwrap_or(0)
    }

    pub fn unpaused_history(&self) -> u64 {
        self.pause.get().map(|p| p.unpaused_history()).unwrap_or(0)
    }

    pub fn post_commit_count(&self) -> u64 {
        self.post_commit_count.load(Ordering::Relaxed)
    }

    /// Idempotent transition to `Running`. A no-op unless the current state
    /// is `Configured` or `Stopped`; `Running` itself is also a no-op
    /// (already running). On an `InvalidConfig` failure the runner
    /// transitions to `Stopped` and `running()` observes `false`.
    pub async fn start(self: &Arc<Self>) -> Result<(), RunnerError> {
        {
            let state = self.state();
            if state == RunnerState::Running {
                return Ok(());
            }
            if state != RunnerState::Configured && state != RunnerState::Stopped {
                return Ok(());
            }
        }

        let config = match self.config.get() {
            Some(c) => c,
            None => {
                *self.state.write().expect("state poisoned") = RunnerState::Stopped;
                return Err(RunnerError::InvalidConfig(
                    "runner was never configured".into(),
                ));
            }
        };
        if let Err(e) = config.validate() {
            *self.state.write().expect("state poisoned") = RunnerState::Stopped;
            error!(error = %e, "invalid configuration, runner will not start");
            return Err(e);
        }

        if self.broker.get().is_none() {
            let broker = RdKafkaBrokerClient::new(
                &config.bootstrap_servers,
                &config.group_id,
                config.auto_offset_reset.as_rdkafka_str(),
                config.key_deserializer.clone(),
                config.value_deserializer.clone(),
            )
            .map_err(|e| RunnerError::Fatal(anyhow::Error::new(e)))?;
            let _ = self.broker.set(Arc::new(broker));
        }
        if self.unit_factory.get().is_none() {
            let committer: Arc<dyn OffsetCommitter> =
                Arc::new(BrokerCommitter(self.broker.get().expect("broker set").clone()));
            let engine = CommitEngine::new(committer, config.commit_attempts);
            let _ = self.unit_factory.set(Arc::new(engine));
        }
        let _ = self.clock.set(Arc::new(SystemClock));
        let _ = self.exit_signal.set(Arc::new(|| std::process::exit(1)));

        *self.cancel.write().expect("cancel poisoned") = CancellationToken::new();
        self.running.store(true, Ordering::SeqCst);
        *self.state.write().expect("state poisoned") = RunnerState::Running;
        info!(instance_id = config.instance_id, "runner starting");

        let runner = self.clone();
        let handle = tokio::spawn(async move { runner.drive_loop().await });
        *self.loop_handle.lock().expect("loop handle poisoned") = Some(handle);

        Ok(())
    }

    /// Cooperative shutdown. Returns once the driver has released the
    /// broker handle and the current unit's invocation has resolved or been
    /// cancelled. Idempotent: a second call is a no-op.
    pub async fn stop(&self) {
        self.cancel.read().expect("cancel poisoned").cancel();
        let handle = self.loop_handle.lock().expect("loop handle poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn drive_loop(self: Arc<Self>) {
        let config = self.config.get().expect("configured before drive_loop");
        let broker = self.broker.get().expect("broker set before drive_loop").clone();
        let pause = self.pause.get().expect("pause set before drive_loop").clone();
        let unit_factory = self
            .unit_factory
            .get()
            .expect("unit factory set before drive_loop")
            .clone();
        let clock = self.clock.get().expect("clock set before drive_loop").clone();

        let invoker = ProcessInvoker::new(
            self.processor.clone(),
            clock.clone(),
            config.poll_timeout,
            config.delay_single_record,
            config.on_unknown_handler_failure,
        );

        if let Err(e) = broker.subscribe(&config.topics).await {
            self.fail_fatal(&broker, RunnerError::Fatal(anyhow::Error::new(e))).await;
            return;
        }

        loop {
            let cancel = self.cancel.read().expect("cancel poisoned").clone();
            if cancel.is_cancelled() {
                break;
            }

            let now = clock.now();
            let snapshot = pause.snapshot();
            if snapshot.paused && now < snapshot.since + snapshot.next_attempt_after {
                *self.state.write().expect("state poisoned") = RunnerState::Paused;
                // Paused poll: keep the broker session (and its heartbeats)
                // alive without surfacing records to the handler.
                if let Err(e) = broker.poll(Duration::ZERO).await {
                    self.fail_fatal(&broker, RunnerError::Fatal(anyhow::Error::new(e))).await;
                    return;
                }
                clock.sleep(Duration::from_millis(50), &cancel).await;
                continue;
            }
            if pause.try_resume(now) {
                *self.state.write().expect("state poisoned") = RunnerState::Running;
                if let Ok(assigned) = broker.assignment() {
                    if let Err(e) = broker.resume(&assigned).await {
                        warn!(error = %e, "failed to resume assigned partitions at the broker");
                    }
                }
                self.hooks.fire_resume();
            }

            self.hooks.fire_pre_poll();

            let batch = match broker.poll(config.poll_timeout).await {
                Ok(batch) => batch,
                Err(e) => {
                    self.fail_fatal(&broker, RunnerError::Fatal(anyhow::Error::new(e))).await;
                    return;
                }
            };

            if batch.is_empty() {
                clock.sleep(Duration::from_millis(10), &cancel).await;
                continue;
            }

            if !config.delay_records.is_zero() {
                clock.sleep(config.delay_records, &cancel).await;
            }

            let units = split_batch(batch, config.strategy);
            let mut committed = 0u32;
            let mut batch_was_paused = false;

            for unit in units {
                if cancel.is_cancelled() {
                    break;
                }
                match invoker.invoke(unit, &cancel).await {
                    InvokerOutcome::Success { offsets } => match unit_factory.commit(offsets, &cancel).await {
                        Ok(()) => {
                            committed += 1;
                            self.post_commit_count.fetch_add(1, Ordering::Relaxed);
                            metrics::inc_post_commit(1);
                        }
                        // A commit retry cancelled by `stop()` is reported as
                        // an error by the factory, but it's cooperative
                        // shutdown, not a fatal fault: abandon the unit
                        // (no commit, no hook) exactly like a cancelled
                        // invocation, rather than escalating to `onFatal`.
                        Err(_) if cancel.is_cancelled() => {
                            break;
                        }
                        Err(e) => {
                            self.fail_fatal(&broker, e).await;
                            return;
                        }
                    },
                    InvokerOutcome::NeedForPause { reason, duration } => {
                        pause.request_pause(clock.now(), reason.clone(), duration);
                        if let Ok(assigned) = broker.assignment() {
                            if let Err(e) = broker.pause(&assigned).await {
                                warn!(error = %e, "failed to pause assigned partitions at the broker");
                            }
                        }
                        let wait = pause.snapshot().next_attempt_after;
                        self.hooks.fire_pause(&reason, wait);
                        batch_was_paused = true;
                        break;
                    }
                    InvokerOutcome::Fatal(cause) => {
                        self.fail_fatal(&broker, RunnerError::Fatal(cause)).await;
                        return;
                    }
                    InvokerOutcome::Cancelled => {
                        break;
                    }
                }
            }

            if !batch_was_paused {
                pause.note_success();
            }
            self.hooks.fire_post_commit(committed);
        }

        *self.state.write().expect("state poisoned") = RunnerState::Stopping;
        let _ = broker.close().await;
        *self.state.write().expect("state poisoned") = RunnerState::Stopped;
        self.running.store(false, Ordering::SeqCst);
        info!("runner stopped");
    }

    async fn fail_fatal(&self, broker: &Arc<dyn BrokerClient<K, V>>, err: RunnerError) {
        *self.state.write().expect("state poisoned") = RunnerState::Stopping;
        let _ = broker.close().await;
        self.hooks.fire_fatal(&err);
        metrics::inc_fatal();
        error!(error = %err, "runner stopping due to fatal error");
        *self.state.write().expect("state poisoned") = RunnerState::Stopped;
        self.running.store(false, Ordering::SeqCst);

        let force_exit = self.config.get().map(|c| c.force_exit).unwrap_or(true);
        if force_exit {
            if let Some(exit) = self.exit_signal.get() {
                exit();
            }
        }
    }
}
