//! Configuration (§3 of the data model).
//!
//! The scalar fields are loadable from the environment via `envconfig`,
//! mirroring the convention used throughout this codebase's services. The
//! non-scalar fields -- the true `topics` set and the deserializer
//! factories -- are supplied programmatically through [`RunnerConfigBuilder`],
//! since closures cannot come from an environment variable.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use envconfig::Envconfig;

use crate::broker::DeserializeFn;
use crate::error::RunnerError;
use crate::record::Strategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoOffsetReset {
    #[default]
    Earliest,
    Latest,
    None,
}

impl AutoOffsetReset {
    pub fn as_rdkafka_str(self) -> &'static str {
        match self {
            AutoOffsetReset::Earliest => "earliest",
            AutoOffsetReset::Latest => "latest",
            AutoOffsetReset::None => "none",
        }
    }
}

impl std::str::FromStr for AutoOffsetReset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "earliest" => Ok(AutoOffsetReset::Earliest),
            "latest" => Ok(AutoOffsetReset::Latest),
            "none" => Ok(AutoOffsetReset::None),
            other => Err(format!("unknown auto_offset_reset: {other}")),
        }
    }
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "one_per_partition" | "oneperpartition" => Ok(Strategy::OnePerPartition),
            "all" => Ok(Strategy::All),
            other => Err(format!("unknown strategy: {other}")),
        }
    }
}

/// Resolves the open question named in §9: how a `TransientOther` failure
/// (any handler failure that is neither `Ok` nor an explicit
/// `NeedForPause`) is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownHandlerFailurePolicy {
    #[default]
    PauseDefault,
    Fatal,
}

impl std::str::FromStr for UnknownHandlerFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pause_default" | "pausedefault" => Ok(UnknownHandlerFailurePolicy::PauseDefault),
            "fatal" => Ok(UnknownHandlerFailurePolicy::Fatal),
            other => Err(format!("unknown on_unknown_handler_failure policy: {other}")),
        }
    }
}

/// The scalar, environment-loadable fields of [`RunnerConfig`].
#[derive(Envconfig, Clone, Debug)]
pub struct EnvRunnerConfig {
    #[envconfig(from = "BOOTSTRAP_SERVERS")]
    pub bootstrap_servers: String,

    #[envconfig(from = "GROUP_ID")]
    pub group_id: String,

    /// Comma-separated topic list; merged into the true `HashSet<String>`
    /// on `RunnerConfigBuilder::with_env`.
    #[envconfig(from = "TOPICS")]
    pub topics: String,

    #[envconfig(from = "AUTO_OFFSET_RESET", default = "earliest")]
    pub auto_offset_reset: String,

    #[envconfig(from = "STRATEGY", default = "one_per_partition")]
    pub strategy: String,

    #[envconfig(from = "POLL_TIMEOUT_MS", default = "1000")]
    pub poll_timeout_ms: u64,

    #[envconfig(from = "DELAY_SINGLE_RECORD_MS", default = "0")]
    pub delay_single_record_ms: u64,

    #[envconfig(from = "DELAY_RECORDS_MS", default = "0")]
    pub delay_records_ms: u64,

    #[envconfig(from = "PAUSE_BASE_MS", default = "1000")]
    pub pause_base_ms: u64,

    #[envconfig(from = "PAUSE_MAX_MS", default = "120000")]
    pub pause_max_ms: u64,

    #[envconfig(from = "COMMIT_ATTEMPTS", default = "3")]
    pub commit_attempts: u32,

    #[envconfig(from = "FORCE_EXIT", default = "true")]
    pub force_exit: bool,

    #[envconfig(from = "ON_UNKNOWN_HANDLER_FAILURE", default = "pause_default")]
    pub on_unknown_handler_failure: String,

    #[envconfig(from = "PARALLEL_UNITS", default = "false")]
    pub parallel_units: bool,
}

/// Runner configuration (§3). `K`/`V` are the deserialized record types.
pub struct RunnerConfig<K, V> {
    pub bootstrap_servers: String,
    pub group_id: String,
    pub topics: HashSet<String>,
    pub auto_offset_reset: AutoOffsetReset,
    pub strategy: Strategy,
    pub poll_timeout: Duration,
    pub delay_single_record: Duration,
    pub delay_records: Duration,
    pub pause_base: Duration,
    pub pause_max: Duration,
    pub commit_attempts: u32,
    pub force_exit: bool,
    pub on_unknown_handler_failure: UnknownHandlerFailurePolicy,
    pub parallel_units: bool,
    pub key_deserializer: DeserializeFn<K>,
    pub value_deserializer: DeserializeFn<V>,
    pub instance_id: u64,
}

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

impl<K, V> RunnerConfig<K, V> {
    pub fn builder(
        key_deserializer: DeserializeFn<K>,
        value_deserializer: DeserializeFn<V>,
    ) -> RunnerConfigBuilder<K, V> {
        RunnerConfigBuilder::new(key_deserializer, value_deserializer)
    }

    /// `start()`'s config gate (§4.1, §7): fails fast if any required field
    /// is missing or empty, without ever issuing a poll.
    pub fn validate(&self) -> Result<(), RunnerError> {
        if self.bootstrap_servers.trim().is_empty() {
            return Err(RunnerError::InvalidConfig("bootstrap_servers is empty".into()));
        }
        if self.group_id.trim().is_empty() {
            return Err(RunnerError::InvalidConfig("group_id is empty".into()));
        }
        if self.topics.is_empty() {
            return Err(RunnerError::InvalidConfig("topics is empty".into()));
        }
        Ok(())
    }
}

pub struct RunnerConfigBuilder<K, V> {
    bootstrap_servers: String,
    group_id: String,
    topics: HashSet<String>,
    auto_offset_reset: AutoOffsetReset,
    strategy: Strategy,
    poll_timeout: Duration,
    delay_single_record: Duration,
    delay_records: Duration,
    pause_base: Duration,
    pause_max: Duration,
    commit_attempts: u32,
    force_exit: bool,
    on_unknown_handler_failure: UnknownHandlerFailurePolicy,
    parallel_units: bool,
    key_deserializer: DeserializeFn<K>,
    value_deserializer: DeserializeFn<V>,
}

impl<K, V> RunnerConfigBuilder<K, V> {
    pub fn new(key_deserializer: DeserializeFn<K>, value_deserializer: DeserializeFn<V>) -> Self {
        Self {
            bootstrap_servers: String::new(),
            group_id: String::new(),
            topics: HashSet::new(),
            auto_offset_reset: AutoOffsetReset::default(),
            strategy: Strategy::default(),
            poll_timeout: Duration::from_secs(1),
            delay_single_record: Duration::ZERO,
            delay_records: Duration::ZERO,
            pause_base: Duration::from_secs(1),
            pause_max: Duration::from_secs(120),
            commit_attempts: 3,
            force_exit: true,
            on_unknown_handler_failure: UnknownHandlerFailurePolicy::default(),
            parallel_units: false,
            key_deserializer,
            value_deserializer,
        }
    }

    pub fn bootstrap_servers(mut self, v: impl Into<String>) -> Self {
        self.bootstrap_servers = v.into();
        self
    }

    pub fn group_id(mut self, v: impl Into<String>) -> Self {
        self.group_id = v.into();
        self
    }

    pub fn topics(mut self, v: impl IntoIterator<Item = String>) -> Self {
        self.topics = v.into_iter().collect();
        self
    }

    pub fn auto_offset_reset(mut self, v: AutoOffsetReset) -> Self {
        self.auto_offset_reset = v;
        self
    }

    pub fn strategy(mut self, v: Strategy) -> Self {
        self.strategy = v;
        self
    }

    pub fn poll_timeout(mut self, v: Duration) -> Self {
        self.poll_timeout = v;
        self
    }

    pub fn delay_single_record(mut self, v: Duration) -> Self {
        self.delay_single_record = v;
        self
    }

    pub fn delay_records(mut self, v: Duration) -> Self {
        self.delay_records = v;
        self
    }

    pub fn pause_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.pause_base = base;
        self.pause_max = max;
        self
    }

    pub fn commit_attempts(mut self, v: u32) -> Self {
        self.commit_attempts = v;
        self
    }

    pub fn force_exit(mut self, v: bool) -> Self {
        self.force_exit = v;
        self
    }

    pub fn on_unknown_handler_failure(mut self, v: UnknownHandlerFailurePolicy) -> Self {
        self.on_unknown_handler_failure = v;
        self
    }

    pub fn parallel_units(mut self, v: bool) -> Self {
        self.parallel_units = v;
        self
    }

    /// Merges the scalar fields loaded from the environment. `topics` is
    /// parsed as a comma-separated list and unioned with any topics already
    /// set on the builder.
    pub fn with_env(mut self, env: &EnvRunnerConfig) -> Self {
        self.bootstrap_servers = env.bootstrap_servers.clone();
        self.group_id = env.group_id.clone();
        self.topics.extend(
            env.topics
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from),
        );
        if let Ok(v) = env.auto_offset_reset.parse() {
            self.auto_offset_reset = v;
        }
        if let Ok(v) = env.strategy.parse() {
            self.strategy = v;
        }
        self.poll_timeout = Duration::from_millis(env.poll_timeout_ms);
        self.delay_single_record = Duration::from_millis(env.delay_single_record_ms);
        self.delay_records = Duration::from_millis(env.delay_records_ms);
        self.pause_base = Duration::from_millis(env.pause_base_ms);
        self.pause_max = Duration::from_millis(env.pause_max_ms);
        self.commit_attempts = env.commit_attempts;
        self.force_exit = env.force_exit;
        if let Ok(v) = env.on_unknown_handler_failure.parse() {
            self.on_unknown_handler_failure = v;
        }
        self.parallel_units = env.parallel_units;
        self
    }

    pub fn build(self) -> RunnerConfig<K, V> {
        RunnerConfig {
            bootstrap_servers: self.bootstrap_servers,
            group_id: self.group_id,
            topics: self.topics,
            auto_offset_reset: self.auto_offset_reset,
            strategy: self.strategy,
            poll_timeout: self.poll_timeout,
            delay_single_record: self.delay_single_record,
            delay_records: self.delay_records,
            pause_base: self.pause_base,
            pause_max: self.pause_max,
            commit_attempts: self.commit_attempts,
            force_exit: self.force_exit,
            on_unknown_handler_failure: self.on_unknown_handler_failure,
            parallel_units: self.parallel_units,
            key_deserializer: self.key_deserializer,
            value_deserializer: self.value_deserializer,
            instance_id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
        }
    }
}
