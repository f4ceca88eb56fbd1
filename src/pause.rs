//! Pause Controller (C2): holds the pause descriptor with exponential
//! backoff and signals resume.

use std::sync::RwLock;
use std::time::{Duration, Instant};

use tracing::info;

use crate::metrics;

/// Snapshot of the runner's pause state. Invariant: `paused` implies
/// `base <= next_attempt_after <= max`.
#[derive(Debug, Clone)]
pub struct PauseState {
    pub paused: bool,
    pub since: Instant,
    pub attempt: u32,
    pub next_attempt_after: Duration,
    pub reason: String,
}

impl Default for PauseState {
    fn default() -> Self {
        Self {
            paused: false,
            since: Instant::now(),
            attempt: 0,
            next_attempt_after: Duration::ZERO,
            reason: String::new(),
        }
    }
}

/// Single-writer discipline: only the driver calls `request_pause` /
/// `try_resume`. Other readers use `snapshot`, which is a plain atomic read
/// of the lock-guarded state.
pub struct PauseController {
    state: RwLock<PauseState>,
    pause_base: Duration,
    pause_max: Duration,
    paused_history: std::sync::atomic::AtomicU64,
    unpaused_history: std::sync::atomic::AtomicU64,
}

impl PauseController {
    pub fn new(pause_base: Duration, pause_max: Duration) -> Self {
        Self {
            state: RwLock::new(PauseState::default()),
            pause_base,
            pause_max,
            paused_history: std::sync::atomic::AtomicU64::new(0),
            unpaused_history: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> PauseState {
        self.state.read().expect("pause state poisoned").clone()
    }

    pub fn paused_history(&self) -> u64 {
        self.paused_history.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn unpaused_history(&self) -> u64 {
        self.unpaused_history.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Requests a pause. `duration`, when present, overrides the computed
    /// exponential backoff. Growing `attempt` on successive pauses without
    /// an intervening successful batch produces a non-decreasing backoff,
    /// capped at `pause_max`.
    pub fn request_pause(&self, now: Instant, reason: String, duration: Option<Duration>) {
        let mut state = self.state.write().expect("pause state poisoned");
        state.attempt += 1;
        let computed = self.backoff_for_attempt(state.attempt);
        state.paused = true;
        state.since = now;
        state.next_attempt_after = duration.unwrap_or(computed);
        state.reason = reason.clone();
        drop(state);

        self.paused_history.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        metrics::inc_paused_history();
        info!(reason = %reason, "runner paused");
    }

    fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let multiplier = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let scaled = self.pause_base.saturating_mul(multiplier.min(u32::MAX as u64) as u32);
        scaled.min(self.pause_max)
    }

    /// Resets `paused`/`attempt` to the unpaused state if `now` has reached
    /// the scheduled retry instant. Returns whether a transition happened.
    pub fn try_resume(&self, now: Instant) -> bool {
        let mut state = self.state.write().expect("pause state poisoned");
        if !state.paused {
            return false;
        }
        if now < state.since + state.next_attempt_after {
            return false;
        }
        state.paused = false;
        state.attempt = 0;
        drop(state);

        self.unpaused_history.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        metrics::inc_unpaused_history();
        info!("runner resumed");
        true
    }

    /// Called after a batch commits successfully with no pause requested;
    /// resets the backoff attempt counter so the next pause, if any, starts
    /// from the base delay again.
    pub fn note_success(&self) {
        let mut state = self.state.write().expect("pause state poisoned");
        if !state.paused {
            state.attempt = 0;
        }
    }
}
