//! Session countdown.
//!
//! [`Countdown`] is the pure bookkeeping (remaining time, warning latch,
//! alert state). [`SessionTimer`] owns the recurring one-second tick task and
//! guarantees a single active tick chain.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

pub const TICK_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Running { remaining: Duration },
    /// First tick at or below the warning threshold. Emitted once per latch.
    Warn { remaining: Duration },
    Expired,
}

#[derive(Debug, Clone)]
pub struct Countdown {
    duration: Duration,
    extension: Duration,
    warning: Duration,
    asked: bool,
    alert: bool,
    remaining: Option<Duration>,
}

impl Countdown {
    pub fn new(duration: Duration, extension: Duration, warning: Duration) -> Self {
        Self {
            duration,
            extension,
            warning,
            asked: false,
            alert: false,
            remaining: None,
        }
    }

    pub fn remaining_at(&self, started_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<Duration> {
        let elapsed = (now - started_at).to_std().unwrap_or(Duration::ZERO);
        self.duration.checked_sub(elapsed).filter(|left| !left.is_zero())
    }

    pub fn evaluate(&mut self, started_at: DateTime<Utc>, now: DateTime<Utc>) -> TickOutcome {
        let Some(remaining) = self.remaining_at(started_at, now) else {
            self.remaining = Some(Duration::ZERO);
            return TickOutcome::Expired;
        };
        self.remaining = Some(remaining);
        if remaining <= self.warning && !self.asked {
            self.asked = true;
            return TickOutcome::Warn { remaining };
        }
        TickOutcome::Running { remaining }
    }

    /// New start timestamp granting `extension` from `now`; un-latches the warning.
    pub fn extend(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.asked = false;
        self.alert = false;
        let grant = self.extension.min(self.duration);
        let shift = chrono::Duration::from_std(self.duration - grant)
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.remaining = Some(grant);
        now - shift
    }

    pub fn decline_extension(&mut self) {
        self.alert = true;
    }

    pub fn reset(&mut self) {
        self.asked = false;
        self.alert = false;
        self.remaining = None;
    }

    pub fn is_alert(&self) -> bool {
        self.alert
    }

    pub fn last_remaining(&self) -> Option<Duration> {
        self.remaining
    }
}

pub fn format_remaining(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// Cancellable recurring tick task.
#[derive(Debug, Default)]
pub struct SessionTimer {
    handle: Option<JoinHandle<()>>,
}

impl SessionTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Aborts any running chain, then ticks every second. The chain ends on
    /// its own once `on_tick` returns `false`.
    pub fn start<F>(&mut self, runtime: &Handle, on_tick: F)
    where
        F: Fn(DateTime<Utc>) -> bool + Send + 'static,
    {
        self.stop();
        self.handle = Some(runtime.spawn(async move {
            let first = tokio::time::Instant::now() + TICK_PERIOD;
            let mut interval = tokio::time::interval_at(first, TICK_PERIOD);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if !on_tick(Utc::now()) {
                    break;
                }
            }
        }));
        tracing::debug!("Session timer started");
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            tracing::debug!("Session timer stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for SessionTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
