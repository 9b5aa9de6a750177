//! Run-state monitoring for the simulator.
//!
//! The tick loop owns a [`Monitor`] and copies its state into every published
//! frame, so health reports never lock against the writer.

use crate::core::SimError;
use crate::population::SegmentCount;
use crate::scenario::ScenarioStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Maximum recent errors kept for `/health`
const MAX_RECENT_ERRORS: usize = 20;

/// Lifecycle of a simulation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// No tick has completed yet
    Starting,
    Running,
    /// The scenario ran to its full duration
    Completed,
    /// Stopped by a shutdown signal
    Stopped,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Starting => "starting",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Stopped => "stopped",
        }
    }
}

/// Overall health as reported by `/health`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemHealth {
    Healthy,
    /// The last tick took longer than its interval
    Degraded,
}

/// Counters kept by the writer across ticks
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickStats {
    pub ticks: u64,
    /// Unknown scenario events skipped so far
    pub skipped_events: u64,
    /// Internal errors swallowed by the tick loop
    pub internal_errors: u64,
    /// Internal errors by category
    pub error_categories: BTreeMap<String, u64>,
    /// Most recent error messages, newest last
    pub recent_errors: Vec<String>,
    #[serde(serialize_with = "serialize_millis")]
    pub last_tick_duration: Duration,
    #[serde(serialize_with = "serialize_millis")]
    pub max_tick_duration: Duration,
    /// Config reloads applied in development mode
    pub reloads: u64,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64() * 1000.0)
}

/// Tracks tick timing and swallowed errors for the writer
#[derive(Debug)]
pub struct Monitor {
    stats: TickStats,
    tick_interval: Duration,
    tick_started: Option<Instant>,
}

impl Monitor {
    pub fn new(tick_interval: Duration) -> Self {
        Self {
            stats: TickStats::default(),
            tick_interval,
            tick_started: None,
        }
    }

    pub fn begin_tick(&mut self) {
        self.tick_started = Some(Instant::now());
    }

    pub fn end_tick(&mut self) {
        let took = self
            .tick_started
            .take()
            .map(|start| start.elapsed())
            .unwrap_or_default();
        self.stats.ticks += 1;
        self.stats.last_tick_duration = took;
        self.stats.max_tick_duration = self.stats.max_tick_duration.max(took);

        if took > self.tick_interval {
            tracing::warn!(
                "Tick {} took {:?}, longer than the {:?} interval",
                self.stats.ticks,
                took,
                self.tick_interval
            );
        }
    }

    /// Record an error the tick loop recovered from.
    pub fn record_error(&mut self, error: &SimError) {
        self.stats.internal_errors += 1;
        *self
            .stats
            .error_categories
            .entry(error.category().to_string())
            .or_insert(0) += 1;

        self.stats.recent_errors.push(error.to_string());
        if self.stats.recent_errors.len() > MAX_RECENT_ERRORS {
            self.stats.recent_errors.remove(0);
        }
    }

    pub fn record_skipped(&mut self, count: u64) {
        self.stats.skipped_events = count;
    }

    pub fn record_reload(&mut self) {
        self.stats.reloads += 1;
    }

    pub fn set_tick_interval(&mut self, interval: Duration) {
        self.tick_interval = interval;
    }

    pub fn health(&self) -> SystemHealth {
        if self.stats.ticks > 0 && self.stats.last_tick_duration > self.tick_interval {
            SystemHealth::Degraded
        } else {
            SystemHealth::Healthy
        }
    }

    pub fn stats(&self) -> &TickStats {
        &self.stats
    }
}

/// Everything `/health` reports besides the snapshot itself
#[derive(Debug, Clone, Serialize)]
pub struct RunStatus {
    pub state: RunState,
    pub health: SystemHealth,
    pub scenario: ScenarioStatus,
    /// Seed of the random source, for reproducing the run
    pub seed: u64,
    pub actors: usize,
    pub segments: Vec<SegmentCount>,
    /// Simulated wall clock of the last tick
    pub simulated_time: DateTime<Utc>,
    /// Real wall clock of the last publish
    pub last_update: Option<DateTime<Utc>>,
    pub stats: TickStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degraded_when_tick_overruns() {
        let mut monitor = Monitor::new(Duration::from_millis(1));
        assert_eq!(monitor.health(), SystemHealth::Healthy);

        monitor.begin_tick();
        std::thread::sleep(Duration::from_millis(5));
        monitor.end_tick();
        assert_eq!(monitor.stats().ticks, 1);
        assert_eq!(monitor.health(), SystemHealth::Degraded);

        monitor.set_tick_interval(Duration::from_secs(60));
        assert_eq!(monitor.health(), SystemHealth::Healthy);
    }

    #[test]
    fn test_error_tracking() {
        let mut monitor = Monitor::new(Duration::from_secs(1));
        for _ in 0..25 {
            monitor.record_error(&SimError::NegativeCounterDelta {
                metric: "m".to_string(),
                delta: -1.0,
            });
        }
        let stats = monitor.stats();
        assert_eq!(stats.internal_errors, 25);
        assert_eq!(stats.error_categories.get("internal"), Some(&25));
        assert_eq!(stats.recent_errors.len(), MAX_RECENT_ERRORS);
    }

    #[test]
    fn test_state_names() {
        assert_eq!(RunState::Completed.as_str(), "completed");
        assert_eq!(serde_json::to_string(&RunState::Stopped).unwrap(), "\"stopped\"");
    }
}
