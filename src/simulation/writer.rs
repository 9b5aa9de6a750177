//! Background tick loop.
//!
//! The loop sleeps only between ticks. Each tick runs to completion and then
//! replaces the published frame with a single atomic store, so readers see
//! either the previous generation or the new one.

use crate::core::Config;
use crate::monitoring::RunState;
use crate::simulation::{Frame, Simulator};
use arc_swap::ArcSwap;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, Interval, MissedTickBehavior};
use tracing::{error, info, warn};

/// Drives a [`Simulator`] at its configured wall-clock interval
pub struct TickLoop {
    simulator: Simulator,
    frames: Arc<ArcSwap<Frame>>,
    reload: Option<watch::Receiver<Config>>,
}

impl TickLoop {
    /// Create the loop and publish the pre-tick frame.
    pub fn new(simulator: Simulator) -> Self {
        let initial = simulator.frame(RunState::Starting, Utc::now());
        Self {
            simulator,
            frames: Arc::new(ArcSwap::from_pointee(initial)),
            reload: None,
        }
    }

    /// Rebuild the simulation whenever `updates` delivers a new document
    pub fn with_reload(mut self, updates: watch::Receiver<Config>) -> Self {
        self.reload = Some(updates);
        self
    }

    /// Shared handle readers load frames from
    pub fn frames(&self) -> Arc<ArcSwap<Frame>> {
        Arc::clone(&self.frames)
    }

    /// Tick until the scenario completes or `shutdown` flips to true.
    ///
    /// The final state is published before returning.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> RunState {
        let mut interval = ticker(self.simulator.tick_interval());

        info!(
            "Tick loop started: every {:?}, {}s simulated per tick",
            self.simulator.tick_interval(),
            self.simulator.config().time_step_secs()
        );

        let state = loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown requested, stopping tick loop");
                        break RunState::Stopped;
                    }
                    continue;
                }
                _ = interval.tick() => {}
            }

            self.apply_reload(&mut interval);

            self.simulator.tick(Utc::now().timestamp_millis());

            if self.simulator.is_complete() {
                info!(
                    "Scenario '{}' completed after {} ticks",
                    self.simulator.scenario().name(),
                    self.simulator.generation()
                );
                break RunState::Completed;
            }
            self.publish(RunState::Running);
        };

        if state == RunState::Completed {
            self.simulator.finish(Utc::now().timestamp_millis());
        }
        self.publish(state);
        state
    }

    fn publish(&self, state: RunState) {
        self.frames
            .store(Arc::new(self.simulator.frame(state, Utc::now())));
    }

    fn apply_reload(&mut self, interval: &mut Interval) {
        let Some(updates) = self.reload.as_mut() else {
            return;
        };
        match updates.has_changed() {
            Ok(true) => {},
            Ok(false) => return,
            Err(_) => {
                warn!("Configuration watcher stopped, live reload disabled");
                self.reload = None;
                return;
            },
        }

        let config = updates.borrow_and_update().clone();
        let previous = self.simulator.tick_interval();

        match self.simulator.reload(config) {
            Ok(()) => {
                let next = self.simulator.tick_interval();
                if next != previous {
                    *interval = ticker(next);
                }
            },
            Err(e) => error!("Keeping current simulation, reload failed: {}", e),
        }
    }
}

fn ticker(period: Duration) -> Interval {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ConfigBuilder;

    fn simulator(duration: Duration) -> Simulator {
        let config = ConfigBuilder::new()
            .seed(9)
            .population(10)
            .tick_interval(Duration::from_millis(5))
            .time_step(Duration::from_secs(10))
            .build()
            .unwrap();
        Simulator::new(Arc::new(config), "baseline", Some(duration)).unwrap()
    }

    #[tokio::test]
    async fn test_initial_frame_is_empty() {
        let tick_loop = TickLoop::new(simulator(Duration::from_secs(60)));
        let frame = tick_loop.frames().load_full();
        assert_eq!(frame.snapshot.generation, 0);
        assert_eq!(frame.snapshot.instance_count(), 0);
        assert_eq!(frame.status.state, RunState::Starting);
        assert!(frame.status.last_update.is_none());
    }

    #[tokio::test]
    async fn test_runs_to_completion() {
        let tick_loop = TickLoop::new(simulator(Duration::from_secs(50)));
        let frames = tick_loop.frames();
        let (_tx, rx) = watch::channel(false);

        let state = tick_loop.run(rx).await;
        assert_eq!(state, RunState::Completed);

        let frame = frames.load_full();
        assert_eq!(frame.status.state, RunState::Completed);
        assert_eq!(frame.snapshot.generation, 5);
        assert!(frame.status.scenario.completed);
    }

    #[tokio::test]
    async fn test_shutdown_publishes_final_frame() {
        let tick_loop = TickLoop::new(simulator(Duration::from_secs(86_400)));
        let frames = tick_loop.frames();
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(tick_loop.run(rx));
        tokio::time::sleep(Duration::from_millis(40)).await;
        tx.send(true).unwrap();

        let state = handle.await.unwrap();
        assert_eq!(state, RunState::Stopped);

        let frame = frames.load_full();
        assert_eq!(frame.status.state, RunState::Stopped);
        assert!(frame.snapshot.generation > 0);
        assert!(frame.snapshot.instance_count() > 0);
    }

    #[tokio::test]
    async fn test_reload_rebuilds_simulation() {
        let sim = simulator(Duration::from_secs(86_400));
        let initial = (**sim.config()).clone();
        let (config_tx, config_rx) = watch::channel(initial.clone());
        let tick_loop = TickLoop::new(sim).with_reload(config_rx);
        let frames = tick_loop.frames();
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(tick_loop.run(rx));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut next = initial;
        next.population.total = 4;
        config_tx.send(next).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        let frame = frames.load_full();
        assert_eq!(frame.status.actors, 4);
        assert_eq!(frame.status.stats.reloads, 1);
    }
}
