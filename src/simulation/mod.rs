//! The tick: population × metrics → generator → registry → frame.
//!
//! [`Simulator`] is the single writer. It owns every piece of mutable state
//! and produces an immutable [`Frame`] after each completed tick; the
//! [`writer`] module publishes those frames through an atomic swap.

pub mod writer;

pub use writer::TickLoop;

use crate::core::config::PricingConfig;
use crate::core::{Config, Result, SimError};
use crate::generator::{self, Baseline, BurstPattern, Modulation, Seasonality};
use crate::metrics::{
    LabelValues, MetricDefinition, MetricKind, MetricRegistry, Snapshot, ACTOR_LABELS,
};
use crate::monitoring::{Monitor, RunState, RunStatus};
use crate::population::{Actor, Population};
use crate::scenario::ScenarioEngine;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Cap on pooled label combinations per metric
pub const MAX_LABEL_COMBINATIONS: usize = 50;

/// Everything a reader needs, published atomically after each tick
#[derive(Debug, Clone)]
pub struct Frame {
    pub snapshot: Snapshot,
    pub status: RunStatus,
    /// Configuration the frame was produced under
    pub config: Arc<Config>,
}

/// One actor-driven stochastic process feeding one metric instance
#[derive(Debug, Clone)]
struct Track {
    actor: usize,
    metric: usize,
    family: usize,
    labels: LabelValues,
    baseline: Baseline,
    /// Current process value; a per-second rate for counters
    value: f64,
    /// Aggregation slot for gauges
    gauge_slot: Option<usize>,
    /// Cost instance fed from this counter's deltas
    priced: Option<Priced>,
}

#[derive(Debug, Clone)]
struct Priced {
    family: usize,
    labels: LabelValues,
    unit_price: f64,
}

/// Owns all mutable simulation state
pub struct Simulator {
    config: Arc<Config>,
    scenario_name: String,
    duration_override: Option<Duration>,
    seed: u64,
    population: Population,
    tracks: Vec<Track>,
    gauge_slots: Vec<(usize, LabelValues)>,
    gauge_sums: Vec<f64>,
    registry: MetricRegistry,
    scenario: ScenarioEngine,
    seasonality: Seasonality,
    bursts: BurstPattern,
    rng: StdRng,
    dt: f64,
    generation: u64,
    start: DateTime<Utc>,
    monitor: Monitor,
}

impl Simulator {
    /// Build a simulator for `scenario` from a validated configuration.
    ///
    /// `duration` overrides the scenario length.
    pub fn new(config: Arc<Config>, scenario: &str, duration: Option<Duration>) -> Result<Self> {
        let seed = config.simulation.seed.unwrap_or_else(rand::random);
        let mut rng = StdRng::seed_from_u64(seed);

        let population = Population::generate(&config.population, &mut rng)?;
        let engine = ScenarioEngine::from_config(&config, scenario, duration)?;
        let registry = MetricRegistry::new(&config.metrics);

        let mut sim = Self {
            scenario_name: scenario.to_string(),
            duration_override: duration,
            seed,
            tracks: Vec::new(),
            gauge_slots: Vec::new(),
            gauge_sums: Vec::new(),
            registry,
            scenario: engine,
            seasonality: Seasonality::new(config.simulation.seasonality.clone()),
            bursts: BurstPattern::new(config.simulation.burst),
            rng,
            dt: config.time_step_secs(),
            generation: 0,
            start: config.simulation.start_time.unwrap_or_else(Utc::now),
            monitor: Monitor::new(config.simulation.tick_interval),
            population,
            config,
        };
        sim.build_tracks()?;

        info!(
            "Simulator ready: scenario '{}', {} actors, {} processes, seed {}",
            sim.scenario_name,
            sim.population.len(),
            sim.tracks.len(),
            seed
        );

        Ok(sim)
    }

    fn build_tracks(&mut self) -> Result<()> {
        let config = Arc::clone(&self.config);
        let pricing = match &config.pricing {
            Some(pricing) => {
                let family = self
                    .registry
                    .family_index(&pricing.metric)
                    .ok_or_else(|| SimError::UnknownMetric(pricing.metric.clone()))?;
                let target = &config.metrics[family];
                Some((pricing, target, family))
            },
            None => None,
        };

        for (metric, def) in config.metrics.iter().enumerate() {
            // Priced counters only move with their source
            if matches!(pricing, Some((p, _, _)) if p.metric == def.name) {
                continue;
            }

            let family = self
                .registry
                .family_index(&def.name)
                .ok_or_else(|| SimError::UnknownMetric(def.name.clone()))?;
            let combinations = label_combinations(def);
            let baseline = Baseline {
                drift: def.drift,
                volatility: def.volatility,
                bounds: def.process_bounds(),
            };

            let first_slot = self.gauge_slots.len();
            for actor in self.population.actors() {
                let pooled = &combinations[actor.index % combinations.len()];
                let labels = assign_labels(def, actor, pooled);

                let gauge_slot = (def.kind == MetricKind::Gauge).then(|| {
                    match self.gauge_slots[first_slot..]
                        .iter()
                        .position(|(_, l)| *l == labels)
                    {
                        Some(offset) => first_slot + offset,
                        None => {
                            self.gauge_slots.push((family, labels.clone()));
                            self.gauge_slots.len() - 1
                        },
                    }
                });

                let priced = pricing
                    .filter(|(p, _, _)| p.source == def.name)
                    .and_then(|(p, target, family)| price(p, target, family, def, &labels));

                self.tracks.push(Track {
                    actor: actor.index,
                    metric,
                    family,
                    labels,
                    baseline,
                    value: def.initial,
                    gauge_slot,
                    priced,
                });
            }
        }

        self.gauge_sums = vec![0.0; self.gauge_slots.len()];
        Ok(())
    }

    /// Advance simulated time by one step and update every instrument.
    ///
    /// Errors from individual observations are logged and counted; the tick
    /// always completes.
    pub fn tick(&mut self, now_ms: i64) {
        self.monitor.begin_tick();

        let elapsed = self.scenario.elapsed() + self.dt;
        self.scenario.advance(elapsed);
        self.monitor.record_skipped(self.scenario.skipped());

        let seasonal = self.seasonality.factor(self.clock());
        let burst = self.bursts.factor(self.scenario.elapsed());
        let actors = self.population.actors();
        self.gauge_sums.iter_mut().for_each(|sum| *sum = 0.0);

        for track in &mut self.tracks {
            let def = &self.config.metrics[track.metric];
            let actor = &actors[track.actor];
            let modulation = Modulation {
                burst,
                ..self.scenario.modulation(def, &track.labels)
            };
            let params = track.baseline.effective(
                actor.activity,
                actor.volatility,
                seasonal,
                &modulation,
                self.dt,
            );
            track.value = generator::step(track.value, &params, &mut self.rng);

            let observed = match (def.kind, track.gauge_slot) {
                (MetricKind::Counter, _) => {
                    let delta = track.value * self.dt;
                    let priced = match &track.priced {
                        Some(p) => self.registry.observe_resolved(
                            p.family,
                            &p.labels,
                            delta * p.unit_price,
                            now_ms,
                        ),
                        None => Ok(()),
                    };
                    self.registry
                        .observe_resolved(track.family, &track.labels, delta, now_ms)
                        .and(priced)
                },
                (MetricKind::Gauge, Some(slot)) => {
                    self.gauge_sums[slot] += track.value;
                    Ok(())
                },
                (MetricKind::Gauge, None) | (MetricKind::Histogram, _) => {
                    self.registry
                        .observe_resolved(track.family, &track.labels, track.value, now_ms)
                },
            };

            if let Err(e) = observed {
                error!("Tick {}: {}", self.generation + 1, e);
                self.monitor.record_error(&e);
            }
        }

        for ((family, labels), sum) in self.gauge_slots.iter().zip(&self.gauge_sums) {
            if let Err(e) = self.registry.observe_resolved(*family, labels, *sum, now_ms) {
                error!("Tick {}: {}", self.generation + 1, e);
                self.monitor.record_error(&e);
            }
        }

        self.generation += 1;
        self.monitor.end_tick();

        debug!(
            "Tick {} at {:.0}s simulated, {} instances",
            self.generation,
            self.scenario.elapsed(),
            self.registry.instance_count()
        );
    }

    /// Evaluate scenario assertions against the current state.
    pub fn finish(&mut self, now_ms: i64) {
        let snapshot = self.registry.snapshot(self.generation, now_ms);
        let results = self.scenario.finish(&snapshot);
        let passed = results.iter().filter(|r| r.passed).count();
        if !results.is_empty() {
            info!("Scenario '{}': {}/{} assertions passed", self.scenario_name, passed, results.len());
        }
    }

    /// Replace the simulation with one built from `config`, keeping the
    /// scenario selection, monitoring counters and generation.
    pub fn reload(&mut self, config: Config) -> Result<()> {
        let mut next = Simulator::new(
            Arc::new(config),
            &self.scenario_name,
            self.duration_override,
        )?;
        std::mem::swap(&mut next.monitor, &mut self.monitor);
        next.monitor.set_tick_interval(next.config.simulation.tick_interval);
        next.monitor.record_reload();
        next.generation = self.generation;
        *self = next;
        info!("Simulation rebuilt from reloaded configuration");
        Ok(())
    }

    /// Immutable frame of the current state
    pub fn frame(&self, state: RunState, now: DateTime<Utc>) -> Frame {
        let published = (self.generation > 0).then_some(now);
        Frame {
            snapshot: self.registry.snapshot(self.generation, now.timestamp_millis()),
            status: RunStatus {
                state,
                health: self.monitor.health(),
                scenario: self.scenario.status(),
                seed: self.seed,
                actors: self.population.len(),
                segments: self.population.segment_counts().to_vec(),
                simulated_time: self.clock(),
                last_update: published,
                stats: self.monitor.stats().clone(),
            },
            config: Arc::clone(&self.config),
        }
    }

    /// Simulated wall clock
    pub fn clock(&self) -> DateTime<Utc> {
        let millis = (self.scenario.elapsed() * 1000.0).round() as i64;
        self.start + chrono::Duration::milliseconds(millis)
    }

    pub fn is_complete(&self) -> bool {
        self.scenario.is_complete()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn tick_interval(&self) -> Duration {
        self.config.simulation.tick_interval
    }

    pub fn population(&self) -> &Population {
        &self.population
    }

    pub fn scenario(&self) -> &ScenarioEngine {
        &self.scenario
    }

    pub fn registry(&self) -> &MetricRegistry {
        &self.registry
    }
}

/// Cartesian product of the pooled label values in schema order, capped at
/// [`MAX_LABEL_COMBINATIONS`].
pub fn label_combinations(def: &MetricDefinition) -> Vec<Vec<String>> {
    let mut combinations: Vec<Vec<String>> = vec![Vec::new()];

    for label in def
        .labels
        .iter()
        .filter(|l| !ACTOR_LABELS.contains(&l.as_str()))
    {
        let pool = def.label_values.get(label).map(Vec::as_slice).unwrap_or_default();
        combinations = combinations
            .into_iter()
            .flat_map(|prefix| {
                pool.iter().map(move |value| {
                    let mut combination = prefix.clone();
                    combination.push(value.clone());
                    combination
                })
            })
            .take(MAX_LABEL_COMBINATIONS)
            .collect();
    }

    if combinations.is_empty() {
        combinations.push(Vec::new());
    }
    combinations
}

/// Cost instance and unit price for one instance of the priced source
fn price(
    pricing: &PricingConfig,
    target: &MetricDefinition,
    family: usize,
    source: &MetricDefinition,
    labels: &LabelValues,
) -> Option<Priced> {
    let value_of = |key: &str| {
        labels
            .pairs(&source.labels)
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    };

    let model = value_of(&pricing.model_label)?;
    let token_type = value_of(&pricing.token_label)?;
    let values = target
        .labels
        .iter()
        .map(|label| value_of(label).map(str::to_string))
        .collect::<Option<Vec<_>>>()?;

    Some(Priced {
        family,
        labels: LabelValues(values),
        unit_price: pricing.unit_price(model, token_type),
    })
}

fn assign_labels(def: &MetricDefinition, actor: &Actor, pooled: &[String]) -> LabelValues {
    let mut pooled = pooled.iter();
    LabelValues(
        def.labels
            .iter()
            .map(|label| match label.as_str() {
                "user_id" => actor.id.clone(),
                "user_type" => actor.segment.clone(),
                _ => pooled.next().cloned().unwrap_or_default(),
            })
            .collect(),
    )
}
