//! Scenario state machine over simulated elapsed time.
//!
//! The engine is owned by the tick loop. Each tick calls [`ScenarioEngine::advance`]
//! with the new elapsed time, then asks for the [`Modulation`] of every
//! process it is about to step.

use crate::core::config::{Config, FaultProfile};
use crate::core::Result;
use crate::generator::Modulation;
use crate::metrics::{LabelValues, MetricDefinition, MetricRole, Snapshot};
use crate::scenario::{Assertion, AssertionResult, EventKind, ScenarioConfig, Selector};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
struct TimedEvent {
    at: f64,
    kind: EventKind,
}

#[derive(Debug, Clone)]
struct LoadRule {
    selector: Option<Selector>,
    multiplier: f64,
    /// Set for bursts
    expires_at: Option<f64>,
}

impl LoadRule {
    fn applies(&self, def: &MetricDefinition, labels: &LabelValues) -> bool {
        self.selector.as_ref().map_or(true, |s| s.matches(def, labels))
    }
}

#[derive(Debug, Clone)]
struct ActiveFault {
    tag: String,
    severity: f64,
    selector: Option<Selector>,
    effect: FaultProfile,
    since: f64,
}

/// Publicly visible state of an active fault
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaultStatus {
    pub fault: String,
    pub severity: f64,
    pub since_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<Selector>,
}

/// Snapshot of scenario progress, published with every frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioStatus {
    pub name: String,
    pub elapsed_secs: f64,
    pub duration_secs: f64,
    pub events_applied: usize,
    pub events_total: usize,
    pub events_skipped: u64,
    /// Product of the load rules that apply to every process
    pub load_multiplier: f64,
    pub active_faults: Vec<FaultStatus>,
    pub completed: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub assertions: Vec<AssertionResult>,
}

/// Timeline cursor plus the modulation state events leave behind
#[derive(Debug, Clone)]
pub struct ScenarioEngine {
    name: String,
    duration: f64,
    events: Vec<TimedEvent>,
    next: usize,
    elapsed: f64,
    loads: Vec<LoadRule>,
    faults: Vec<ActiveFault>,
    profiles: BTreeMap<String, FaultProfile>,
    assertions: Vec<Assertion>,
    results: Vec<AssertionResult>,
    skipped: u64,
}

impl ScenarioEngine {
    /// Build the engine for scenario `name` of a validated configuration.
    ///
    /// `duration` overrides the scenario's own length.
    pub fn from_config(config: &Config, name: &str, duration: Option<Duration>) -> Result<Self> {
        let scenario = config.scenario(name)?;
        let mut engine = Self::new(name, scenario, &config.faults, &config.metrics)?;
        if let Some(duration) = duration {
            engine.duration = duration.as_secs_f64();
        }
        Ok(engine)
    }

    pub fn new(
        name: &str,
        scenario: &ScenarioConfig,
        profiles: &BTreeMap<String, FaultProfile>,
        metrics: &[MetricDefinition],
    ) -> Result<Self> {
        let mut events: Vec<TimedEvent> = scenario
            .timeline
            .iter()
            .map(|raw| TimedEvent {
                at: raw.at.as_secs_f64(),
                kind: EventKind::from(raw),
            })
            .collect();
        // Stable: equal offsets keep configuration order
        events.sort_by(|a, b| a.at.total_cmp(&b.at));

        let assertions = scenario
            .assertions
            .iter()
            .map(|a| Assertion::from_config(a, metrics))
            .collect::<Result<Vec<_>>>()?;

        info!("Loaded scenario '{}' with {} events", name, events.len());

        Ok(Self {
            name: name.to_string(),
            duration: scenario.duration.as_secs_f64(),
            events,
            next: 0,
            elapsed: 0.0,
            loads: Vec::new(),
            faults: Vec::new(),
            profiles: profiles.clone(),
            assertions,
            results: Vec::new(),
            skipped: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Unknown events skipped so far
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// True once simulated time has reached the scenario duration
    pub fn is_complete(&self) -> bool {
        self.elapsed >= self.duration
    }

    /// Move simulated time to `elapsed` and apply every event it crosses.
    ///
    /// Returns the number of events consumed, skipped ones included. Time
    /// never moves backwards.
    pub fn advance(&mut self, elapsed: f64) -> usize {
        self.elapsed = self.elapsed.max(elapsed.min(self.duration));

        let now = self.elapsed;
        self.loads.retain(|rule| rule.expires_at.map_or(true, |t| now < t));

        let start = self.next;
        while let Some(event) = self.events.get(self.next) {
            if event.at > now {
                break;
            }
            let event = event.clone();
            self.next += 1;
            self.apply(&event);
        }

        self.next - start
    }

    fn apply(&mut self, event: &TimedEvent) {
        let now = self.elapsed;
        match &event.kind {
            EventKind::IncreaseLoad { multiplier, selector } => {
                info!(
                    "Executing event: {} x{} at {}s (scheduled {}s)",
                    event.kind.name(),
                    multiplier,
                    now,
                    event.at
                );
                self.loads
                    .retain(|rule| rule.expires_at.is_some() || rule.selector != *selector);
                self.loads.push(LoadRule {
                    selector: selector.clone(),
                    multiplier: *multiplier,
                    expires_at: None,
                });
            },
            EventKind::BurstLoad {
                multiplier,
                duration,
                selector,
            } => {
                let expires_at = event.at + duration.as_secs_f64();
                info!(
                    "Executing event: {} x{} until {}s",
                    event.kind.name(),
                    multiplier,
                    expires_at
                );
                if now < expires_at {
                    self.loads.push(LoadRule {
                        selector: selector.clone(),
                        multiplier: *multiplier,
                        expires_at: Some(expires_at),
                    });
                }
            },
            EventKind::InjectFailure {
                fault,
                severity,
                selector,
            } => {
                let profile = self.profiles.get(fault).copied().unwrap_or_default();
                info!(
                    "Executing event: {} '{}' severity {} at {}s",
                    event.kind.name(),
                    fault,
                    severity,
                    now
                );
                self.faults.retain(|f| f.tag != *fault);
                self.faults.push(ActiveFault {
                    tag: fault.clone(),
                    severity: *severity,
                    selector: selector.clone(),
                    effect: scale(profile, *severity),
                    since: now,
                });
            },
            EventKind::Recovery { fault } => {
                match fault {
                    Some(tag) => {
                        let before = self.faults.len();
                        self.faults.retain(|f| f.tag != *tag);
                        if self.faults.len() == before {
                            warn!("Recovery for fault '{}' which is not active", tag);
                        }
                    },
                    None => self.faults.clear(),
                }
                self.loads.clear();
                info!(
                    "Executing event: {} at {}s, {} fault(s) still active",
                    event.kind.name(),
                    now,
                    self.faults.len()
                );
            },
            EventKind::Unknown { name } => {
                self.skipped += 1;
                warn!("Skipping unknown scenario event '{}' at {}s", name, event.at);
            },
        }
    }

    /// Scenario adjustments for one process.
    ///
    /// Load rules multiply together. Every active fault biases the drift of
    /// error metrics; faults scale volatility on the processes they select
    /// (all processes without a selector) and lower the ceiling only on an
    /// explicit selector match.
    pub fn modulation(&self, def: &MetricDefinition, labels: &LabelValues) -> Modulation {
        let mut modulation = Modulation {
            load: self.load_multiplier(def, labels),
            ..Modulation::default()
        };

        for fault in &self.faults {
            let is_errors = def.role == MetricRole::Errors;
            if is_errors {
                modulation.drift_bias += fault.effect.error_drift_bias;
            }

            let selected = fault.selector.as_ref().map(|s| s.matches(def, labels));
            if is_errors || selected.unwrap_or(true) {
                modulation.volatility_multiplier *= fault.effect.volatility_multiplier;
            }
            if selected == Some(true) {
                modulation.ceiling_factor = modulation.ceiling_factor.min(fault.effect.ceiling_factor);
            }
        }

        modulation
    }

    /// Combined load multiplier in force for one process
    pub fn load_multiplier(&self, def: &MetricDefinition, labels: &LabelValues) -> f64 {
        self.loads
            .iter()
            .filter(|rule| rule.applies(def, labels))
            .map(|rule| rule.multiplier)
            .product()
    }

    /// Load multiplier shared by every process
    pub fn global_load(&self) -> f64 {
        self.loads
            .iter()
            .filter(|rule| rule.selector.is_none())
            .map(|rule| rule.multiplier)
            .product()
    }

    pub fn active_faults(&self) -> Vec<FaultStatus> {
        self.faults
            .iter()
            .map(|f| FaultStatus {
                fault: f.tag.clone(),
                severity: f.severity,
                since_secs: f.since,
                selector: f.selector.clone(),
            })
            .collect()
    }

    /// Evaluate the assertions against the final snapshot and keep the
    /// results for later status reports.
    pub fn finish(&mut self, snapshot: &Snapshot) -> &[AssertionResult] {
        self.results = self.assertions.iter().map(|a| a.evaluate(snapshot)).collect();

        for result in &self.results {
            match (result.passed, result.observed) {
                (true, Some(v)) => info!("Assertion passed: {} {} (observed {})", result.metric, result.condition, v),
                (false, Some(v)) => warn!("Assertion failed: {} {} (observed {})", result.metric, result.condition, v),
                (_, None) => warn!("Assertion failed: {} has no value", result.metric),
            }
        }

        &self.results
    }

    pub fn status(&self) -> ScenarioStatus {
        ScenarioStatus {
            name: self.name.clone(),
            elapsed_secs: self.elapsed,
            duration_secs: self.duration,
            events_applied: self.next,
            events_total: self.events.len(),
            events_skipped: self.skipped,
            load_multiplier: self.global_load(),
            active_faults: self.active_faults(),
            completed: self.is_complete(),
            assertions: self.results.clone(),
        }
    }
}

/// Scale a profile by severity; severity 1.0 applies it in full.
fn scale(profile: FaultProfile, severity: f64) -> FaultProfile {
    FaultProfile {
        error_drift_bias: profile.error_drift_bias * severity,
        volatility_multiplier: 1.0 + (profile.volatility_multiplier - 1.0) * severity,
        ceiling_factor: (1.0 - (1.0 - profile.ceiling_factor) * severity).clamp(0.0, 1.0),
    }
}
