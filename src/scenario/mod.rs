//! Scenario timelines and fault injection.
//!
//! A scenario is a named, time-bounded script of events applied to the
//! simulation as simulated time passes. Configuration types here are the raw
//! serde shapes; [`EventKind`] is the closed form the engine works with.

pub mod assertion;
pub mod engine;
pub mod event;

pub use assertion::{parse_condition, Assertion, AssertionResult, Comparison, Condition};
pub use engine::{FaultStatus, ScenarioEngine, ScenarioStatus};
pub use event::EventKind;

use crate::core::{Result, SimError};
use crate::metrics::{LabelValues, MetricDefinition, MetricKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// One named scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    #[serde(default)]
    pub description: String,
    /// Total simulated run time
    #[serde(
        serialize_with = "humantime_serde::serialize",
        deserialize_with = "offset::deserialize"
    )]
    pub duration: Duration,
    /// Events in configuration order
    #[serde(default)]
    pub timeline: Vec<TimelineEventConfig>,
    /// Checks evaluated against the final snapshot
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assertions: Vec<AssertionConfig>,
}

impl ScenarioConfig {
    /// Validate offsets, parameters, selectors and assertions against the
    /// metric definitions. Unknown event kinds pass; they are skipped at run
    /// time.
    pub fn validate(&self, name: &str, metrics: &[MetricDefinition]) -> Result<()> {
        if self.duration.is_zero() {
            return Err(SimError::config(format!("scenario '{}' has a zero duration", name)));
        }

        for (idx, event) in self.timeline.iter().enumerate() {
            let fail = |msg: String| {
                SimError::config(format!("scenario '{}' event #{} ({}): {}", name, idx, event.event, msg))
            };

            if event.at > self.duration {
                return Err(fail(format!(
                    "offset {}s lies beyond the scenario duration {}s",
                    event.at.as_secs_f64(),
                    self.duration.as_secs_f64()
                )));
            }

            match EventKind::from(event) {
                EventKind::IncreaseLoad { multiplier, selector }
                | EventKind::BurstLoad {
                    multiplier,
                    selector,
                    ..
                } => {
                    if !multiplier.is_finite() || multiplier < 0.0 {
                        return Err(fail(format!("multiplier must be >= 0, got {}", multiplier)));
                    }
                    if let Some(selector) = selector {
                        selector.validate(metrics).map_err(fail)?;
                    }
                },
                EventKind::InjectFailure { fault, severity, selector } => {
                    if fault.is_empty() {
                        return Err(fail("inject_failure needs a fault tag".to_string()));
                    }
                    if !(0.0..=1.0).contains(&severity) {
                        return Err(fail(format!("severity must lie within [0, 1], got {}", severity)));
                    }
                    if let Some(selector) = selector {
                        selector.validate(metrics).map_err(fail)?;
                    }
                },
                EventKind::Recovery { .. } | EventKind::Unknown { .. } => {},
            }
        }

        for assertion in &self.assertions {
            Assertion::from_config(assertion, metrics).map_err(|e| {
                SimError::config(format!("scenario '{}' assertion on '{}': {}", name, assertion.metric, e))
            })?;
        }

        Ok(())
    }
}

/// Raw timeline entry as written in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEventConfig {
    /// Offset from scenario start in simulated time
    #[serde(
        alias = "time",
        serialize_with = "humantime_serde::serialize",
        deserialize_with = "offset::deserialize"
    )]
    pub at: Duration,
    /// Event kind, e.g. `increase_load`
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<f64>,
    /// Lifetime of a `burst_load`
    #[serde(
        default,
        serialize_with = "humantime_serde::serialize",
        deserialize_with = "offset::deserialize_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration: Option<Duration>,
    /// Fault tag for `inject_failure` and `recovery`
    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
    /// Scales the fault profile, 0.0 to 1.0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<Selector>,
}

impl TimelineEventConfig {
    fn bare(at: Duration, event: &str) -> Self {
        Self {
            at,
            event: event.to_string(),
            multiplier: None,
            duration: None,
            fault: None,
            severity: None,
            selector: None,
        }
    }

    pub fn increase_load(at: Duration, multiplier: f64) -> Self {
        Self {
            multiplier: Some(multiplier),
            ..Self::bare(at, event::INCREASE_LOAD)
        }
    }

    pub fn burst_load(at: Duration, multiplier: f64, duration: Duration) -> Self {
        Self {
            multiplier: Some(multiplier),
            duration: Some(duration),
            ..Self::bare(at, event::BURST_LOAD)
        }
    }

    pub fn inject_failure(at: Duration, fault: &str, severity: f64, selector: Option<Selector>) -> Self {
        Self {
            fault: Some(fault.to_string()),
            severity: Some(severity),
            selector,
            ..Self::bare(at, event::INJECT_FAILURE)
        }
    }

    pub fn recovery(at: Duration, fault: Option<String>) -> Self {
        Self {
            fault,
            ..Self::bare(at, event::RECOVERY)
        }
    }

    /// An entry with an arbitrary kind name
    pub fn custom(at: Duration, event: &str) -> Self {
        Self::bare(at, event)
    }
}

/// Scenario times written either as seconds (`600`, `1.5`) or as humantime
/// strings (`10m`, `1h 30m`)
mod offset {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(f64),
        Text(String),
    }

    fn seconds<E: Error>(secs: f64) -> Result<Duration, E> {
        if !secs.is_finite() || secs < 0.0 {
            return Err(E::custom(format!("time must be a non-negative number of seconds, got {}", secs)));
        }
        Ok(Duration::from_secs_f64(secs))
    }

    fn parse<E: Error>(raw: Raw) -> Result<Duration, E> {
        match raw {
            Raw::Seconds(secs) => seconds(secs),
            Raw::Text(text) => match text.trim().parse::<f64>() {
                Ok(secs) => seconds(secs),
                Err(_) => humantime::parse_duration(text.trim())
                    .map_err(|e| E::custom(format!("invalid time '{}': {}", text, e))),
            },
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        parse(Raw::deserialize(deserializer)?)
    }

    pub fn deserialize_option<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<Raw>::deserialize(deserializer)?.map(parse).transpose()
    }
}

/// Restricts an event to one metric and/or a subset of its label values
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Selector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
    /// Required label values; every entry must match
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl Selector {
    pub fn metric(name: &str) -> Self {
        Self {
            metric: Some(name.to_string()),
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    /// True when the instance identified by `def` and `labels` is selected
    pub fn matches(&self, def: &MetricDefinition, labels: &LabelValues) -> bool {
        if matches!(&self.metric, Some(name) if *name != def.name) {
            return false;
        }
        self.labels.iter().all(|(key, value)| {
            labels
                .pairs(&def.labels)
                .any(|(k, v)| k == key.as_str() && v == value.as_str())
        })
    }

    fn validate(&self, metrics: &[MetricDefinition]) -> std::result::Result<(), String> {
        let candidates: Vec<&MetricDefinition> = match &self.metric {
            Some(name) => match metrics.iter().find(|m| &m.name == name) {
                Some(def) => vec![def],
                None => return Err(format!("selector names unknown metric '{}'", name)),
            },
            None => metrics.iter().collect(),
        };

        for key in self.labels.keys() {
            if !candidates.iter().any(|def| def.labels.iter().any(|l| l == key)) {
                return Err(format!("selector label '{}' is not in any selected schema", key));
            }
        }
        Ok(())
    }
}

/// Raw pass/fail check, e.g. `{ metric: errors_total, condition: "< 5" }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionConfig {
    /// Metric name; histogram parts use `_sum` / `_count` suffixes
    pub metric: String,
    pub condition: String,
}

impl AssertionConfig {
    pub fn new(metric: &str, condition: &str) -> Self {
        Self {
            metric: metric.to_string(),
            condition: condition.to_string(),
        }
    }
}

/// Whether `series` names a metric or a histogram part in `metrics`
pub(crate) fn series_exists(series: &str, metrics: &[MetricDefinition]) -> bool {
    if metrics.iter().any(|m| m.name == series) {
        return true;
    }
    ["_sum", "_count"].iter().any(|suffix| {
        series
            .strip_suffix(suffix)
            .map(|base| {
                metrics
                    .iter()
                    .any(|m| m.name == base && m.kind == MetricKind::Histogram)
            })
            .unwrap_or(false)
    })
}
