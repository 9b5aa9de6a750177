//! Metric definitions and label handling.

use crate::core::{Result, SimError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Labels filled from the actor rather than from a value pool
pub const ACTOR_LABELS: [&str; 2] = ["user_id", "user_type"];

/// Instrument kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Monotonically increasing total
    Counter,
    /// Point-in-time value, overwritten each tick
    Gauge,
    /// Cumulative bucket counts plus sum and count
    Histogram,
}

impl MetricKind {
    /// Name used on the `# TYPE` line
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

/// What scenario faults do to a metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricRole {
    #[default]
    General,
    /// Drift is biased upward while a fault is active
    Errors,
}

/// Closed value range `[min, max]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Clamp without panicking on inverted or NaN input
    #[inline]
    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.min).min(self.max)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Scale the upper bound down by `factor`, never below `min`
    pub fn with_ceiling(&self, factor: f64) -> Self {
        if factor >= 1.0 {
            return *self;
        }
        Self {
            min: self.min,
            max: (self.max * factor).max(self.min),
        }
    }

    fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min <= self.max
    }
}

impl From<[f64; 2]> for Bounds {
    fn from(pair: [f64; 2]) -> Self {
        Self::new(pair[0], pair[1])
    }
}

impl From<Bounds> for [f64; 2] {
    fn from(bounds: Bounds) -> Self {
        [bounds.min, bounds.max]
    }
}

/// Static description of one metric, loaded once from configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub name: String,
    pub kind: MetricKind,
    #[serde(default)]
    pub help: String,
    /// Ordered label schema
    #[serde(default)]
    pub labels: Vec<String>,
    /// Value pools for labels not filled from the actor
    #[serde(default)]
    pub label_values: BTreeMap<String, Vec<String>>,
    /// Range of the exposed value
    pub bounds: Bounds,
    /// Range of a counter's per-second rate, defaults to `[0, bounds.max]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_bounds: Option<Bounds>,
    /// Starting value of the process (a rate for counters)
    #[serde(default)]
    pub initial: f64,
    #[serde(default)]
    pub drift: f64,
    #[serde(default)]
    pub volatility: f64,
    /// Histogram bucket upper bounds, strictly increasing
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buckets: Vec<f64>,
    #[serde(default)]
    pub role: MetricRole,
}

impl MetricDefinition {
    /// Range of the value the stochastic process produces
    pub fn process_bounds(&self) -> Bounds {
        match self.kind {
            MetricKind::Counter => self
                .rate_bounds
                .unwrap_or_else(|| Bounds::new(0.0, self.bounds.max)),
            MetricKind::Gauge | MetricKind::Histogram => self.bounds,
        }
    }

    /// Validate a single definition
    pub fn validate(&self) -> Result<()> {
        if !is_valid_metric_name(&self.name) {
            return Err(SimError::config(format!("invalid metric name '{}'", self.name)));
        }

        if !self.bounds.is_valid() {
            return Err(SimError::InvalidBounds {
                metric: self.name.clone(),
                min: self.bounds.min,
                max: self.bounds.max,
            });
        }

        match self.kind {
            MetricKind::Counter => {
                if self.bounds.min < 0.0 {
                    return Err(SimError::config(format!(
                        "counter '{}' must have a non-negative lower bound",
                        self.name
                    )));
                }
                if let Some(rate) = self.rate_bounds {
                    if !rate.is_valid() || rate.min < 0.0 {
                        return Err(SimError::InvalidBounds {
                            metric: format!("{} (rate)", self.name),
                            min: rate.min,
                            max: rate.max,
                        });
                    }
                }
            },
            MetricKind::Gauge | MetricKind::Histogram => {
                if self.rate_bounds.is_some() {
                    return Err(SimError::config(format!(
                        "rate_bounds only apply to counters ('{}')",
                        self.name
                    )));
                }
            },
        }

        if !self.process_bounds().contains(self.initial) {
            return Err(SimError::config(format!(
                "initial value {} of '{}' lies outside its bounds",
                self.initial, self.name
            )));
        }

        if !self.drift.is_finite() || !self.volatility.is_finite() || self.volatility < 0.0 {
            return Err(SimError::config(format!(
                "'{}' needs a finite drift and a non-negative volatility",
                self.name
            )));
        }

        self.validate_buckets()?;
        self.validate_labels()
    }

    fn validate_buckets(&self) -> Result<()> {
        if self.kind != MetricKind::Histogram {
            if !self.buckets.is_empty() {
                return Err(SimError::config(format!(
                    "buckets only apply to histograms ('{}')",
                    self.name
                )));
            }
            return Ok(());
        }

        if self.buckets.is_empty() {
            return Err(SimError::config(format!("histogram '{}' has no buckets", self.name)));
        }

        let increasing = self.buckets.windows(2).all(|w| w[0] < w[1]);
        if !increasing || self.buckets.iter().any(|b| !b.is_finite()) {
            return Err(SimError::config(format!(
                "histogram '{}' buckets must be finite and strictly increasing",
                self.name
            )));
        }

        Ok(())
    }

    fn validate_labels(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for label in &self.labels {
            if !is_valid_label_name(label) || label.starts_with("__") {
                return Err(SimError::config(format!(
                    "invalid label name '{}' on '{}'",
                    label, self.name
                )));
            }
            if self.kind == MetricKind::Histogram && label == "le" {
                return Err(SimError::config(format!(
                    "histogram '{}' may not declare the reserved label 'le'",
                    self.name
                )));
            }
            if !seen.insert(label.as_str()) {
                return Err(SimError::config(format!(
                    "duplicate label '{}' on '{}'",
                    label, self.name
                )));
            }

            let is_actor_label = ACTOR_LABELS.contains(&label.as_str());
            match self.label_values.get(label) {
                Some(pool) if pool.is_empty() => {
                    return Err(SimError::config(format!(
                        "label '{}' on '{}' has an empty value pool",
                        label, self.name
                    )));
                },
                Some(_) if is_actor_label => {
                    return Err(SimError::config(format!(
                        "label '{}' on '{}' is filled from the actor and takes no value pool",
                        label, self.name
                    )));
                },
                None if !is_actor_label => {
                    return Err(SimError::config(format!(
                        "label '{}' on '{}' needs a value pool",
                        label, self.name
                    )));
                },
                _ => {},
            }
        }

        if let Some(extra) = self.label_values.keys().find(|k| !seen.contains(k.as_str())) {
            return Err(SimError::config(format!(
                "value pool '{}' on '{}' is not in the label schema",
                extra, self.name
            )));
        }

        Ok(())
    }

    /// Resolve `pairs` against the label schema.
    ///
    /// Every schema label must appear exactly once; order does not matter.
    pub fn resolve_labels(&self, pairs: &[(&str, &str)]) -> Result<LabelValues> {
        let mismatch = || SimError::LabelMismatch {
            metric: self.name.clone(),
            expected: self.labels.join(","),
            got: pairs.iter().map(|(k, _)| *k).collect::<Vec<_>>().join(","),
        };

        if pairs.len() != self.labels.len() {
            return Err(mismatch());
        }

        let mut values = Vec::with_capacity(self.labels.len());
        for key in &self.labels {
            let mut matches = pairs.iter().filter(|(k, _)| *k == key.as_str());
            match (matches.next(), matches.next()) {
                (Some((_, value)), None) => values.push((*value).to_string()),
                _ => return Err(mismatch()),
            }
        }

        Ok(LabelValues(values))
    }
}

/// Label values in schema order
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LabelValues(pub Vec<String>);

impl LabelValues {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Pair the values with their schema keys
    pub fn pairs<'a>(&'a self, schema: &'a [String]) -> impl Iterator<Item = (&'a str, &'a str)> {
        schema
            .iter()
            .map(String::as_str)
            .zip(self.0.iter().map(String::as_str))
    }
}

impl fmt::Display for LabelValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(","))
    }
}

/// `[a-zA-Z_:][a-zA-Z0-9_:]*`
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// `[a-zA-Z_][a-zA-Z0-9_]*`
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
