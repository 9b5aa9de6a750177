//! Instrument state, owned by the tick loop.
//!
//! Instances are created lazily on first observation. Readers never see this
//! structure; they get a [`Snapshot`] copy.

use crate::core::{Result, SimError};
use crate::metrics::snapshot::{FamilySnapshot, Sample, Snapshot};
use crate::metrics::types::{LabelValues, MetricDefinition, MetricKind};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Current state of one label combination
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InstanceValue {
    /// Counter total or gauge value
    Scalar(f64),
    /// Cumulative bucket counts, one per configured boundary
    Histogram { buckets: Vec<u64>, sum: f64, count: u64 },
}

impl InstanceValue {
    /// Scalar value, or the observation count for histograms
    pub fn as_f64(&self) -> f64 {
        match self {
            InstanceValue::Scalar(v) => *v,
            InstanceValue::Histogram { count, .. } => *count as f64,
        }
    }
}

#[derive(Debug, Clone)]
struct Instance {
    value: InstanceValue,
    updated_ms: i64,
}

#[derive(Debug)]
struct Family {
    definition: Arc<MetricDefinition>,
    instances: BTreeMap<LabelValues, Instance>,
}

/// Registry of every metric family and its instances
#[derive(Debug)]
pub struct MetricRegistry {
    families: Vec<Family>,
    index: HashMap<String, usize>,
}

impl MetricRegistry {
    /// Create an empty registry for validated definitions
    pub fn new(definitions: &[MetricDefinition]) -> Self {
        let families: Vec<Family> = definitions
            .iter()
            .map(|d| Family {
                definition: Arc::new(d.clone()),
                instances: BTreeMap::new(),
            })
            .collect();

        let index = families
            .iter()
            .enumerate()
            .map(|(i, f)| (f.definition.name.clone(), i))
            .collect();

        Self { families, index }
    }

    /// Position of a family, used by the tick loop to skip name lookups
    pub fn family_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Apply a generated value with the semantics of the definition's kind.
    ///
    /// Fails when the definition is not registered or `labels` do not match
    /// its schema.
    pub fn observe(
        &mut self,
        definition: &MetricDefinition,
        labels: &[(&str, &str)],
        value: f64,
        now_ms: i64,
    ) -> Result<()> {
        let idx = self
            .family_index(&definition.name)
            .ok_or_else(|| SimError::UnknownMetric(definition.name.clone()))?;
        let values = self.families[idx].definition.resolve_labels(labels)?;
        self.observe_resolved(idx, &values, value, now_ms)
    }

    /// Apply a value to an already-resolved label set.
    pub fn observe_resolved(
        &mut self,
        family: usize,
        labels: &LabelValues,
        value: f64,
        now_ms: i64,
    ) -> Result<()> {
        let family = self
            .families
            .get_mut(family)
            .ok_or_else(|| SimError::UnknownMetric(format!("family #{}", family)))?;
        let def = &family.definition;

        if labels.as_slice().len() != def.labels.len() {
            return Err(SimError::LabelMismatch {
                metric: def.name.clone(),
                expected: def.labels.join(","),
                got: labels.to_string(),
            });
        }

        if def.kind == MetricKind::Counter && !(value >= 0.0) {
            return Err(SimError::NegativeCounterDelta {
                metric: def.name.clone(),
                delta: value,
            });
        }

        if value.is_nan() {
            return Err(SimError::render(format!("NaN observation for '{}'", def.name)));
        }

        let instance = family
            .instances
            .entry(labels.clone())
            .or_insert_with(|| Instance {
                value: initial_value(def),
                updated_ms: now_ms,
            });

        match (&mut instance.value, def.kind) {
            (InstanceValue::Scalar(total), MetricKind::Counter) => {
                *total = (*total + value).min(def.bounds.max);
            },
            (InstanceValue::Scalar(current), MetricKind::Gauge) => {
                *current = def.bounds.clamp(value);
            },
            (InstanceValue::Histogram { buckets, sum, count }, MetricKind::Histogram) => {
                let observation = def.bounds.clamp(value);
                for (bucket, boundary) in buckets.iter_mut().zip(&def.buckets) {
                    if observation <= *boundary {
                        *bucket += 1;
                    }
                }
                *count += 1;
                *sum += observation;
            },
            _ => unreachable!("instance state always matches its definition kind"),
        }
        instance.updated_ms = now_ms;

        Ok(())
    }

    /// Current value of one instance
    pub fn value(&self, name: &str, labels: &LabelValues) -> Option<&InstanceValue> {
        let idx = self.family_index(name)?;
        self.families[idx].instances.get(labels).map(|i| &i.value)
    }

    /// Number of live instances across all families
    pub fn instance_count(&self) -> usize {
        self.families.iter().map(|f| f.instances.len()).sum()
    }

    /// Immutable copy of all instance state
    pub fn snapshot(&self, generation: u64, timestamp_ms: i64) -> Snapshot {
        let families = self
            .families
            .iter()
            .map(|family| FamilySnapshot {
                definition: Arc::clone(&family.definition),
                samples: family
                    .instances
                    .iter()
                    .map(|(labels, instance)| Sample {
                        labels: labels.clone(),
                        value: instance.value.clone(),
                        updated_ms: instance.updated_ms,
                    })
                    .collect(),
            })
            .collect();

        Snapshot {
            generation,
            timestamp_ms,
            families,
        }
    }
}

fn initial_value(def: &MetricDefinition) -> InstanceValue {
    match def.kind {
        MetricKind::Counter => InstanceValue::Scalar(def.bounds.min),
        MetricKind::Gauge => InstanceValue::Scalar(def.bounds.clamp(def.initial)),
        MetricKind::Histogram => InstanceValue::Histogram {
            buckets: vec![0; def.buckets.len()],
            sum: 0.0,
            count: 0,
        },
    }
}
