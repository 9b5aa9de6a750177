//! Immutable point-in-time copy of all metric state.

use crate::metrics::registry::InstanceValue;
use crate::metrics::types::{LabelValues, MetricDefinition, MetricKind};
use std::sync::Arc;

/// One label combination at snapshot time
#[derive(Debug, Clone)]
pub struct Sample {
    pub labels: LabelValues,
    pub value: InstanceValue,
    pub updated_ms: i64,
}

/// All samples of one definition
#[derive(Debug, Clone)]
pub struct FamilySnapshot {
    pub definition: Arc<MetricDefinition>,
    pub samples: Vec<Sample>,
}

/// Every instance's state after one completed tick
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Tick generation, 0 before the first tick
    pub generation: u64,
    /// Wall-clock publish time in milliseconds
    pub timestamp_ms: i64,
    pub families: Vec<FamilySnapshot>,
}

impl Snapshot {
    /// Families with no samples, served before the first tick completes
    pub fn empty<'a, I>(definitions: I, timestamp_ms: i64) -> Self
    where
        I: IntoIterator<Item = &'a MetricDefinition>,
    {
        Self {
            generation: 0,
            timestamp_ms,
            families: definitions
                .into_iter()
                .map(|d| FamilySnapshot {
                    definition: Arc::new(d.clone()),
                    samples: Vec::new(),
                })
                .collect(),
        }
    }

    pub fn family(&self, name: &str) -> Option<&FamilySnapshot> {
        self.families.iter().find(|f| f.definition.name == name)
    }

    pub fn instance_count(&self) -> usize {
        self.families.iter().map(|f| f.samples.len()).sum()
    }

    /// Sum of a series across all label sets.
    ///
    /// Histogram parts are addressed with `_sum`, `_count` suffixes; the bare
    /// histogram name yields its count.
    pub fn total(&self, series: &str) -> Option<f64> {
        if let Some(family) = self.family(series) {
            return Some(family.samples.iter().map(|s| s.value.as_f64()).sum());
        }

        let (base, part) = series
            .strip_suffix("_sum")
            .map(|b| (b, HistogramPart::Sum))
            .or_else(|| series.strip_suffix("_count").map(|b| (b, HistogramPart::Count)))?;

        let family = self.family(base)?;
        if family.definition.kind != MetricKind::Histogram {
            return None;
        }

        Some(
            family
                .samples
                .iter()
                .map(|s| match (&s.value, part) {
                    (InstanceValue::Histogram { sum, .. }, HistogramPart::Sum) => *sum,
                    (InstanceValue::Histogram { count, .. }, HistogramPart::Count) => *count as f64,
                    (InstanceValue::Scalar(v), _) => *v,
                })
                .sum(),
        )
    }
}

#[derive(Debug, Clone, Copy)]
enum HistogramPart {
    Sum,
    Count,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::registry::MetricRegistry;
    use crate::metrics::types::{Bounds, MetricRole};
    use std::collections::BTreeMap;

    fn defs() -> Vec<MetricDefinition> {
        let base = MetricDefinition {
            name: "errors_total".to_string(),
            kind: MetricKind::Counter,
            help: String::new(),
            labels: vec!["user_type".to_string()],
            label_values: BTreeMap::new(),
            bounds: Bounds::new(0.0, 1e6),
            rate_bounds: None,
            initial: 0.0,
            drift: 0.0,
            volatility: 0.0,
            buckets: Vec::new(),
            role: MetricRole::Errors,
        };
        let histogram = MetricDefinition {
            name: "duration_seconds".to_string(),
            kind: MetricKind::Histogram,
            buckets: vec![10.0, 100.0],
            role: MetricRole::General,
            ..base.clone()
        };
        vec![base, histogram]
    }

    #[test]
    fn test_empty_snapshot_has_families() {
        let snapshot = Snapshot::empty(&defs(), 0);
        assert_eq!(snapshot.generation, 0);
        assert_eq!(snapshot.families.len(), 2);
        assert_eq!(snapshot.instance_count(), 0);
        assert_eq!(snapshot.total("errors_total"), Some(0.0));
    }

    #[test]
    fn test_totals() {
        let defs = defs();
        let mut reg = MetricRegistry::new(&defs);
        reg.observe(&defs[0], &[("user_type", "a")], 2.0, 1).unwrap();
        reg.observe(&defs[0], &[("user_type", "b")], 3.0, 1).unwrap();
        reg.observe(&defs[1], &[("user_type", "a")], 5.0, 1).unwrap();
        reg.observe(&defs[1], &[("user_type", "a")], 50.0, 1).unwrap();

        let snapshot = reg.snapshot(1, 1);
        assert_eq!(snapshot.total("errors_total"), Some(5.0));
        assert_eq!(snapshot.total("duration_seconds"), Some(2.0));
        assert_eq!(snapshot.total("duration_seconds_sum"), Some(55.0));
        assert_eq!(snapshot.total("duration_seconds_count"), Some(2.0));
        assert_eq!(snapshot.total("errors_total_sum"), None);
        assert_eq!(snapshot.total("missing"), None);
    }
}
