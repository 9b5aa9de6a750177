//! Synthetic actor population.
//!
//! Actors are partitioned into behavioral segments by weight using the
//! largest-remainder method, so the segment sizes for a given total are
//! fixed. Per-actor coefficients are drawn from the injected random source;
//! re-seeding the source regenerates the identical population.

use crate::core::config::PopulationConfig;
use crate::core::{Result, SimError};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Allowed deviation of the segment weight sum from 1.0
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

/// One behavioral segment of the population
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentConfig {
    /// Segment tag, exposed as the `user_type` label
    pub name: String,
    /// Share of the population, 0.0 to 1.0
    pub percentage: f64,
    /// Range for the activity coefficient
    pub activity_range: [f64; 2],
    /// Range for the volatility coefficient
    pub volatility_range: [f64; 2],
}

impl SegmentConfig {
    /// Create a segment definition
    pub fn new(
        name: &str,
        percentage: f64,
        activity_range: [f64; 2],
        volatility_range: [f64; 2],
    ) -> Self {
        Self {
            name: name.to_string(),
            percentage,
            activity_range,
            volatility_range,
        }
    }
}

/// One simulated user. Immutable for the lifetime of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    /// Position in the stable actor order
    pub index: usize,
    /// Identifier, exposed as the `user_id` label
    pub id: String,
    /// Segment tag
    pub segment: String,
    /// Multiplies the drift of every process this actor drives
    pub activity: f64,
    /// Multiplies the volatility of every process this actor drives
    pub volatility: f64,
}

/// Number of actors assigned to a segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentCount {
    pub segment: String,
    pub actors: usize,
}

/// The full actor set for one run
#[derive(Debug, Clone)]
pub struct Population {
    actors: Vec<Actor>,
    counts: Vec<SegmentCount>,
}

impl Population {
    /// Build the population described by `config`.
    pub fn generate<R: Rng + ?Sized>(config: &PopulationConfig, rng: &mut R) -> Result<Self> {
        validate(config)?;

        let weights: Vec<f64> = config.segments.iter().map(|s| s.percentage).collect();
        let sizes = partition(config.total, &weights);

        let mut actors = Vec::with_capacity(config.total);
        let mut counts = Vec::with_capacity(config.segments.len());

        for (segment, size) in config.segments.iter().zip(sizes) {
            for _ in 0..size {
                let index = actors.len();
                actors.push(Actor {
                    index,
                    id: format!("user_{:03}", index),
                    segment: segment.name.clone(),
                    activity: sample(rng, segment.activity_range),
                    volatility: sample(rng, segment.volatility_range),
                });
            }
            counts.push(SegmentCount {
                segment: segment.name.clone(),
                actors: size,
            });
        }

        tracing::info!(
            "Created {} actors: {}",
            actors.len(),
            counts
                .iter()
                .map(|c| format!("{} {}", c.actors, c.segment))
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(Self { actors, counts })
    }

    /// Actors in stable order
    pub fn actors(&self) -> &[Actor] {
        &self.actors
    }

    /// Actors per segment, in configuration order
    pub fn segment_counts(&self) -> &[SegmentCount] {
        &self.counts
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }
}

fn sample<R: Rng + ?Sized>(rng: &mut R, range: [f64; 2]) -> f64 {
    rng.gen_range(range[0]..=range[1])
}

/// Split `total` by `weights` with the largest-remainder method.
///
/// Ties on the fractional part go to the earlier segment. The sizes always
/// sum to `total`, also when the weights miss 1.0 by a rounding error.
pub fn partition(total: usize, weights: &[f64]) -> Vec<usize> {
    if weights.is_empty() {
        return Vec::new();
    }

    let exact: Vec<f64> = weights.iter().map(|w| w * total as f64).collect();
    let mut sizes: Vec<usize> = exact.iter().map(|x| x.floor() as usize).collect();
    let fraction = |i: usize| exact[i] - exact[i].floor();

    let mut order: Vec<usize> = (0..weights.len()).collect();
    order.sort_by(|&a, &b| fraction(b).total_cmp(&fraction(a)).then(a.cmp(&b)));

    let mut assigned: usize = sizes.iter().sum();

    // Shortfall goes to the largest remainders
    for &idx in order.iter().cycle() {
        if assigned >= total {
            break;
        }
        sizes[idx] += 1;
        assigned += 1;
    }

    // Surplus comes back from the smallest remainders
    for &idx in order.iter().rev().cycle() {
        if assigned <= total {
            break;
        }
        if sizes[idx] > 0 {
            sizes[idx] -= 1;
            assigned -= 1;
        }
    }

    sizes
}

/// Validate a population block
pub fn validate(config: &PopulationConfig) -> Result<()> {
    if config.total == 0 {
        return Err(SimError::config("population.total must be greater than 0"));
    }

    if config.segments.is_empty() {
        return Err(SimError::config("population.segments must not be empty"));
    }

    let mut names = std::collections::HashSet::new();
    for segment in &config.segments {
        if segment.name.is_empty() {
            return Err(SimError::config("segment name must not be empty"));
        }
        if !names.insert(segment.name.as_str()) {
            return Err(SimError::config(format!("duplicate segment '{}'", segment.name)));
        }
        if !segment.percentage.is_finite() || segment.percentage < 0.0 {
            return Err(SimError::config(format!(
                "segment '{}' percentage must be non-negative, got {}",
                segment.name, segment.percentage
            )));
        }
        for (field, range) in [
            ("activity_range", segment.activity_range),
            ("volatility_range", segment.volatility_range),
        ] {
            if !range[0].is_finite() || !range[1].is_finite() || range[0] < 0.0 || range[0] > range[1]
            {
                return Err(SimError::config(format!(
                    "segment '{}' {} must satisfy 0 <= low <= high, got [{}, {}]",
                    segment.name, field, range[0], range[1]
                )));
            }
        }
    }

    let sum: f64 = config.segments.iter().map(|s| s.percentage).sum();
    if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
        return Err(SimError::PopulationWeights(sum));
    }

    Ok(())
}
