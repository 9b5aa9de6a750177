//! Bounded Brownian motion with drift.
//!
//! `next = clamp(current + drift·dt + volatility·√dt·N(0,1), min, max)`
//!
//! The random source is always passed in, so a seeded `StdRng` makes every
//! trajectory reproducible.

use crate::core::config::{BurstConfig, SeasonalityConfig};
use crate::metrics::Bounds;
use chrono::{DateTime, Datelike, Timelike, Utc};
use rand::Rng;
use rand_distr::StandardNormal;

/// Inputs for one step of the process
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepParams {
    /// Trend per simulated second
    pub drift: f64,
    /// Noise magnitude per √second
    pub volatility: f64,
    /// Step length in simulated seconds
    pub dt: f64,
    /// Hard range for the result
    pub bounds: Bounds,
}

/// Advance `current` by one step.
#[inline]
pub fn step<R: Rng + ?Sized>(current: f64, params: &StepParams, rng: &mut R) -> f64 {
    let shock: f64 = rng.sample(StandardNormal);
    let next = current + params.drift * params.dt + params.volatility * params.dt.sqrt() * shock;

    if next.is_nan() {
        return params.bounds.clamp(current);
    }
    params.bounds.clamp(next)
}

/// Scenario-driven adjustments for one process
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Modulation {
    /// Multiplies drift and volatility
    pub load: f64,
    /// Added to drift after all multipliers
    pub drift_bias: f64,
    /// Multiplies volatility
    pub volatility_multiplier: f64,
    /// Multiplies the upper bound, never below the lower bound
    pub ceiling_factor: f64,
    /// Periodic burst factor, multiplies drift
    pub burst: f64,
}

impl Default for Modulation {
    fn default() -> Self {
        Self {
            load: 1.0,
            drift_bias: 0.0,
            volatility_multiplier: 1.0,
            ceiling_factor: 1.0,
            burst: 1.0,
        }
    }
}

/// Baseline parameters of one actor-driven process
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    pub drift: f64,
    pub volatility: f64,
    pub bounds: Bounds,
}

impl Baseline {
    /// Combine the baseline with actor coefficients, season and scenario state.
    ///
    /// Drift: `base · activity · seasonal · burst · load + bias`.
    /// Volatility: `base · actor_volatility · load · multiplier`.
    pub fn effective(
        &self,
        activity: f64,
        actor_volatility: f64,
        seasonal: f64,
        modulation: &Modulation,
        dt: f64,
    ) -> StepParams {
        StepParams {
            drift: self.drift * activity * seasonal * modulation.burst * modulation.load
                + modulation.drift_bias,
            volatility: self.volatility
                * actor_volatility
                * modulation.load
                * modulation.volatility_multiplier,
            dt,
            bounds: self.bounds.with_ceiling(modulation.ceiling_factor),
        }
    }
}

/// Deterministic time-of-week drift multiplier
#[derive(Debug, Clone)]
pub struct Seasonality {
    config: SeasonalityConfig,
}

impl Seasonality {
    pub fn new(config: SeasonalityConfig) -> Self {
        Self { config }
    }

    /// Multiplier in force at the simulated wall-clock instant `at`.
    pub fn factor(&self, at: DateTime<Utc>) -> f64 {
        if !self.config.enabled {
            return 1.0;
        }

        let hour = at.hour();
        let daily = match hour {
            9..=17 => self.config.business_hours,
            6..=22 => self.config.shoulder_hours,
            _ => self.config.off_hours,
        };

        let weekly = if at.weekday().number_from_monday() >= 6 {
            self.config.weekend
        } else {
            1.0
        };

        daily * weekly
    }
}

/// Recurring burst windows over simulated elapsed time
#[derive(Debug, Clone, Copy)]
pub struct BurstPattern {
    config: BurstConfig,
}

impl BurstPattern {
    pub fn new(config: BurstConfig) -> Self {
        Self { config }
    }

    /// Multiplier in force `elapsed` simulated seconds into the run
    pub fn factor(&self, elapsed: f64) -> f64 {
        let interval = self.config.interval.as_secs_f64();
        if !self.config.enabled || interval <= 0.0 {
            return 1.0;
        }

        if elapsed.rem_euclid(interval) < self.config.duration.as_secs_f64() {
            self.config.intensity
        } else {
            1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn params() -> StepParams {
        StepParams {
            drift: 0.1,
            volatility: 50.0,
            dt: 1.0,
            bounds: Bounds::new(0.0, 100_000.0),
        }
    }

    #[test]
    fn test_step_is_reproducible() {
        let a = step(1000.0, &params(), &mut StdRng::seed_from_u64(42));
        let b = step(1000.0, &params(), &mut StdRng::seed_from_u64(42));
        assert_eq!(a.to_bits(), b.to_bits());
        assert!((0.0..=100_000.0).contains(&a));
        assert_ne!(a, 1000.0);
    }

    #[test]
    fn test_step_matches_formula() {
        let mut reference = StdRng::seed_from_u64(9);
        let shock: f64 = reference.sample(StandardNormal);
        let expected = 1000.0 + 0.1 * 1.0 + 50.0 * 1.0_f64.sqrt() * shock;

        let actual = step(1000.0, &params(), &mut StdRng::seed_from_u64(9));
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_step_clamps_to_bounds() {
        let mut rng = StdRng::seed_from_u64(5);
        let p = StepParams {
            drift: 0.0,
            volatility: 1e6,
            dt: 10.0,
            bounds: Bounds::new(10.0, 20.0),
        };
        let mut value = 15.0;
        for _ in 0..1_000 {
            value = step(value, &p, &mut rng);
            assert!((10.0..=20.0).contains(&value));
        }
    }

    #[test]
    fn test_zero_volatility_is_pure_drift() {
        let p = StepParams {
            drift: 2.0,
            volatility: 0.0,
            dt: 10.0,
            bounds: Bounds::new(0.0, 1e9),
        };
        assert_eq!(step(5.0, &p, &mut StdRng::seed_from_u64(0)), 25.0);
    }

    #[test]
    fn test_effective_params() {
        let baseline = Baseline {
            drift: 1.0,
            volatility: 2.0,
            bounds: Bounds::new(0.0, 100.0),
        };
        let modulation = Modulation {
            load: 3.0,
            drift_bias: 0.5,
            volatility_multiplier: 2.0,
            ceiling_factor: 0.5,
            burst: 2.0,
        };
        let p = baseline.effective(2.0, 0.5, 1.5, &modulation, 10.0);
        assert_eq!(p.drift, 1.0 * 2.0 * 1.5 * 2.0 * 3.0 + 0.5);
        assert_eq!(p.volatility, 2.0 * 0.5 * 3.0 * 2.0);
        assert_eq!(p.bounds, Bounds::new(0.0, 50.0));
        assert_eq!(p.dt, 10.0);
    }

    #[test]
    fn test_seasonality() {
        let season = Seasonality::new(SeasonalityConfig::default());
        // 2024-01-03 is a Wednesday
        let business = Utc.with_ymd_and_hms(2024, 1, 3, 10, 0, 0).unwrap();
        let shoulder = Utc.with_ymd_and_hms(2024, 1, 3, 20, 0, 0).unwrap();
        let night = Utc.with_ymd_and_hms(2024, 1, 3, 2, 0, 0).unwrap();
        let saturday = Utc.with_ymd_and_hms(2024, 1, 6, 10, 0, 0).unwrap();

        assert_eq!(season.factor(business), 2.0);
        assert_eq!(season.factor(shoulder), 1.5);
        assert_eq!(season.factor(night), 0.3);
        assert!((season.factor(saturday) - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_seasonality_disabled() {
        let season = Seasonality::new(SeasonalityConfig {
            enabled: false,
            ..SeasonalityConfig::default()
        });
        let night = Utc.with_ymd_and_hms(2024, 1, 6, 2, 0, 0).unwrap();
        assert_eq!(season.factor(night), 1.0);
    }

    #[test]
    fn test_burst_windows() {
        let bursts = BurstPattern::new(BurstConfig {
            enabled: true,
            ..BurstConfig::default()
        });
        assert_eq!(bursts.factor(0.0), 3.0);
        assert_eq!(bursts.factor(299.0), 3.0);
        assert_eq!(bursts.factor(300.0), 1.0);
        assert_eq!(bursts.factor(3599.0), 1.0);
        assert_eq!(bursts.factor(3700.0), 3.0);

        let disabled = BurstPattern::new(BurstConfig::default());
        assert_eq!(disabled.factor(0.0), 1.0);
    }
}
