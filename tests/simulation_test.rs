//! End-to-end properties of the tick pipeline and the exposition format.

mod common;

use common::fast_config;
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::SeedableRng;
use simlab_lib::core::Config;
use simlab_lib::generator::{self, StepParams};
use simlab_lib::metrics::{
    parse_exposition, parse_sample_line, render, Bounds, InstanceValue, LabelValues,
    MetricDefinition, MetricKind, MetricRegistry, MetricRole, Snapshot,
};
use simlab_lib::scenario::{ScenarioConfig, ScenarioEngine, Selector, TimelineEventConfig};
use simlab_lib::simulation::Simulator;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

const T0: i64 = 1_700_000_000_000;

fn simulator(config: Config, scenario: &str) -> Simulator {
    Simulator::new(Arc::new(config), scenario, Some(Duration::from_secs(86_400))).unwrap()
}

fn scalar_values(snapshot: &Snapshot, kind: MetricKind) -> HashMap<(String, LabelValues), f64> {
    snapshot
        .families
        .iter()
        .filter(|family| family.definition.kind == kind)
        .flat_map(|family| {
            family.samples.iter().map(move |sample| {
                (
                    (family.definition.name.clone(), sample.labels.clone()),
                    sample.value.as_f64(),
                )
            })
        })
        .collect()
}

#[test]
fn test_counter_exposition_round_trip() {
    let def = MetricDefinition {
        name: "otel_claude_code_token_usage_tokens_total".to_string(),
        kind: MetricKind::Counter,
        help: "Total number of tokens".to_string(),
        labels: vec!["model".to_string(), "token_type".to_string()],
        label_values: BTreeMap::new(),
        bounds: Bounds::new(0.0, 1e12),
        rate_bounds: None,
        initial: 0.0,
        drift: 0.0,
        volatility: 0.0,
        buckets: Vec::new(),
        role: MetricRole::General,
    };
    let mut registry = MetricRegistry::new(std::slice::from_ref(&def));
    registry
        .observe(&def, &[("model", "claude-3-sonnet"), ("token_type", "input")], 1500.0, T0)
        .unwrap();

    let text = render(&registry.snapshot(1, T0)).unwrap();
    let line = text
        .lines()
        .find(|line| !line.starts_with('#'))
        .unwrap();
    assert_eq!(
        line,
        "otel_claude_code_token_usage_tokens_total{model=\"claude-3-sonnet\",token_type=\"input\"} 1500 1700000000000"
    );

    let sample = parse_sample_line(line).unwrap();
    assert_eq!(sample.name, "otel_claude_code_token_usage_tokens_total");
    assert_eq!(sample.label("model"), Some("claude-3-sonnet"));
    assert_eq!(sample.label("token_type"), Some("input"));
    assert_eq!(sample.value, 1500.0);
    assert_eq!(sample.timestamp_ms, Some(T0));

    let parsed = parse_exposition(&text).unwrap();
    assert_eq!(parsed.types["otel_claude_code_token_usage_tokens_total"], "counter");
    assert_eq!(parsed.help["otel_claude_code_token_usage_tokens_total"], "Total number of tokens");
}

#[test]
fn test_generator_step_is_reproducible() {
    let params = StepParams {
        drift: 0.1,
        volatility: 50.0,
        dt: 1.0,
        bounds: Bounds::new(0.0, 100_000.0),
    };

    let first = generator::step(1000.0, &params, &mut StdRng::seed_from_u64(2024));
    let second = generator::step(1000.0, &params, &mut StdRng::seed_from_u64(2024));
    assert_eq!(first.to_bits(), second.to_bits());
    assert!((0.0..=100_000.0).contains(&first));
}

#[test]
fn test_bounds_and_monotonicity_over_many_ticks() {
    let mut sim = simulator(fast_config(21), "model_outage");
    let mut previous: HashMap<(String, LabelValues), f64> = HashMap::new();

    for tick in 0..90 {
        sim.tick(T0 + tick * 1000);
        let snapshot = sim.registry().snapshot(sim.generation(), T0);

        for family in &snapshot.families {
            let def = &family.definition;
            for sample in &family.samples {
                match &sample.value {
                    InstanceValue::Scalar(value) => assert!(
                        def.bounds.contains(*value),
                        "{} = {} outside {:?}",
                        def.name,
                        value,
                        def.bounds
                    ),
                    InstanceValue::Histogram { buckets, sum, count } => {
                        assert!(buckets.windows(2).all(|w| w[0] <= w[1]));
                        assert_eq!(buckets.last().copied(), Some(*count));
                        let n = *count as f64;
                        assert!(*sum >= def.bounds.min * n - 1e-6);
                        assert!(*sum <= def.bounds.max * n + 1e-6);
                    },
                }
            }
        }

        let counters = scalar_values(&snapshot, MetricKind::Counter);
        for (key, value) in &counters {
            if let Some(before) = previous.get(key) {
                assert!(value >= before, "{:?} went from {} to {}", key, before, value);
            }
        }
        previous = counters;
    }
}

#[test]
fn test_same_seed_same_exposition() {
    let mut a = simulator(fast_config(77), "high_load");
    let mut b = simulator(fast_config(77), "high_load");

    for tick in 0..20 {
        a.tick(T0 + tick);
        b.tick(T0 + tick);
    }

    let left = render(&a.registry().snapshot(a.generation(), T0)).unwrap();
    let right = render(&b.registry().snapshot(b.generation(), T0)).unwrap();
    assert_eq!(left, right);
}

#[test]
fn test_increase_load_timing() {
    let config = Config::default();
    let scenario = ScenarioConfig {
        description: String::new(),
        duration: Duration::from_secs(1800),
        timeline: vec![TimelineEventConfig::increase_load(Duration::from_secs(600), 3.0)],
        assertions: Vec::new(),
    };
    let mut engine = ScenarioEngine::new("spike", &scenario, &config.faults, &config.metrics).unwrap();
    let def = &config.metrics[0];
    let labels = LabelValues(vec![
        "claude-3-sonnet".to_string(),
        "input".to_string(),
        "regular".to_string(),
    ]);

    engine.advance(599.0);
    assert!((engine.modulation(def, &labels).load - 1.0).abs() < 1e-9);

    engine.advance(601.0);
    assert!((engine.modulation(def, &labels).load - 3.0).abs() < 1e-9);
}

#[test]
fn test_model_outage_raises_error_drift_until_recovery() {
    let config = Config::default();
    let mut engine = ScenarioEngine::from_config(&config, "model_outage", None).unwrap();
    let errors = config
        .metrics
        .iter()
        .find(|m| m.role == MetricRole::Errors)
        .unwrap();
    let labels = LabelValues(vec!["timeout".to_string(), "power".to_string()]);

    engine.advance(590.0);
    let baseline = engine.modulation(errors, &labels);

    engine.advance(610.0);
    let faulted = engine.modulation(errors, &labels);
    assert!(faulted.drift_bias > baseline.drift_bias);
    assert!(faulted.volatility_multiplier > baseline.volatility_multiplier);

    engine.advance(1510.0);
    assert_eq!(engine.modulation(errors, &labels), baseline);
    assert!(engine.active_faults().is_empty());
}

#[test]
fn test_selected_fault_caps_throughput() {
    let mut config = fast_config(31);
    config.scenarios.insert(
        "capped".to_string(),
        ScenarioConfig {
            description: String::new(),
            duration: Duration::from_secs(86_400),
            timeline: vec![TimelineEventConfig::inject_failure(
                Duration::ZERO,
                "model_outage",
                1.0,
                Some(Selector::metric("otel_claude_code_active_sessions")),
            )],
            assertions: Vec::new(),
        },
    );

    let mut sim = simulator(config, "capped");
    for tick in 0..10 {
        sim.tick(T0 + tick);
    }

    let snapshot = sim.registry().snapshot(sim.generation(), T0);
    let sessions = snapshot.family("otel_claude_code_active_sessions").unwrap();
    let per_actor_ceiling = 10_000.0 * 0.1;
    let actors = sim.population().len() as f64;
    for sample in &sessions.samples {
        assert!(sample.value.as_f64() <= per_actor_ceiling * actors);
    }
    assert_eq!(sim.scenario().active_faults().len(), 1);
}

#[test]
fn test_unknown_events_are_skipped() {
    let mut config = fast_config(41);
    config.scenarios.insert(
        "future".to_string(),
        ScenarioConfig {
            description: String::new(),
            duration: Duration::from_secs(600),
            timeline: vec![
                TimelineEventConfig::custom(Duration::from_secs(60), "solar_flare"),
                TimelineEventConfig::increase_load(Duration::from_secs(120), 2.0),
            ],
            assertions: Vec::new(),
        },
    );

    let mut sim = Simulator::new(Arc::new(config), "future", None).unwrap();
    while !sim.is_complete() {
        sim.tick(T0);
    }

    let status = sim.scenario().status();
    assert_eq!(status.events_skipped, 1);
    assert_eq!(status.events_applied, 2);
    assert_eq!(status.load_multiplier, 2.0);
    assert_eq!(sim.generation(), 10);
}
