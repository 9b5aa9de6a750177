//! Configuration management for the simulator.
//!
//! This module provides configuration handling with:
//! - YAML file support
//! - CLI argument overrides
//! - Validation and defaults
//! - File watching for development mode

use crate::core::{Result, SimError};
use crate::metrics::{Bounds, MetricDefinition, MetricKind, MetricRole};
use crate::population::SegmentConfig;
use crate::scenario::{AssertionConfig, ScenarioConfig, Selector, TimelineEventConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

/// Complete configuration document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Tick loop and clock configuration
    pub simulation: SimulationConfig,
    /// Synthetic actor population
    pub population: PopulationConfig,
    /// Metric definitions
    pub metrics: Vec<MetricDefinition>,
    /// Named scenarios
    pub scenarios: BTreeMap<String, ScenarioConfig>,
    /// Fault profiles keyed by fault tag
    pub faults: BTreeMap<String, FaultProfile>,
    /// Cost counter derived from token usage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pricing: Option<PricingConfig>,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Debug mode
    #[serde(skip)]
    pub debug: bool,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address for the exposition server
    pub bind_address: IpAddr,
    /// HTTP port
    pub port: u16,
    /// Emit permissive CORS headers
    pub cors_enabled: bool,
}

/// Tick loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Wall-clock interval between ticks
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
    /// Simulated time advanced per tick (defaults to the tick interval)
    #[serde(with = "humantime_serde")]
    pub time_step: Option<Duration>,
    /// Random seed; a fresh one is drawn when absent
    pub seed: Option<u64>,
    /// Simulated wall clock at scenario start, drives seasonality
    pub start_time: Option<DateTime<Utc>>,
    /// Seasonal drift modulation
    pub seasonality: SeasonalityConfig,
    /// Periodic activity bursts
    pub burst: BurstConfig,
}

/// Business-hours and weekend modulation of drift
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SeasonalityConfig {
    pub enabled: bool,
    /// Factor between 09:00 and 17:59
    pub business_hours: f64,
    /// Factor between 06:00 and 22:59 outside business hours
    pub shoulder_hours: f64,
    /// Factor overnight
    pub off_hours: f64,
    /// Extra factor on Saturday and Sunday
    pub weekend: f64,
}

/// Recurring burst window: `intensity` for `duration` at the start of every
/// `interval` of simulated time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BurstConfig {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// Drift multiplier inside the window
    pub intensity: f64,
}

/// Population configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationConfig {
    /// Number of actors
    pub total: usize,
    /// Behavioral segments, weights must sum to 1.0
    pub segments: Vec<SegmentConfig>,
}

/// Quantitative effect of an injected fault
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultProfile {
    /// Added to the drift of error-role metrics, scaled by event severity
    pub error_drift_bias: f64,
    /// Applied to volatility of every metric while the fault is active
    pub volatility_multiplier: f64,
    /// Multiplies the upper bound of selected metrics (1.0 leaves it alone)
    pub ceiling_factor: f64,
}

/// Prices the per-tick deltas of a token counter into a cost counter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Counter receiving the cost
    pub metric: String,
    /// Counter whose deltas are priced
    pub source: String,
    /// Source label selecting the price row
    #[serde(default = "default_model_label")]
    pub model_label: String,
    /// Source label selecting the price column
    #[serde(default = "default_token_label")]
    pub token_label: String,
    /// Price per 1000 source units, by model then token type
    pub costs_per_1k_tokens: BTreeMap<String, BTreeMap<String, f64>>,
}

fn default_model_label() -> String {
    "model".to_string()
}

fn default_token_label() -> String {
    "token_type".to_string()
}

impl PricingConfig {
    /// Price of a single source unit; unpriced combinations cost nothing
    pub fn unit_price(&self, model: &str, token_type: &str) -> f64 {
        self.costs_per_1k_tokens
            .get(model)
            .and_then(|row| row.get(token_type))
            .copied()
            .unwrap_or(0.0)
            / 1000.0
    }

    /// Both counters must exist and the source must carry every label the
    /// cost counter needs.
    pub fn validate(&self, metrics: &[MetricDefinition]) -> Result<()> {
        let find = |name: &str| {
            metrics
                .iter()
                .find(|m| m.name == name)
                .ok_or_else(|| SimError::config(format!("pricing refers to unknown metric '{}'", name)))
        };
        let target = find(&self.metric)?;
        let source = find(&self.source)?;

        if target.name == source.name {
            return Err(SimError::config("pricing metric and source must differ"));
        }
        for def in [target, source] {
            if def.kind != MetricKind::Counter {
                return Err(SimError::config(format!("pricing metric '{}' must be a counter", def.name)));
            }
        }

        if let Some(label) = [&self.model_label, &self.token_label]
            .into_iter()
            .chain(&target.labels)
            .find(|label| !source.labels.contains(*label))
        {
            return Err(SimError::config(format!(
                "pricing label '{}' is not in the schema of '{}'",
                label, source.name
            )));
        }

        for (model, row) in &self.costs_per_1k_tokens {
            for (token_type, price) in row {
                if !price.is_finite() || *price < 0.0 {
                    return Err(SimError::config(format!(
                        "price for {}/{} must be a non-negative number, got {}",
                        model, token_type, price
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
    /// Structured logging format
    pub structured: bool,
}

/// Log levels
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig::default(),
            simulation: SimulationConfig::default(),
            population: PopulationConfig::default(),
            metrics: default_metrics(),
            scenarios: default_scenarios(),
            faults: default_faults(),
            pricing: Some(default_pricing()),
            logging: LoggingConfig::default(),
            debug: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8000,
            cors_enabled: true,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            tick_interval: Duration::from_secs(10),
            time_step: None,
            seed: None,
            start_time: None,
            seasonality: SeasonalityConfig::default(),
            burst: BurstConfig::default(),
        }
    }
}

impl Default for BurstConfig {
    fn default() -> Self {
        BurstConfig {
            enabled: false,
            interval: Duration::from_secs(3600),
            duration: Duration::from_secs(300),
            intensity: 3.0,
        }
    }
}

impl Default for SeasonalityConfig {
    fn default() -> Self {
        SeasonalityConfig {
            enabled: true,
            business_hours: 2.0,
            shoulder_hours: 1.5,
            off_hours: 0.3,
            weekend: 0.3,
        }
    }
}

impl Default for PopulationConfig {
    fn default() -> Self {
        PopulationConfig {
            total: 50,
            segments: vec![
                SegmentConfig::new("power", 0.2, [1.5, 3.0], [0.3, 0.5]),
                SegmentConfig::new("regular", 0.6, [0.8, 1.5], [0.2, 0.3]),
                SegmentConfig::new("idle", 0.2, [0.1, 0.5], [0.1, 0.2]),
            ],
        }
    }
}

impl Default for FaultProfile {
    fn default() -> Self {
        FaultProfile {
            error_drift_bias: 0.01,
            volatility_multiplier: 1.5,
            ceiling_factor: 1.0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            structured: false,
        }
    }
}

fn pool(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_string()).collect()
}

fn labels(names: &[&str]) -> Vec<String> {
    pool(names)
}

/// Metric set modelled on coding-assistant telemetry
pub fn default_metrics() -> Vec<MetricDefinition> {
    let models = pool(&["claude-3-sonnet", "claude-3-haiku", "claude-3-opus"]);

    vec![
        MetricDefinition {
            name: "otel_claude_code_token_usage_tokens_total".to_string(),
            kind: MetricKind::Counter,
            help: "Total number of tokens used in sessions (simulated)".to_string(),
            labels: labels(&["model", "token_type", "user_type"]),
            label_values: BTreeMap::from([
                ("model".to_string(), models.clone()),
                ("token_type".to_string(), pool(&["input", "output"])),
            ]),
            bounds: Bounds::new(0.0, 1e12),
            rate_bounds: Some(Bounds::new(0.0, 500.0)),
            initial: 20.0,
            drift: 0.01,
            volatility: 5.0,
            buckets: Vec::new(),
            role: MetricRole::General,
        },
        MetricDefinition {
            name: "otel_claude_code_cost_usage_USD_total".to_string(),
            kind: MetricKind::Counter,
            help: "Total cost in USD, priced from token usage (simulated)".to_string(),
            labels: labels(&["model", "user_type"]),
            label_values: BTreeMap::from([("model".to_string(), models)]),
            bounds: Bounds::new(0.0, 1e9),
            rate_bounds: None,
            initial: 0.0,
            drift: 0.0,
            volatility: 0.0,
            buckets: Vec::new(),
            role: MetricRole::General,
        },
        MetricDefinition {
            name: "otel_claude_code_tool_usage_total".to_string(),
            kind: MetricKind::Counter,
            help: "Number of tool invocations (simulated)".to_string(),
            labels: labels(&["tool_name", "status", "user_type"]),
            label_values: BTreeMap::from([
                (
                    "tool_name".to_string(),
                    pool(&["Read", "Write", "Edit", "Bash", "Glob", "Grep"]),
                ),
                ("status".to_string(), pool(&["success", "error"])),
            ]),
            bounds: Bounds::new(0.0, 1e9),
            rate_bounds: Some(Bounds::new(0.0, 10.0)),
            initial: 0.05,
            drift: 0.0005,
            volatility: 0.02,
            buckets: Vec::new(),
            role: MetricRole::General,
        },
        MetricDefinition {
            name: "otel_claude_code_error_total".to_string(),
            kind: MetricKind::Counter,
            help: "Number of errors encountered (simulated)".to_string(),
            labels: labels(&["error_type", "user_type"]),
            label_values: BTreeMap::from([(
                "error_type".to_string(),
                pool(&["timeout", "network", "auth", "validation", "rate_limit"]),
            )]),
            bounds: Bounds::new(0.0, 1e9),
            rate_bounds: Some(Bounds::new(0.0, 5.0)),
            initial: 0.001,
            drift: 0.0,
            volatility: 0.0005,
            buckets: Vec::new(),
            role: MetricRole::Errors,
        },
        MetricDefinition {
            name: "otel_claude_code_session_duration_seconds".to_string(),
            kind: MetricKind::Histogram,
            help: "Duration of sessions in seconds (simulated)".to_string(),
            labels: labels(&["user_type"]),
            label_values: BTreeMap::new(),
            bounds: Bounds::new(10.0, 7200.0),
            rate_bounds: None,
            initial: 300.0,
            drift: 0.0,
            volatility: 30.0,
            buckets: vec![10.0, 30.0, 60.0, 300.0, 600.0, 1800.0, 3600.0, 7200.0],
            role: MetricRole::General,
        },
        MetricDefinition {
            name: "otel_claude_code_active_sessions".to_string(),
            kind: MetricKind::Gauge,
            help: "Number of currently active sessions (simulated)".to_string(),
            labels: labels(&["user_type"]),
            label_values: BTreeMap::new(),
            bounds: Bounds::new(0.0, 10_000.0),
            rate_bounds: None,
            initial: 1.0,
            drift: 0.0,
            volatility: 0.2,
            buckets: Vec::new(),
            role: MetricRole::General,
        },
        MetricDefinition {
            name: "otel_claude_code_session_count_total".to_string(),
            kind: MetricKind::Counter,
            help: "Total sessions started (simulated)".to_string(),
            labels: labels(&["user_id", "user_type"]),
            label_values: BTreeMap::new(),
            bounds: Bounds::new(0.0, 1e9),
            rate_bounds: Some(Bounds::new(0.0, 0.05)),
            initial: 0.002,
            drift: 0.00001,
            volatility: 0.0005,
            buckets: Vec::new(),
            role: MetricRole::General,
        },
        MetricDefinition {
            name: "otel_claude_code_commit_count_total".to_string(),
            kind: MetricKind::Counter,
            help: "Total commits made in sessions (simulated)".to_string(),
            labels: labels(&["user_id", "user_type"]),
            label_values: BTreeMap::new(),
            bounds: Bounds::new(0.0, 1e9),
            rate_bounds: Some(Bounds::new(0.0, 0.02)),
            initial: 0.0005,
            drift: 0.0,
            volatility: 0.0002,
            buckets: Vec::new(),
            role: MetricRole::General,
        },
    ]
}

/// Token prices per 1000 tokens for the built-in models
pub fn default_pricing() -> PricingConfig {
    let price = |input: f64, output: f64| {
        BTreeMap::from([("input".to_string(), input), ("output".to_string(), output)])
    };

    PricingConfig {
        metric: "otel_claude_code_cost_usage_USD_total".to_string(),
        source: "otel_claude_code_token_usage_tokens_total".to_string(),
        model_label: default_model_label(),
        token_label: default_token_label(),
        costs_per_1k_tokens: BTreeMap::from([
            ("claude-3-sonnet".to_string(), price(0.003, 0.015)),
            ("claude-3-haiku".to_string(), price(0.001, 0.005)),
            ("claude-3-opus".to_string(), price(0.015, 0.075)),
        ]),
    }
}

/// Scenarios shipped with the default document
pub fn default_scenarios() -> BTreeMap<String, ScenarioConfig> {
    let mut scenarios = BTreeMap::new();

    scenarios.insert(
        "baseline".to_string(),
        ScenarioConfig {
            description: "Normal usage patterns".to_string(),
            duration: Duration::from_secs(3600),
            timeline: Vec::new(),
            assertions: Vec::new(),
        },
    );

    scenarios.insert(
        "high_load".to_string(),
        ScenarioConfig {
            description: "Load triples ten minutes in".to_string(),
            duration: Duration::from_secs(1800),
            timeline: vec![TimelineEventConfig::increase_load(Duration::from_secs(600), 3.0)],
            assertions: vec![AssertionConfig::new(
                "otel_claude_code_token_usage_tokens_total",
                "> 0",
            )],
        },
    );

    scenarios.insert(
        "degradation".to_string(),
        ScenarioConfig {
            description: "Network latency degrades throughput, then recovers".to_string(),
            duration: Duration::from_secs(2700),
            timeline: vec![
                TimelineEventConfig::inject_failure(
                    Duration::from_secs(300),
                    "network_latency",
                    1.0,
                    Some(Selector::metric("otel_claude_code_token_usage_tokens_total")),
                ),
                TimelineEventConfig::recovery(Duration::from_secs(1800), None),
            ],
            assertions: Vec::new(),
        },
    );

    scenarios.insert(
        "model_outage".to_string(),
        ScenarioConfig {
            description: "Model outage drives errors up for fifteen minutes".to_string(),
            duration: Duration::from_secs(3600),
            timeline: vec![
                TimelineEventConfig::inject_failure(
                    Duration::from_secs(600),
                    "model_outage",
                    1.0,
                    Some(Selector::metric("otel_claude_code_token_usage_tokens_total")),
                ),
                TimelineEventConfig::recovery(
                    Duration::from_secs(1500),
                    Some("model_outage".to_string()),
                ),
            ],
            assertions: vec![AssertionConfig::new("otel_claude_code_error_total", "> 0")],
        },
    );

    scenarios
}

/// Built-in profiles for the known fault tags
pub fn default_faults() -> BTreeMap<String, FaultProfile> {
    BTreeMap::from([
        (
            "model_outage".to_string(),
            FaultProfile {
                error_drift_bias: 0.05,
                volatility_multiplier: 2.0,
                ceiling_factor: 0.1,
            },
        ),
        (
            "network_latency".to_string(),
            FaultProfile {
                error_drift_bias: 0.01,
                volatility_multiplier: 1.5,
                ceiling_factor: 0.5,
            },
        ),
        (
            "auth_failure".to_string(),
            FaultProfile {
                error_drift_bias: 0.03,
                volatility_multiplier: 1.0,
                ceiling_factor: 0.2,
            },
        ),
        (
            "resource_exhaustion".to_string(),
            FaultProfile {
                error_drift_bias: 0.02,
                volatility_multiplier: 2.5,
                ceiling_factor: 0.3,
            },
        ),
    ])
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Result<Self> {
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.simulation.tick_interval.is_zero() {
            return Err(SimError::config("simulation.tick_interval must be greater than 0"));
        }

        if matches!(self.simulation.time_step, Some(step) if step.is_zero()) {
            return Err(SimError::config("simulation.time_step must be greater than 0"));
        }

        let season = &self.simulation.seasonality;
        for (name, factor) in [
            ("business_hours", season.business_hours),
            ("shoulder_hours", season.shoulder_hours),
            ("off_hours", season.off_hours),
            ("weekend", season.weekend),
        ] {
            if !factor.is_finite() || factor < 0.0 {
                return Err(SimError::config(format!(
                    "seasonality.{} must be a non-negative number, got {}",
                    name, factor
                )));
            }
        }

        let burst = &self.simulation.burst;
        if burst.enabled
            && (burst.interval.is_zero() || !burst.intensity.is_finite() || burst.intensity < 0.0)
        {
            return Err(SimError::config(
                "simulation.burst needs a non-zero interval and a non-negative intensity",
            ));
        }

        crate::population::validate(&self.population)?;

        if self.metrics.is_empty() {
            return Err(SimError::config("at least one metric must be defined"));
        }

        let mut seen = std::collections::HashSet::new();
        for metric in &self.metrics {
            metric.validate()?;
            if !seen.insert(metric.name.as_str()) {
                return Err(SimError::config(format!("duplicate metric name '{}'", metric.name)));
            }
        }

        for (tag, profile) in &self.faults {
            if profile.error_drift_bias < 0.0
                || profile.volatility_multiplier < 0.0
                || !(0.0..=1.0).contains(&profile.ceiling_factor)
            {
                return Err(SimError::config(format!(
                    "fault profile '{}' is out of range: bias and volatility must be >= 0, \
                     ceiling_factor within [0, 1]",
                    tag
                )));
            }
        }

        if let Some(pricing) = &self.pricing {
            pricing.validate(&self.metrics)?;
        }

        for (name, scenario) in &self.scenarios {
            scenario.validate(name, &self.metrics)?;
        }

        Ok(())
    }

    /// Drop built-in scenarios and pricing that refer to metrics a custom
    /// document does not define. Sections the document declares are kept
    /// as written.
    fn retain_resolvable_builtins(&mut self, own_scenarios: bool, own_pricing: bool) {
        if !own_scenarios {
            let metrics = &self.metrics;
            self.scenarios.retain(|name, scenario| match scenario.validate(name, metrics) {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!("Leaving out built-in scenario '{}': {}", name, e);
                    false
                },
            });
        }

        if !own_pricing {
            let unresolved = self
                .pricing
                .as_ref()
                .and_then(|pricing| pricing.validate(&self.metrics).err());
            if let Some(e) = unresolved {
                tracing::debug!("Leaving out built-in pricing: {}", e);
                self.pricing = None;
            }
        }
    }

    /// Look up a scenario by name
    pub fn scenario(&self, name: &str) -> Result<&ScenarioConfig> {
        self.scenarios
            .get(name)
            .ok_or_else(|| SimError::UnknownScenario(name.to_string()))
    }

    /// Simulated seconds advanced per tick
    pub fn time_step_secs(&self) -> f64 {
        self.simulation
            .time_step
            .unwrap_or(self.simulation.tick_interval)
            .as_secs_f64()
    }

    /// Check if a port is available
    pub async fn check_port_available(&self) -> Result<()> {
        use tokio::net::TcpListener;

        match TcpListener::bind((self.server.bind_address, self.server.port)).await {
            Ok(_) => Ok(()),
            Err(e) => Err(SimError::config(format!(
                "Port {} is not available: {}",
                self.server.port, e
            ))),
        }
    }
}

impl LogLevel {
    /// Convert to tracing filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Configuration builder for programmatic construction
pub struct ConfigBuilder {
    config: Config,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = parse_yaml(yaml)?;
        Ok(self)
    }

    /// Set HTTP port
    pub fn port(mut self, port: u16) -> Self {
        self.config.server.port = port;
        self
    }

    /// Set bind address
    pub fn bind_address(mut self, address: IpAddr) -> Self {
        self.config.server.bind_address = address;
        self
    }

    /// Set random seed
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.simulation.seed = Some(seed);
        self
    }

    /// Set wall-clock tick interval
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.simulation.tick_interval = interval;
        self
    }

    /// Set simulated time per tick
    pub fn time_step(mut self, step: Duration) -> Self {
        self.config.simulation.time_step = Some(step);
        self
    }

    /// Anchor the simulated clock
    pub fn start_time(mut self, start: DateTime<Utc>) -> Self {
        self.config.simulation.start_time = Some(start);
        self
    }

    /// Set population size
    pub fn population(mut self, total: usize) -> Self {
        self.config.population.total = total;
        self
    }

    /// Set debug mode
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

fn parse_yaml(yaml: &str) -> Result<Config> {
    let invalid = |e: serde_yaml::Error| SimError::config(format!("Failed to parse YAML config: {}", e));

    let document: serde_yaml::Value = serde_yaml::from_str(yaml).map_err(invalid)?;
    let own_scenarios = document.get("scenarios").is_some();
    let own_pricing = document.get("pricing").is_some();

    let mut config: Config = serde_yaml::from_value(document).map_err(invalid)?;
    config.retain_resolvable_builtins(own_scenarios, own_pricing);
    Ok(config)
}

/// Watch configuration file for changes
pub struct ConfigWatcher {
    path: PathBuf,
    tx: tokio::sync::watch::Sender<Config>,
    rx: tokio::sync::watch::Receiver<Config>,
}

impl ConfigWatcher {
    /// Create a new configuration watcher
    pub fn new(path: PathBuf, initial: Config) -> Self {
        let (tx, rx) = tokio::sync::watch::channel(initial);
        ConfigWatcher { path, tx, rx }
    }

    /// Get a receiver for configuration updates
    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<Config> {
        self.rx.clone()
    }

    /// Start watching for configuration changes
    pub async fn watch(self) -> Result<()> {
        use notify::{RecursiveMode, Watcher};

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(move |res| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        })
        .map_err(|e| SimError::config(format!("Failed to create file watcher: {}", e)))?;

        watcher
            .watch(&self.path, RecursiveMode::NonRecursive)
            .map_err(|e| SimError::config(format!("Failed to watch config file: {}", e)))?;

        tracing::info!("Watching configuration file: {:?}", self.path);

        while let Some(event) = rx.recv().await {
            if !matches!(event.kind, notify::EventKind::Modify(_)) {
                continue;
            }

            tracing::info!("Configuration file changed, reloading...");

            let content = match tokio::fs::read_to_string(&self.path).await {
                Ok(content) => content,
                Err(e) => {
                    tracing::error!("Failed to read configuration file: {}", e);
                    continue;
                },
            };

            let mut new_config = match parse_yaml(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::error!("Failed to parse configuration: {}", e);
                    continue;
                },
            };

            if let Err(e) = new_config.validate() {
                tracing::error!("Invalid configuration: {}", e);
                continue;
            }

            // Preserve runtime-only settings
            {
                let current = self.tx.borrow();
                new_config.debug = current.debug;
                new_config.server = current.server.clone();
            }

            if self.tx.send(new_config).is_err() {
                tracing::debug!("No simulation is listening for configuration updates");
                break;
            }

            tracing::info!("Configuration reloaded successfully");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.time_step_secs(), 10.0);
    }

    #[test]
    fn test_zero_tick_interval_rejected() {
        let result = ConfigBuilder::new().tick_interval(Duration::ZERO).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_duplicate_metric_rejected() {
        let mut config = Config::default();
        let first = config.metrics[0].clone();
        config.metrics.push(first);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate metric name"));
    }

    #[test]
    fn test_default_pricing() {
        let pricing = default_pricing();
        assert!(pricing.validate(&default_metrics()).is_ok());
        assert_eq!(pricing.unit_price("claude-3-opus", "output"), 0.075 / 1000.0);
        assert_eq!(pricing.unit_price("claude-3-opus", "cache"), 0.0);
        assert_eq!(pricing.unit_price("gpt-x", "input"), 0.0);
    }

    #[test]
    fn test_pricing_validation() {
        let metrics = default_metrics();

        let mut gauge_target = default_pricing();
        gauge_target.metric = "otel_claude_code_active_sessions".to_string();
        assert!(gauge_target.validate(&metrics).is_err());

        let mut missing_label = default_pricing();
        missing_label.token_label = "type".to_string();
        assert!(missing_label.validate(&metrics).is_err());

        // Tool counter lacks the model label the cost counter needs
        let mut wrong_source = default_pricing();
        wrong_source.source = "otel_claude_code_tool_usage_total".to_string();
        assert!(wrong_source.validate(&metrics).is_err());

        let mut negative = default_pricing();
        negative
            .costs_per_1k_tokens
            .insert("claude-3-haiku".to_string(), BTreeMap::from([("input".to_string(), -1.0)]));
        assert!(negative.validate(&metrics).is_err());
    }

    #[test]
    fn test_burst_validation() {
        let mut config = Config::default();
        config.simulation.burst.enabled = true;
        assert!(config.validate().is_ok());

        config.simulation.burst.interval = Duration::ZERO;
        assert!(config.validate().is_err());

        // Ignored while disabled
        config.simulation.burst.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_time_step_override() {
        let config = ConfigBuilder::new()
            .tick_interval(Duration::from_millis(100))
            .time_step(Duration::from_secs(60))
            .build()
            .unwrap();
        assert_eq!(config.time_step_secs(), 60.0);
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
server:
  port: 9100
simulation:
  tick_interval: 5s
  seed: 7
population:
  total: 10
  segments:
    - name: power
      percentage: 0.5
      activity_range: [1.0, 2.0]
      volatility_range: [0.1, 0.2]
    - name: idle
      percentage: 0.5
      activity_range: [0.1, 0.2]
      volatility_range: [0.1, 0.1]
metrics:
  - name: requests_total
    kind: counter
    help: Requests
    labels: [route]
    label_values:
      route: ["/a", "/b"]
    bounds: [0, 1000000]
    initial: 5
    drift: 0.1
    volatility: 1
scenarios:
  spike:
    duration: 30m
    timeline:
      - at: 10m
        event: increase_load
        multiplier: 3.0
"#;

        let config = ConfigBuilder::new().from_yaml(yaml).unwrap().build().unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.simulation.tick_interval, Duration::from_secs(5));
        assert_eq!(config.simulation.seed, Some(7));
        assert_eq!(config.population.segments.len(), 2);
        assert_eq!(config.metrics.len(), 1);
        assert_eq!(config.metrics[0].kind, MetricKind::Counter);
        let spike = config.scenario("spike").unwrap();
        assert_eq!(spike.duration, Duration::from_secs(1800));
        assert_eq!(spike.timeline[0].at, Duration::from_secs(600));
        // Fault profiles fall back to the built-in table
        assert!(config.faults.contains_key("model_outage"));
        // Built-in pricing refers to metrics this document does not define
        assert!(config.pricing.is_none());
    }

    #[test]
    fn test_custom_metrics_without_scenarios() {
        let yaml = r#"
metrics:
  - name: requests_total
    kind: counter
    labels: [route]
    label_values:
      route: ["/a", "/b"]
    bounds: [0, 1000000]
    initial: 1
    volatility: 0.1
"#;

        let config = ConfigBuilder::new().from_yaml(yaml).unwrap().build().unwrap();
        assert!(config.scenario("baseline").is_ok());
        assert!(config.scenario("model_outage").is_err());
        assert!(config.pricing.is_none());
    }

    #[test]
    fn test_declared_sections_are_not_pruned() {
        let yaml = r#"
metrics:
  - name: requests_total
    kind: counter
    bounds: [0, 1000000]
scenarios:
  outage:
    duration: 10m
    timeline:
      - at: 1m
        event: inject_failure
        fault: model_outage
        selector:
          metric: otel_claude_code_active_sessions
"#;

        let config = ConfigBuilder::new().from_yaml(yaml).unwrap();
        assert!(config.build().is_err());
    }

    #[test]
    fn test_unknown_scenario() {
        let config = Config::default();
        assert!(matches!(config.scenario("nope"), Err(SimError::UnknownScenario(_))));
    }
}
