//! Command-line interface for simlab.
//!
//! Run `simlab` to serve the `baseline` scenario with the built-in metric set
//! on port 8000, or point it at a YAML document with `--config`.

use crate::application::Application;
use crate::core::{Config, ConfigBuilder, Result, SimError};
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Synthetic telemetry simulator with scenario-driven fault injection
#[derive(Parser, Debug)]
#[command(name = "simlab")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (default: ~/.config/simlab/config.yaml)
    #[arg(short, long, env = "SIMLAB_CONFIG")]
    pub config: Option<PathBuf>,

    /// Scenario to run
    #[arg(short, long, env = "SIMLAB_SCENARIO", default_value = "baseline")]
    pub scenario: String,

    /// Override the scenario duration (e.g. 90s, 15m, 2h)
    #[arg(long, env = "SIMLAB_DURATION", value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,

    /// HTTP port for the exposition server
    #[arg(short, long, env = "SIMLAB_PORT")]
    pub port: Option<u16>,

    /// Bind address for the exposition server
    #[arg(long, env = "SIMLAB_HOST")]
    pub host: Option<IpAddr>,

    /// Random seed for reproducible runs
    #[arg(long, env = "SIMLAB_SEED")]
    pub seed: Option<u64>,

    /// Development mode: reload the configuration file on change
    #[arg(long, env = "SIMLAB_DEV")]
    pub dev: bool,

    /// Enable debug logging
    #[arg(short, long, env = "SIMLAB_DEBUG")]
    pub debug: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub check_config: bool,

    /// List the configured scenarios and exit
    #[arg(long)]
    pub list_scenarios: bool,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Configuration file in effect: the explicit path, or the default
    /// location when a file exists there.
    pub fn config_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config {
            return Some(path.clone());
        }
        dirs::config_dir()
            .map(|dir| dir.join("simlab").join("config.yaml"))
            .filter(|path| path.exists())
    }

    /// Load configuration with proper precedence:
    /// 1. CLI arguments (highest priority)
    /// 2. Environment variables
    /// 3. Config file
    /// 4. Defaults (lowest priority)
    pub async fn load_config(&self) -> Result<Config> {
        let mut builder = ConfigBuilder::new();

        if let Some(path) = self.config_path() {
            let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
                SimError::config(format!("Failed to read config file {:?}: {}", path, e))
            })?;
            builder = builder.from_yaml(&content)?;
        }

        self.build_config_from_args(builder)
    }

    fn build_config_from_args(&self, mut builder: ConfigBuilder) -> Result<Config> {
        if let Some(port) = self.port {
            builder = builder.port(port);
        }
        if let Some(host) = self.host {
            builder = builder.bind_address(host);
        }
        if let Some(seed) = self.seed {
            builder = builder.seed(seed);
        }

        builder.debug(self.debug).build()
    }

    /// Initialize logging.
    ///
    /// `RUST_LOG` wins, then `--debug`, then `SIMLAB_LOG_LEVEL`, then the
    /// configured level.
    pub fn init_logging(&self, config: &Config) -> Result<()> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let log_level = if self.debug {
            "debug".to_string()
        } else {
            std::env::var("SIMLAB_LOG_LEVEL")
                .unwrap_or_else(|_| config.logging.level.as_str().to_string())
        };

        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));

        let fmt_layer = if config.logging.structured {
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .compact()
        } else {
            tracing_subscriber::fmt::layer().with_target(false).compact()
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| SimError::config(format!("Failed to initialize logging: {}", e)))?;

        Ok(())
    }
}

/// Execute simlab.
pub async fn execute(cli: Cli) -> Result<()> {
    let config = cli.load_config().await?;
    cli.init_logging(&config)?;

    match cli.config_path() {
        Some(path) => tracing::info!("Loaded configuration from: {:?}", path),
        None => tracing::debug!("No config file found, using defaults"),
    }

    if cli.check_config {
        config.scenario(&cli.scenario)?;
        config.check_port_available().await?;
        println!("Configuration is valid!");
        println!("  Listen address: {}:{}", config.server.bind_address, config.server.port);
        println!("  Actors: {}", config.population.total);
        println!("  Metrics: {}", config.metrics.len());
        println!("  Scenarios: {}", config.scenarios.len());
        println!("  Tick interval: {:?}", config.simulation.tick_interval);
        return Ok(());
    }

    if cli.list_scenarios {
        for (name, scenario) in &config.scenarios {
            println!(
                "{:<16} {:>8.0}s  {} events  {}",
                name,
                scenario.duration.as_secs_f64(),
                scenario.timeline.len(),
                scenario.description
            );
        }
        return Ok(());
    }

    let mut app = Application::new(config, &cli.scenario)?.with_duration(cli.duration);
    if cli.dev {
        match cli.config_path() {
            Some(path) => {
                tracing::info!("Development mode: watching {:?}", path);
                app = app.with_live_reload(path);
            },
            None => tracing::warn!("Development mode needs a config file, live reload disabled"),
        }
    }

    let outcome = app.run().await?;
    let failed = outcome.failed_assertions();
    if failed > 0 {
        return Err(SimError::AssertionsFailed {
            scenario: cli.scenario,
            failed,
            total: outcome.frame.status.scenario.assertions.len(),
        });
    }

    Ok(())
}
