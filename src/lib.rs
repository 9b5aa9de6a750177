//! simlab - synthetic telemetry simulator.
//!
//! simlab generates realistic metric streams from a population of simulated
//! actors and serves them in text exposition format for a pull-based metrics
//! backend to scrape. Scenarios script load changes and fault injection over
//! simulated time, so dashboards and alert rules can be exercised without a
//! production system.
//!
//! # Features
//!
//! - **Bounded stochastic processes**: drift plus Gaussian noise per actor and metric
//! - **Counters, gauges and histograms** with label pools and hard bounds
//! - **Scenario timelines**: load increases, bursts, failures and recovery
//! - **Lock-free scrapes**: readers load an atomically published frame
//! - **Assertions** evaluated when a scenario completes
//!
//! # Architecture
//!
//! - `population`: actors and behavioral segments
//! - `generator`: the bounded random-walk step and seasonal modulation
//! - `metrics`: registry, immutable snapshots and the exposition codec
//! - `scenario`: timeline events, fault effects and assertions
//! - `simulation`: the single-writer tick loop
//! - `api`: `/metrics`, `/health` and `/config`
//! - `cli`: command-line interface
//!
//! # Example
//!
//! ```no_run
//! use simlab_lib::core::Config;
//! use simlab_lib::Application;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::new()?;
//!     let outcome = Application::new(config, "degradation")?.run().await?;
//!     println!("{} assertions failed", outcome.failed_assertions());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod api;
pub mod application;
pub mod cli;
pub mod core;
pub mod generator;
pub mod metrics;
pub mod monitoring;
pub mod population;
pub mod scenario;
pub mod simulation;

// Re-export core types for convenience
pub use crate::application::{Application, RunOutcome};
pub use crate::core::{Config, Result, SimError};
