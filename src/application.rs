//! Main application entry point for the simulator.

use crate::api::{self, ApiState};
use crate::core::{Config, ConfigWatcher, Result};
use crate::monitoring::RunState;
use crate::simulation::{Frame, Simulator, TickLoop};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Coordinates the tick loop, the exposition server and shutdown.
pub struct Application {
    config: Config,
    scenario: String,
    duration: Option<Duration>,
    /// Config file to watch in development mode
    watch_path: Option<PathBuf>,
}

/// How a run ended
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub state: RunState,
    /// Last frame published by the tick loop
    pub frame: Arc<Frame>,
}

impl RunOutcome {
    /// Number of assertions that did not hold
    pub fn failed_assertions(&self) -> usize {
        self.frame
            .status
            .scenario
            .assertions
            .iter()
            .filter(|result| !result.passed)
            .count()
    }
}

impl Application {
    /// Create an application running `scenario` from a validated config.
    pub fn new(config: Config, scenario: &str) -> Result<Self> {
        config.scenario(scenario)?;
        Ok(Self {
            config,
            scenario: scenario.to_string(),
            duration: None,
            watch_path: None,
        })
    }

    /// Override the scenario duration
    pub fn with_duration(mut self, duration: Option<Duration>) -> Self {
        self.duration = duration;
        self
    }

    /// Rebuild the simulation whenever `path` changes
    pub fn with_live_reload(mut self, path: PathBuf) -> Self {
        self.watch_path = Some(path);
        self
    }

    /// Bind the configured address and run until the scenario completes or
    /// Ctrl-C is pressed.
    pub async fn run(self) -> Result<RunOutcome> {
        let listener = api::bind(&self.config).await?;
        self.run_with_listener(listener, shutdown_signal()).await
    }

    /// Run on an already bound listener, stopping early when `signal`
    /// resolves.
    ///
    /// The tick loop finishes its in-flight tick and publishes a final frame
    /// before the server closes.
    pub async fn run_with_listener<F>(self, listener: TcpListener, signal: F) -> Result<RunOutcome>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let config = Arc::new(self.config);
        let simulator = Simulator::new(Arc::clone(&config), &self.scenario, self.duration)?;
        let (tick_loop, watcher) = match self.watch_path {
            Some(path) => {
                let watcher = ConfigWatcher::new(path, (*config).clone());
                let tick_loop = TickLoop::new(simulator).with_reload(watcher.subscribe());
                let handle = tokio::spawn(async move {
                    if let Err(e) = watcher.watch().await {
                        tracing::error!("Configuration watcher failed: {}", e);
                    }
                });
                (tick_loop, Some(handle))
            },
            None => (TickLoop::new(simulator), None),
        };

        let frames = tick_loop.frames();
        let (stop_tx, stop_rx) = watch::channel(false);

        let app = api::router(ApiState::new(Arc::clone(&frames)), config.server.cors_enabled);
        let mut server_stop = stop_rx.clone();
        let server = tokio::spawn(api::serve(listener, app, async move {
            let _ = server_stop.wait_for(|stop| *stop).await;
        }));

        tracing::info!(
            "Running scenario '{}' with {} actors",
            self.scenario,
            config.population.total
        );

        let mut ticks = tokio::spawn(tick_loop.run(stop_rx));
        let finished = tokio::select! {
            joined = &mut ticks => Some(joined?),
            _ = signal => None,
        };
        let state = match finished {
            Some(state) => state,
            None => {
                tracing::info!("Received shutdown signal, stopping...");
                let _ = stop_tx.send(true);
                ticks.await?
            },
        };

        let _ = stop_tx.send(true);
        server.await??;
        if let Some(handle) = watcher {
            handle.abort();
        }

        let frame = frames.load_full();
        tracing::info!(
            "Run {} after {} ticks",
            state.as_str(),
            frame.snapshot.generation
        );
        Ok(RunOutcome { state, frame })
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
