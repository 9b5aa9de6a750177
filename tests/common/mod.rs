//! Common test utilities and fixtures.

#![allow(dead_code)]

use simlab_lib::core::{Config, ConfigBuilder};
use simlab_lib::metrics::{parse_exposition, ParsedExposition};
use simlab_lib::{Application, Result, RunOutcome};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Config that ticks every 20ms and advances a simulated minute per tick.
pub fn fast_config(seed: u64) -> Config {
    ConfigBuilder::new()
        .seed(seed)
        .population(12)
        .bind_address(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .port(0)
        .tick_interval(Duration::from_millis(20))
        .time_step(Duration::from_secs(60))
        .build()
        .unwrap()
}

/// Application serving on an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<RunOutcome>>,
}

impl TestServer {
    pub async fn start(config: Config, scenario: &str, duration: Option<Duration>) -> Self {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();

        let app = Application::new(config, scenario)
            .unwrap()
            .with_duration(duration);
        let handle = tokio::spawn(app.run_with_listener(listener, async move {
            let _ = stopped.await;
        }));

        Self {
            addr,
            stop: Some(stop),
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Send the shutdown signal and wait for the run to end.
    pub async fn stop(mut self) -> RunOutcome {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.handle.await.unwrap().unwrap()
    }

    /// Wait for the scenario to run to completion.
    pub async fn finished(self) -> RunOutcome {
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("run did not complete in time")
            .unwrap()
            .unwrap()
    }
}

/// Poll `/health` until the published generation reaches `generation`.
pub async fn wait_for_generation(client: &reqwest::Client, server: &TestServer, generation: u64) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let health: serde_json::Value = client
            .get(server.url("/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if health["generation"].as_u64().unwrap_or(0) >= generation {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "generation {} not reached, health: {}",
            generation,
            health
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Fetch and parse `/metrics`.
pub async fn scrape(client: &reqwest::Client, server: &TestServer) -> ParsedExposition {
    let body = client
        .get(server.url("/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    parse_exposition(&body).unwrap()
}

/// Assert every sample of `series` lies within `[min, max]`.
#[macro_export]
macro_rules! assert_series_within {
    ($exposition:expr, $series:expr, $min:expr, $max:expr) => {
        for sample in $exposition.series($series) {
            assert!(
                sample.value >= $min && sample.value <= $max,
                "{} {:?} = {} outside [{}, {}]",
                $series,
                sample.labels,
                sample.value,
                $min,
                $max
            );
        }
    };
}
