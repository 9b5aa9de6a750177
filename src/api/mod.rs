//! HTTP surface of the simulator.
//!
//! Three read-only endpoints, all served from the most recently published
//! [`Frame`]:
//!
//! - `GET /metrics` renders the snapshot in text exposition format
//! - `GET /health` reports run state, scenario progress and tick statistics
//! - `GET /config` returns the configuration in force and the active faults
//!
//! Handlers load the frame once per request and never touch writer state, so
//! a scrape always sees a single tick.

use crate::core::{Config, Result, SimError};
use crate::metrics::{render, CONTENT_TYPE};
use crate::monitoring::{RunState, SystemHealth, TickStats};
use crate::population::SegmentCount;
use crate::scenario::{AssertionResult, FaultStatus};
use crate::simulation::Frame;
use arc_swap::ArcSwap;
use axum::{
    extract::State,
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared state handed to every handler
#[derive(Clone)]
pub struct ApiState {
    frames: Arc<ArcSwap<Frame>>,
    started: Instant,
}

impl ApiState {
    pub fn new(frames: Arc<ArcSwap<Frame>>) -> Self {
        Self {
            frames,
            started: Instant::now(),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: RunState,
    health: SystemHealth,
    version: &'static str,
    uptime_seconds: u64,
    scenario: String,
    elapsed_seconds: f64,
    duration_seconds: f64,
    generation: u64,
    instance_count: usize,
    actors: usize,
    segments: Vec<SegmentCount>,
    active_faults: Vec<FaultStatus>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    assertions: Vec<AssertionResult>,
    simulated_time: DateTime<Utc>,
    last_update: Option<DateTime<Utc>>,
    stats: TickStats,
}

/// Effective configuration plus live scenario effects
#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    scenario: String,
    seed: u64,
    load_multiplier: f64,
    active_faults: Vec<FaultStatus>,
    config: Arc<Config>,
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    error: String,
    code: u16,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
            code: status.as_u16(),
        }),
    )
        .into_response()
}

/// Build the router; `cors` adds permissive CORS headers.
pub fn router(state: ApiState, cors: bool) -> Router {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/config", get(config_handler))
        .fallback(not_found)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if cors {
        app.layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
    } else {
        app
    }
}

/// Serve `app` on `listener` until `shutdown` resolves.
///
/// In-flight requests finish before this returns.
pub async fn serve<F>(listener: TcpListener, app: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    tracing::info!("Exposition server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("Exposition server on {} closed", addr);
    Ok(())
}

/// Bind the configured address.
pub async fn bind(config: &Config) -> Result<TcpListener> {
    let addr = (config.server.bind_address, config.server.port);
    TcpListener::bind(addr).await.map_err(|e| {
        SimError::config(format!(
            "Failed to bind {}:{}: {}",
            config.server.bind_address, config.server.port, e
        ))
    })
}

async fn metrics_handler(State(state): State<ApiState>) -> Response {
    let frame = state.frames.load_full();

    match render(&frame.snapshot) {
        Ok(body) => ([(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            tracing::error!("Failed to render generation {}: {}", frame.snapshot.generation, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        },
    }
}

async fn health_handler(State(state): State<ApiState>) -> Json<HealthResponse> {
    let frame = state.frames.load_full();
    let status = &frame.status;

    Json(HealthResponse {
        status: status.state,
        health: status.health,
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.started.elapsed().as_secs(),
        scenario: status.scenario.name.clone(),
        elapsed_seconds: status.scenario.elapsed_secs,
        duration_seconds: status.scenario.duration_secs,
        generation: frame.snapshot.generation,
        instance_count: frame.snapshot.instance_count(),
        actors: status.actors,
        segments: status.segments.clone(),
        active_faults: status.scenario.active_faults.clone(),
        assertions: status.scenario.assertions.clone(),
        simulated_time: status.simulated_time,
        last_update: status.last_update,
        stats: status.stats.clone(),
    })
}

async fn config_handler(State(state): State<ApiState>) -> Json<ConfigResponse> {
    let frame = state.frames.load_full();

    Json(ConfigResponse {
        scenario: frame.status.scenario.name.clone(),
        seed: frame.status.seed,
        load_multiplier: frame.status.scenario.load_multiplier,
        active_faults: frame.status.scenario.active_faults.clone(),
        config: Arc::clone(&frame.config),
    })
}

async fn not_found(uri: Uri) -> Response {
    error_response(StatusCode::NOT_FOUND, format!("No route for {}", uri.path()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ConfigBuilder;
    use crate::simulation::Simulator;
    use std::time::Duration;

    fn state(ticks: usize) -> ApiState {
        let config = ConfigBuilder::new().seed(5).population(8).build().unwrap();
        let mut sim = Simulator::new(Arc::new(config), "model_outage", None).unwrap();
        for i in 0..ticks {
            sim.tick(1_700_000_000_000 + i as i64);
        }
        let state = if ticks == 0 {
            RunState::Starting
        } else {
            RunState::Running
        };
        let frame = sim.frame(state, Utc::now());
        ApiState::new(Arc::new(ArcSwap::from_pointee(frame)))
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_before_first_tick_has_no_samples() {
        let response = metrics_handler(State(state(0))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            CONTENT_TYPE
        );

        let body = body_text(response).await;
        assert!(body.contains("# TYPE"));
        assert!(body
            .lines()
            .all(|line| line.is_empty() || line.starts_with('#')));
    }

    #[tokio::test]
    async fn test_metrics_after_ticks() {
        let body = body_text(metrics_handler(State(state(3))).await).await;
        assert!(body.lines().any(|line| !line.starts_with('#')));
    }

    #[tokio::test]
    async fn test_health_reports_scenario() {
        let Json(health) = health_handler(State(state(2))).await;
        assert_eq!(health.status, RunState::Running);
        assert_eq!(health.scenario, "model_outage");
        assert_eq!(health.generation, 2);
        assert_eq!(health.actors, 8);
        assert!(health.instance_count > 0);
    }

    #[tokio::test]
    async fn test_config_reports_faults() {
        let state = state(0);
        {
            let frame = state.frames.load_full();
            assert_eq!(frame.config.simulation.tick_interval, Duration::from_secs(10));
        }
        let Json(config) = config_handler(State(state)).await;
        assert_eq!(config.seed, 5);
        assert!(config.active_faults.is_empty());
        assert_eq!(config.load_multiplier, 1.0);
    }

    #[tokio::test]
    async fn test_not_found_is_json() {
        let response = not_found(Uri::from_static("/nope")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_text(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["code"], 404);
        assert_eq!(json["error"], "No route for /nope");
    }
}
