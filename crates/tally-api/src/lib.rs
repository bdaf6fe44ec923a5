//! tally-api — HTTP front for the Tally gateway.
//!
//! Provides the axum router that clients push observations to and
//! Prometheus scrapes from. The aggregation itself is behind a
//! [`Collector`](tally_metrics::Collector) chosen when the router is built.
//!
//! # Routes
//!
//! | Method | Path | Auth | Description |
//! |---|---|---|---|
//! | POST | `/ingest` | yes | Push one JSON record or an array of records |
//! | GET | `/metrics` | yes | Prometheus exposition (gzip when accepted) |
//! | DELETE | `/metrics` | yes | Drop all aggregated state |
//! | GET | `/ping` | no | Liveness check, always `PONG` |
//!
//! "Auth" routes only require credentials when Basic auth is configured.

pub mod auth;
pub mod handlers;
pub mod ingest;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use tally_core::config::Credentials;
use tally_metrics::Collector;

pub use auth::BasicAuth;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub collector: Arc<dyn Collector>,
    pub auth: Option<Arc<BasicAuth>>,
}

impl ApiState {
    pub fn new(collector: Arc<dyn Collector>) -> Self {
        Self {
            collector,
            auth: None,
        }
    }

    /// Require Basic auth on every route except `/ping`.
    pub fn with_auth(mut self, credentials: Credentials) -> Self {
        self.auth = Some(Arc::new(BasicAuth::new(credentials)));
        self
    }
}

/// Build the complete router (ingest + scrape + health).
pub fn build_router(state: ApiState) -> Router {
    let auth = state.auth.clone();

    let protected = Router::new()
        .route("/ingest", post(handlers::ingest))
        .route(
            "/metrics",
            get(handlers::prometheus_metrics).delete(handlers::reset_metrics),
        )
        .with_state(state);

    let protected = match auth {
        Some(auth) => protected.layer(middleware::from_fn_with_state(auth, auth::require_basic_auth)),
        None => protected,
    };

    Router::new()
        .route("/ping", get(handlers::ping))
        .merge(protected)
}
