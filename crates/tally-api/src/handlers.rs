//! HTTP handlers.
//!
//! Handlers call into the collector synchronously; those calls hold the
//! registry lock only for in-memory work. Body parsing, gzip and response
//! writing all happen outside it.

use std::io::Write;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE, VARY};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, info, warn};

use crate::ingest;
use crate::ApiState;

/// Content type of the Prometheus text exposition format.
pub const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// Per-request ingest outcome.
#[derive(Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IngestSummary {
    /// Applied to the collector.
    pub accepted: usize,
    /// Failed to decode; never reached the collector.
    pub dropped: usize,
    /// Decoded, but refused by the collector (type conflict, bad value).
    pub rejected: usize,
}

// ── Ingest ─────────────────────────────────────────────────────

/// POST /ingest
pub async fn ingest(State(state): State<ApiState>, body: Bytes) -> Response {
    let records = match ingest::split_body(&body) {
        Ok(records) => records,
        Err(e) => {
            warn!(error = %e, bytes = body.len(), "dropping unparseable ingest body");
            return error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response();
        }
    };

    let mut summary = IngestSummary::default();
    for raw in records {
        let observation = match ingest::decode_record(raw) {
            Ok(observation) => observation,
            Err(e) => {
                warn!(error = %e, "dropping malformed record");
                summary.dropped += 1;
                continue;
            }
        };

        let name = observation.name.clone();
        match state.collector.apply(observation) {
            Ok(()) => summary.accepted += 1,
            Err(e) => {
                warn!(metric = %name, error = %e, "observation rejected");
                summary.rejected += 1;
            }
        }
    }

    debug!(
        accepted = summary.accepted,
        dropped = summary.dropped,
        rejected = summary.rejected,
        "ingest batch processed"
    );
    ApiResponse::ok(summary).into_response()
}

// ── Scrape ─────────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    let body = state.collector.render();

    if accepts_gzip(&headers) {
        match gzip(body.as_bytes()) {
            Ok(compressed) => {
                return (
                    StatusCode::OK,
                    [
                        (CONTENT_TYPE, EXPOSITION_CONTENT_TYPE),
                        (CONTENT_ENCODING, "gzip"),
                        (VARY, "accept-encoding"),
                    ],
                    compressed,
                )
                    .into_response();
            }
            // Only this response falls back to identity encoding.
            Err(e) => warn!(error = %e, "gzip failed, sending uncompressed"),
        }
    }

    (
        StatusCode::OK,
        [(CONTENT_TYPE, EXPOSITION_CONTENT_TYPE), (VARY, "accept-encoding")],
        body,
    )
        .into_response()
}

/// DELETE /metrics
pub async fn reset_metrics(State(state): State<ApiState>) -> Response {
    state.collector.reset();
    info!("aggregated state reset by operator");
    ApiResponse::ok("reset").into_response()
}

// ── Health ─────────────────────────────────────────────────────

/// GET /ping
pub async fn ping() -> &'static str {
    "PONG"
}

/// Whether `Accept-Encoding` allows gzip.
///
/// An explicit `gzip` entry decides; otherwise `*` does. Either is refused
/// with `q=0`.
fn accepts_gzip(headers: &HeaderMap) -> bool {
    let mut explicit = None;
    let mut wildcard = None;

    let items = headers
        .get_all(ACCEPT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','));
    for item in items {
        let mut parts = item.split(';');
        let coding = parts.next().unwrap_or_default().trim();
        let allowed = !parts.any(|param| {
            param
                .trim()
                .strip_prefix("q=")
                .and_then(|q| q.trim().parse::<f32>().ok())
                == Some(0.0)
        });

        if coding.eq_ignore_ascii_case("gzip") {
            explicit = Some(allowed);
        } else if coding == "*" {
            wildcard = Some(allowed);
        }
    }

    explicit.or(wildcard).unwrap_or(false)
}

fn gzip(body: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body)?;
    encoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::Arc;

    use axum::http::HeaderValue;
    use flate2::read::GzDecoder;
    use http_body_util::BodyExt;
    use tally_core::{Labels, Observation};
    use tally_metrics::{Aggregator, Registry};

    fn test_state() -> (ApiState, Arc<Registry>) {
        let registry = Arc::new(Registry::default());
        let collector = Arc::new(Aggregator::new(registry.clone()));
        (ApiState::new(collector), registry)
    }

    async fn body_bytes(resp: Response) -> Vec<u8> {
        resp.into_body().collect().await.unwrap().to_bytes().to_vec()
    }

    fn accept(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[tokio::test]
    async fn ping_returns_pong() {
        assert_eq!(ping().await, "PONG");
    }

    #[tokio::test]
    async fn prometheus_endpoint_returns_text() {
        let (state, _) = test_state();
        state.collector.apply(Observation::counter("hits", 3.0)).unwrap();

        let resp = prometheus_metrics(State(state), HeaderMap::new()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get(CONTENT_TYPE).unwrap().to_str().unwrap();
        assert!(content_type.starts_with("text/plain; version=0.0.4"));
        assert!(resp.headers().get(CONTENT_ENCODING).is_none());

        let body = body_bytes(resp).await;
        assert_eq!(body, b"# HELP hits\n# TYPE hits counter\nhits 3\n");
    }

    #[tokio::test]
    async fn prometheus_endpoint_gzips_when_accepted() {
        let (state, _) = test_state();
        state.collector.apply(Observation::gauge("temp", 21.5).with_label("room", "a")).unwrap();
        let plain = state.collector.render();

        let resp = prometheus_metrics(State(state), accept("br, gzip;q=0.8")).await;
        assert_eq!(resp.headers().get(CONTENT_ENCODING).unwrap(), "gzip");

        let compressed = body_bytes(resp).await;
        let mut decoded = String::new();
        GzDecoder::new(&compressed[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, plain);
    }

    #[tokio::test]
    async fn ingest_counts_outcomes() {
        let (state, registry) = test_state();
        let body = Bytes::from_static(
            br#"[
                {"type": "counter", "name": "jobs", "value": 2, "labels": {"queue": "a"}},
                {"type": "counter", "name": "jobs", "value": 3, "labels": {"queue": "a"}},
                {"type": "gauge", "name": "jobs", "value": 1},
                {"type": "bogus", "name": "x", "value": 1},
                {"type": "custom", "raw": true}
            ]"#,
        );

        let resp = ingest(State(state), body).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let json: serde_json::Value = serde_json::from_slice(&body_bytes(resp).await).unwrap();
        let summary: IngestSummary = serde_json::from_value(json["data"].clone()).unwrap();
        // gauge conflicts with the counter; custom has no delegate.
        assert_eq!(
            summary,
            IngestSummary {
                accepted: 2,
                dropped: 1,
                rejected: 2,
            }
        );

        let labels = Labels::new().with("queue", "a");
        assert_eq!(
            registry.series_value("jobs", &labels).and_then(|v| v.scalar()),
            Some(5.0)
        );
    }

    #[tokio::test]
    async fn ingest_rejects_non_json_body() {
        let (state, registry) = test_state();
        let resp = ingest(State(state), Bytes::from_static(b"counter jobs 1")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(registry.family_count(), 0);
    }

    #[tokio::test]
    async fn reset_drops_state() {
        let (state, registry) = test_state();
        state.collector.apply(Observation::gauge("g", 1.0)).unwrap();

        let resp = reset_metrics(State(state)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(registry.family_count(), 0);
    }

    #[test]
    fn accept_encoding_negotiation() {
        assert!(accepts_gzip(&accept("gzip")));
        assert!(accepts_gzip(&accept("deflate, GZIP")));
        assert!(accepts_gzip(&accept("gzip;q=0.5")));
        assert!(!accepts_gzip(&accept("gzip;q=0")));
        assert!(!accepts_gzip(&accept("br, deflate")));
        assert!(!accepts_gzip(&HeaderMap::new()));
    }

    #[test]
    fn wildcard_encoding_allows_gzip() {
        assert!(accepts_gzip(&accept("*")));
        assert!(accepts_gzip(&accept("br, *;q=0.1")));
        assert!(!accepts_gzip(&accept("*;q=0")));
        // An explicit refusal beats the wildcard.
        assert!(!accepts_gzip(&accept("gzip;q=0, *")));
        assert!(accepts_gzip(&accept("gzip, *;q=0")));
    }

    #[tokio::test]
    async fn prometheus_endpoint_gzips_for_wildcard() {
        let (state, _) = test_state();
        state.collector.apply(Observation::counter("hits", 1.0)).unwrap();
        let resp = prometheus_metrics(State(state), accept("*")).await;
        assert_eq!(resp.headers().get(CONTENT_ENCODING).unwrap(), "gzip");
    }
}
