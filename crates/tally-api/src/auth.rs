//! HTTP Basic authentication.
//!
//! Credentials are resolved once at startup (see
//! [`TallyConfig::credentials`](tally_core::TallyConfig::credentials)); the
//! middleware only compares, in constant time, against what the client sent.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use subtle::ConstantTimeEq;
use tracing::debug;

use tally_core::config::Credentials;

pub const REALM: &str = "tally";

/// Expected credentials for Basic auth.
#[derive(Debug)]
pub struct BasicAuth {
    credentials: Credentials,
}

impl BasicAuth {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    /// Check an `Authorization: Basic ...` header.
    pub fn verify(&self, headers: &HeaderMap) -> bool {
        let Some((user, pass)) = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(decode_basic)
        else {
            return false;
        };

        // Evaluate both before combining so timing does not reveal which failed.
        let user_ok = user.as_bytes().ct_eq(self.credentials.username.as_bytes());
        let pass_ok = pass.as_bytes().ct_eq(self.credentials.password.as_bytes());
        (user_ok & pass_ok).into()
    }
}

/// Split a `Basic <base64(user:pass)>` header value.
fn decode_basic(value: &str) -> Option<(String, String)> {
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// 401 with a Basic challenge. Never carries metric content.
pub fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(WWW_AUTHENTICATE, format!("Basic realm=\"{REALM}\""))],
        "Unauthorized",
    )
        .into_response()
}

/// Middleware guarding routes with [`BasicAuth`].
pub async fn require_basic_auth(
    State(auth): State<Arc<BasicAuth>>,
    req: Request,
    next: Next,
) -> Response {
    if auth.verify(req.headers()) {
        next.run(req).await
    } else {
        debug!(path = %req.uri().path(), "rejected unauthenticated request");
        unauthorized()
    }
}
