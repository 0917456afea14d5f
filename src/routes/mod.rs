//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! This module binds the portal's JSON API under `/api`, the landing probe at
//! `/`, and `/healthz` under a single Axum router. When the backend is not
//! configured, `/` serves plain-text setup instructions and every `/api`
//! route answers 503.

pub mod auth;
pub mod support;
pub mod team;

#[cfg(test)]
pub(crate) mod test_client;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, patch, post};
use axum_extra::extract::cookie::CookieJar;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::backend::BackendError;
use crate::profile::Landing;
use crate::state::AppState;

pub const SETUP_INSTRUCTIONS: &str = "\
Portal setup required

The portal is not connected to its backend yet.

1. Create a project with your backend provider and open its API settings.
2. Copy the project URL and the anon (public) key.
3. Put them in .env next to the binary:
     SUPABASE_URL=https://<project>.supabase.co
     SUPABASE_ANON_KEY=<anon key>
4. Create the `users` and `support_tickets` tables and an admin auth user
   with a matching `users` row (role = admin).
5. Restart the server.
";

/// Assemble the full application router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(landing))
        .route("/healthz", get(healthz))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        .route("/api/profile/password", post(auth::change_password))
        .route("/api/team", get(team::list).post(team::create))
        .route("/api/team/{id}", axum::routing::delete(team::remove))
        .route("/api/team/{id}/role", patch(team::update_role))
        .route("/api/support", post(support::submit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

// =============================================================================
// LANDING
// =============================================================================

#[derive(Debug, Serialize)]
pub struct LandingResponse {
    pub landing: Landing,
    pub path: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LandingResponse {
    #[must_use]
    pub fn new(landing: Landing, error: Option<String>) -> Self {
        Self { landing, path: landing.path(), error }
    }
}

/// `GET /`: setup instructions, or where this browser session belongs.
async fn landing(State(state): State<AppState>, jar: CookieJar) -> Response {
    if state.backend.is_none() {
        return (StatusCode::OK, SETUP_INSTRUCTIONS).into_response();
    }
    let ctx = match auth::session_token(&jar) {
        Some(token) => state.session(token).await,
        None => None,
    };
    let body = match ctx {
        Some(ctx) => {
            let snapshot = ctx.snapshot();
            LandingResponse::new(Landing::from_snapshot(&snapshot), snapshot.error)
        }
        None => LandingResponse::new(Landing::Login, None),
    };
    Json(body).into_response()
}

// =============================================================================
// ERRORS
// =============================================================================

/// JSON error response: `{ "error": message, "code": code }`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    #[must_use]
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self { status, code, message: message.into() }
    }

    #[must_use]
    pub fn not_configured() -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "E_NOT_CONFIGURED", "portal backend is not configured")
    }

    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "E_UNAUTHORIZED", message)
    }

    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "E_FORBIDDEN", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message, "code": self.code });
        (self.status, Json(body)).into_response()
    }
}

pub(crate) fn backend_error_to_status(err: &BackendError) -> StatusCode {
    match err {
        BackendError::NoSession | BackendError::Auth { status: 400 | 401, .. } => StatusCode::UNAUTHORIZED,
        BackendError::Auth { status: 403, .. } | BackendError::Query { status: 401 | 403, .. } => {
            StatusCode::FORBIDDEN
        }
        BackendError::Auth { status: 422, .. } => StatusCode::UNPROCESSABLE_ENTITY,
        BackendError::Query { status: 409, .. } => StatusCode::CONFLICT,
        BackendError::Request(_)
        | BackendError::Auth { .. }
        | BackendError::Query { .. }
        | BackendError::Decode(_)
        | BackendError::HttpClientBuild(_) => StatusCode::BAD_GATEWAY,
    }
}

impl From<BackendError> for ApiError {
    fn from(err: BackendError) -> Self {
        let status = backend_error_to_status(&err);
        if status == StatusCode::BAD_GATEWAY {
            tracing::error!(error = %err, code = err.error_code(), "backend call failed");
        }
        Self::new(status, err.error_code(), err.to_string())
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
