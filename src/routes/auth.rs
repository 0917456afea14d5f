//! Auth routes: login, logout, current session, and password change.

use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use time::Duration;

use super::{ApiError, LandingResponse};
use crate::context::{ContextError, DELETED_ACCOUNT_MESSAGE, SessionContext, SessionSnapshot};
use crate::profile::{Landing, UserProfile};
use crate::services::account::{self, AccountError, PasswordChange};
use crate::state::{AppState, Backend};

pub const COOKIE_NAME: &str = "portal_session";

pub(crate) fn session_token(jar: &CookieJar) -> Option<&str> {
    jar.get(COOKIE_NAME).map(Cookie::value).filter(|v| !v.is_empty())
}

fn session_cookie(token: String, secure: bool, max_age: std::time::Duration) -> Cookie<'static> {
    let max_age = Duration::seconds(i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX));
    Cookie::build((COOKIE_NAME, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(max_age)
        .build()
}

fn clear_session_cookie(secure: bool) -> Cookie<'static> {
    Cookie::build((COOKIE_NAME, ""))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(Duration::ZERO)
        .build()
}

// =============================================================================
// EXTRACTORS
// =============================================================================

/// Signed-in browser session extracted from the session cookie.
/// Use as a handler parameter to require authentication.
pub struct PortalUser {
    pub ctx: Arc<SessionContext>,
    pub backend: Backend,
}

impl PortalUser {
    /// Bearer token for data-store calls made on this user's behalf.
    ///
    /// # Errors
    ///
    /// Returns 401 when the session has lapsed.
    pub async fn bearer(&self) -> Result<String, ApiError> {
        self.ctx.bearer().await.map_err(ApiError::from)
    }

    /// Resolved profile.
    ///
    /// # Errors
    ///
    /// Returns 403 while the profile is still pending.
    pub fn profile(&self) -> Result<UserProfile, ApiError> {
        self.ctx
            .snapshot()
            .profile
            .ok_or_else(|| ApiError::forbidden("profile is not available yet"))
    }
}

impl<S> FromRequestParts<S> for PortalUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut axum::http::request::Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let backend = app_state.backend.clone().ok_or_else(ApiError::not_configured)?;

        let jar = CookieJar::from_headers(&parts.headers);
        let token = session_token(&jar).ok_or_else(|| ApiError::unauthorized("not signed in"))?;
        let ctx = app_state
            .session(token)
            .await
            .ok_or_else(|| ApiError::unauthorized("not signed in"))?;

        // The context outlives a forced sign-out; drop it on first use after.
        let snapshot = ctx.snapshot();
        if snapshot.user.is_none() {
            app_state.close_session(token).await;
            let message = snapshot.error.unwrap_or_else(|| "not signed in".to_owned());
            return Err(ApiError::unauthorized(message));
        }

        Ok(Self { ctx, backend })
    }
}

/// Signed-in user whose profile has the admin role.
pub struct AdminUser {
    pub user: PortalUser,
    pub profile: UserProfile,
}

impl<S> FromRequestParts<S> for AdminUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut axum::http::request::Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = PortalUser::from_request_parts(parts, state).await?;
        let snapshot = user.ctx.snapshot();
        match snapshot.profile {
            Some(profile) if profile.is_admin() && snapshot.error.is_none() => Ok(Self { user, profile }),
            _ => Err(ApiError::forbidden("admin access required")),
        }
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

#[derive(Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    #[serde(flatten)]
    pub landing: LandingResponse,
    #[serde(flatten)]
    pub session: SessionSnapshot,
}

impl SessionResponse {
    fn from_snapshot(snapshot: SessionSnapshot) -> Self {
        Self { landing: LandingResponse::new(Landing::from_snapshot(&snapshot), None), session: snapshot }
    }
}

pub(crate) fn context_error_to_status(err: &ContextError) -> StatusCode {
    match err {
        ContextError::Backend(e) => super::backend_error_to_status(e),
        ContextError::ResolveTimeout => StatusCode::GATEWAY_TIMEOUT,
        ContextError::Closed => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// `POST /api/auth/login`: sign in, resolve the profile, set the cookie.
pub async fn login(State(state): State<AppState>, jar: CookieJar, Json(body): Json<LoginRequest>) -> Response {
    let Some(backend) = state.backend.clone() else {
        return ApiError::not_configured().into_response();
    };
    let secure = state.config.cookie_secure;

    // A second login from the same browser replaces the first.
    if let Some(old) = session_token(&jar) {
        if let Some(ctx) = state.close_session(old).await {
            let _ = ctx.sign_out().await;
        }
    }

    let ctx = SessionContext::start(backend.auth.new_client(), Arc::clone(&backend.store));
    let snapshot = match ctx
        .sign_in(body.email.trim(), &body.password, state.config.profile_resolve_timeout)
        .await
    {
        Ok(snapshot) => snapshot,
        Err(e) => {
            // A resolve timeout comes after a successful remote sign-in.
            if matches!(e, ContextError::ResolveTimeout) {
                if let Err(e) = ctx.sign_out().await {
                    tracing::warn!(error = %e, "sign-out after resolve timeout failed");
                }
            }
            ctx.shutdown();
            tracing::warn!(error = %e, "login failed");
            let status = context_error_to_status(&e);
            let code = match &e {
                ContextError::Backend(b) => b.error_code(),
                ContextError::ResolveTimeout => "E_TIMEOUT",
                ContextError::Closed => "E_CLOSED",
            };
            return ApiError::new(status, code, e.to_string()).into_response();
        }
    };

    if let Some(message) = snapshot.error.clone() {
        let status = if message == DELETED_ACCOUNT_MESSAGE {
            StatusCode::FORBIDDEN
        } else {
            // Lookup failed; release the session rather than park it.
            if let Err(e) = ctx.sign_out().await {
                tracing::warn!(error = %e, "sign-out after failed profile lookup failed");
            }
            StatusCode::BAD_GATEWAY
        };
        ctx.shutdown();
        let body = LandingResponse::new(Landing::Login, Some(message));
        return (status, Json(body)).into_response();
    }

    let landing = Landing::from_snapshot(&snapshot);
    if landing == Landing::Login {
        // Signed in, but the profile's role grants no view.
        if let Err(e) = ctx.sign_out().await {
            tracing::warn!(error = %e, "sign-out of role-less account failed");
        }
        ctx.shutdown();
        return ApiError::forbidden("account has no portal role").into_response();
    }

    let token = state.open_session(ctx).await;
    tracing::info!(landing = ?landing, "login succeeded");
    let jar = CookieJar::new().add(session_cookie(token, secure, state.config.session_idle_timeout));
    (jar, Json(SessionResponse::from_snapshot(snapshot))).into_response()
}

/// `POST /api/auth/logout`: sign out remotely, drop the context, clear the cookie.
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    if let Some(token) = session_token(&jar) {
        if let Some(ctx) = state.session(token).await {
            // Local state is cleared even when the remote call fails.
            if let Err(e) = ctx.sign_out().await {
                tracing::warn!(error = %e, "remote sign-out failed");
            }
        }
        state.close_session(token).await;
    }
    let jar = CookieJar::new().add(clear_session_cookie(state.config.cookie_secure));
    (jar, StatusCode::NO_CONTENT)
}

/// `GET /api/auth/me`: current snapshot plus landing.
pub async fn me(auth: PortalUser) -> Json<SessionResponse> {
    Json(SessionResponse::from_snapshot(auth.ctx.snapshot()))
}

pub(crate) fn account_error_to_status(err: &AccountError) -> StatusCode {
    match err {
        AccountError::PasswordMismatch | AccountError::PasswordTooShort => StatusCode::BAD_REQUEST,
        AccountError::NoUser => StatusCode::UNAUTHORIZED,
        AccountError::IncorrectPassword => StatusCode::FORBIDDEN,
        AccountError::Backend(e) => super::backend_error_to_status(e),
    }
}

/// `POST /api/profile/password`: change the signed-in user's password.
pub async fn change_password(auth: PortalUser, Json(form): Json<PasswordChange>) -> Result<StatusCode, ApiError> {
    let verifier = auth.backend.auth.new_client();
    account::change_password(&auth.ctx, verifier, &form)
        .await
        .map_err(|e| ApiError::new(account_error_to_status(&e), e.error_code(), e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
