//! Auth API client (GoTrue-compatible `/auth/v1` endpoints).
//!
//! DESIGN
//! ======
//! One `GoTrueClient` per browser session. It keeps that session's tokens
//! in memory only and broadcasts an [`AuthEvent`] after every change, so the
//! session context can react without polling. Wire parsing is kept in pure
//! functions for testability.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use tokio::sync::{RwLock, broadcast};

use super::types::{AuthEvent, AuthEventKind, AuthUser, BackendError, Session, auth_error};
use super::{AuthApi, AuthFactory};
use crate::config::BackendConfig;

const EVENT_CAPACITY: usize = 16;
const CLIENT_INFO: &str = "portal-rs";

pub(crate) fn build_http(config: &BackendConfig) -> Result<reqwest::Client, BackendError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeouts.request_secs))
        .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
        .build()
        .map_err(|e| BackendError::HttpClientBuild(e.to_string()))
}

pub(crate) fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

// =============================================================================
// FACTORY
// =============================================================================

/// Hands out independent auth clients sharing one connection pool.
pub struct GoTrueFactory {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
}

impl GoTrueFactory {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        Ok(Self {
            http: build_http(config)?,
            base_url: format!("{}/auth/v1", config.url),
            anon_key: config.anon_key.clone(),
        })
    }
}

impl AuthFactory for GoTrueFactory {
    fn new_client(&self) -> Arc<dyn AuthApi> {
        Arc::new(GoTrueClient::new(self.http.clone(), self.base_url.clone(), self.anon_key.clone()))
    }
}

// =============================================================================
// CLIENT
// =============================================================================

pub struct GoTrueClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    session: RwLock<Option<Session>>,
    events: broadcast::Sender<AuthEvent>,
}

impl GoTrueClient {
    #[must_use]
    pub fn new(http: reqwest::Client, base_url: String, anon_key: String) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { http, base_url, anon_key, session: RwLock::new(None), events }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.base_url))
            .header("apikey", &self.anon_key)
            .header("x-client-info", CLIENT_INFO)
    }

    async fn send(req: reqwest::RequestBuilder) -> Result<String, BackendError> {
        let response = req.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        if !(200..300).contains(&status) {
            return Err(auth_error(status, &text));
        }
        Ok(text)
    }

    async fn store(&self, session: Session, kind: AuthEventKind) -> Session {
        *self.session.write().await = Some(session.clone());
        self.emit(kind, Some(session.clone()));
        session
    }

    fn emit(&self, kind: AuthEventKind, session: Option<Session>) {
        // No receivers is fine; nobody is watching this client yet.
        let _ = self.events.send(AuthEvent { kind, session });
    }

    async fn access_token(&self) -> Result<String, BackendError> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone())
            .ok_or(BackendError::NoSession)
    }

    async fn grant_refresh(&self, refresh_token: &str) -> Result<Session, BackendError> {
        let req = self
            .request(reqwest::Method::POST, "/token?grant_type=refresh_token")
            .json(&serde_json::json!({ "refresh_token": refresh_token }));
        let text = Self::send(req).await?;
        parse_session(&text, now_secs())
    }
}

#[async_trait::async_trait]
impl AuthApi for GoTrueClient {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        let req = self
            .request(reqwest::Method::POST, "/token?grant_type=password")
            .json(&serde_json::json!({ "email": email, "password": password }));
        let text = Self::send(req).await?;
        let session = parse_session(&text, now_secs())?;
        Ok(self.store(session, AuthEventKind::SignedIn).await)
    }

    async fn sign_up(&self, email: &str, password: &str, name: &str) -> Result<AuthUser, BackendError> {
        let req = self
            .request(reqwest::Method::POST, "/signup")
            .json(&serde_json::json!({ "email": email, "password": password, "data": { "name": name } }));
        let text = Self::send(req).await?;
        parse_signup_user(&text)
    }

    async fn sign_out(&self) -> Result<(), BackendError> {
        let previous = self.session.write().await.take();
        self.emit(AuthEventKind::SignedOut, None);
        let Some(previous) = previous else {
            return Ok(());
        };
        let req = self
            .request(reqwest::Method::POST, "/logout")
            .bearer_auth(&previous.access_token);
        Self::send(req).await.map(|_| ())
    }

    async fn get_session(&self) -> Result<Option<Session>, BackendError> {
        Ok(self.session.read().await.clone())
    }

    async fn refresh_session(&self) -> Result<Session, BackendError> {
        let refresh_token = self
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.refresh_token.clone())
            .ok_or(BackendError::NoSession)?;
        let session = self.grant_refresh(&refresh_token).await?;
        Ok(self.store(session, AuthEventKind::TokenRefreshed).await)
    }

    async fn update_password(&self, new_password: &str) -> Result<(), BackendError> {
        let token = self.access_token().await?;
        let req = self
            .request(reqwest::Method::PUT, "/user")
            .bearer_auth(token)
            .json(&serde_json::json!({ "password": new_password }));
        Self::send(req).await?;
        let session = self.session.read().await.clone();
        self.emit(AuthEventKind::UserUpdated, session);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_at: Option<i64>,
    expires_in: Option<i64>,
    user: AuthUser,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SignupResponse {
    /// Auto-confirm on: a full session comes back.
    WithSession { user: AuthUser },
    /// Email confirmation on: the bare user object.
    Bare(AuthUser),
}

// =============================================================================
// PARSING
// =============================================================================

fn parse_session(json: &str, now: i64) -> Result<Session, BackendError> {
    let resp: TokenResponse = serde_json::from_str(json).map_err(|e| BackendError::Decode(e.to_string()))?;
    let expires_at = resp
        .expires_at
        .or_else(|| resp.expires_in.map(|secs| now.saturating_add(secs)))
        .unwrap_or(0);
    Ok(Session { access_token: resp.access_token, refresh_token: resp.refresh_token, expires_at, user: resp.user })
}

fn parse_signup_user(json: &str) -> Result<AuthUser, BackendError> {
    let resp: SignupResponse = serde_json::from_str(json).map_err(|e| BackendError::Decode(e.to_string()))?;
    Ok(match resp {
        SignupResponse::WithSession { user } | SignupResponse::Bare(user) => user,
    })
}

#[cfg(test)]
#[path = "gotrue_test.rs"]
mod tests;
