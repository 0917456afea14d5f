//! Backend types: sessions, auth events, and the shared error type.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// PostgREST code for "single-object read matched zero rows".
pub const NOT_FOUND_CODE: &str = "PGRST116";

/// Postgres `unique_violation`.
pub const UNIQUE_VIOLATION_CODE: &str = "23505";

// =============================================================================
// ERROR
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The HTTP request never produced a response.
    #[error("request failed: {0}")]
    Request(String),

    /// The auth API rejected the call.
    #[error("{message}")]
    Auth { status: u16, code: Option<String>, message: String },

    /// The data API rejected the call.
    #[error("{message}")]
    Query { status: u16, code: Option<String>, message: String },

    /// A response body did not match the expected shape.
    #[error("response decode failed: {0}")]
    Decode(String),

    /// The operation needs a signed-in session and there is none.
    #[error("no active session")]
    NoSession,

    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

impl BackendError {
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Request(_) => "E_BACKEND_REQUEST",
            Self::Auth { .. } => "E_AUTH",
            Self::Query { .. } => "E_QUERY",
            Self::Decode(_) => "E_DECODE",
            Self::NoSession => "E_NO_SESSION",
            Self::HttpClientBuild(_) => "E_HTTP_CLIENT_BUILD",
        }
    }

    fn code(&self) -> Option<&str> {
        match self {
            Self::Auth { code, .. } | Self::Query { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.code() == Some(NOT_FOUND_CODE)
    }

    #[must_use]
    pub fn is_unique_violation(&self) -> bool {
        self.code() == Some(UNIQUE_VIOLATION_CODE) || self.to_string().contains("duplicate key")
    }

    #[must_use]
    pub fn is_already_registered(&self) -> bool {
        match self {
            Self::Auth { code, message, .. } => {
                code.as_deref() == Some("user_already_exists")
                    || message.contains("already registered")
                    || message.contains("already exists")
            }
            _ => false,
        }
    }

    /// Unauthorized / bad credentials from the auth API.
    #[must_use]
    pub fn is_invalid_credentials(&self) -> bool {
        matches!(self, Self::Auth { status: 400 | 401, .. })
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() { Self::Decode(e.to_string()) } else { Self::Request(e.to_string()) }
    }
}

/// Error body shapes returned by the auth and data APIs. Fields vary by
/// endpoint and version, so everything is optional.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    code: Option<serde_json::Value>,
    error_code: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
    msg: Option<String>,
    message: Option<String>,
}

impl ErrorBody {
    fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_default()
    }

    fn code(&self) -> Option<String> {
        if let Some(c) = &self.error_code {
            return Some(c.clone());
        }
        match &self.code {
            // Auth API uses the numeric HTTP status as `code`; not useful.
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            _ => self.error.clone(),
        }
    }

    fn message(&self, status: u16, raw: &str) -> String {
        self.error_description
            .clone()
            .or_else(|| self.msg.clone())
            .or_else(|| self.message.clone())
            .or_else(|| self.error.clone())
            .unwrap_or_else(|| if raw.trim().is_empty() { format!("status {status}") } else { raw.trim().to_owned() })
    }
}

pub(crate) fn auth_error(status: u16, body: &str) -> BackendError {
    let parsed = ErrorBody::parse(body);
    BackendError::Auth { status, code: parsed.code(), message: parsed.message(status, body) }
}

pub(crate) fn query_error(status: u16, body: &str) -> BackendError {
    let parsed = ErrorBody::parse(body);
    BackendError::Query { status, code: parsed.code(), message: parsed.message(status, body) }
}

// =============================================================================
// SESSION
// =============================================================================

/// Minimal auth identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

/// Credential pair plus identity. Owned by the auth client.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds. Zero when the server did not say.
    #[serde(default)]
    pub expires_at: i64,
    pub user: AuthUser,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"[redacted]")
            .field("refresh_token", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEventKind {
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

/// Change notification from the auth client.
#[derive(Debug, Clone)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    /// Session after the change; `None` after sign-out.
    pub session: Option<Session>,
}

// =============================================================================
// RECORDS
// =============================================================================

/// Insert payload for the `users` table.
#[derive(Debug, Clone, Serialize)]
pub struct NewProfile {
    pub uid: Uuid,
    pub name: String,
    pub email: String,
    pub role: crate::profile::Role,
    pub status: String,
    pub join_date: String,
}

/// Insert payload for the `support_tickets` table.
#[derive(Debug, Clone, Serialize)]
pub struct NewTicket {
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
    pub user_id: Uuid,
    pub status: String,
    pub created_at: String,
}

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;
