//! Portal configuration parsed from environment variables.
//!
//! SYSTEM CONTEXT
//! ==============
//! Startup reads this once. A missing or placeholder backend URL/key is not
//! fatal: the server comes up in setup mode and serves instructions instead
//! of the API.

use std::time::Duration;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_TEAM_QUERY_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_PROFILE_RESOLVE_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SESSION_IDLE_TIMEOUT_SECS: u64 = 8 * 60 * 60;

/// Value shipped in the sample `.env`; treated the same as unset.
pub const PLACEHOLDER_URL: &str = "your_project_url_here";

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    Missing(&'static str),
    #[error("{0} still holds the placeholder value")]
    Placeholder(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

/// Connection settings for the hosted backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Project base URL without a trailing slash.
    pub url: String,
    /// Public (anon) API key sent as `apikey` on every request.
    pub anon_key: String,
    pub timeouts: BackendTimeouts,
}

impl BackendConfig {
    /// Load from `SUPABASE_URL` and `SUPABASE_ANON_KEY`.
    ///
    /// # Errors
    ///
    /// Returns an error if either variable is unset, empty, or still the
    /// sample placeholder.
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = parse_url(std::env::var("SUPABASE_URL").ok().as_deref())?;
        let anon_key = std::env::var("SUPABASE_ANON_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("SUPABASE_ANON_KEY"))?;
        let timeouts = BackendTimeouts {
            request_secs: env_parse("BACKEND_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_secs: env_parse("BACKEND_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS),
        };
        Ok(Self { url, anon_key, timeouts })
    }
}

fn parse_url(raw: Option<&str>) -> Result<String, ConfigError> {
    let raw = raw
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing("SUPABASE_URL"))?;
    if raw == PLACEHOLDER_URL {
        return Err(ConfigError::Placeholder("SUPABASE_URL"));
    }
    Ok(raw.trim_end_matches('/').to_owned())
}

/// Everything the server needs at startup.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub port: u16,
    /// `Err` puts the server in setup mode.
    pub backend: Result<BackendConfig, ConfigError>,
    pub team_query_timeout: Duration,
    pub profile_resolve_timeout: Duration,
    /// Unused browser sessions are evicted after this long. Also the
    /// session cookie's max-age.
    pub session_idle_timeout: Duration,
    pub form_relay_url: Option<String>,
    pub cookie_secure: bool,
}

impl PortalConfig {
    /// Build from the process environment. Never fails; backend problems
    /// are carried in [`PortalConfig::backend`].
    #[must_use]
    pub fn from_env() -> Self {
        let backend = BackendConfig::from_env();
        let cookie_secure = env_bool("COOKIE_SECURE").unwrap_or_else(|| {
            backend
                .as_ref()
                .map(|b| b.url.starts_with("https://"))
                .unwrap_or(false)
        });
        Self {
            port: env_parse("PORT", DEFAULT_PORT),
            backend,
            team_query_timeout: Duration::from_secs(env_parse(
                "TEAM_QUERY_TIMEOUT_SECS",
                DEFAULT_TEAM_QUERY_TIMEOUT_SECS,
            )),
            profile_resolve_timeout: Duration::from_secs(env_parse(
                "PROFILE_RESOLVE_TIMEOUT_SECS",
                DEFAULT_PROFILE_RESOLVE_TIMEOUT_SECS,
            )),
            session_idle_timeout: Duration::from_secs(env_parse(
                "SESSION_IDLE_TIMEOUT_SECS",
                DEFAULT_SESSION_IDLE_TIMEOUT_SECS,
            )),
            form_relay_url: std::env::var("FORM_RELAY_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            cookie_secure,
        }
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.backend.is_ok()
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

pub(crate) fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .and_then(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
