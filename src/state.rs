//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the parsed config, the backend handles (absent in setup mode),
//! and the registry of live session contexts keyed by the opaque token in
//! the browser's session cookie.
//!
//! Registry entries expire after `session_idle_timeout` without a lookup.
//! Expired entries are evicted on their next lookup or by the background
//! sweeper, and evicting one signs its session out remotely.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::backend::relay::FormRelay;
use crate::backend::{AuthFactory, DataStore};
use crate::config::PortalConfig;
use crate::context::SessionContext;

/// Generate a random 32-byte hex session token.
#[must_use]
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    bytes.iter().fold(String::with_capacity(64), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

// =============================================================================
// BACKEND
// =============================================================================

/// Handles to the hosted backend. Only present once configured.
#[derive(Clone)]
pub struct Backend {
    /// Builds one auth client per browser session, plus detached ones.
    pub auth: Arc<dyn AuthFactory>,
    pub store: Arc<dyn DataStore>,
    /// Optional third-party relay for support submissions.
    pub relay: Option<FormRelay>,
}

// =============================================================================
// APP STATE
// =============================================================================

/// Upper bound on how often the sweeper wakes.
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// One registered browser session.
pub struct SessionEntry {
    pub ctx: Arc<SessionContext>,
    last_seen: Instant,
}

impl SessionEntry {
    fn is_idle(&self, idle_timeout: Duration) -> bool {
        self.last_seen.elapsed() >= idle_timeout
    }
}

/// Clone is required by Axum; all inner fields are Arc-wrapped or Clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<PortalConfig>,
    /// `None` in setup mode.
    pub backend: Option<Backend>,
    pub sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
}

impl AppState {
    #[must_use]
    pub fn new(config: PortalConfig, backend: Option<Backend>) -> Self {
        Self { config: Arc::new(config), backend, sessions: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Register a context and return the cookie token that addresses it.
    pub async fn open_session(&self, ctx: Arc<SessionContext>) -> String {
        let token = generate_token();
        let entry = SessionEntry { ctx, last_seen: Instant::now() };
        self.sessions.write().await.insert(token.clone(), entry);
        tracing::debug!("session context registered");
        token
    }

    /// Look up a live context and mark it used. An idle one is evicted
    /// instead.
    pub async fn session(&self, token: &str) -> Option<Arc<SessionContext>> {
        let idle_timeout = self.config.session_idle_timeout;
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(token)?;
        if !entry.is_idle(idle_timeout) {
            entry.last_seen = Instant::now();
            return Some(Arc::clone(&entry.ctx));
        }
        let expired = sessions.remove(token)?;
        drop(sessions);
        tracing::info!("idle session evicted on lookup");
        retire(expired.ctx).await;
        None
    }

    /// Every live context, without touching their idle clocks.
    pub async fn contexts(&self) -> Vec<Arc<SessionContext>> {
        self.sessions.read().await.values().map(|e| Arc::clone(&e.ctx)).collect()
    }

    /// Unregister and tear down a context.
    pub async fn close_session(&self, token: &str) -> Option<Arc<SessionContext>> {
        let entry = self.sessions.write().await.remove(token)?;
        entry.ctx.shutdown();
        Some(entry.ctx)
    }

    /// Evict every idle entry. Returns how many were evicted.
    pub async fn sweep_idle_sessions(&self) -> usize {
        let idle_timeout = self.config.session_idle_timeout;
        let expired: Vec<SessionEntry> = {
            let mut sessions = self.sessions.write().await;
            let tokens: Vec<String> = sessions
                .iter()
                .filter(|(_, entry)| entry.is_idle(idle_timeout))
                .map(|(token, _)| token.clone())
                .collect();
            tokens.iter().filter_map(|token| sessions.remove(token)).collect()
        };
        let count = expired.len();
        for entry in expired {
            retire(entry.ctx).await;
        }
        count
    }
}

/// Sign an evicted context out remotely, then unmount it.
async fn retire(ctx: Arc<SessionContext>) {
    if let Err(e) = ctx.sign_out().await {
        tracing::warn!(error = %e, "remote sign-out of idle session failed");
    }
    ctx.shutdown();
}

/// Spawn the background task that evicts idle sessions.
pub fn spawn_session_sweeper(state: AppState) -> JoinHandle<()> {
    let interval = state.config.session_idle_timeout.min(MAX_SWEEP_INTERVAL).max(Duration::from_secs(1));
    tracing::info!(interval_secs = interval.as_secs(), "idle session sweeper configured");
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let evicted = state.sweep_idle_sessions().await;
            if evicted > 0 {
                tracing::info!(evicted, "idle sessions evicted");
            }
        }
    })
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
