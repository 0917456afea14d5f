//! Session/profile context for one browser session.
//!
//! DESIGN
//! ======
//! The context reconciles two asynchronous sources of truth, the auth
//! client's session and the `users` profile row, into one `SessionSnapshot`
//! published over a `watch` channel. A single listener task owns
//! initialization, auth change notifications, and scheduled token refresh,
//! so those are serialized. Resolutions started elsewhere (explicit profile
//! refresh) race the listener; generation numbers make the latest one win.
//!
//! LIFECYCLE
//! =========
//! `start` returns immediately with `loading = true`. `shutdown` (or drop)
//! clears the mounted flag and aborts the listener; after that nothing is
//! published, even by a resolution that was already in flight.
//!
//! INVARIANTS
//! ==========
//! - A profile marked Deleted is never published; resolving to one forces
//!   sign-out and sets a user-visible error. The remote sign-out completes
//!   before the error is visible.
//! - "Not found" is not an error: the profile is simply pending.
//! - Sign-out clears local state even when the remote call fails.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::gotrue::now_secs;
use crate::backend::{AuthApi, AuthEvent, AuthUser, BackendError, DataStore, Session};
use crate::profile::UserProfile;

pub const DELETED_ACCOUNT_MESSAGE: &str = "Your account has been deleted. Please contact administrator.";

/// Refresh this long before the access token expires.
const REFRESH_MARGIN_SECS: i64 = 60;

// =============================================================================
// TYPES
// =============================================================================

/// Point-in-time view of who is logged in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub user: Option<AuthUser>,
    pub profile: Option<UserProfile>,
    /// `true` while the session or profile is not yet known.
    pub loading: bool,
    pub error: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("timed out waiting for profile resolution")]
    ResolveTimeout,
    #[error("session context has been shut down")]
    Closed,
}

struct Inner {
    auth: Arc<dyn AuthApi>,
    store: Arc<dyn DataStore>,
    state: watch::Sender<SessionSnapshot>,
    mounted: AtomicBool,
    generation: AtomicU64,
}

/// Explicitly passed replacement for ambient auth state. One per browser
/// session; share it as `Arc<SessionContext>`.
pub struct SessionContext {
    inner: Arc<Inner>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

// =============================================================================
// PUBLIC API
// =============================================================================

impl SessionContext {
    /// Mount a context and start resolving any existing session in the
    /// background.
    #[must_use]
    pub fn start(auth: Arc<dyn AuthApi>, store: Arc<dyn DataStore>) -> Arc<Self> {
        let (state, _) = watch::channel(SessionSnapshot { loading: true, ..SessionSnapshot::default() });
        let inner = Arc::new(Inner {
            auth,
            store,
            state,
            mounted: AtomicBool::new(true),
            generation: AtomicU64::new(0),
        });
        // Subscribe before initializing so no change is missed in between.
        let events = inner.auth.subscribe();
        let handle = tokio::spawn(run_listener(Arc::clone(&inner), events));
        Arc::new(Self { inner, listener: Mutex::new(Some(handle)) })
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.state.borrow().clone()
    }

    /// Receiver for every published change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn auth(&self) -> &Arc<dyn AuthApi> {
        &self.inner.auth
    }

    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.inner.mounted.load(Ordering::SeqCst)
    }

    /// Access token of the current session, for data-store calls.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::NoSession`] when signed out.
    pub async fn bearer(&self) -> Result<String, BackendError> {
        self.inner
            .auth
            .get_session()
            .await?
            .map(|s| s.access_token)
            .ok_or(BackendError::NoSession)
    }

    /// Sign in and wait until the context has resolved that user (or
    /// settled on an error).
    ///
    /// # Errors
    ///
    /// Returns the auth error for rejected credentials, `ResolveTimeout` if
    /// resolution does not settle in time, or `Closed` after teardown.
    pub async fn sign_in(&self, email: &str, password: &str, wait: Duration) -> Result<SessionSnapshot, ContextError> {
        if !self.is_mounted() {
            return Err(ContextError::Closed);
        }
        let mut rx = self.inner.state.subscribe();
        self.inner.publish(|s| {
            s.loading = true;
            s.error = None;
        });

        let session = match self.inner.auth.sign_in_with_password(email, password).await {
            Ok(session) => session,
            Err(e) => {
                self.inner.publish(|s| s.loading = false);
                return Err(e.into());
            }
        };

        let uid = session.user.id;
        let settled = async {
            loop {
                {
                    let s = rx.borrow_and_update();
                    if !s.loading && (s.error.is_some() || s.user.as_ref().map(|u| u.id) == Some(uid)) {
                        return Ok::<_, watch::error::RecvError>(s.clone());
                    }
                }
                rx.changed().await?;
            }
        };
        match tokio::time::timeout(wait, settled).await {
            Ok(Ok(snapshot)) => Ok(snapshot),
            Ok(Err(_)) => Err(ContextError::Closed),
            Err(_) => {
                warn!(%uid, "profile resolution did not settle before the login timeout");
                Err(ContextError::ResolveTimeout)
            }
        }
    }

    /// Re-run profile resolution for the current session.
    ///
    /// # Errors
    ///
    /// Returns an error only if the session itself cannot be read; lookup
    /// failures land in the snapshot.
    pub async fn refresh_profile(&self) -> Result<(), BackendError> {
        let Some(session) = self.inner.auth.get_session().await? else {
            return Err(BackendError::NoSession);
        };
        let generation = self.inner.next_generation();
        self.inner.resolve(generation, &session).await;
        Ok(())
    }

    /// Invalidate the session remotely and clear all local state. Local
    /// state is cleared regardless of the remote outcome.
    ///
    /// # Errors
    ///
    /// Returns the remote failure so callers can log it.
    pub async fn sign_out(&self) -> Result<(), BackendError> {
        // Anything still resolving belongs to the old session.
        self.inner.next_generation();
        let result = self.inner.auth.sign_out().await;
        self.inner.publish(|s| *s = SessionSnapshot::default());
        if let Err(e) = &result {
            warn!(error = %e, "remote sign-out failed; local state cleared anyway");
        }
        result
    }

    /// Unmount: stop the listener and suppress further publication.
    pub fn shutdown(&self) {
        self.inner.mounted.store(false, Ordering::SeqCst);
        if let Ok(mut guard) = self.listener.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// =============================================================================
// LISTENER
// =============================================================================

async fn run_listener(inner: Arc<Inner>, mut events: broadcast::Receiver<AuthEvent>) {
    inner.initialize().await;

    // Expiry already refreshed from; a session that comes back with the same
    // expiry is not refreshed again.
    let mut refreshed_from: Option<i64> = None;

    while inner.mounted.load(Ordering::SeqCst) {
        let delay = inner.refresh_delay(refreshed_from).await;
        let refresh_due = async {
            match delay {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => inner.handle_event(event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "auth events lagged; resyncing from current session");
                    inner.initialize().await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            () = refresh_due => {
                refreshed_from = inner.current_expiry().await;
                match inner.auth.refresh_session().await {
                    Ok(_) => debug!("access token refreshed"),
                    Err(e) => warn!(error = %e, "scheduled token refresh failed"),
                }
            }
        }
    }
    debug!("session listener stopped");
}

impl Inner {
    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.mounted.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == generation
    }

    fn publish(&self, update: impl FnOnce(&mut SessionSnapshot)) {
        if !self.mounted.load(Ordering::SeqCst) {
            return;
        }
        self.state.send_modify(update);
    }

    fn publish_if_current(&self, generation: u64, update: impl FnOnce(&mut SessionSnapshot)) {
        if !self.is_current(generation) {
            debug!(generation, "discarding stale session update");
            return;
        }
        self.state.send_modify(update);
    }

    async fn initialize(&self) {
        let generation = self.next_generation();
        match self.auth.get_session().await {
            Ok(Some(session)) => {
                let user = session.user.clone();
                self.publish_if_current(generation, |s| s.user = Some(user));
                self.resolve(generation, &session).await;
            }
            Ok(None) => self.publish_if_current(generation, |s| {
                s.user = None;
                s.profile = None;
                s.loading = false;
            }),
            Err(e) => {
                error!(error = %e, "session initialization failed");
                self.publish_if_current(generation, |s| s.loading = false);
            }
        }
    }

    async fn handle_event(&self, event: AuthEvent) {
        let generation = self.next_generation();
        debug!(kind = ?event.kind, generation, "auth change");
        match event.session {
            Some(session) => {
                let user = session.user.clone();
                self.publish_if_current(generation, |s| {
                    if s.user.as_ref().map(|u| u.id) != Some(user.id) {
                        s.profile = None;
                        s.loading = true;
                    }
                    s.user = Some(user);
                    s.error = None;
                });
                self.resolve(generation, &session).await;
            }
            // Keep any error: a forced sign-out must leave its message visible.
            None => self.publish_if_current(generation, |s| {
                s.user = None;
                s.profile = None;
                s.loading = false;
            }),
        }
    }

    async fn resolve(&self, generation: u64, session: &Session) {
        let uid = session.user.id;
        let outcome = self.store.fetch_profile(&session.access_token, uid).await;
        if !self.is_current(generation) {
            debug!(%uid, generation, "discarding stale profile resolution");
            return;
        }

        match outcome {
            Ok(Some(profile)) if profile.status.is_deleted() => {
                warn!(%uid, "profile is soft-deleted; forcing sign-out");
                // Revoke first; a waiter woken by the error may shut the context down.
                if let Err(e) = self.auth.sign_out().await {
                    warn!(error = %e, %uid, "forced sign-out failed remotely");
                }
                self.publish_if_current(generation, |s| {
                    s.profile = None;
                    s.error = Some(DELETED_ACCOUNT_MESSAGE.to_owned());
                    s.loading = false;
                });
            }
            Ok(Some(profile)) => {
                debug!(%uid, role = profile.role.as_str(), "profile resolved");
                self.publish_if_current(generation, |s| {
                    s.profile = Some(profile);
                    s.error = None;
                    s.loading = false;
                });
            }
            Ok(None) => {
                info!(%uid, "no profile row yet; waiting for creation");
                self.publish_if_current(generation, |s| {
                    s.profile = None;
                    s.loading = false;
                });
            }
            Err(e) => {
                error!(error = %e, code = e.error_code(), %uid, "profile lookup failed");
                self.publish_if_current(generation, |s| {
                    s.profile = None;
                    s.error = Some(format!("Failed to load user profile: {e}"));
                    s.loading = false;
                });
            }
        }
    }

    async fn current_expiry(&self) -> Option<i64> {
        match self.auth.get_session().await {
            Ok(Some(session)) if session.expires_at > 0 => Some(session.expires_at),
            _ => None,
        }
    }

    async fn refresh_delay(&self, refreshed_from: Option<i64>) -> Option<Duration> {
        let expires_at = self.current_expiry().await?;
        if refreshed_from == Some(expires_at) {
            return None;
        }
        Some(refresh_delay_for(expires_at, now_secs()))
    }
}

fn refresh_delay_for(expires_at: i64, now: i64) -> Duration {
    let secs = expires_at.saturating_sub(REFRESH_MARGIN_SECS).saturating_sub(now);
    Duration::from_secs(u64::try_from(secs).unwrap_or(0))
}

#[cfg(test)]
#[path = "context_test.rs"]
mod tests;
