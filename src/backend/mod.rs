//! Backend clients for the hosted auth and data APIs.
//!
//! ARCHITECTURE
//! ============
//! The portal owns no storage. Everything goes through two trait seams:
//! [`AuthApi`] (one instance per browser session, because the auth client
//! holds that session's tokens) and [`DataStore`] (shared, stateless; the
//! caller passes the bearer token of whoever is acting). Tests substitute
//! in-memory fakes at both seams.

pub mod gotrue;
pub mod relay;
pub mod rest;
pub mod types;

use std::sync::Arc;

use tokio::sync::broadcast;
use uuid::Uuid;

pub use types::{AuthEvent, AuthEventKind, AuthUser, BackendError, NewProfile, NewTicket, Session};

use crate::profile::{ProfileStatus, Role, UserProfile};

/// Authentication subsystem for a single browser session.
#[async_trait::async_trait]
pub trait AuthApi: Send + Sync {
    /// Exchange credentials for a session. Emits `SignedIn`.
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, BackendError>;

    /// Create an auth account. Returns the new identity.
    async fn sign_up(&self, email: &str, password: &str, name: &str) -> Result<AuthUser, BackendError>;

    /// Invalidate the session remotely. The local session is dropped and
    /// `SignedOut` emitted even when the remote call fails.
    async fn sign_out(&self) -> Result<(), BackendError>;

    /// Current session, if any.
    async fn get_session(&self) -> Result<Option<Session>, BackendError>;

    /// Trade the refresh token for a new session. Emits `TokenRefreshed`.
    async fn refresh_session(&self) -> Result<Session, BackendError>;

    /// Change the signed-in user's password. Emits `UserUpdated`.
    async fn update_password(&self, new_password: &str) -> Result<(), BackendError>;

    /// Change notifications for the lifetime of this client.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

/// Builds fresh, independent auth clients.
pub trait AuthFactory: Send + Sync {
    fn new_client(&self) -> Arc<dyn AuthApi>;
}

/// Table access against the hosted data API.
#[async_trait::async_trait]
pub trait DataStore: Send + Sync {
    /// Profile whose `uid` is the given auth user id. `Ok(None)` when no row
    /// exists.
    async fn fetch_profile(&self, bearer: &str, uid: Uuid) -> Result<Option<UserProfile>, BackendError>;

    /// Profile by email, any status.
    async fn find_profile_by_email(&self, bearer: &str, email: &str) -> Result<Option<UserProfile>, BackendError>;

    /// Non-deleted members ordered by name.
    async fn list_members(&self, bearer: &str) -> Result<Vec<UserProfile>, BackendError>;

    async fn insert_profile(&self, bearer: &str, profile: &NewProfile) -> Result<(), BackendError>;

    /// Set `status` on the row with this id. Returns the updated rows.
    async fn update_status(
        &self,
        bearer: &str,
        id: Uuid,
        status: &ProfileStatus,
    ) -> Result<Vec<UserProfile>, BackendError>;

    /// Set `role` on the row with this id. Returns the updated rows.
    async fn update_role(&self, bearer: &str, id: Uuid, role: Role) -> Result<Vec<UserProfile>, BackendError>;

    async fn insert_ticket(&self, bearer: &str, ticket: &NewTicket) -> Result<(), BackendError>;
}
