//! Team service: admin management of member profiles.
//!
//! DESIGN
//! ======
//! Member creation signs the new account up through a detached auth client,
//! then inserts the profile row with the admin's own bearer token. The
//! admin's session is never touched, so there is no swap to restore and no
//! window where the insert could run as the new member.
//!
//! Members are never hard-deleted; removal sets the Deleted status.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{MIN_PASSWORD_LEN, normalize_email, now_rfc3339};
use crate::backend::{AuthApi, AuthUser, BackendError, DataStore, NewProfile};
use crate::profile::{NEW_MEMBER_STATUS, ProfileStatus, Role, UserProfile};

#[derive(Debug, thiserror::Error)]
pub enum TeamError {
    #[error("Passwords do not match")]
    PasswordMismatch,
    #[error("Password must be at least 6 characters")]
    PasswordTooShort,
    #[error("Name is required")]
    MissingName,
    #[error("Invalid email address format")]
    InvalidEmail,
    #[error("This email is already registered. Please use a different email.")]
    AlreadyRegistered,
    #[error("This email was previously used by a deleted account.")]
    PreviouslyDeleted,
    #[error("This email is already in use. Please use a different email.")]
    EmailInUse,
    #[error("Request timeout")]
    Timeout,
    #[error("member not found: {0}")]
    NotFound(Uuid),
    #[error("unsupported role")]
    InvalidRole,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl TeamError {
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::PasswordMismatch | Self::PasswordTooShort => "E_INVALID_PASSWORD",
            Self::MissingName | Self::InvalidEmail | Self::InvalidRole => "E_INVALID_INPUT",
            Self::AlreadyRegistered | Self::PreviouslyDeleted | Self::EmailInUse => "E_EMAIL_TAKEN",
            Self::Timeout => "E_TIMEOUT",
            Self::NotFound(_) => "E_MEMBER_NOT_FOUND",
            Self::Backend(e) => e.error_code(),
        }
    }
}

/// Add-member form.
#[derive(Debug, Clone, Deserialize)]
pub struct NewMember {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

/// Validated add-member input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidMember {
    pub name: String,
    pub email: String,
}

/// # Errors
///
/// Returns the first rule the form breaks, passwords first.
pub fn validate(form: &NewMember) -> Result<ValidMember, TeamError> {
    if form.password != form.confirm_password {
        return Err(TeamError::PasswordMismatch);
    }
    if form.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(TeamError::PasswordTooShort);
    }
    let name = form.name.trim();
    if name.is_empty() {
        return Err(TeamError::MissingName);
    }
    let email = normalize_email(&form.email).ok_or(TeamError::InvalidEmail)?;
    Ok(ValidMember { name: name.to_owned(), email })
}

/// Non-deleted members ordered by name, optionally filtered by a
/// case-insensitive search on name or email.
///
/// # Errors
///
/// Returns `Timeout` if the store does not answer within `timeout`, or the
/// backend error.
pub async fn list_members(
    store: &dyn DataStore,
    bearer: &str,
    search: Option<&str>,
    timeout: Duration,
) -> Result<Vec<UserProfile>, TeamError> {
    let members = tokio::time::timeout(timeout, store.list_members(bearer))
        .await
        .map_err(|_| {
            warn!(timeout_ms = timeout.as_millis(), "team listing timed out");
            TeamError::Timeout
        })??;
    Ok(match search {
        Some(term) => members.into_iter().filter(|m| m.matches_search(term)).collect(),
        None => members,
    })
}

/// Create an auth account and its member profile.
///
/// # Errors
///
/// Returns a validation error before any backend call, one of the
/// email-taken variants, or the backend error.
pub async fn add_member(
    store: &dyn DataStore,
    admin_bearer: &str,
    signup: Arc<dyn AuthApi>,
    form: &NewMember,
) -> Result<AuthUser, TeamError> {
    let member = validate(form)?;

    let user = signup
        .sign_up(&member.email, &form.password, &member.name)
        .await
        .map_err(|e| if e.is_already_registered() { TeamError::AlreadyRegistered } else { e.into() })?;

    let row = NewProfile {
        uid: user.id,
        name: member.name,
        email: member.email,
        role: Role::Member,
        status: NEW_MEMBER_STATUS.to_owned(),
        join_date: now_rfc3339(),
    };
    match store.insert_profile(admin_bearer, &row).await {
        Ok(()) => {
            info!(uid = %user.id, "member added");
            Ok(user)
        }
        Err(e) if e.is_unique_violation() => {
            // A failed lookup falls back to the generic message.
            let existing = store.find_profile_by_email(admin_bearer, &row.email).await.ok().flatten();
            if existing.is_some_and(|p| p.status.is_deleted()) {
                warn!(uid = %user.id, "email belongs to a deleted member");
                Err(TeamError::PreviouslyDeleted)
            } else {
                Err(TeamError::EmailInUse)
            }
        }
        Err(e) => {
            error!(error = %e, uid = %user.id, "member profile insert failed");
            Err(e.into())
        }
    }
}

/// Mark a member Deleted.
///
/// # Errors
///
/// Returns `NotFound` when no row has this id, or the backend error.
pub async fn soft_delete_member(store: &dyn DataStore, bearer: &str, id: Uuid) -> Result<UserProfile, TeamError> {
    let updated = store.update_status(bearer, id, &ProfileStatus::Deleted).await?;
    let row = updated.into_iter().next().ok_or(TeamError::NotFound(id))?;
    info!(%id, "member soft-deleted");
    Ok(row)
}

/// Change a profile's role.
///
/// # Errors
///
/// Returns `InvalidRole` for [`Role::Unknown`], `NotFound` when no row has
/// this id, or the backend error.
pub async fn set_role(store: &dyn DataStore, bearer: &str, id: Uuid, role: Role) -> Result<UserProfile, TeamError> {
    if role == Role::Unknown {
        return Err(TeamError::InvalidRole);
    }
    let updated = store.update_role(bearer, id, role).await?;
    let row = updated.into_iter().next().ok_or(TeamError::NotFound(id))?;
    info!(%id, role = role.as_str(), "role changed");
    Ok(row)
}

#[cfg(test)]
#[path = "team_test.rs"]
mod tests;
