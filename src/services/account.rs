//! Account service: self-service password change.
//!
//! The current password is verified with a detached auth client so the
//! caller's own session is never replaced by the verification sign-in.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use super::MIN_PASSWORD_LEN;
use crate::backend::{AuthApi, BackendError};
use crate::context::SessionContext;

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("New passwords do not match")]
    PasswordMismatch,
    #[error("Password must be at least 6 characters")]
    PasswordTooShort,
    #[error("User not found")]
    NoUser,
    #[error("Current password is incorrect")]
    IncorrectPassword,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl AccountError {
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::PasswordMismatch | Self::PasswordTooShort => "E_INVALID_PASSWORD",
            Self::NoUser => "E_NO_USER",
            Self::IncorrectPassword => "E_INCORRECT_PASSWORD",
            Self::Backend(e) => e.error_code(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordChange {
    pub current_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

/// Form checks that need no network.
///
/// # Errors
///
/// Returns the first rule the form breaks.
pub fn validate(form: &PasswordChange) -> Result<(), AccountError> {
    if form.new_password != form.confirm_password {
        return Err(AccountError::PasswordMismatch);
    }
    if form.new_password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AccountError::PasswordTooShort);
    }
    Ok(())
}

/// Change the signed-in user's password.
///
/// # Errors
///
/// Returns a validation error before any backend call, `IncorrectPassword`
/// when the auth API rejects the current password, or the backend error.
pub async fn change_password(
    ctx: &SessionContext,
    verifier: Arc<dyn AuthApi>,
    form: &PasswordChange,
) -> Result<(), AccountError> {
    validate(form)?;

    let snapshot = ctx.snapshot();
    let user = snapshot.user.ok_or(AccountError::NoUser)?;
    let email = user.email.ok_or(AccountError::NoUser)?;

    match verifier.sign_in_with_password(&email, &form.current_password).await {
        Ok(_) => {}
        Err(BackendError::Auth { .. }) => return Err(AccountError::IncorrectPassword),
        Err(e) => return Err(e.into()),
    }
    if let Err(e) = verifier.sign_out().await {
        debug!(error = %e, "verification session sign-out failed");
    }

    ctx.auth().update_password(&form.new_password).await?;
    info!(user_id = %user.id, "password changed");
    Ok(())
}

#[cfg(test)]
#[path = "account_test.rs"]
mod tests;
