//! Support service: member help requests.
//!
//! A submission goes two places: the third-party form relay (email to the
//! admins, fire-and-forget) and the `support_tickets` table for tracking.
//! Only the table insert can fail the request.

use serde::Deserialize;
use tracing::{debug, error, info};

use super::now_rfc3339;
use crate::backend::relay::{FormRelay, RelaySubmission};
use crate::backend::{BackendError, DataStore, NewTicket};
use crate::profile::UserProfile;

pub const OPEN_STATUS: &str = "open";

#[derive(Debug, thiserror::Error)]
pub enum SupportError {
    #[error("Subject is required")]
    MissingSubject,
    #[error("Message is required")]
    MissingMessage,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl SupportError {
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingSubject | Self::MissingMessage => "E_INVALID_INPUT",
            Self::Backend(e) => e.error_code(),
        }
    }
}

/// Support form. Name and email default to the sender's profile.
#[derive(Debug, Clone, Deserialize)]
pub struct SupportRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub subject: String,
    pub message: String,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Build the ticket for `sender`.
///
/// # Errors
///
/// Returns an error when the subject or message is blank.
pub fn build_ticket(sender: &UserProfile, form: &SupportRequest) -> Result<NewTicket, SupportError> {
    let subject = non_empty(Some(form.subject.as_str())).ok_or(SupportError::MissingSubject)?;
    let message = non_empty(Some(form.message.as_str())).ok_or(SupportError::MissingMessage)?;
    Ok(NewTicket {
        name: non_empty(form.name.as_deref()).unwrap_or(&sender.name).to_owned(),
        email: non_empty(form.email.as_deref()).unwrap_or(&sender.email).to_owned(),
        subject: subject.to_owned(),
        message: message.to_owned(),
        user_id: sender.uid,
        status: OPEN_STATUS.to_owned(),
        created_at: now_rfc3339(),
    })
}

/// Relay the request (if a relay is configured) and record the ticket.
///
/// # Errors
///
/// Returns a validation error before any network call, or the ticket insert
/// failure. Relay failures are logged only.
pub async fn submit(
    store: &dyn DataStore,
    bearer: &str,
    relay: Option<&FormRelay>,
    sender: &UserProfile,
    form: &SupportRequest,
) -> Result<NewTicket, SupportError> {
    let ticket = build_ticket(sender, form)?;

    match relay {
        Some(relay) => {
            relay.spawn_submit(RelaySubmission {
                name: ticket.name.clone(),
                email: ticket.email.clone(),
                subject: ticket.subject.clone(),
                message: ticket.message.clone(),
                user_id: ticket.user_id,
            });
        }
        None => debug!("no form relay configured; recording ticket only"),
    }

    if let Err(e) = store.insert_ticket(bearer, &ticket).await {
        error!(error = %e, user_id = %ticket.user_id, "support ticket insert failed");
        return Err(e.into());
    }
    info!(user_id = %ticket.user_id, "support ticket recorded");
    Ok(ticket)
}

#[cfg(test)]
#[path = "support_test.rs"]
mod tests;
