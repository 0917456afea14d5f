//! Support route: submit a help request.

use axum::http::StatusCode;
use axum::response::Json;

use super::ApiError;
use super::auth::PortalUser;
use crate::backend::NewTicket;
use crate::services::support::{self, SupportError, SupportRequest};

pub(crate) fn support_error_to_status(err: &SupportError) -> StatusCode {
    match err {
        SupportError::MissingSubject | SupportError::MissingMessage => StatusCode::BAD_REQUEST,
        SupportError::Backend(e) => super::backend_error_to_status(e),
    }
}

/// `POST /api/support`: relay the request and record a ticket.
pub async fn submit(
    auth: PortalUser,
    Json(form): Json<SupportRequest>,
) -> Result<(StatusCode, Json<NewTicket>), ApiError> {
    let sender = auth.profile()?;
    let bearer = auth.bearer().await?;
    let ticket = support::submit(
        auth.backend.store.as_ref(),
        &bearer,
        auth.backend.relay.as_ref(),
        &sender,
        &form,
    )
    .await
    .map_err(|e| ApiError::new(support_error_to_status(&e), e.error_code(), e.to_string()))?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

#[cfg(test)]
#[path = "support_test.rs"]
mod tests;
