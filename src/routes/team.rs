//! Team routes: admin-only member management.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ApiError;
use super::auth::AdminUser;
use crate::profile::{Role, UserProfile};
use crate::services::team::{self, NewMember, TeamError};
use crate::state::AppState;

pub(crate) fn team_error_to_status(err: &TeamError) -> StatusCode {
    match err {
        TeamError::PasswordMismatch
        | TeamError::PasswordTooShort
        | TeamError::MissingName
        | TeamError::InvalidEmail
        | TeamError::InvalidRole => StatusCode::BAD_REQUEST,
        TeamError::AlreadyRegistered | TeamError::PreviouslyDeleted | TeamError::EmailInUse => StatusCode::CONFLICT,
        TeamError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        TeamError::NotFound(_) => StatusCode::NOT_FOUND,
        TeamError::Backend(e) => super::backend_error_to_status(e),
    }
}

impl From<TeamError> for ApiError {
    fn from(err: TeamError) -> Self {
        Self::new(team_error_to_status(&err), err.error_code(), err.to_string())
    }
}

/// Re-resolve every live session belonging to `uid` so role and status
/// changes take effect without a fresh login.
async fn refresh_sessions_of(state: &AppState, uid: Uuid) {
    for ctx in state.contexts().await {
        if ctx.snapshot().user.is_some_and(|u| u.id == uid) {
            if let Err(e) = ctx.refresh_profile().await {
                tracing::warn!(error = %e, %uid, "session refresh after profile change failed");
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    search: Option<String>,
}

/// `GET /api/team?search=`: non-deleted members ordered by name.
pub async fn list(
    State(state): State<AppState>,
    admin: AdminUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<UserProfile>>, ApiError> {
    let bearer = admin.user.bearer().await?;
    let members = team::list_members(
        admin.user.backend.store.as_ref(),
        &bearer,
        query.search.as_deref(),
        state.config.team_query_timeout,
    )
    .await?;
    Ok(Json(members))
}

#[derive(Debug, Serialize)]
pub struct CreatedMember {
    pub uid: Uuid,
    pub email: Option<String>,
}

/// `POST /api/team`: create an auth account plus member profile.
pub async fn create(admin: AdminUser, Json(form): Json<NewMember>) -> Result<(StatusCode, Json<CreatedMember>), ApiError> {
    let bearer = admin.user.bearer().await?;
    let signup = admin.user.backend.auth.new_client();
    let user = team::add_member(admin.user.backend.store.as_ref(), &bearer, signup, &form).await?;
    tracing::info!(admin = %admin.profile.id, uid = %user.id, "admin added member");
    Ok((StatusCode::CREATED, Json(CreatedMember { uid: user.id, email: user.email })))
}

/// `DELETE /api/team/{id}`: soft-delete a member.
pub async fn remove(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<Uuid>,
) -> Result<Json<UserProfile>, ApiError> {
    let bearer = admin.user.bearer().await?;
    let row = team::soft_delete_member(admin.user.backend.store.as_ref(), &bearer, id).await?;
    refresh_sessions_of(&state, row.uid).await;
    Ok(Json(row))
}

#[derive(Debug, Deserialize)]
pub struct RoleChange {
    role: Role,
}

/// `PATCH /api/team/{id}/role`: change a profile's role.
pub async fn update_role(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(body): Json<RoleChange>,
) -> Result<Json<UserProfile>, ApiError> {
    let bearer = admin.user.bearer().await?;
    let row = team::set_role(admin.user.backend.store.as_ref(), &bearer, id, body.role).await?;
    refresh_sessions_of(&state, row.uid).await;
    Ok(Json(row))
}

#[cfg(test)]
#[path = "team_test.rs"]
mod tests;
