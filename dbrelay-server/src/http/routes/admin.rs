//! Admin endpoints for registrations and user status
//!
//! Status changes are plain row updates; subscribers learn about them
//! through the notify trigger like any other write.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::db::{Profile, ProfileRepo, Registration, RegistrationRepo};
use crate::http::{ApiError, AppState};

/// Status transition requested by an admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    Activate,
    Deactivate,
    Delete,
}

impl UserAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Activate => "activate",
            Self::Deactivate => "deactivate",
            Self::Delete => "delete",
        }
    }

    /// Profile status the action moves to. `delete` is a soft delete.
    pub fn target_status(self) -> &'static str {
        match self {
            Self::Activate => "active",
            Self::Deactivate => "inactive",
            Self::Delete => "deleted",
        }
    }
}

impl fmt::Display for UserAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserAction {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "activate" => Ok(Self::Activate),
            "deactivate" => Ok(Self::Deactivate),
            "delete" => Ok(Self::Delete),
            other => Err(ApiError::bad_request(format!("unknown action '{other}'"))),
        }
    }
}

/// Bulk action body: the profiles to act on, by unique identifier.
#[derive(Debug, Deserialize)]
pub struct UserActionRequest {
    #[serde(rename = "userIds", default)]
    pub user_ids: Vec<String>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ActionResponse {
    pub message: String,
}

/// GET /api/admin/registrations/
async fn list_registrations(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Registration>>, ApiError> {
    let registrations = RegistrationRepo::new(&state.pool).list_inactive().await?;
    Ok(Json(registrations))
}

/// GET /api/admin/users/
async fn list_users(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Profile>>, ApiError> {
    let profiles = ProfileRepo::new(&state.pool).list_active().await?;
    Ok(Json(profiles))
}

/// POST /api/admin/users/{action}/
///
/// Applies `action` to every id in `userIds`. Unknown ids fail the whole
/// request with 404 and nothing is changed.
async fn user_action(
    State(state): State<Arc<AppState>>,
    Path(action): Path<String>,
    Json(request): Json<UserActionRequest>,
) -> Result<Json<ActionResponse>, ApiError> {
    let action: UserAction = action.parse()?;

    let profiles = ProfileRepo::new(&state.pool)
        .set_status_many(&request.user_ids, action.target_status())
        .await?;

    tracing::info!(
        %action,
        requested = request.user_ids.len(),
        updated = profiles.len(),
        status = action.target_status(),
        "admin user action applied"
    );
    Ok(Json(ActionResponse {
        message: format!("{action} action completed successfully"),
    }))
}

/// Admin routes
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/admin/registrations/", get(list_registrations))
        .route("/api/admin/users/", get(list_users))
        .route("/api/admin/users/{action}/", post(user_action))
}
