use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};

use crate::{
    permissions::{self, AdminPermission, AdminRole, PermissionError, PermissionInput},
    web::{ActionOutcome, AppState, AuthUser, auth},
};

type Outcome<T> = (StatusCode, Json<ActionOutcome<T>>);

fn failure<T: Serialize>(status: StatusCode, message: impl Into<String>) -> Outcome<T> {
    (status, Json(ActionOutcome::failed(message)))
}

fn permission_failure<T: Serialize>(err: PermissionError) -> Outcome<T> {
    let status = match err {
        PermissionError::NotSuperAdmin => StatusCode::FORBIDDEN,
        PermissionError::Invalid(_) => StatusCode::BAD_REQUEST,
        PermissionError::Backend => StatusCode::INTERNAL_SERVER_ERROR,
    };
    failure(status, err.message())
}

async fn caller<T: Serialize>(state: &AppState, jar: &CookieJar) -> Result<AuthUser, Outcome<T>> {
    auth::current_user_or_json_error(state, jar)
        .await
        .map_err(|err| failure(err.status, err.message))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    #[serde(default)]
    github_username: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    allowed_subjects: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionTarget {
    #[serde(default)]
    github_username: Option<String>,
}

#[derive(Serialize)]
pub struct Removed {
    removed: bool,
}

pub async fn save_permission(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<PermissionRequest>,
) -> Outcome<AdminPermission> {
    let user = match caller(&state, &jar).await {
        Ok(user) => user,
        Err(outcome) => return outcome,
    };

    let role = match body.role.as_deref().map(str::trim) {
        None | Some("") => AdminRole::SubjectAdmin,
        Some(raw) => match AdminRole::parse(raw) {
            Some(role) => role,
            None => {
                return failure(
                    StatusCode::BAD_REQUEST,
                    "role must be 'super-admin' or 'subject-admin'.",
                );
            }
        },
    };

    let input = PermissionInput {
        github_username: body.github_username.unwrap_or_default(),
        role,
        allowed_subjects: body.allowed_subjects,
    };

    match permissions::set_admin_permissions(
        state.pool_ref(),
        state.super_admin(),
        &user.username,
        input,
    )
    .await
    {
        Ok(record) => (StatusCode::OK, Json(ActionOutcome::ok(record))),
        Err(err) => permission_failure(err),
    }
}

pub async fn list_permissions(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Outcome<Vec<AdminPermission>> {
    let user = match caller(&state, &jar).await {
        Ok(user) => user,
        Err(outcome) => return outcome,
    };

    match permissions::get_all_admins(state.pool_ref(), state.super_admin(), &user.username).await {
        Ok(records) => (StatusCode::OK, Json(ActionOutcome::ok(records))),
        Err(err) => permission_failure(err),
    }
}

pub async fn delete_permission(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(target): Query<PermissionTarget>,
) -> Outcome<Removed> {
    let user = match caller(&state, &jar).await {
        Ok(user) => user,
        Err(outcome) => return outcome,
    };

    let username = target.github_username.unwrap_or_default();
    match permissions::remove_admin_permissions(
        state.pool_ref(),
        state.super_admin(),
        &user.username,
        &username,
    )
    .await
    {
        Ok(true) => (StatusCode::OK, Json(ActionOutcome::ok(Removed { removed: true }))),
        Ok(false) => failure(
            StatusCode::NOT_FOUND,
            format!("No permission record for '{}'.", username.trim()),
        ),
        Err(err) => permission_failure(err),
    }
}
