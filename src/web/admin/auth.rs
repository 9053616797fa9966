use axum::http::StatusCode;
use axum_extra::extract::cookie::CookieJar;

use crate::{
    permissions,
    web::{ApiError, AppState, AuthUser, auth, internal_error, json_error},
};

/// Signed-in caller who must also be the configured super-admin.
pub async fn require_super_admin(state: &AppState, jar: &CookieJar) -> Result<AuthUser, ApiError> {
    let user = auth::current_user_or_json_error(state, jar).await?;

    if !state.is_super_admin(&user.username) {
        return Err(json_error(
            StatusCode::FORBIDDEN,
            "Super-admin access required.",
        ));
    }

    Ok(user)
}

/// Signed-in caller allowed to edit every subject in `subjects`.
pub async fn require_subject_editor(
    state: &AppState,
    jar: &CookieJar,
    subjects: &[String],
) -> Result<AuthUser, ApiError> {
    let user = auth::current_user_or_json_error(state, jar).await?;
    ensure_can_edit(state, &user, subjects).await?;
    Ok(user)
}

/// For callers that must load a record before they know which subjects it touches.
pub async fn ensure_can_edit(
    state: &AppState,
    user: &AuthUser,
    subjects: &[String],
) -> Result<(), ApiError> {
    let editable = permissions::editable_subjects(state.pool_ref(), state.super_admin(), &user.username)
        .await
        .map_err(internal_error)?;

    if let Some(denied) = subjects.iter().find(|subject| !editable.allows(subject)) {
        return Err(json_error(
            StatusCode::FORBIDDEN,
            format!("You do not have permission to edit '{denied}'."),
        ));
    }

    Ok(())
}
