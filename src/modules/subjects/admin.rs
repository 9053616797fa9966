use axum::{
    Json,
    extract::{Path, State},
};
use axum_extra::extract::cookie::CookieJar;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::{
    AppState, permissions,
    permissions::EditableSubjects,
    web::{ApiError, admin, auth, bad_request, internal_error},
};

use super::{
    SubjectPayload, invalidate_subject, list_subjects, upsert_subject, validate_collection_key,
    validate_subject_document,
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EditableSubjectsResponse {
    all_subjects: bool,
    subjects: Vec<String>,
}

pub(crate) async fn editable_subjects_handler(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Json<EditableSubjectsResponse>, ApiError> {
    let user = auth::current_user_or_json_error(&state, &jar).await?;

    let editable =
        permissions::editable_subjects(state.pool_ref(), state.super_admin(), &user.username)
            .await
            .map_err(internal_error)?;

    let response = match editable {
        EditableSubjects::All => EditableSubjectsResponse {
            all_subjects: true,
            subjects: list_subjects(state.pool_ref())
                .await
                .map_err(internal_error)?,
        },
        EditableSubjects::Only(subjects) => EditableSubjectsResponse {
            all_subjects: false,
            subjects,
        },
    };

    Ok(Json(response))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CanEditResponse {
    subject: String,
    can_edit: bool,
}

pub(crate) async fn can_edit_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(subject): Path<String>,
) -> Result<Json<CanEditResponse>, ApiError> {
    let user = auth::current_user_or_json_error(&state, &jar).await?;
    let subject = validate_collection_key(&subject).map_err(bad_request)?;

    let can_edit =
        permissions::can_edit_subject(state.pool_ref(), state.super_admin(), &user.username, &subject)
            .await
            .map_err(internal_error)?;

    Ok(Json(CanEditResponse { subject, can_edit }))
}

pub(crate) async fn replace_subject_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(subject): Path<String>,
    Json(content): Json<Value>,
) -> Result<Json<SubjectPayload>, ApiError> {
    let subject = validate_collection_key(&subject).map_err(bad_request)?;
    let user = admin::require_subject_editor(&state, &jar, std::slice::from_ref(&subject)).await?;

    validate_subject_document(&content).map_err(bad_request)?;

    upsert_subject(state.pool_ref(), &subject, &content, &user.username)
        .await
        .map_err(internal_error)?;
    invalidate_subject(state.cache(), &subject).await;

    info!(%subject, by = %user.username, "subject document replaced");

    Ok(Json(SubjectPayload {
        subject,
        data: content,
    }))
}
