//! Password-protected share links that let a named contributor propose a new
//! version of one subject. Links are only ever deactivated, never deleted.

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get},
};
use chrono::{DateTime, Utc};
use rand::{Rng, distributions::Alphanumeric};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use tracing::info;

mod admin;

use crate::{
    AppState,
    modules::{
        changes::{self, ChangeMode, ChangeRequest, ChangeSource, NewChange},
        subjects,
    },
    web::{ApiError, auth, bad_request, internal_error, json_error},
};

pub const LINK_ID_LEN: usize = 16;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/edit/:link_id",
            get(open_link_handler).post(submit_change_handler),
        )
        .route(
            "/api/admin/edit-links",
            get(admin::list_links_handler).post(admin::create_link_handler),
        )
        .route(
            "/api/admin/edit-links/:link_id",
            delete(admin::revoke_link_handler),
        )
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct EditLink {
    pub link_id: String,
    pub subject_collection: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub editor_name: String,
    pub is_active: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum EditLinkError {
    NotFound,
    Revoked,
    WrongPassword,
}

impl EditLinkError {
    pub fn status(&self) -> StatusCode {
        match self {
            EditLinkError::NotFound => StatusCode::NOT_FOUND,
            EditLinkError::Revoked => StatusCode::FORBIDDEN,
            EditLinkError::WrongPassword => StatusCode::UNAUTHORIZED,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            EditLinkError::NotFound => "Edit link not found.",
            EditLinkError::Revoked => "This edit link has been deactivated.",
            EditLinkError::WrongPassword => "Incorrect password.",
        }
    }
}

impl From<EditLinkError> for ApiError {
    fn from(err: EditLinkError) -> Self {
        json_error(err.status(), err.message())
    }
}

pub fn generate_link_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(LINK_ID_LEN)
        .map(char::from)
        .collect()
}

/// A revoked link refuses access even when the password is right.
pub fn check_access(link: &EditLink, password: &str) -> Result<(), EditLinkError> {
    if !link.is_active {
        return Err(EditLinkError::Revoked);
    }
    if !auth::verify_password(password, &link.password_hash) {
        return Err(EditLinkError::WrongPassword);
    }
    Ok(())
}

const LINK_COLUMNS: &str = "link_id, subject_collection, password_hash, editor_name, is_active, created_by, created_at, last_accessed_at";

pub async fn fetch_link(pool: &PgPool, link_id: &str) -> Result<Option<EditLink>> {
    sqlx::query_as::<_, EditLink>(&format!(
        "SELECT {LINK_COLUMNS} FROM edit_links WHERE link_id = $1"
    ))
    .bind(link_id)
    .fetch_optional(pool)
    .await
    .context("failed to load edit link")
}

pub async fn list_links(pool: &PgPool) -> Result<Vec<EditLink>> {
    sqlx::query_as::<_, EditLink>(&format!(
        "SELECT {LINK_COLUMNS} FROM edit_links ORDER BY created_at DESC"
    ))
    .fetch_all(pool)
    .await
    .context("failed to list edit links")
}

pub async fn insert_link(
    pool: &PgPool,
    subject: &str,
    password_hash: &str,
    editor_name: &str,
    created_by: &str,
) -> Result<EditLink> {
    sqlx::query_as::<_, EditLink>(&format!(
        "INSERT INTO edit_links (link_id, subject_collection, password_hash, editor_name, created_by)
         VALUES ($1, $2, $3, $4, $5) RETURNING {LINK_COLUMNS}"
    ))
    .bind(generate_link_id())
    .bind(subject)
    .bind(password_hash)
    .bind(editor_name)
    .bind(created_by)
    .fetch_one(pool)
    .await
    .context("failed to insert edit link")
}

/// Soft-revoke: the record stays, only `is_active` flips.
pub async fn deactivate_link(pool: &PgPool, link_id: &str) -> Result<Option<EditLink>> {
    sqlx::query_as::<_, EditLink>(&format!(
        "UPDATE edit_links SET is_active = FALSE WHERE link_id = $1 RETURNING {LINK_COLUMNS}"
    ))
    .bind(link_id)
    .fetch_optional(pool)
    .await
    .context("failed to deactivate edit link")
}

async fn touch_link(pool: &PgPool, link_id: &str) -> Result<()> {
    sqlx::query("UPDATE edit_links SET last_accessed_at = NOW() WHERE link_id = $1")
        .bind(link_id)
        .execute(pool)
        .await
        .context("failed to record edit link access")?;
    Ok(())
}

async fn authorize(state: &AppState, link_id: &str, password: Option<&str>) -> Result<EditLink, ApiError> {
    let link = fetch_link(state.pool_ref(), link_id)
        .await
        .map_err(internal_error)?
        .ok_or(EditLinkError::NotFound)?;

    check_access(&link, password.unwrap_or_default())?;
    Ok(link)
}

#[derive(Deserialize)]
pub(crate) struct PasswordQuery {
    #[serde(default)]
    password: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OpenLinkResponse {
    link_id: String,
    subject_collection: String,
    editor_name: String,
    data: Option<Value>,
}

async fn open_link_handler(
    State(state): State<AppState>,
    Path(link_id): Path<String>,
    Query(query): Query<PasswordQuery>,
) -> Result<Json<OpenLinkResponse>, ApiError> {
    let link = authorize(&state, &link_id, query.password.as_deref()).await?;

    touch_link(state.pool_ref(), &link.link_id)
        .await
        .map_err(internal_error)?;

    let data = subjects::fetch_subject(state.pool_ref(), &link.subject_collection)
        .await
        .map_err(internal_error)?;

    Ok(Json(OpenLinkResponse {
        link_id: link.link_id,
        subject_collection: link.subject_collection,
        editor_name: link.editor_name,
        data,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SubmitChangeRequest {
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    change_data: Option<Value>,
    #[serde(default)]
    change_type: Option<String>,
}

async fn submit_change_handler(
    State(state): State<AppState>,
    Path(link_id): Path<String>,
    Json(body): Json<SubmitChangeRequest>,
) -> Result<(StatusCode, Json<ChangeRequest>), ApiError> {
    let link = authorize(&state, &link_id, body.password.as_deref()).await?;

    let change_data = body
        .change_data
        .ok_or_else(|| bad_request("Missing required field: changeData"))?;
    subjects::validate_subject_document(&change_data).map_err(bad_request)?;

    let change = changes::submit_change(
        state.pool_ref(),
        NewChange {
            source: ChangeSource::EditLink,
            link_id: Some(link.link_id.clone()),
            subject_collection: link.subject_collection.clone(),
            submitted_by: link.editor_name.clone(),
            mode: ChangeMode::Replace,
            change_type: body
                .change_type
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .unwrap_or(changes::DEFAULT_CHANGE_TYPE)
                .to_string(),
            change_data,
        },
    )
    .await
    .map_err(internal_error)?;

    info!(
        link_id = %link.link_id,
        subject = %link.subject_collection,
        change_id = %change.id,
        "change submitted through edit link"
    );
    Ok((StatusCode::CREATED, Json(change)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(active: bool, password: &str) -> EditLink {
        EditLink {
            link_id: generate_link_id(),
            subject_collection: "dsa".into(),
            password_hash: auth::hash_password(password).expect("hash"),
            editor_name: "Priya".into(),
            is_active: active,
            created_by: "admin".into(),
            created_at: Utc::now(),
            last_accessed_at: None,
        }
    }

    #[test]
    fn link_ids_are_random_alphanumerics() {
        let first = generate_link_id();
        let second = generate_link_id();
        assert_eq!(first.len(), LINK_ID_LEN);
        assert!(first.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(first, second);
    }

    #[test]
    fn active_link_needs_matching_password() {
        let link = link(true, "s3cret-pass");
        assert_eq!(check_access(&link, "s3cret-pass"), Ok(()));
        assert_eq!(
            check_access(&link, "guess"),
            Err(EditLinkError::WrongPassword)
        );
    }

    #[test]
    fn revoked_link_is_forbidden_even_with_password() {
        let link = link(false, "s3cret-pass");
        let err = check_access(&link, "s3cret-pass").unwrap_err();
        assert_eq!(err, EditLinkError::Revoked);
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn password_hash_never_serialized() {
        let value = serde_json::to_value(link(true, "pw-123456")).unwrap();
        assert!(value.get("passwordHash").is_none());
        assert_eq!(value["subjectCollection"], "dsa");
        assert_eq!(value["isActive"], true);
    }
}
