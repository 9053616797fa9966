//! Change requests: contributor edits (through an edit link) and signed-in
//! proposals share one queue and one review path.

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

mod admin;

use crate::{
    AppState,
    cache::Cache,
    modules::subjects,
    web::{ApiError, auth, bad_request, internal_error, json_error, required_field},
};

pub const DEFAULT_CHANGE_TYPE: &str = "content";

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/proposals",
            get(my_proposals_handler).post(create_proposal_handler),
        )
        .route("/api/admin/changes", get(admin::list_changes_handler))
        .route("/api/admin/review-changes", post(admin::review_handler))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSource {
    EditLink,
    Proposal,
}

impl ChangeSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeSource::EditLink => "edit_link",
            ChangeSource::Proposal => "proposal",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "edit_link" => Some(ChangeSource::EditLink),
            "proposal" => Some(ChangeSource::Proposal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeMode {
    Merge,
    Replace,
}

impl ChangeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeMode::Merge => "merge",
            ChangeMode::Replace => "replace",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "merge" => Some(ChangeMode::Merge),
            "replace" => Some(ChangeMode::Replace),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Pending,
    Approved,
    Rejected,
}

impl ChangeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeStatus::Pending => "pending",
            ChangeStatus::Approved => "approved",
            ChangeStatus::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(ChangeStatus::Pending),
            "approved" => Some(ChangeStatus::Approved),
            "rejected" => Some(ChangeStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewAction {
    Approve,
    Reject,
}

impl ReviewAction {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "approve" | "approved" => Some(ReviewAction::Approve),
            "reject" | "rejected" => Some(ReviewAction::Reject),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum ReviewError {
    NotFound,
    AlreadyReviewed(ChangeStatus),
    Invalid(&'static str),
    Backend(anyhow::Error),
}

impl ReviewError {
    pub fn message(&self) -> String {
        match self {
            ReviewError::NotFound => "Change request not found.".to_string(),
            ReviewError::AlreadyReviewed(status) => {
                format!("Change request already reviewed ({}).", status.as_str())
            }
            ReviewError::Invalid(message) => (*message).to_string(),
            ReviewError::Backend(_) => "Internal server error.".to_string(),
        }
    }
}

impl From<anyhow::Error> for ReviewError {
    fn from(err: anyhow::Error) -> Self {
        ReviewError::Backend(err)
    }
}

impl From<sqlx::Error> for ReviewError {
    fn from(err: sqlx::Error) -> Self {
        ReviewError::Backend(err.into())
    }
}

impl From<ReviewError> for ApiError {
    fn from(err: ReviewError) -> Self {
        match err {
            ReviewError::NotFound => json_error(StatusCode::NOT_FOUND, err.message()),
            ReviewError::AlreadyReviewed(_) | ReviewError::Invalid(_) => bad_request(err.message()),
            ReviewError::Backend(inner) => internal_error(inner),
        }
    }
}

/// Only a pending request may move, and only once.
pub fn next_status(current: ChangeStatus, action: ReviewAction) -> Result<ChangeStatus, ReviewError> {
    if current != ChangeStatus::Pending {
        return Err(ReviewError::AlreadyReviewed(current));
    }
    Ok(match action {
        ReviewAction::Approve => ChangeStatus::Approved,
        ReviewAction::Reject => ChangeStatus::Rejected,
    })
}

/// Content a subject holds once `change` is applied on top of `current`.
pub fn resolve_content(mode: ChangeMode, current: Option<Value>, change: Value) -> Value {
    match mode {
        ChangeMode::Replace => change,
        ChangeMode::Merge => {
            let mut merged = current.unwrap_or_else(|| Value::Object(Map::new()));
            subjects::merge_content(&mut merged, change);
            merged
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRequest {
    pub id: Uuid,
    pub source: ChangeSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_id: Option<String>,
    pub subject_collection: String,
    pub submitted_by: String,
    pub mode: ChangeMode,
    pub change_type: String,
    pub change_data: Value,
    pub status: ChangeStatus,
    pub submitted_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<String>,
    pub review_notes: Option<String>,
}

#[derive(sqlx::FromRow)]
struct ChangeRow {
    id: Uuid,
    source: String,
    link_id: Option<String>,
    subject_collection: String,
    submitted_by: String,
    mode: String,
    change_type: String,
    change_data: Value,
    status: String,
    submitted_at: DateTime<Utc>,
    reviewed_at: Option<DateTime<Utc>>,
    reviewed_by: Option<String>,
    review_notes: Option<String>,
}

impl TryFrom<ChangeRow> for ChangeRequest {
    type Error = anyhow::Error;

    fn try_from(row: ChangeRow) -> Result<Self> {
        let source = ChangeSource::parse(&row.source)
            .with_context(|| format!("unknown change source '{}'", row.source))?;
        let mode = ChangeMode::parse(&row.mode)
            .with_context(|| format!("unknown change mode '{}'", row.mode))?;
        let status = ChangeStatus::parse(&row.status)
            .with_context(|| format!("unknown change status '{}'", row.status))?;

        Ok(Self {
            id: row.id,
            source,
            link_id: row.link_id,
            subject_collection: row.subject_collection,
            submitted_by: row.submitted_by,
            mode,
            change_type: row.change_type,
            change_data: row.change_data,
            status,
            submitted_at: row.submitted_at,
            reviewed_at: row.reviewed_at,
            reviewed_by: row.reviewed_by,
            review_notes: row.review_notes,
        })
    }
}

const CHANGE_COLUMNS: &str = "id, source, link_id, subject_collection, submitted_by, mode, change_type, change_data, status, submitted_at, reviewed_at, reviewed_by, review_notes";

fn into_requests(rows: Vec<ChangeRow>) -> Result<Vec<ChangeRequest>> {
    rows.into_iter().map(ChangeRequest::try_from).collect()
}

pub struct NewChange {
    pub source: ChangeSource,
    pub link_id: Option<String>,
    pub subject_collection: String,
    pub submitted_by: String,
    pub mode: ChangeMode,
    pub change_type: String,
    pub change_data: Value,
}

pub async fn submit_change(pool: &PgPool, change: NewChange) -> Result<ChangeRequest> {
    let row = sqlx::query_as::<_, ChangeRow>(&format!(
        "INSERT INTO change_requests
             (id, source, link_id, subject_collection, submitted_by, mode, change_type, change_data)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         RETURNING {CHANGE_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(change.source.as_str())
    .bind(change.link_id)
    .bind(&change.subject_collection)
    .bind(change.submitted_by)
    .bind(change.mode.as_str())
    .bind(change.change_type)
    .bind(change.change_data)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to queue change for {}", change.subject_collection))?;

    row.try_into()
}

pub async fn list_changes(pool: &PgPool, status: Option<ChangeStatus>) -> Result<Vec<ChangeRequest>> {
    let rows = sqlx::query_as::<_, ChangeRow>(&format!(
        "SELECT {CHANGE_COLUMNS} FROM change_requests
         WHERE ($1::text IS NULL OR status = $1)
         ORDER BY submitted_at DESC"
    ))
    .bind(status.map(ChangeStatus::as_str))
    .fetch_all(pool)
    .await
    .context("failed to list change requests")?;

    into_requests(rows)
}

pub async fn list_proposals_by(pool: &PgPool, username: &str) -> Result<Vec<ChangeRequest>> {
    let rows = sqlx::query_as::<_, ChangeRow>(&format!(
        "SELECT {CHANGE_COLUMNS} FROM change_requests
         WHERE source = 'proposal' AND LOWER(submitted_by) = LOWER($1)
         ORDER BY submitted_at DESC"
    ))
    .bind(username)
    .fetch_all(pool)
    .await
    .context("failed to list proposals")?;

    into_requests(rows)
}

/// Review one request. On approval the subject write and the status flip
/// commit together; the row lock keeps a concurrent reviewer from applying
/// the same request twice. Cache entries are dropped only after commit.
pub async fn review_change(
    pool: &PgPool,
    cache: &Cache,
    change_id: Uuid,
    action: ReviewAction,
    reviewer: &str,
    notes: Option<&str>,
) -> Result<ChangeRequest, ReviewError> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, ChangeRow>(&format!(
        "SELECT {CHANGE_COLUMNS} FROM change_requests WHERE id = $1 FOR UPDATE"
    ))
    .bind(change_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(ReviewError::NotFound)?;
    let change = ChangeRequest::try_from(row)?;

    let status = next_status(change.status, action)?;

    if status == ChangeStatus::Approved {
        let current: Option<Value> = sqlx::query_scalar(
            "SELECT content FROM subjects WHERE collection_key = $1 FOR UPDATE",
        )
        .bind(&change.subject_collection)
        .fetch_optional(&mut *tx)
        .await?;

        let content = resolve_content(change.mode, current, change.change_data.clone());
        subjects::validate_subject_document(&content).map_err(ReviewError::Invalid)?;
        subjects::upsert_subject(&mut *tx, &change.subject_collection, &content, reviewer).await?;
    }

    let row = sqlx::query_as::<_, ChangeRow>(&format!(
        "UPDATE change_requests
         SET status = $2, reviewed_at = NOW(), reviewed_by = $3, review_notes = $4
         WHERE id = $1
         RETURNING {CHANGE_COLUMNS}"
    ))
    .bind(change_id)
    .bind(status.as_str())
    .bind(reviewer)
    .bind(notes)
    .fetch_one(&mut *tx)
    .await?;
    let reviewed = ChangeRequest::try_from(row)?;

    tx.commit().await?;

    if status == ChangeStatus::Approved {
        subjects::invalidate_subject(cache, &reviewed.subject_collection).await;
    }

    info!(
        change_id = %change_id,
        subject = %reviewed.subject_collection,
        status = status.as_str(),
        %reviewer,
        "change request reviewed"
    );
    Ok(reviewed)
}

#[derive(Deserialize)]
pub(crate) struct ProposalRequest {
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    changes: Option<Value>,
}

#[derive(Serialize)]
pub(crate) struct ChangeList {
    changes: Vec<ChangeRequest>,
}

async fn create_proposal_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<ProposalRequest>,
) -> Result<(StatusCode, Json<ChangeRequest>), ApiError> {
    let user = auth::current_user_or_json_error(&state, &jar).await?;

    let subject = required_field(body.subject.as_deref(), "subject")?;
    let subject = subjects::validate_collection_key(&subject).map_err(bad_request)?;
    let mode = match body.mode.as_deref() {
        None => ChangeMode::Merge,
        Some(raw) => ChangeMode::parse(raw)
            .ok_or_else(|| bad_request("mode must be 'merge' or 'replace'."))?,
    };
    let changes = body
        .changes
        .ok_or_else(|| bad_request("Missing required field: changes"))?;
    if !changes.is_object() {
        return Err(bad_request("changes must be a JSON object."));
    }
    if mode == ChangeMode::Replace {
        subjects::validate_subject_document(&changes).map_err(bad_request)?;
    }

    let change = submit_change(
        state.pool_ref(),
        NewChange {
            source: ChangeSource::Proposal,
            link_id: None,
            subject_collection: subject,
            submitted_by: user.username.clone(),
            mode,
            change_type: DEFAULT_CHANGE_TYPE.to_string(),
            change_data: changes,
        },
    )
    .await
    .map_err(internal_error)?;

    info!(change_id = %change.id, subject = %change.subject_collection, proposer = %user.username, "proposal submitted");
    Ok((StatusCode::CREATED, Json(change)))
}

async fn my_proposals_handler(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Json<ChangeList>, ApiError> {
    let user = auth::current_user_or_json_error(&state, &jar).await?;

    let changes = list_proposals_by(state.pool_ref(), &user.username)
        .await
        .map_err(internal_error)?;
    Ok(Json(ChangeList { changes }))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn pending_moves_exactly_once() {
        assert_eq!(
            next_status(ChangeStatus::Pending, ReviewAction::Approve).unwrap(),
            ChangeStatus::Approved
        );
        assert_eq!(
            next_status(ChangeStatus::Pending, ReviewAction::Reject).unwrap(),
            ChangeStatus::Rejected
        );

        for done in [ChangeStatus::Approved, ChangeStatus::Rejected] {
            for action in [ReviewAction::Approve, ReviewAction::Reject] {
                let err = next_status(done, action).unwrap_err();
                assert!(matches!(err, ReviewError::AlreadyReviewed(status) if status == done));
            }
        }
    }

    #[test]
    fn already_reviewed_maps_to_bad_request() {
        let (status, Json(body)) =
            ApiError::from(ReviewError::AlreadyReviewed(ChangeStatus::Approved));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.message, "Change request already reviewed (approved).");

        let (status, _) = ApiError::from(ReviewError::NotFound);
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn replace_discards_current_content() {
        let current = json!({"name": "Old", "modules": {"1": {"topics": ["a"]}}});
        let change = json!({"name": "New", "modules": {}});
        assert_eq!(
            resolve_content(ChangeMode::Replace, Some(current), change.clone()),
            change
        );
    }

    #[test]
    fn merge_layers_onto_current_or_empty() {
        let current = json!({"name": "DSA", "modules": {"1": {"topics": ["a"]}}});
        let merged = resolve_content(
            ChangeMode::Merge,
            Some(current),
            json!({"modules": {"2": {"topics": ["b"]}}}),
        );
        assert_eq!(merged["name"], "DSA");
        assert_eq!(merged["modules"]["1"]["topics"], json!(["a"]));
        assert_eq!(merged["modules"]["2"]["topics"], json!(["b"]));

        let fresh = resolve_content(ChangeMode::Merge, None, json!({"name": "OS"}));
        assert_eq!(fresh, json!({"name": "OS"}));
    }

    #[test]
    fn parsing_accepts_known_values_only() {
        assert_eq!(ChangeMode::parse(" Replace "), Some(ChangeMode::Replace));
        assert_eq!(ChangeMode::parse("patch"), None);
        assert_eq!(ChangeStatus::parse("PENDING"), Some(ChangeStatus::Pending));
        assert_eq!(ReviewAction::parse("approved"), Some(ReviewAction::Approve));
        assert_eq!(ReviewAction::parse("maybe"), None);
    }

    #[test]
    fn change_request_serializes_camel_case() {
        let change = ChangeRequest {
            id: Uuid::nil(),
            source: ChangeSource::EditLink,
            link_id: Some("abc".into()),
            subject_collection: "dsa".into(),
            submitted_by: "Priya".into(),
            mode: ChangeMode::Replace,
            change_type: DEFAULT_CHANGE_TYPE.into(),
            change_data: json!({}),
            status: ChangeStatus::Pending,
            submitted_at: Utc::now(),
            reviewed_at: None,
            reviewed_by: None,
            review_notes: None,
        };
        let value = serde_json::to_value(&change).unwrap();
        assert_eq!(value["source"], "edit_link");
        assert_eq!(value["subjectCollection"], "dsa");
        assert_eq!(value["status"], "pending");
        assert_eq!(value["mode"], "replace");
    }
}
