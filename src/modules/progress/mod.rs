//! Per-account records: study progress, UI preferences and analytics events.
//! All keyed by the signed-in account's email.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    routing::get,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    AppState,
    modules::subjects,
    web::{ApiError, auth, bad_request, internal_error, required_field},
};

const MAX_EVENT_LEN: usize = 64;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/user/progress",
            get(progress_handler).post(save_progress_handler),
        )
        .route(
            "/api/user/preferences",
            get(preferences_handler).post(save_preferences_handler),
        )
        .route(
            "/api/user/analytics",
            get(analytics_handler).post(record_event_handler),
        )
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEntry {
    pub subject: String,
    pub module_id: String,
    pub topic_id: String,
    pub completed: bool,
    pub bookmarked: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub(crate) struct ProgressList {
    progress: Vec<ProgressEntry>,
}

#[derive(Deserialize)]
pub(crate) struct ProgressQuery {
    #[serde(default)]
    subject: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProgressUpdate {
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    module_id: Option<String>,
    #[serde(default)]
    topic_id: Option<String>,
    #[serde(default)]
    completed: Option<bool>,
    #[serde(default)]
    bookmarked: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Preferences {
    pub preferences: Value,
}

#[derive(Deserialize)]
pub(crate) struct AnalyticsEvent {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    metadata: Option<Value>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct EventCounts {
    pub counts: BTreeMap<String, i64>,
    pub total: i64,
}

impl EventCounts {
    pub fn from_rows(rows: Vec<(String, i64)>) -> Self {
        let total = rows.iter().map(|(_, count)| count).sum();
        Self {
            counts: rows.into_iter().collect(),
            total,
        }
    }
}

/// Event names are short lowercase identifiers such as `topic_viewed`.
pub fn normalize_event_name(raw: &str) -> Result<String, &'static str> {
    let event = raw.trim().to_ascii_lowercase();
    if event.is_empty() {
        return Err("Missing required field: event");
    }
    if event.len() > MAX_EVENT_LEN {
        return Err("Event name is too long.");
    }
    if !event
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
    {
        return Err("Event name may only contain letters, digits and '_-.:'.");
    }
    Ok(event)
}

async fn progress_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<ProgressQuery>,
) -> Result<Json<ProgressList>, ApiError> {
    let user = auth::current_user_or_json_error(&state, &jar).await?;
    let subject = query
        .subject
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let progress = fetch_progress(state.pool_ref(), &user.email, subject)
        .await
        .map_err(internal_error)?;
    Ok(Json(ProgressList { progress }))
}

async fn save_progress_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<ProgressUpdate>,
) -> Result<Json<ProgressEntry>, ApiError> {
    let user = auth::current_user_or_json_error(&state, &jar).await?;

    let subject = required_field(body.subject.as_deref(), "subject")?;
    let subject = subjects::validate_collection_key(&subject).map_err(bad_request)?;
    let module_id = required_field(body.module_id.as_deref(), "moduleId")?;
    let topic_id = body
        .topic_id
        .as_deref()
        .map(str::trim)
        .unwrap_or_default()
        .to_string();

    let entry = upsert_progress(
        state.pool_ref(),
        &user.email,
        &subject,
        &module_id,
        &topic_id,
        body.completed,
        body.bookmarked,
    )
    .await
    .map_err(internal_error)?;

    Ok(Json(entry))
}

async fn preferences_handler(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Json<Preferences>, ApiError> {
    let user = auth::current_user_or_json_error(&state, &jar).await?;

    let preferences: Option<Value> =
        sqlx::query_scalar("SELECT preferences FROM user_preferences WHERE email = $1")
            .bind(&user.email)
            .fetch_optional(state.pool_ref())
            .await
            .map_err(|err| internal_error(err.into()))?;

    Ok(Json(Preferences {
        preferences: preferences.unwrap_or_else(|| Value::Object(Map::new())),
    }))
}

async fn save_preferences_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<Preferences>,
) -> Result<Json<Preferences>, ApiError> {
    let user = auth::current_user_or_json_error(&state, &jar).await?;

    if !body.preferences.is_object() {
        return Err(bad_request("preferences must be a JSON object."));
    }

    let preferences: Value = sqlx::query_scalar(
        "INSERT INTO user_preferences (email, preferences) VALUES ($1, $2)
         ON CONFLICT (email) DO UPDATE SET preferences = EXCLUDED.preferences, updated_at = NOW()
         RETURNING preferences",
    )
    .bind(&user.email)
    .bind(&body.preferences)
    .fetch_one(state.pool_ref())
    .await
    .map_err(|err| internal_error(err.into()))?;

    Ok(Json(Preferences { preferences }))
}

async fn record_event_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<AnalyticsEvent>,
) -> Result<StatusCode, ApiError> {
    let user = auth::current_user_or_json_error(&state, &jar).await?;

    let event = normalize_event_name(body.event.as_deref().unwrap_or_default()).map_err(bad_request)?;
    let subject = body
        .subject
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    sqlx::query(
        "INSERT INTO analytics_events (id, email, event, subject, metadata) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(Uuid::new_v4())
    .bind(&user.email)
    .bind(&event)
    .bind(subject)
    .bind(body.metadata)
    .execute(state.pool_ref())
    .await
    .map_err(|err| internal_error(err.into()))?;

    Ok(StatusCode::NO_CONTENT)
}

async fn analytics_handler(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Json<EventCounts>, ApiError> {
    let user = auth::current_user_or_json_error(&state, &jar).await?;

    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT event, COUNT(*) FROM analytics_events WHERE email = $1 GROUP BY event",
    )
    .bind(&user.email)
    .fetch_all(state.pool_ref())
    .await
    .map_err(|err| internal_error(err.into()))?;

    Ok(Json(EventCounts::from_rows(rows)))
}

pub async fn fetch_progress(
    pool: &PgPool,
    email: &str,
    subject: Option<&str>,
) -> Result<Vec<ProgressEntry>> {
    sqlx::query_as::<_, ProgressEntry>(
        "SELECT subject, module_id, topic_id, completed, bookmarked, updated_at
         FROM user_progress
         WHERE email = $1 AND ($2::text IS NULL OR subject = $2)
         ORDER BY subject, module_id, topic_id",
    )
    .bind(email)
    .bind(subject)
    .fetch_all(pool)
    .await
    .context("failed to load progress")
}

/// Flags left as `None` keep their stored value (or `false` for a new row).
pub async fn upsert_progress(
    pool: &PgPool,
    email: &str,
    subject: &str,
    module_id: &str,
    topic_id: &str,
    completed: Option<bool>,
    bookmarked: Option<bool>,
) -> Result<ProgressEntry> {
    sqlx::query_as::<_, ProgressEntry>(
        "INSERT INTO user_progress (email, subject, module_id, topic_id, completed, bookmarked)
         VALUES ($1, $2, $3, $4, COALESCE($5, FALSE), COALESCE($6, FALSE))
         ON CONFLICT (email, subject, module_id, topic_id) DO UPDATE
         SET completed = COALESCE($5, user_progress.completed),
             bookmarked = COALESCE($6, user_progress.bookmarked),
             updated_at = NOW()
         RETURNING subject, module_id, topic_id, completed, bookmarked, updated_at",
    )
    .bind(email)
    .bind(subject)
    .bind(module_id)
    .bind(topic_id)
    .bind(completed)
    .bind(bookmarked)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to save progress for {subject}/{module_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_are_normalized() {
        assert_eq!(normalize_event_name(" Topic_Viewed "), Ok("topic_viewed".to_string()));
        assert_eq!(normalize_event_name("pdf:open"), Ok("pdf:open".to_string()));
        assert!(normalize_event_name("  ").is_err());
        assert!(normalize_event_name("has space").is_err());
        assert!(normalize_event_name(&"e".repeat(MAX_EVENT_LEN + 1)).is_err());
    }

    #[test]
    fn counts_sum_to_total() {
        let counts = EventCounts::from_rows(vec![
            ("topic_viewed".into(), 4),
            ("pdf_opened".into(), 2),
        ]);
        assert_eq!(counts.total, 6);
        assert_eq!(counts.counts["pdf_opened"], 2);
        assert_eq!(
            serde_json::to_value(&counts).unwrap(),
            serde_json::json!({"counts": {"pdf_opened": 2, "topic_viewed": 4}, "total": 6})
        );
    }

    #[test]
    fn progress_entry_uses_camel_case() {
        let entry = ProgressEntry {
            subject: "dsa".into(),
            module_id: "1".into(),
            topic_id: String::new(),
            completed: true,
            bookmarked: false,
            updated_at: Utc::now(),
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["moduleId"], "1");
        assert_eq!(value["completed"], true);
    }
}
