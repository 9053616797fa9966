//! Subject content: one JSON document per subject, keyed by `collection_key`.

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, put},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{PgExecutor, PgPool};

mod admin;

use crate::{
    AppState,
    cache::{
        Cache, TTL_LONG, TTL_MEDIUM,
        keys::{self, STATS_SUBJECTS, SUBJECTS_ALL},
    },
    web::{ApiError, bad_request, internal_error, not_found},
};

const MAX_KEY_LEN: usize = 100;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/subject", get(list_subjects_handler))
        .route("/api/subject/:subject", get(subject_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/admin/subjects", get(admin::editable_subjects_handler))
        .route(
            "/api/admin/subjects/:subject",
            put(admin::replace_subject_handler),
        )
        .route(
            "/api/admin/subjects/:subject/can-edit",
            get(admin::can_edit_handler),
        )
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct SubjectList {
    pub subjects: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct SubjectPayload {
    pub subject: String,
    pub data: Value,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContentStats {
    pub subjects: usize,
    pub modules: usize,
    pub topics: usize,
    pub notes_links: usize,
    pub curriculum_entries: i64,
}

#[derive(Deserialize)]
pub struct SubjectQuery {
    #[serde(default)]
    module: Option<String>,
}

async fn list_subjects_handler(
    State(state): State<AppState>,
) -> Result<Json<SubjectList>, ApiError> {
    let pool = state.pool();
    let list = state
        .cache()
        .get_or_load(SUBJECTS_ALL, TTL_LONG, || async move {
            Ok(SubjectList {
                subjects: list_subjects(&pool).await?,
            })
        })
        .await
        .map_err(internal_error)?;

    Ok(Json(list))
}

async fn subject_handler(
    State(state): State<AppState>,
    Path(subject): Path<String>,
    Query(query): Query<SubjectQuery>,
) -> Result<Json<SubjectPayload>, ApiError> {
    let subject = validate_collection_key(&subject).map_err(bad_request)?;
    let module = query
        .module
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty());

    let key = keys::subject_key(&subject, module);
    if let Some(hit) = state.cache().get::<SubjectPayload>(&key).await {
        return Ok(Json(hit));
    }

    let content = fetch_subject(state.pool_ref(), &subject)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found(format!("Subject '{subject}' not found.")))?;

    let data = match module {
        Some(module) => module_content(&content, module)
            .ok_or_else(|| not_found(format!("Module {module} not found in '{subject}'.")))?,
        None => content,
    };

    let payload = SubjectPayload { subject, data };
    state.cache().set(&key, &payload, TTL_LONG).await;
    Ok(Json(payload))
}

async fn stats_handler(State(state): State<AppState>) -> Result<Json<ContentStats>, ApiError> {
    let pool = state.pool();
    let stats = state
        .cache()
        .get_or_load(STATS_SUBJECTS, TTL_MEDIUM, || async move {
            let documents: Vec<Value> = sqlx::query_scalar("SELECT content FROM subjects")
                .fetch_all(&pool)
                .await
                .context("failed to load subject documents for stats")?;
            let curriculum_entries: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM curriculum")
                .fetch_one(&pool)
                .await
                .context("failed to count curriculum entries")?;

            let mut stats = content_stats(&documents);
            stats.curriculum_entries = curriculum_entries;
            Ok(stats)
        })
        .await
        .map_err(internal_error)?;

    Ok(Json(stats))
}

pub async fn list_subjects(pool: &PgPool) -> Result<Vec<String>> {
    sqlx::query_scalar("SELECT collection_key FROM subjects ORDER BY collection_key")
        .fetch_all(pool)
        .await
        .context("failed to list subjects")
}

pub async fn fetch_subject<'e, E>(executor: E, subject: &str) -> Result<Option<Value>>
where
    E: PgExecutor<'e>,
{
    sqlx::query_scalar("SELECT content FROM subjects WHERE collection_key = $1")
        .bind(subject)
        .fetch_optional(executor)
        .await
        .with_context(|| format!("failed to load subject {subject}"))
}

/// Replace the whole document of a subject in one statement, creating it if needed.
pub async fn upsert_subject<'e, E>(
    executor: E,
    subject: &str,
    content: &Value,
    updated_by: &str,
) -> Result<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO subjects (collection_key, content, updated_by) VALUES ($1, $2, $3)
         ON CONFLICT (collection_key) DO UPDATE
         SET content = EXCLUDED.content, updated_by = EXCLUDED.updated_by, updated_at = NOW()",
    )
    .bind(subject)
    .bind(content)
    .bind(updated_by)
    .execute(executor)
    .await
    .with_context(|| format!("failed to write subject {subject}"))?;

    Ok(())
}

/// Drop every cached read a write to `subject` could have changed.
pub async fn invalidate_subject(cache: &Cache, subject: &str) {
    cache.invalidate_family(&keys::subject_family(subject)).await;
    cache
        .del(&[SUBJECTS_ALL.to_string(), STATS_SUBJECTS.to_string()])
        .await;
}

pub fn validate_collection_key(raw: &str) -> Result<String, &'static str> {
    let key = raw.trim();
    if key.is_empty() {
        return Err("Subject name is required.");
    }
    if key.len() > MAX_KEY_LEN {
        return Err("Subject name is too long.");
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err("Subject name may only contain letters, digits, '-', '_' and '.'.");
    }
    Ok(key.to_string())
}

/// Subject documents are free-form, but must be objects with an object `modules`.
pub fn validate_subject_document(content: &Value) -> Result<(), &'static str> {
    let Some(object) = content.as_object() else {
        return Err("Subject content must be a JSON object.");
    };
    match object.get("modules") {
        None | Some(Value::Object(_)) => Ok(()),
        Some(_) => Err("'modules' must be an object keyed by module number."),
    }
}

pub fn module_content(content: &Value, module: &str) -> Option<Value> {
    let modules = content.get("modules")?;
    match modules {
        Value::Object(map) => map.get(module).cloned(),
        Value::Array(items) => {
            let index: usize = module.parse().ok()?;
            items.get(index.checked_sub(1)?).cloned()
        }
        _ => None,
    }
}

/// Merge `patch` into `target`: objects merge key by key, `null` removes a key,
/// anything else replaces the existing value.
pub fn merge_content(target: &mut Value, patch: Value) {
    match patch {
        Value::Object(patch_map) => {
            if !target.is_object() {
                *target = Value::Object(Map::new());
            }
            if let Value::Object(target_map) = target {
                for (key, value) in patch_map {
                    if value.is_null() {
                        target_map.remove(&key);
                    } else {
                        merge_content(target_map.entry(key).or_insert(Value::Null), value);
                    }
                }
            }
        }
        other => *target = other,
    }
}

pub fn content_stats(documents: &[Value]) -> ContentStats {
    let mut stats = ContentStats {
        subjects: documents.len(),
        ..ContentStats::default()
    };

    for document in documents {
        let modules: Vec<&Value> = match document.get("modules") {
            Some(Value::Object(map)) => map.values().collect(),
            Some(Value::Array(items)) => items.iter().collect(),
            _ => continue,
        };

        stats.modules += modules.len();
        for module in modules {
            stats.topics += array_len(module.get("topics"));
            stats.notes_links += array_len(module.get("notesLink"));
        }
    }

    stats
}

fn array_len(value: Option<&Value>) -> usize {
    value.and_then(Value::as_array).map(Vec::len).unwrap_or(0)
}
