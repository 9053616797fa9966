use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::{
    AppState,
    cache::{
        TTL_LONG,
        keys::{self, CURRICULUM, CURRICULUM_PARAMS, STATS_SUBJECTS},
    },
    web::{ApiError, admin, internal_error, required_field},
};

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/api/curriculum",
        get(list_curriculum_handler).post(upsert_curriculum_handler),
    )
}

#[derive(Debug, Default, Deserialize)]
pub struct CurriculumQuery {
    #[serde(default)]
    year: Option<String>,
    #[serde(default)]
    branch: Option<String>,
}

impl CurriculumQuery {
    fn normalized(&self) -> (Option<String>, Option<String>) {
        let clean = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        (clean(&self.year), clean(&self.branch))
    }

    fn cache_key(&self) -> String {
        let (year, branch) = self.normalized();
        keys::derive_key(
            CURRICULUM,
            CURRICULUM_PARAMS,
            [
                ("year", year.unwrap_or_default()),
                ("branch", branch.unwrap_or_default()),
            ],
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CurriculumEntry {
    pub year: String,
    pub branch: String,
    #[serde(flatten)]
    pub content: Map<String, Value>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct CurriculumRow {
    year: String,
    branch: String,
    content: Value,
    updated_at: DateTime<Utc>,
}

impl From<CurriculumRow> for CurriculumEntry {
    fn from(row: CurriculumRow) -> Self {
        let content = match row.content {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            year: row.year,
            branch: row.branch,
            content,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct CurriculumList {
    pub curriculum: Vec<CurriculumEntry>,
}

#[derive(Deserialize)]
pub struct CurriculumUpsert {
    #[serde(default)]
    year: Option<String>,
    #[serde(default)]
    branch: Option<String>,
    #[serde(flatten)]
    content: Map<String, Value>,
}

async fn list_curriculum_handler(
    State(state): State<AppState>,
    Query(query): Query<CurriculumQuery>,
) -> Result<Json<CurriculumList>, ApiError> {
    let key = query.cache_key();
    let (year, branch) = query.normalized();
    let pool = state.pool();

    let list = state
        .cache()
        .get_or_load(&key, TTL_LONG, || async move {
            Ok(CurriculumList {
                curriculum: fetch_curriculum(&pool, year.as_deref(), branch.as_deref()).await?,
            })
        })
        .await
        .map_err(internal_error)?;

    Ok(Json(list))
}

async fn upsert_curriculum_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<CurriculumUpsert>,
) -> Result<Json<CurriculumEntry>, ApiError> {
    let user = admin::require_super_admin(&state, &jar).await?;

    let year = required_field(body.year.as_deref(), "year")?;
    let branch = required_field(body.branch.as_deref(), "branch")?;
    let mut content = body.content;
    content.remove("updatedAt");

    let entry = upsert_curriculum(state.pool_ref(), &year, &branch, content)
        .await
        .map_err(internal_error)?;

    state
        .cache()
        .invalidate_family(&keys::curriculum_family())
        .await;
    state.cache().del(&[STATS_SUBJECTS.to_string()]).await;

    info!(%year, %branch, by = %user.username, "curriculum entry saved");
    Ok(Json(entry))
}

pub async fn fetch_curriculum(
    pool: &PgPool,
    year: Option<&str>,
    branch: Option<&str>,
) -> Result<Vec<CurriculumEntry>> {
    let rows = sqlx::query_as::<_, CurriculumRow>(
        "SELECT year, branch, content, updated_at FROM curriculum
         WHERE ($1::text IS NULL OR year = $1) AND ($2::text IS NULL OR branch = $2)
         ORDER BY year, branch",
    )
    .bind(year)
    .bind(branch)
    .fetch_all(pool)
    .await
    .context("failed to load curriculum")?;

    Ok(rows.into_iter().map(CurriculumEntry::from).collect())
}

pub async fn upsert_curriculum(
    pool: &PgPool,
    year: &str,
    branch: &str,
    content: Map<String, Value>,
) -> Result<CurriculumEntry> {
    let row = sqlx::query_as::<_, CurriculumRow>(
        "INSERT INTO curriculum (id, year, branch, content) VALUES ($1, $2, $3, $4)
         ON CONFLICT (year, branch) DO UPDATE SET content = EXCLUDED.content, updated_at = NOW()
         RETURNING year, branch, content, updated_at",
    )
    .bind(Uuid::new_v4())
    .bind(year)
    .bind(branch)
    .bind(Value::Object(content))
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to upsert curriculum {year}/{branch}"))?;

    Ok(row.into())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn cache_key_ignores_order_and_blanks() {
        let query = CurriculumQuery {
            year: Some(" 2 ".into()),
            branch: Some("CSE".into()),
        };
        assert_eq!(query.cache_key(), "curriculum:branch=CSE:year=2");

        let blank = CurriculumQuery {
            year: Some("".into()),
            branch: None,
        };
        assert_eq!(blank.cache_key(), "curriculum");
    }

    #[test]
    fn upsert_body_splits_identity_from_content() {
        let body: CurriculumUpsert = serde_json::from_value(json!({
            "year": "2",
            "branch": "CSE",
            "semesters": {"3": ["dsa", "os"]}
        }))
        .unwrap();

        assert_eq!(body.year.as_deref(), Some("2"));
        assert_eq!(body.branch.as_deref(), Some("CSE"));
        assert_eq!(body.content.get("semesters"), Some(&json!({"3": ["dsa", "os"]})));
        assert!(!body.content.contains_key("year"));
    }

    #[test]
    fn entry_flattens_content() {
        let entry = CurriculumEntry::from(CurriculumRow {
            year: "1".into(),
            branch: "ME".into(),
            content: json!({"semesters": {}}),
            updated_at: Utc::now(),
        });
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["year"], "1");
        assert_eq!(value["semesters"], json!({}));
        assert!(value.get("updatedAt").is_some());
    }
}
