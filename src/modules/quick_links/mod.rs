//! Shared link templates (books, past papers, misc) attached to one or more subjects.

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Query, State},
    routing::{get, post, put},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, types::Json as SqlJson};
use uuid::Uuid;

mod admin;

use crate::{
    AppState,
    cache::{
        TTL_MEDIUM,
        keys::{self, QUICK_LINKS_ALL},
    },
    modules::subjects,
    web::{ApiError, bad_request, internal_error},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/quick-links", get(list_quick_links_handler))
        .route("/api/admin/quick-links", post(admin::create_handler))
        .route(
            "/api/admin/quick-links/:id",
            put(admin::update_handler).delete(admin::delete_handler),
        )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Books,
    Pyqs,
    Other,
}

impl LinkType {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkType::Books => "books",
            LinkType::Pyqs => "pyqs",
            LinkType::Other => "other",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "books" => Some(LinkType::Books),
            "pyqs" => Some(LinkType::Pyqs),
            "other" => Some(LinkType::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkItem {
    #[serde(default)]
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuickLink {
    pub id: Uuid,
    pub template_name: String,
    pub subject_collections: Vec<String>,
    pub link_type: LinkType,
    pub links: Vec<LinkItem>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct QuickLinkRow {
    id: Uuid,
    template_name: String,
    subject_collections: Vec<String>,
    link_type: String,
    links: SqlJson<Vec<LinkItem>>,
    created_by: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<QuickLinkRow> for QuickLink {
    type Error = anyhow::Error;

    fn try_from(row: QuickLinkRow) -> Result<Self> {
        let link_type = LinkType::parse(&row.link_type)
            .with_context(|| format!("unknown quick link type '{}'", row.link_type))?;
        Ok(Self {
            id: row.id,
            template_name: row.template_name,
            subject_collections: row.subject_collections,
            link_type,
            links: row.links.0,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuickLinkList {
    pub quick_links: Vec<QuickLink>,
}

/// Validated write payload shared by create and update.
#[derive(Debug, PartialEq)]
pub struct QuickLinkDraft {
    pub template_name: String,
    pub subject_collections: Vec<String>,
    pub link_type: LinkType,
    pub links: Vec<LinkItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickLinkInput {
    #[serde(default)]
    template_name: Option<String>,
    #[serde(default)]
    subject_collections: Vec<String>,
    #[serde(default)]
    link_type: Option<String>,
    #[serde(default)]
    links: Vec<LinkItem>,
}

impl QuickLinkInput {
    pub fn validate(self) -> Result<QuickLinkDraft, String> {
        let template_name = self
            .template_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or("Missing required field: templateName")?
            .to_string();

        let mut subject_collections = Vec::with_capacity(self.subject_collections.len());
        for raw in &self.subject_collections {
            let key = subjects::validate_collection_key(raw)?;
            if !subject_collections.contains(&key) {
                subject_collections.push(key);
            }
        }
        if subject_collections.is_empty() {
            return Err("At least one subject is required.".to_string());
        }

        let link_type = match self.link_type.as_deref() {
            None => LinkType::Other,
            Some(raw) => LinkType::parse(raw).ok_or("linkType must be books, pyqs or other.")?,
        };

        let mut links = Vec::with_capacity(self.links.len());
        for item in self.links {
            let url = item.url.trim();
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(format!("Invalid link URL: {url}"));
            }
            let name = match item.name.trim() {
                "" => url.to_string(),
                name => name.to_string(),
            };
            links.push(LinkItem {
                name,
                url: url.to_string(),
            });
        }

        Ok(QuickLinkDraft {
            template_name,
            subject_collections,
            link_type,
            links,
        })
    }
}

#[derive(Deserialize)]
pub(crate) struct QuickLinksQuery {
    #[serde(default)]
    subject: Option<String>,
}

async fn list_quick_links_handler(
    State(state): State<AppState>,
    Query(query): Query<QuickLinksQuery>,
) -> Result<Json<QuickLinkList>, ApiError> {
    let subject = match query.subject.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(subjects::validate_collection_key(raw).map_err(bad_request)?),
    };
    let key = match &subject {
        Some(subject) => keys::quick_links_subject_key(subject),
        None => QUICK_LINKS_ALL.to_string(),
    };

    let pool = state.pool();
    let list = state
        .cache()
        .get_or_load(&key, TTL_MEDIUM, || async move {
            Ok(QuickLinkList {
                quick_links: fetch_quick_links(&pool, subject.as_deref()).await?,
            })
        })
        .await
        .map_err(internal_error)?;

    Ok(Json(list))
}

const QUICK_LINK_COLUMNS: &str =
    "id, template_name, subject_collections, link_type, links, created_by, created_at, updated_at";

pub async fn fetch_quick_links(pool: &PgPool, subject: Option<&str>) -> Result<Vec<QuickLink>> {
    let rows = sqlx::query_as::<_, QuickLinkRow>(&format!(
        "SELECT {QUICK_LINK_COLUMNS} FROM quick_links
         WHERE $1::text IS NULL OR $1 = ANY(subject_collections)
         ORDER BY template_name, created_at"
    ))
    .bind(subject)
    .fetch_all(pool)
    .await
    .context("failed to load quick links")?;

    rows.into_iter().map(QuickLink::try_from).collect()
}

pub async fn fetch_quick_link(pool: &PgPool, id: Uuid) -> Result<Option<QuickLink>> {
    sqlx::query_as::<_, QuickLinkRow>(&format!(
        "SELECT {QUICK_LINK_COLUMNS} FROM quick_links WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("failed to load quick link")?
    .map(QuickLink::try_from)
    .transpose()
}

pub async fn insert_quick_link(
    pool: &PgPool,
    draft: &QuickLinkDraft,
    created_by: &str,
) -> Result<QuickLink> {
    sqlx::query_as::<_, QuickLinkRow>(&format!(
        "INSERT INTO quick_links (id, template_name, subject_collections, link_type, links, created_by)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING {QUICK_LINK_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(&draft.template_name)
    .bind(&draft.subject_collections)
    .bind(draft.link_type.as_str())
    .bind(SqlJson(&draft.links))
    .bind(created_by)
    .fetch_one(pool)
    .await
    .context("failed to insert quick link")?
    .try_into()
}

pub async fn update_quick_link(
    pool: &PgPool,
    id: Uuid,
    draft: &QuickLinkDraft,
) -> Result<Option<QuickLink>> {
    sqlx::query_as::<_, QuickLinkRow>(&format!(
        "UPDATE quick_links
         SET template_name = $2, subject_collections = $3, link_type = $4, links = $5,
             updated_at = NOW()
         WHERE id = $1
         RETURNING {QUICK_LINK_COLUMNS}"
    ))
    .bind(id)
    .bind(&draft.template_name)
    .bind(&draft.subject_collections)
    .bind(draft.link_type.as_str())
    .bind(SqlJson(&draft.links))
    .fetch_optional(pool)
    .await
    .context("failed to update quick link")?
    .map(QuickLink::try_from)
    .transpose()
}

pub async fn delete_quick_link(pool: &PgPool, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM quick_links WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to delete quick link")?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn input(value: serde_json::Value) -> QuickLinkInput {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn validate_normalizes_subjects_and_names() {
        let draft = input(json!({
            "templateName": " Reference books ",
            "subjectCollections": ["dsa", " os ", "dsa"],
            "linkType": "Books",
            "links": [{"name": " ", "url": " https://example.org/clrs.pdf "}]
        }))
        .validate()
        .unwrap();

        assert_eq!(draft.template_name, "Reference books");
        assert_eq!(draft.subject_collections, vec!["dsa", "os"]);
        assert_eq!(draft.link_type, LinkType::Books);
        assert_eq!(
            draft.links,
            vec![LinkItem {
                name: "https://example.org/clrs.pdf".into(),
                url: "https://example.org/clrs.pdf".into(),
            }]
        );
    }

    #[test]
    fn validate_rejects_missing_pieces() {
        assert!(input(json!({"subjectCollections": ["dsa"]})).validate().is_err());
        assert!(input(json!({"templateName": "x"})).validate().is_err());
        assert!(
            input(json!({"templateName": "x", "subjectCollections": ["dsa"], "linkType": "videos"}))
                .validate()
                .is_err()
        );
        assert!(
            input(json!({
                "templateName": "x",
                "subjectCollections": ["dsa"],
                "links": [{"name": "t", "url": "javascript:alert(1)"}]
            }))
            .validate()
            .is_err()
        );
    }

    #[test]
    fn link_type_defaults_to_other() {
        let draft = input(json!({"templateName": "x", "subjectCollections": ["dsa"]}))
            .validate()
            .unwrap();
        assert_eq!(draft.link_type, LinkType::Other);
        assert!(draft.links.is_empty());
    }
}
