//! Grades leaderboard.
//!
//! Student records are read-mostly; `avg_cgpa` may be missing on a record, in
//! which case it is derived at read time from the positive SGPA entries and
//! never written back. Students without any positive entry have no CGPA
//! (`null`) on every view and sort after everyone else.

use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Query, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder, types::Json as SqlJson};

mod admin;

use crate::{
    AppState,
    cache::{
        TTL_LEADERBOARD, TTL_SHORT, TTL_VERY_LONG,
        keys::{self, LEADERBOARD, LEADERBOARD_PARAMS},
    },
    web::{ApiError, bad_request, internal_error},
};

pub const DEFAULT_LIMIT: i64 = 50;
pub const MAX_LIMIT: i64 = 100;
pub const DEFAULT_TOP_LIMIT: i64 = 10;
/// Keeps `offset() + limit` within `i64` for any accepted limit.
pub const MAX_PAGE: i64 = i64::MAX / MAX_LIMIT;

const EFFECTIVE_CGPA: &str = "COALESCE(avg_cgpa, (SELECT AVG((entry->>'sgpa')::float8) FROM jsonb_array_elements(sgpa_list) AS entry WHERE (entry->>'sgpa')::float8 > 0))";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/leaderboard", get(leaderboard_handler))
        .route("/api/leaderboard/top", get(top_handler))
        .route("/api/leaderboard/semester", get(semester_handler))
        .route("/api/leaderboard/stats", get(stats_handler))
        .route("/api/admin/leaderboard/import", post(admin::import_handler))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SgpaEntry {
    pub semester: i32,
    pub sgpa: f64,
}

/// Mean of the SGPA entries above zero; `None` when there are none.
pub fn derive_avg_cgpa(entries: &[SgpaEntry]) -> Option<f64> {
    let valid: Vec<f64> = entries
        .iter()
        .map(|entry| entry.sgpa)
        .filter(|sgpa| *sgpa > 0.0)
        .collect();

    if valid.is_empty() {
        return None;
    }
    Some(valid.iter().sum::<f64>() / valid.len() as f64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    AvgCgpa,
    Name,
    SeatNumber,
    AdmissionYear,
}

impl SortField {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "avg_cgpa" | "cgpa" => Some(SortField::AvgCgpa),
            "name" => Some(SortField::Name),
            "seat_number" => Some(SortField::SeatNumber),
            "admission_year" => Some(SortField::AdmissionYear),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            SortField::AvgCgpa => "avg_cgpa",
            SortField::Name => "name",
            SortField::SeatNumber => "seat_number",
            SortField::AdmissionYear => "admission_year",
        }
    }

    fn column(&self) -> &'static str {
        match self {
            SortField::AvgCgpa => EFFECTIVE_CGPA,
            SortField::Name => "name",
            SortField::SeatNumber => "seat_number",
            SortField::AdmissionYear => "admission_year",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "asc" | "1" => Some(SortOrder::Asc),
            "desc" | "-1" => Some(SortOrder::Desc),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }

    fn sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Raw query parameters; parsed by hand so bad values get a useful 400.
#[derive(Debug, Default, Deserialize)]
pub struct LeaderboardParams {
    admission_year: Option<String>,
    name: Option<String>,
    seat_number: Option<String>,
    min_cgpa: Option<String>,
    max_cgpa: Option<String>,
    page: Option<String>,
    limit: Option<String>,
    sort_by: Option<String>,
    sort_order: Option<String>,
    semester: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardFilter {
    pub admission_year: Option<i32>,
    pub name: Option<String>,
    pub seat_number: Option<String>,
    pub min_cgpa: Option<f64>,
    pub max_cgpa: Option<f64>,
    pub page: i64,
    pub limit: i64,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
}

impl Default for LeaderboardFilter {
    fn default() -> Self {
        Self {
            admission_year: None,
            name: None,
            seat_number: None,
            min_cgpa: None,
            max_cgpa: None,
            page: 1,
            limit: DEFAULT_LIMIT,
            sort_by: SortField::AvgCgpa,
            sort_order: SortOrder::Desc,
        }
    }
}

fn clean(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_number<T: std::str::FromStr>(
    value: &Option<String>,
    message: &'static str,
) -> Result<Option<T>, &'static str> {
    clean(value)
        .map(|raw| raw.parse::<T>().map_err(|_| message))
        .transpose()
}

impl LeaderboardFilter {
    pub fn from_params(params: &LeaderboardParams) -> Result<Self, &'static str> {
        let defaults = Self::default();

        let admission_year = parse_number(&params.admission_year, "admission_year must be a year")?;
        let min_cgpa: Option<f64> = parse_number(&params.min_cgpa, "min_cgpa must be a number")?;
        let max_cgpa: Option<f64> = parse_number(&params.max_cgpa, "max_cgpa must be a number")?;
        if let (Some(min), Some(max)) = (min_cgpa, max_cgpa) {
            if min > max {
                return Err("min_cgpa cannot exceed max_cgpa");
            }
        }

        let page = parse_number::<i64>(&params.page, "page must be a positive integer")?
            .unwrap_or(defaults.page)
            .max(1);
        if page > MAX_PAGE {
            return Err("page is out of range");
        }
        let limit = parse_number::<i64>(&params.limit, "limit must be a positive integer")?
            .unwrap_or(defaults.limit)
            .clamp(1, MAX_LIMIT);

        let sort_by = match clean(&params.sort_by) {
            Some(raw) => SortField::parse(raw).ok_or("unsupported sort_by field")?,
            None => defaults.sort_by,
        };
        let sort_order = match clean(&params.sort_order) {
            Some(raw) => SortOrder::parse(raw).ok_or("sort_order must be asc or desc")?,
            None => defaults.sort_order,
        };

        Ok(Self {
            admission_year,
            name: clean(&params.name).map(str::to_string),
            seat_number: clean(&params.seat_number).map(str::to_string),
            min_cgpa,
            max_cgpa,
            page,
            limit,
            sort_by,
            sort_order,
        })
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.limit
    }

    /// Key over the normalized filter, so defaulted and explicit values collide.
    pub fn cache_key(&self, view: &str) -> String {
        let opt = |value: Option<String>| value.unwrap_or_default();
        keys::derive_key(
            LEADERBOARD,
            LEADERBOARD_PARAMS,
            [
                ("view", view.to_string()),
                ("admission_year", opt(self.admission_year.map(|y| y.to_string()))),
                ("name", opt(self.name.as_ref().map(|n| n.to_lowercase()))),
                ("seat_number", opt(self.seat_number.clone())),
                ("min_cgpa", opt(self.min_cgpa.map(|v| v.to_string()))),
                ("max_cgpa", opt(self.max_cgpa.map(|v| v.to_string()))),
                ("page", self.page.to_string()),
                ("limit", self.limit.to_string()),
                ("sort_by", self.sort_by.as_str().to_string()),
                ("sort_order", self.sort_order.as_str().to_string()),
            ],
        )
    }

    /// Free-text searches rarely repeat, so they expire sooner.
    pub fn cache_ttl(&self) -> Duration {
        if self.name.is_some() || self.seat_number.is_some() {
            TTL_SHORT
        } else {
            TTL_LEADERBOARD
        }
    }

    fn push_where(&self, builder: &mut QueryBuilder<'_, Postgres>) {
        builder.push(" WHERE TRUE");
        if let Some(year) = self.admission_year {
            builder.push(" AND admission_year = ").push_bind(year);
        }
        if let Some(name) = &self.name {
            builder
                .push(" AND name ILIKE ")
                .push_bind(format!("%{}%", escape_like(name)));
        }
        if let Some(seat) = &self.seat_number {
            builder.push(" AND seat_number = ").push_bind(seat.clone());
        }
        if let Some(min) = self.min_cgpa {
            builder
                .push(format!(" AND {EFFECTIVE_CGPA} >= "))
                .push_bind(min);
        }
        if let Some(max) = self.max_cgpa {
            builder
                .push(format!(" AND {EFFECTIVE_CGPA} <= "))
                .push_bind(max);
        }
    }

    fn page_query(&self) -> QueryBuilder<'_, Postgres> {
        let mut builder = QueryBuilder::new(format!(
            "SELECT seat_number, name, admission_year, sgpa_list, {EFFECTIVE_CGPA} AS avg_cgpa FROM students"
        ));
        self.push_where(&mut builder);
        builder.push(format!(
            " ORDER BY {} {} NULLS LAST, seat_number ASC LIMIT ",
            self.sort_by.column(),
            self.sort_order.sql()
        ));
        builder.push_bind(self.limit);
        builder.push(" OFFSET ").push_bind(self.offset());
        builder
    }

    fn count_query(&self) -> QueryBuilder<'_, Postgres> {
        let mut builder = QueryBuilder::new("SELECT COUNT(*) FROM students");
        self.push_where(&mut builder);
        builder
    }
}

/// Escape LIKE metacharacters so user input only ever matches literally.
fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pagination {
    pub current_page: i64,
    pub per_page: i64,
    pub total_records: i64,
    pub total_pages: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl Pagination {
    pub fn new(page: i64, per_page: i64, total_records: i64) -> Self {
        let total_pages = if total_records == 0 {
            0
        } else {
            (total_records + per_page - 1) / per_page
        };
        Self {
            current_page: page,
            per_page,
            total_records,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentView {
    pub rank: i64,
    pub seat_number: String,
    pub name: String,
    pub admission_year: i32,
    pub sgpa_list: Vec<SgpaEntry>,
    pub avg_cgpa: Option<f64>,
}

#[derive(sqlx::FromRow)]
struct StudentRow {
    seat_number: String,
    name: String,
    admission_year: i32,
    sgpa_list: SqlJson<Vec<SgpaEntry>>,
    avg_cgpa: Option<f64>,
}

impl StudentRow {
    fn into_view(self, rank: i64) -> StudentView {
        let sgpa_list = self.sgpa_list.0;
        let avg_cgpa = self.avg_cgpa.or_else(|| derive_avg_cgpa(&sgpa_list));
        StudentView {
            rank,
            seat_number: self.seat_number,
            name: self.name,
            admission_year: self.admission_year,
            sgpa_list,
            avg_cgpa,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardPage {
    pub students: Vec<StudentView>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemesterStanding {
    pub rank: i64,
    pub seat_number: String,
    pub name: String,
    pub admission_year: i32,
    pub semester: i32,
    pub sgpa: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemesterRanking {
    pub semester: i32,
    pub students: Vec<SemesterStanding>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardStats {
    pub total_students: i64,
    pub average_cgpa: Option<f64>,
    pub highest_cgpa: Option<f64>,
    pub lowest_cgpa: Option<f64>,
    pub admission_years: Vec<i32>,
}

pub async fn fetch_page(pool: &PgPool, filter: &LeaderboardFilter) -> Result<LeaderboardPage> {
    let total: i64 = filter
        .count_query()
        .build_query_scalar()
        .fetch_one(pool)
        .await
        .context("failed to count leaderboard records")?;

    let rows: Vec<StudentRow> = filter
        .page_query()
        .build_query_as()
        .fetch_all(pool)
        .await
        .context("failed to load leaderboard page")?;

    let offset = filter.offset();
    let students = rows
        .into_iter()
        .enumerate()
        .map(|(idx, row)| row.into_view(offset + idx as i64 + 1))
        .collect();

    Ok(LeaderboardPage {
        students,
        pagination: Pagination::new(filter.page, filter.limit, total),
    })
}

pub async fn fetch_semester_ranking(
    pool: &PgPool,
    admission_year: Option<i32>,
    semester: i32,
    limit: i64,
) -> Result<SemesterRanking> {
    #[derive(sqlx::FromRow)]
    struct Row {
        seat_number: String,
        name: String,
        admission_year: i32,
        sgpa: f64,
    }

    let rows = sqlx::query_as::<_, Row>(
        "SELECT seat_number, name, admission_year, sgpa FROM (
             SELECT seat_number, name, admission_year,
                    (SELECT (entry->>'sgpa')::float8 FROM jsonb_array_elements(sgpa_list) AS entry
                     WHERE (entry->>'semester')::int = $1 LIMIT 1) AS sgpa
             FROM students
             WHERE ($2::int IS NULL OR admission_year = $2)
         ) ranked
         WHERE sgpa > 0
         ORDER BY sgpa DESC, seat_number ASC
         LIMIT $3",
    )
    .bind(semester)
    .bind(admission_year)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to load semester ranking")?;

    let students = rows
        .into_iter()
        .enumerate()
        .map(|(idx, row)| SemesterStanding {
            rank: idx as i64 + 1,
            seat_number: row.seat_number,
            name: row.name,
            admission_year: row.admission_year,
            semester,
            sgpa: row.sgpa,
        })
        .collect();

    Ok(SemesterRanking { semester, students })
}

pub async fn fetch_stats(pool: &PgPool, admission_year: Option<i32>) -> Result<LeaderboardStats> {
    let (total_students, average_cgpa, highest_cgpa, lowest_cgpa): (
        i64,
        Option<f64>,
        Option<f64>,
        Option<f64>,
    ) = sqlx::query_as(&format!(
        "SELECT COUNT(*), AVG(cgpa), MAX(cgpa), MIN(cgpa) FROM (
             SELECT {EFFECTIVE_CGPA} AS cgpa FROM students
             WHERE ($1::int IS NULL OR admission_year = $1)
         ) scoped"
    ))
    .bind(admission_year)
    .fetch_one(pool)
    .await
    .context("failed to compute leaderboard stats")?;

    let admission_years: Vec<i32> = sqlx::query_scalar(
        "SELECT DISTINCT admission_year FROM students ORDER BY admission_year DESC",
    )
    .fetch_all(pool)
    .await
    .context("failed to list admission years")?;

    Ok(LeaderboardStats {
        total_students,
        average_cgpa,
        highest_cgpa,
        lowest_cgpa,
        admission_years,
    })
}

async fn leaderboard_handler(
    State(state): State<AppState>,
    Query(params): Query<LeaderboardParams>,
) -> Result<Json<LeaderboardPage>, ApiError> {
    let filter = LeaderboardFilter::from_params(&params).map_err(bad_request)?;
    let pool = state.pool();
    let key = filter.cache_key("list");
    let ttl = filter.cache_ttl();

    let page = state
        .cache()
        .get_or_load(&key, ttl, || async move {
            fetch_page(&pool, &filter).await
        })
        .await
        .map_err(internal_error)?;

    Ok(Json(page))
}

async fn top_handler(
    State(state): State<AppState>,
    Query(params): Query<LeaderboardParams>,
) -> Result<Json<LeaderboardPage>, ApiError> {
    let mut filter = LeaderboardFilter::from_params(&LeaderboardParams {
        admission_year: params.admission_year.clone(),
        limit: params.limit.clone(),
        ..LeaderboardParams::default()
    })
    .map_err(bad_request)?;
    if clean(&params.limit).is_none() {
        filter.limit = DEFAULT_TOP_LIMIT;
    }

    let pool = state.pool();
    let key = filter.cache_key("top");
    let page = state
        .cache()
        .get_or_load(&key, TTL_LEADERBOARD, || async move {
            fetch_page(&pool, &filter).await
        })
        .await
        .map_err(internal_error)?;

    Ok(Json(page))
}

async fn semester_handler(
    State(state): State<AppState>,
    Query(params): Query<LeaderboardParams>,
) -> Result<Json<SemesterRanking>, ApiError> {
    let semester: i32 = parse_number(&params.semester, "semester must be an integer")
        .map_err(bad_request)?
        .ok_or_else(|| bad_request("Missing required field: semester"))?;
    let admission_year: Option<i32> =
        parse_number(&params.admission_year, "admission_year must be a year").map_err(bad_request)?;
    let limit = parse_number::<i64>(&params.limit, "limit must be a positive integer")
        .map_err(bad_request)?
        .unwrap_or(DEFAULT_TOP_LIMIT)
        .clamp(1, MAX_LIMIT);

    let key = keys::derive_key(
        LEADERBOARD,
        LEADERBOARD_PARAMS,
        [
            ("view", "semester".to_string()),
            ("semester", semester.to_string()),
            ("admission_year", admission_year.map(|y| y.to_string()).unwrap_or_default()),
            ("limit", limit.to_string()),
        ],
    );

    let pool = state.pool();
    let ranking = state
        .cache()
        .get_or_load(&key, TTL_LEADERBOARD, || async move {
            fetch_semester_ranking(&pool, admission_year, semester, limit).await
        })
        .await
        .map_err(internal_error)?;

    Ok(Json(ranking))
}

async fn stats_handler(
    State(state): State<AppState>,
    Query(params): Query<LeaderboardParams>,
) -> Result<Json<LeaderboardStats>, ApiError> {
    let admission_year: Option<i32> =
        parse_number(&params.admission_year, "admission_year must be a year").map_err(bad_request)?;

    let key = keys::derive_key(
        LEADERBOARD,
        LEADERBOARD_PARAMS,
        [
            ("view", "stats".to_string()),
            ("admission_year", admission_year.map(|y| y.to_string()).unwrap_or_default()),
        ],
    );

    let pool = state.pool();
    let stats = state
        .cache()
        .get_or_load(&key, TTL_VERY_LONG, || async move {
            fetch_stats(&pool, admission_year).await
        })
        .await
        .map_err(internal_error)?;

    Ok(Json(stats))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> LeaderboardParams {
        let mut params = LeaderboardParams::default();
        for (name, value) in pairs {
            let value = Some(value.to_string());
            match *name {
                "admission_year" => params.admission_year = value,
                "name" => params.name = value,
                "seat_number" => params.seat_number = value,
                "min_cgpa" => params.min_cgpa = value,
                "max_cgpa" => params.max_cgpa = value,
                "page" => params.page = value,
                "limit" => params.limit = value,
                "sort_by" => params.sort_by = value,
                "sort_order" => params.sort_order = value,
                "semester" => params.semester = value,
                other => panic!("unknown param {other}"),
            }
        }
        params
    }

    #[test]
    fn average_skips_zero_sgpa() {
        let entries = vec![
            SgpaEntry { semester: 1, sgpa: 8.5 },
            SgpaEntry { semester: 2, sgpa: 0.0 },
            SgpaEntry { semester: 3, sgpa: 9.0 },
        ];
        assert_eq!(derive_avg_cgpa(&entries), Some(8.75));
    }

    #[test]
    fn searches_expire_sooner_than_browsing() {
        let browse = LeaderboardFilter::from_params(&params(&[("admission_year", "2024")])).unwrap();
        assert_eq!(browse.cache_ttl(), TTL_LEADERBOARD);

        let search = LeaderboardFilter::from_params(&params(&[("name", "ash")])).unwrap();
        assert_eq!(search.cache_ttl(), TTL_SHORT);
    }

    #[test]
    fn average_is_none_without_valid_entries() {
        assert_eq!(derive_avg_cgpa(&[]), None);
        assert_eq!(
            derive_avg_cgpa(&[SgpaEntry { semester: 1, sgpa: 0.0 }]),
            None
        );
    }

    #[test]
    fn stored_average_wins_over_derived() {
        let row = StudentRow {
            seat_number: "S1".into(),
            name: "Asha".into(),
            admission_year: 2024,
            sgpa_list: SqlJson(vec![SgpaEntry { semester: 1, sgpa: 6.0 }]),
            avg_cgpa: Some(9.1),
        };
        assert_eq!(row.into_view(1).avg_cgpa, Some(9.1));

        let row = StudentRow {
            seat_number: "S2".into(),
            name: "Ravi".into(),
            admission_year: 2024,
            sgpa_list: SqlJson(vec![SgpaEntry { semester: 1, sgpa: 7.0 }]),
            avg_cgpa: None,
        };
        assert_eq!(row.into_view(2).avg_cgpa, Some(7.0));
    }

    #[test]
    fn defaults_sort_by_cgpa_descending() {
        let filter = LeaderboardFilter::from_params(&params(&[])).unwrap();
        assert_eq!(filter, LeaderboardFilter::default());
        assert_eq!(filter.sort_by, SortField::AvgCgpa);
        assert_eq!(filter.sort_order, SortOrder::Desc);
    }

    #[test]
    fn page_and_limit_are_clamped() {
        let filter =
            LeaderboardFilter::from_params(&params(&[("page", "0"), ("limit", "5000")])).unwrap();
        assert_eq!(filter.page, 1);
        assert_eq!(filter.limit, MAX_LIMIT);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(LeaderboardFilter::from_params(&params(&[("page", "two")])).is_err());
    }

    #[test]
    fn huge_page_is_rejected_before_offset_math() {
        let err = LeaderboardFilter::from_params(&params(&[("page", "9223372036854775807")]))
            .unwrap_err();
        assert_eq!(err, "page is out of range");

        let max_page = MAX_PAGE.to_string();
        let last = LeaderboardFilter::from_params(&params(&[
            ("page", max_page.as_str()),
            ("limit", "100"),
        ]))
        .unwrap();
        assert_eq!(last.offset(), (MAX_PAGE - 1) * MAX_LIMIT);
        assert!(last.offset().checked_add(MAX_LIMIT).is_some());
        assert!(LeaderboardFilter::from_params(&params(&[("sort_by", "password")])).is_err());
        assert!(LeaderboardFilter::from_params(&params(&[("sort_order", "up")])).is_err());
        assert!(
            LeaderboardFilter::from_params(&params(&[("min_cgpa", "9"), ("max_cgpa", "8")]))
                .is_err()
        );
    }

    #[test]
    fn consecutive_pages_do_not_overlap() {
        let first = LeaderboardFilter::from_params(&params(&[
            ("admission_year", "2024"),
            ("limit", "50"),
            ("page", "1"),
        ]))
        .unwrap();
        let second = LeaderboardFilter::from_params(&params(&[
            ("admission_year", "2024"),
            ("limit", "50"),
            ("page", "2"),
        ]))
        .unwrap();

        assert_eq!(first.offset(), 0);
        assert_eq!(second.offset(), 50);

        let builder = second.page_query();
        let sql = builder.sql();
        assert!(sql.contains("NULLS LAST, seat_number ASC"));
        assert!(sql.contains(" DESC "));
    }

    #[test]
    fn where_clause_binds_every_filter() {
        let filter = LeaderboardFilter::from_params(&params(&[
            ("admission_year", "2024"),
            ("name", "ash"),
            ("seat_number", "S1"),
            ("min_cgpa", "7"),
            ("max_cgpa", "9.5"),
            ("sort_by", "name"),
            ("sort_order", "asc"),
        ]))
        .unwrap();

        let page = filter.page_query();
        let sql = page.sql();
        assert!(sql.contains("admission_year = $1"));
        assert!(sql.contains("name ILIKE $2"));
        assert!(sql.contains("seat_number = $3"));
        assert!(sql.contains(">= $4"));
        assert!(sql.contains("<= $5"));
        assert!(sql.contains("ORDER BY name ASC"));
        assert!(sql.contains("LIMIT $6 OFFSET $7"));

        let count_builder = filter.count_query();
        let count = count_builder.sql();
        assert!(count.starts_with("SELECT COUNT(*) FROM students WHERE TRUE"));
        assert!(!count.contains("LIMIT"));
    }

    #[test]
    fn like_metacharacters_are_escaped() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }

    #[test]
    fn pagination_metadata() {
        let meta = Pagination::new(1, 50, 120);
        assert_eq!(meta.total_pages, 3);
        assert!(meta.has_next);
        assert!(!meta.has_prev);

        let last = Pagination::new(3, 50, 120);
        assert!(!last.has_next);
        assert!(last.has_prev);

        let empty = Pagination::new(1, 50, 0);
        assert_eq!(empty.total_pages, 0);
        assert!(!empty.has_next);
    }

    #[test]
    fn equivalent_filters_share_cache_key() {
        let implicit = LeaderboardFilter::from_params(&params(&[("admission_year", "2024")]))
            .unwrap();
        let explicit = LeaderboardFilter::from_params(&params(&[
            ("admission_year", " 2024"),
            ("page", "1"),
            ("limit", "50"),
            ("sort_by", "avg_cgpa"),
            ("sort_order", "DESC"),
        ]))
        .unwrap();
        assert_eq!(implicit.cache_key("list"), explicit.cache_key("list"));
        assert_ne!(implicit.cache_key("list"), implicit.cache_key("top"));
    }
}
