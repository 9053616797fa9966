use anyhow::Context;
use axum::{Json, extract::State};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use sqlx::types::Json as SqlJson;
use tracing::info;

use crate::{
    AppState,
    cache::keys,
    web::{ApiError, admin, bad_request, internal_error},
};

use super::SgpaEntry;

const MAX_SGPA: f64 = 10.0;

#[derive(Debug, Deserialize)]
pub(crate) struct StudentImport {
    seat_number: String,
    name: String,
    admission_year: i32,
    #[serde(default)]
    sgpa_list: Vec<SgpaEntry>,
    #[serde(default)]
    avg_cgpa: Option<f64>,
}

#[derive(Deserialize)]
pub(crate) struct ImportRequest {
    students: Vec<StudentImport>,
}

#[derive(Serialize)]
pub(crate) struct ImportResponse {
    imported: usize,
}

fn validate_student(student: &StudentImport) -> Result<(), String> {
    if student.seat_number.trim().is_empty() {
        return Err("Every student needs a seat_number.".to_string());
    }
    if student.name.trim().is_empty() {
        return Err(format!("Student {} is missing a name.", student.seat_number));
    }
    let out_of_range = |value: f64| !(0.0..=MAX_SGPA).contains(&value);
    if student.sgpa_list.iter().any(|entry| out_of_range(entry.sgpa)) {
        return Err(format!(
            "Student {} has an SGPA outside 0-10.",
            student.seat_number
        ));
    }
    if student.avg_cgpa.is_some_and(out_of_range) {
        return Err(format!(
            "Student {} has a CGPA outside 0-10.",
            student.seat_number
        ));
    }
    Ok(())
}

pub(crate) async fn import_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<ImportRequest>,
) -> Result<Json<ImportResponse>, ApiError> {
    let user = admin::require_super_admin(&state, &jar).await?;

    if body.students.is_empty() {
        return Err(bad_request("No students supplied."));
    }
    for student in &body.students {
        validate_student(student).map_err(bad_request)?;
    }

    let mut transaction = state
        .pool_ref()
        .begin()
        .await
        .map_err(|err| internal_error(err.into()))?;

    for student in &body.students {
        sqlx::query(
            "INSERT INTO students (seat_number, name, admission_year, sgpa_list, avg_cgpa)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (seat_number) DO UPDATE
             SET name = EXCLUDED.name, admission_year = EXCLUDED.admission_year,
                 sgpa_list = EXCLUDED.sgpa_list, avg_cgpa = EXCLUDED.avg_cgpa",
        )
        .bind(student.seat_number.trim())
        .bind(student.name.trim())
        .bind(student.admission_year)
        .bind(SqlJson(&student.sgpa_list))
        .bind(student.avg_cgpa)
        .execute(&mut *transaction)
        .await
        .with_context(|| format!("failed to import student {}", student.seat_number))
        .map_err(internal_error)?;
    }

    transaction
        .commit()
        .await
        .map_err(|err| internal_error(err.into()))?;

    state
        .cache()
        .invalidate_family(&keys::leaderboard_family())
        .await;

    let imported = body.students.len();
    info!(imported, by = %user.username, "leaderboard records imported");
    Ok(Json(ImportResponse { imported }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student(seat: &str, sgpa: f64) -> StudentImport {
        StudentImport {
            seat_number: seat.into(),
            name: "Meera".into(),
            admission_year: 2024,
            sgpa_list: vec![SgpaEntry {
                semester: 1,
                sgpa,
            }],
            avg_cgpa: None,
        }
    }

    #[test]
    fn accepts_valid_records() {
        assert!(validate_student(&student("S1", 9.2)).is_ok());
        assert!(validate_student(&student("S1", 0.0)).is_ok());
    }

    #[test]
    fn rejects_blank_seat_and_out_of_range_grades() {
        assert!(validate_student(&student(" ", 8.0)).is_err());
        assert!(validate_student(&student("S1", 10.5)).is_err());
        assert!(validate_student(&student("S1", -1.0)).is_err());

        let mut bad_avg = student("S1", 8.0);
        bad_avg.avg_cgpa = Some(11.0);
        assert!(validate_student(&bad_avg).is_err());
    }
}
