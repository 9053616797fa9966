use axum::{
    Json,
    extract::{Query, State},
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    AppState,
    web::{ApiError, admin, bad_request, internal_error, required_field},
};

use super::{ChangeList, ChangeRequest, ChangeStatus, ReviewAction, list_changes, review_change};

#[derive(Deserialize)]
pub(crate) struct ChangesQuery {
    #[serde(default)]
    status: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ReviewRequest {
    #[serde(default)]
    change_id: Option<String>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    review_notes: Option<String>,
}

pub(crate) async fn list_changes_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<ChangesQuery>,
) -> Result<Json<ChangeList>, ApiError> {
    admin::require_super_admin(&state, &jar).await?;

    let status = match query.status.as_deref().map(str::trim) {
        None | Some("") | Some("all") => None,
        Some(raw) => Some(
            ChangeStatus::parse(raw)
                .ok_or_else(|| bad_request("status must be pending, approved, rejected or all."))?,
        ),
    };

    let changes = list_changes(state.pool_ref(), status)
        .await
        .map_err(internal_error)?;
    Ok(Json(ChangeList { changes }))
}

pub(crate) async fn review_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<ReviewRequest>,
) -> Result<Json<ChangeRequest>, ApiError> {
    let user = admin::require_super_admin(&state, &jar).await?;

    let change_id = required_field(body.change_id.as_deref(), "changeId")?;
    let change_id =
        Uuid::parse_str(&change_id).map_err(|_| bad_request("changeId is not a valid id."))?;
    let action = required_field(body.action.as_deref(), "action")?;
    let action = ReviewAction::parse(&action)
        .ok_or_else(|| bad_request("action must be 'approve' or 'reject'."))?;
    let notes = body
        .review_notes
        .as_deref()
        .map(str::trim)
        .filter(|notes| !notes.is_empty());

    let reviewed = review_change(
        state.pool_ref(),
        state.cache(),
        change_id,
        action,
        &user.username,
        notes,
    )
    .await?;

    Ok(Json(reviewed))
}
