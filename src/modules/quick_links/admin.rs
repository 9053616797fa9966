use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::info;
use uuid::Uuid;

use crate::{
    AppState,
    cache::keys,
    web::{ApiError, admin, auth, bad_request, internal_error, not_found},
};

use super::{
    QuickLink, QuickLinkInput, delete_quick_link, fetch_quick_link, insert_quick_link,
    update_quick_link,
};

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim()).map_err(|_| bad_request("Invalid quick link id."))
}

async fn existing(state: &AppState, id: Uuid) -> Result<QuickLink, ApiError> {
    fetch_quick_link(state.pool_ref(), id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found("Quick link not found."))
}

pub(crate) async fn create_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<QuickLinkInput>,
) -> Result<(StatusCode, Json<QuickLink>), ApiError> {
    let user = auth::current_user_or_json_error(&state, &jar).await?;
    let draft = body.validate().map_err(bad_request)?;
    admin::ensure_can_edit(&state, &user, &draft.subject_collections).await?;

    let link = insert_quick_link(state.pool_ref(), &draft, &user.username)
        .await
        .map_err(internal_error)?;

    state
        .cache()
        .del(&keys::quick_link_invalidation_keys(&[], &link.subject_collections))
        .await;

    info!(id = %link.id, template = %link.template_name, by = %user.username, "quick link created");
    Ok((StatusCode::CREATED, Json(link)))
}

pub(crate) async fn update_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(id): Path<String>,
    Json(body): Json<QuickLinkInput>,
) -> Result<Json<QuickLink>, ApiError> {
    let user = auth::current_user_or_json_error(&state, &jar).await?;
    let id = parse_id(&id)?;
    let draft = body.validate().map_err(bad_request)?;

    let previous = existing(&state, id).await?;
    let mut touched = previous.subject_collections.clone();
    touched.extend(draft.subject_collections.iter().cloned());
    admin::ensure_can_edit(&state, &user, &touched).await?;

    let link = update_quick_link(state.pool_ref(), id, &draft)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found("Quick link not found."))?;

    state
        .cache()
        .del(&keys::quick_link_invalidation_keys(
            &previous.subject_collections,
            &link.subject_collections,
        ))
        .await;

    info!(%id, by = %user.username, "quick link updated");
    Ok(Json(link))
}

pub(crate) async fn delete_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let user = auth::current_user_or_json_error(&state, &jar).await?;
    let id = parse_id(&id)?;

    let previous = existing(&state, id).await?;
    admin::ensure_can_edit(&state, &user, &previous.subject_collections).await?;

    if !delete_quick_link(state.pool_ref(), id)
        .await
        .map_err(internal_error)?
    {
        return Err(not_found("Quick link not found."));
    }

    state
        .cache()
        .del(&keys::quick_link_invalidation_keys(
            &previous.subject_collections,
            &[],
        ))
        .await;

    info!(%id, by = %user.username, "quick link deleted");
    Ok(StatusCode::NO_CONTENT)
}
