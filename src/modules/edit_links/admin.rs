use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::{
    AppState,
    modules::subjects,
    web::{ApiError, admin, auth, bad_request, internal_error, json_error, not_found, required_field},
};

use super::{EditLink, deactivate_link, insert_link, list_links};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateLinkRequest {
    #[serde(default)]
    subject_collection: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    editor_name: Option<String>,
}

#[derive(Serialize)]
pub(crate) struct LinkList {
    links: Vec<EditLink>,
}

pub(crate) async fn create_link_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<CreateLinkRequest>,
) -> Result<(StatusCode, Json<EditLink>), ApiError> {
    let user = admin::require_super_admin(&state, &jar).await?;

    let subject = required_field(body.subject_collection.as_deref(), "subjectCollection")?;
    let subject = subjects::validate_collection_key(&subject).map_err(bad_request)?;
    let password = required_field(body.password.as_deref(), "password")?;
    let editor_name = required_field(body.editor_name.as_deref(), "editorName")?;

    let password_hash = auth::hash_password(&password).map_err(|err| {
        error!(?err, "failed to hash edit link password");
        json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error.")
    })?;

    let link = insert_link(
        state.pool_ref(),
        &subject,
        &password_hash,
        &editor_name,
        &user.username,
    )
    .await
    .map_err(internal_error)?;

    info!(link_id = %link.link_id, %subject, editor = %editor_name, "edit link created");
    Ok((StatusCode::CREATED, Json(link)))
}

pub(crate) async fn list_links_handler(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Json<LinkList>, ApiError> {
    admin::require_super_admin(&state, &jar).await?;

    let links = list_links(state.pool_ref()).await.map_err(internal_error)?;
    Ok(Json(LinkList { links }))
}

pub(crate) async fn revoke_link_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(link_id): Path<String>,
) -> Result<Json<EditLink>, ApiError> {
    let user = admin::require_super_admin(&state, &jar).await?;

    let link = deactivate_link(state.pool_ref(), &link_id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found("Edit link not found."))?;

    info!(%link_id, by = %user.username, "edit link deactivated");
    Ok(Json(link))
}
