use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use axum::{Json, extract::State, http::StatusCode};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{Duration as ChronoDuration, Utc};
use cookie::time::Duration as CookieDuration;
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{error, info};
use uuid::Uuid;

use crate::web::{ApiError, AppState, internal_error, json_error, required_field};

#[derive(Clone, sqlx::FromRow)]
pub struct DbUserAuth {
    pub id: Uuid,
    pub password_hash: String,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct AuthUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
}

pub const SESSION_COOKIE: &str = "auth_token";
pub const SESSION_TTL_DAYS: i64 = 7;
const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug)]
pub struct JsonAuthError {
    pub status: StatusCode,
    pub message: &'static str,
}

impl From<JsonAuthError> for ApiError {
    fn from(JsonAuthError { status, message }: JsonAuthError) -> Self {
        json_error(status, message)
    }
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub username: String,
    pub email: String,
    pub is_super_admin: bool,
}

impl SessionInfo {
    fn new(state: &AppState, user: &AuthUser) -> Self {
        Self {
            username: user.username.clone(),
            email: user.email.clone(),
            is_super_admin: state.is_super_admin(&user.username),
        }
    }
}

pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, CookieJar, Json<SessionInfo>), ApiError> {
    let username = required_field(body.username.as_deref(), "username")?;
    let email = required_field(body.email.as_deref(), "email")?.to_lowercase();
    let password = required_field(body.password.as_deref(), "password")?;

    if !email.contains('@') {
        return Err(json_error(StatusCode::BAD_REQUEST, "Invalid email address."));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "Password must be at least 8 characters.",
        ));
    }

    let password_hash = hash_password(&password).map_err(|err| {
        error!(?err, "failed to hash password during registration");
        json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error.")
    })?;

    let user_id = Uuid::new_v4();
    let result = sqlx::query(
        "INSERT INTO users (id, username, email, password_hash) VALUES ($1, $2, $3, $4)",
    )
    .bind(user_id)
    .bind(&username)
    .bind(&email)
    .bind(password_hash)
    .execute(state.pool_ref())
    .await;

    match result {
        Ok(_) => {}
        Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505") => {
            return Err(json_error(
                StatusCode::BAD_REQUEST,
                "Username or email already registered.",
            ));
        }
        Err(err) => return Err(internal_error(err.into())),
    }

    info!(%username, "registered new account");

    let user = AuthUser {
        id: user_id,
        username,
        email,
    };
    let jar = start_session(&state, jar, user.id).await?;
    Ok((StatusCode::CREATED, jar, Json(SessionInfo::new(&state, &user))))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<LoginRequest>,
) -> Result<(CookieJar, Json<SessionInfo>), ApiError> {
    let username = required_field(body.username.as_deref(), "username")?;
    let password = required_field(body.password.as_deref(), "password")?;
    let pool = state.pool();

    let user = match fetch_user_by_username(&pool, &username).await {
        Ok(Some(user)) => user,
        Ok(None) => return Err(invalid_credentials()),
        Err(err) => {
            error!(?err, "failed to fetch user during login");
            return Err(internal_error(err.into()));
        }
    };

    if !verify_password(&password, &user.password_hash) {
        return Err(invalid_credentials());
    }

    let jar = start_session(&state, jar, user.id).await?;

    let profile = fetch_user_by_id(&pool, user.id)
        .await
        .map_err(|err| internal_error(err.into()))?
        .ok_or_else(invalid_credentials)?;

    Ok((jar, Json(SessionInfo::new(&state, &profile))))
}

pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, StatusCode) {
    let mut jar = jar;

    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if let Ok(token) = Uuid::parse_str(cookie.value()) {
            if let Err(err) = sqlx::query("DELETE FROM sessions WHERE id = $1")
                .bind(token)
                .execute(state.pool_ref())
                .await
            {
                error!(?err, "failed to remove session during logout");
            }
        }
    }

    let mut removal = Cookie::new(SESSION_COOKIE, "");
    removal.set_path("/");
    removal.set_http_only(true);
    removal.set_same_site(SameSite::Lax);
    removal.set_max_age(CookieDuration::seconds(0));
    jar = jar.remove(removal);

    (jar, StatusCode::NO_CONTENT)
}

pub async fn me(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Json<SessionInfo>, ApiError> {
    let user = current_user_or_json_error(&state, &jar).await?;
    Ok(Json(SessionInfo::new(&state, &user)))
}

async fn start_session(state: &AppState, jar: CookieJar, user_id: Uuid) -> Result<CookieJar, ApiError> {
    let session_token = Uuid::new_v4();
    let expires_at = Utc::now() + ChronoDuration::days(SESSION_TTL_DAYS);

    sqlx::query("INSERT INTO sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
        .bind(session_token)
        .bind(user_id)
        .bind(expires_at)
        .execute(state.pool_ref())
        .await
        .map_err(|err| {
            error!(?err, "failed to create session");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error.")
        })?;

    let mut cookie = Cookie::new(SESSION_COOKIE, session_token.to_string());
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_max_age(CookieDuration::days(SESSION_TTL_DAYS));

    Ok(jar.add(cookie))
}

/// Resolve the signed-in user, answering 401 for a missing or stale session.
pub async fn current_user_or_json_error(
    state: &AppState,
    jar: &CookieJar,
) -> Result<AuthUser, JsonAuthError> {
    let unauthorized = JsonAuthError {
        status: StatusCode::UNAUTHORIZED,
        message: "Sign in required.",
    };

    let Some(token_cookie) = jar.get(SESSION_COOKIE) else {
        return Err(unauthorized);
    };
    let Ok(token) = Uuid::parse_str(token_cookie.value()) else {
        return Err(unauthorized);
    };

    match fetch_user_by_session(state.pool_ref(), token).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(unauthorized),
        Err(err) => {
            error!(?err, "failed to validate session");
            Err(JsonAuthError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: "Internal server error.",
            })
        }
    }
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    let parsed = PasswordHash::new(password_hash);
    match parsed {
        Ok(hash) => Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok(),
        Err(_) => false,
    }
}

pub async fn fetch_user_by_username(
    pool: &PgPool,
    username: &str,
) -> sqlx::Result<Option<DbUserAuth>> {
    sqlx::query_as::<_, DbUserAuth>(
        "SELECT id, password_hash FROM users WHERE LOWER(username) = LOWER($1)",
    )
    .bind(username)
    .fetch_optional(pool)
    .await
}

pub async fn fetch_user_by_id(pool: &PgPool, id: Uuid) -> sqlx::Result<Option<AuthUser>> {
    sqlx::query_as::<_, AuthUser>("SELECT id, username, email FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn fetch_user_by_session(pool: &PgPool, token: Uuid) -> sqlx::Result<Option<AuthUser>> {
    sqlx::query_as::<_, AuthUser>(
        "SELECT users.id, users.username, users.email FROM sessions JOIN users ON users.id = sessions.user_id WHERE sessions.id = $1 AND sessions.expires_at > NOW()",
    )
    .bind(token)
    .fetch_optional(pool)
    .await
}

fn invalid_credentials() -> ApiError {
    json_error(StatusCode::UNAUTHORIZED, "Invalid username or password.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("correct horse").expect("hash");
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("correct horse", "not-a-phc-string"));
    }
}
