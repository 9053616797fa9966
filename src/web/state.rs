use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::{
    cache::Cache,
    config::{AppConfig, PRIMARY_DATABASE},
    db::Databases,
};

#[derive(Clone)]
pub struct AppState {
    databases: Arc<Databases>,
    pool: PgPool,
    cache: Cache,
    super_admin: Arc<str>,
}

impl AppState {
    pub async fn new(config: &AppConfig) -> Result<Self> {
        let databases = Arc::new(Databases::new(config.clone()));
        let pool = databases
            .pool(PRIMARY_DATABASE)
            .await
            .context("failed to connect to Postgres")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run database migrations")?;

        let cache = Cache::connect(&config.cache).await;
        info!(cache_enabled = cache.is_enabled(), "application state ready");

        Ok(Self::from_parts(
            databases,
            pool,
            cache,
            &config.super_admin_username,
        ))
    }

    pub fn from_parts(
        databases: Arc<Databases>,
        pool: PgPool,
        cache: Cache,
        super_admin: &str,
    ) -> Self {
        Self {
            databases,
            pool,
            cache,
            super_admin: Arc::from(super_admin),
        }
    }

    pub async fn ensure_seed_admin(&self, password: &str) -> Result<()> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM users WHERE LOWER(username) = LOWER($1))",
        )
        .bind(self.super_admin())
        .fetch_one(&self.pool)
        .await
        .context("failed to verify super-admin presence")?;

        if !exists {
            let password_hash = crate::web::auth::hash_password(password)
                .map_err(|err| anyhow!("failed to hash seed admin password: {err}"))?;

            sqlx::query(
                "INSERT INTO users (id, username, email, password_hash) VALUES ($1, $2, $3, $4)",
            )
            .bind(Uuid::new_v4())
            .bind(self.super_admin())
            .bind(format!("{}@localhost", self.super_admin().to_lowercase()))
            .bind(password_hash)
            .execute(&self.pool)
            .await
            .context("failed to insert seed super-admin user")?;

            info!(
                username = self.super_admin(),
                "Seeded super-admin account. Change its password promptly."
            );
        }

        Ok(())
    }

    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    pub fn pool_ref(&self) -> &PgPool {
        &self.pool
    }

    /// Pool for a named database, opened on first use and shared afterwards.
    pub async fn database(&self, name: &str) -> Result<PgPool> {
        self.databases.pool(name).await
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn super_admin(&self) -> &str {
        &self.super_admin
    }

    pub fn is_super_admin(&self, username: &str) -> bool {
        crate::permissions::is_super_admin(&self.super_admin, username)
    }
}
