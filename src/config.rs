use std::{env, time::Duration};

use anyhow::{Context, Result, anyhow};
use tracing::warn;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_SUPER_ADMIN: &str = "admin";
const DEFAULT_SEED_PASSWORD: &str = "change-me";
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Name of the database holding subject content, curriculum and review data.
pub const PRIMARY_DATABASE: &str = "notes";

/// Which cache backend the process should use.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheSettings {
    Disabled,
    Memory,
    Redis(String),
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub cache: CacheSettings,
    pub super_admin_username: String,
    pub super_admin_password: String,
    pub connect_timeout: Duration,
    pub max_connections: u32,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL env var is missing")?;

        let cache = cache_settings(
            env::var("CACHE_DISABLED").ok().as_deref(),
            env::var("REDIS_URL").ok(),
        );

        let super_admin_username = env::var("SUPER_ADMIN_USERNAME")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_SUPER_ADMIN.to_string());

        let super_admin_password = match env::var("SUPER_ADMIN_PASSWORD") {
            Ok(value) if !value.trim().is_empty() => value,
            _ => {
                warn!("SUPER_ADMIN_PASSWORD not set, seeding with the default password");
                DEFAULT_SEED_PASSWORD.to_string()
            }
        };

        let connect_timeout = Duration::from_secs(parse_or(
            "DB_CONNECT_TIMEOUT_SECS",
            DEFAULT_CONNECT_TIMEOUT_SECS,
        )?);
        let max_connections = parse_or("DB_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;
        let port = parse_or("PORT", DEFAULT_PORT)?;

        Ok(Self {
            database_url,
            cache,
            super_admin_username,
            super_admin_password,
            connect_timeout,
            max_connections,
            port,
        })
    }

    #[cfg(test)]
    pub fn for_tests(database_url: &str) -> Self {
        Self {
            database_url: database_url.to_string(),
            cache: CacheSettings::Memory,
            super_admin_username: DEFAULT_SUPER_ADMIN.to_string(),
            super_admin_password: DEFAULT_SEED_PASSWORD.to_string(),
            connect_timeout: Duration::from_secs(1),
            max_connections: 1,
            port: DEFAULT_PORT,
        }
    }

    /// Connection string for a named database on the configured server.
    pub fn database_url_for(&self, database: &str) -> String {
        if database == PRIMARY_DATABASE {
            return self.database_url.clone();
        }
        with_database_name(&self.database_url, database)
    }
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|err| anyhow!("invalid value for {key}: {err}")),
        _ => Ok(default),
    }
}

fn cache_settings(disabled: Option<&str>, redis_url: Option<String>) -> CacheSettings {
    if matches!(disabled.map(str::trim), Some("1") | Some("true") | Some("TRUE")) {
        return CacheSettings::Disabled;
    }

    match redis_url {
        Some(url) if !url.trim().is_empty() => CacheSettings::Redis(url.trim().to_string()),
        _ => CacheSettings::Memory,
    }
}

/// Swap the database path segment of a Postgres URL, keeping query parameters.
fn with_database_name(url: &str, database: &str) -> String {
    let (base, query) = match url.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (url, None),
    };

    let scheme_end = base.find("://").map(|idx| idx + 3).unwrap_or(0);
    let rebuilt = match base[scheme_end..].find('/') {
        Some(slash) => format!("{}/{}", &base[..scheme_end + slash], database),
        None => format!("{base}/{database}"),
    };

    match query {
        Some(query) => format!("{rebuilt}?{query}"),
        None => rebuilt,
    }
}
