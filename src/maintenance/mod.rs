use anyhow::{Context, Result};
use sqlx::PgPool;
use tokio::time::{Duration, sleep};
use tracing::{error, info};

use crate::{AppState, config::PRIMARY_DATABASE};

const CLEANUP_INTERVAL_MINUTES: u64 = 15;

pub fn spawn(state: AppState) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(CLEANUP_INTERVAL_MINUTES * 60);
        loop {
            if let Err(err) = run_cleanup_cycle(&state).await {
                error!(?err, "cleanup cycle failed");
            }
            sleep(interval).await;
        }
    });
}

async fn run_cleanup_cycle(state: &AppState) -> Result<()> {
    let cache_entries_removed = state.cache().purge_expired().await;
    if cache_entries_removed > 0 {
        info!(cache_entries_removed, "cache cleanup completed");
    }

    let pool = state.database(PRIMARY_DATABASE).await?;
    let sessions_removed = purge_expired_sessions(&pool).await?;

    if sessions_removed > 0 {
        info!(sessions_removed, "session cleanup completed");
    }

    Ok(())
}

pub async fn purge_expired_sessions(pool: &PgPool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= NOW()")
        .execute(pool)
        .await
        .context("failed to delete expired sessions")?;

    Ok(result.rows_affected())
}
