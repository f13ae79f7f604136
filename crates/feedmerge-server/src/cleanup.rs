use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use feedmerge_db::Database;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Background task that prunes expired OAuth states and dead refresh tokens.
pub async fn run_cleanup_loop(db: Arc<Database>, interval_secs: u64, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        match cleanup_expired(&db).await {
            Ok((0, 0)) => {}
            Ok((states, tokens)) => {
                info!("Cleanup: removed {} expired OAuth states, {} stale refresh tokens", states, tokens);
            }
            Err(e) => warn!("Cleanup error: {}", e),
        }
    }
}

async fn cleanup_expired(db: &Arc<Database>) -> anyhow::Result<(usize, usize)> {
    let now = Utc::now();
    db.blocking(move |db| {
        let states = db.delete_expired_oauth_states(now)?;
        let tokens = db.delete_stale_refresh_tokens(now)?;
        Ok((states, tokens))
    })
    .await
}
