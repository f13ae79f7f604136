use std::sync::Arc;

use anyhow::{Result, anyhow};
use chrono::Utc;
use feedmerge_crypto::TokenCipher;
use feedmerge_db::Database;
use feedmerge_db::models::{ConnectionRow, PostRow, PublishJob};
use feedmerge_types::{PostStatus, TargetStatus};
use futures_util::future::join_all;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::publisher::{PublishError, PublishRequest, Publisher};
use crate::refresh::TokenRefresher;
use crate::retry::backoff_delay;

const INACTIVE_CONNECTION: &str = "social connection not found or inactive";
const INTERRUPTED: &str = "publish interrupted before completion";

/// Final result for one target, ready to be recorded.
struct TargetOutcome {
    status: TargetStatus,
    platform_post_id: Option<String>,
    error: Option<String>,
    attempts: u32,
}

impl TargetOutcome {
    fn failed(error: impl Into<String>, attempts: u32) -> Self {
        Self {
            status: TargetStatus::Failed,
            platform_post_id: None,
            error: Some(error.into()),
            attempts,
        }
    }
}

pub struct Scheduler {
    db: Arc<Database>,
    cipher: TokenCipher,
    publisher: Arc<dyn Publisher>,
    refresher: Arc<dyn TokenRefresher>,
    config: SchedulerConfig,
    workers: Arc<Semaphore>,
    tracker: TaskTracker,
}

impl Scheduler {
    pub fn new(
        db: Arc<Database>,
        cipher: TokenCipher,
        publisher: Arc<dyn Publisher>,
        refresher: Arc<dyn TokenRefresher>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        let workers = Arc::new(Semaphore::new(config.workers.max(1)));
        Arc::new(Self {
            db,
            cipher,
            publisher,
            refresher,
            config,
            workers,
            tracker: TaskTracker::new(),
        })
    }

    /// Scan, refresh, and publish until `shutdown` fires, then wait (bounded)
    /// for in-flight jobs.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        match self.recover_interrupted().await {
            Ok(0) => {}
            Ok(n) => warn!("Finalized {} posts interrupted by a previous shutdown", n),
            Err(e) => error!("Startup recovery failed: {}", e),
        }

        let mut scan = tokio::time::interval(self.config.scan_interval);
        let mut refresh = tokio::time::interval(self.config.refresh_interval);
        info!(
            "Scheduler started (scan every {:?}, {} workers)",
            self.config.scan_interval, self.config.workers
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = scan.tick() => {
                    if let Err(e) = self.scan_once().await {
                        error!("Scheduler scan failed: {}", e);
                    }
                }
                _ = refresh.tick() => {
                    match self.refresh_expiring().await {
                        Ok(0) => {}
                        Ok(n) => info!("Refreshed {} expiring platform tokens", n),
                        Err(e) => warn!("Token refresh sweep failed: {}", e),
                    }
                }
            }
        }

        self.tracker.close();
        info!("Scheduler stopping, waiting for {} publish jobs", self.tracker.len());
        if tokio::time::timeout(self.config.shutdown_grace, self.tracker.wait())
            .await
            .is_err()
        {
            warn!("Publish jobs still running after {:?}; they will be finalized on next start", self.config.shutdown_grace);
        }
    }

    /// Claim every due post and spawn its publish job. Posts claimed by a
    /// concurrent scanner are skipped.
    pub async fn scan_once(self: &Arc<Self>) -> Result<Vec<JoinHandle<()>>> {
        let now = Utc::now();
        let batch = self.config.scan_batch;
        let due = self.db.blocking(move |db| db.due_post_ids(now, batch)).await?;
        if !due.is_empty() {
            debug!("Scan found {} due posts", due.len());
        }

        let mut handles = Vec::with_capacity(due.len());
        for post_id in due {
            let claim_id = Uuid::new_v4();
            let claimed = self
                .db
                .blocking(move |db| db.claim_due_post(post_id, claim_id, Utc::now()))
                .await?;
            if claimed {
                handles.push(self.spawn_job(post_id, claim_id));
            } else {
                debug!("Post {} was claimed elsewhere or left 'scheduled'", post_id);
            }
        }
        Ok(handles)
    }

    /// Publish a draft or scheduled post right away. Returns `None` if the
    /// post is already claimed or finished.
    pub async fn dispatch_now(self: &Arc<Self>, post_id: Uuid) -> Result<Option<JoinHandle<()>>> {
        let claim_id = Uuid::new_v4();
        let claimed = self
            .db
            .blocking(move |db| db.claim_post_now(post_id, claim_id, Utc::now()))
            .await?;
        Ok(claimed.then(|| self.spawn_job(post_id, claim_id)))
    }

    /// Finalize posts whose claim outlived the process that held it. Their
    /// pending targets fail rather than risk a second publish.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let claimed = self.db.blocking(|db| db.claimed_posts()).await?;
        for (post_id, claim_id) in &claimed {
            let (post_id, claim_id) = (*post_id, *claim_id);
            let status = self
                .db
                .blocking(move |db| {
                    db.fail_pending_targets(post_id, INTERRUPTED)?;
                    db.finalize_post(post_id, claim_id)
                })
                .await?;
            warn!("Recovered interrupted post {} as {:?}", post_id, status);
        }
        Ok(claimed.len())
    }

    /// Refresh tokens of connections expiring within the configured window.
    pub async fn refresh_expiring(&self) -> Result<usize> {
        let cutoff = Utc::now() + self.config.refresh_window;
        let expiring = self
            .db
            .blocking(move |db| db.connections_expiring_before(cutoff))
            .await?;

        let mut refreshed = 0;
        for connection in &expiring {
            match self.refresh_connection(connection).await {
                Ok(_) => refreshed += 1,
                Err(e) => warn!("Could not refresh {} connection {}: {}", connection.platform, connection.id, e),
            }
        }
        Ok(refreshed)
    }

    fn spawn_job(self: &Arc<Self>, post_id: Uuid, claim_id: Uuid) -> JoinHandle<()> {
        let this = Arc::clone(self);
        self.tracker.spawn(async move {
            let Ok(_permit) = this.workers.clone().acquire_owned().await else {
                return;
            };
            if let Err(e) = this.publish_post(post_id, claim_id).await {
                error!("Publish job for post {} failed: {}", post_id, e);
                this.abandon(post_id, claim_id, &e.to_string()).await;
            }
        })
    }

    /// Publish every pending target concurrently, record each outcome, then
    /// aggregate and release the claim.
    async fn publish_post(&self, post_id: Uuid, claim_id: Uuid) -> Result<PostStatus> {
        let post = self
            .db
            .blocking(move |db| db.get_post(post_id))
            .await?
            .ok_or_else(|| anyhow!("post {} vanished while claimed", post_id))?;
        let jobs = self.db.blocking(move |db| db.pending_publish_jobs(post_id)).await?;

        let results = join_all(jobs.into_iter().map(|job| self.publish_target(&post, job))).await;
        for result in results {
            result?;
        }

        let status = self
            .db
            .blocking(move |db| db.finalize_post(post_id, claim_id))
            .await?
            .ok_or_else(|| anyhow!("lost claim on post {}", post_id))?;
        info!("Post {} finished as {}", post_id, status);
        Ok(status)
    }

    async fn publish_target(&self, post: &PostRow, job: PublishJob) -> Result<()> {
        let outcome = self.attempt_target(post, &job).await;
        if let Some(err) = &outcome.error {
            warn!(
                "Target {} on {} failed after {} attempts: {}",
                job.target_id, job.connection.platform, outcome.attempts, err
            );
        }

        let target_id = job.target_id;
        let published_at = (outcome.status == TargetStatus::Published).then(Utc::now);
        self.db
            .blocking(move |db| {
                db.record_target_outcome(
                    target_id,
                    outcome.status,
                    outcome.platform_post_id.as_deref(),
                    outcome.error.as_deref(),
                    outcome.attempts,
                    published_at,
                )
            })
            .await
    }

    async fn attempt_target(&self, post: &PostRow, job: &PublishJob) -> TargetOutcome {
        let connection = &job.connection;
        if !connection.is_active || connection.user_id != post.user_id {
            return TargetOutcome::failed(INACTIVE_CONNECTION, job.attempts);
        }
        let mut access_token = match self.cipher.decrypt_str(&connection.access_token_enc) {
            Ok(token) => token,
            Err(e) => return TargetOutcome::failed(format!("could not decrypt access token: {}", e), job.attempts),
        };

        let mut attempts = job.attempts;
        let mut tries = 0;
        let mut refreshed = false;
        loop {
            tries += 1;
            attempts += 1;
            let request = PublishRequest {
                platform: connection.platform,
                platform_user_id: &connection.platform_user_id,
                access_token: &access_token,
                content: &post.content,
                media_urls: &post.media_urls,
            };

            let err = match self.publisher.publish(&request).await {
                Ok(platform_post_id) => {
                    return TargetOutcome {
                        status: TargetStatus::Published,
                        platform_post_id: Some(platform_post_id),
                        error: None,
                        attempts,
                    };
                }
                Err(err) => err,
            };

            match err {
                PublishError::Transient(_) if tries < self.config.max_attempts => {
                    let delay = backoff_delay(self.config.retry_base_delay, self.config.retry_max_delay, tries);
                    debug!("Transient failure on target {}, retrying in {:?}: {}", job.target_id, delay, err);
                    tokio::time::sleep(delay).await;
                }
                PublishError::Unauthorized(_) if !refreshed => {
                    refreshed = true;
                    match self.refresh_connection(connection).await {
                        Ok(token) => access_token = token,
                        Err(e) => {
                            return TargetOutcome::failed(format!("{}; token refresh failed: {}", err, e), attempts);
                        }
                    }
                }
                _ => return TargetOutcome::failed(err.to_string(), attempts),
            }
        }
    }

    /// Refresh one connection's platform token and persist the encrypted
    /// result. Returns the new plaintext access token.
    ///
    /// The stored row is re-read first: the refresh sweep may have rotated
    /// the refresh token since `connection` was loaded.
    async fn refresh_connection(&self, connection: &ConnectionRow) -> Result<String> {
        let id = connection.id;
        let current = self
            .db
            .blocking(move |db| db.get_connection(id))
            .await?
            .ok_or_else(|| anyhow!("connection {} no longer exists", id))?;
        let encrypted = current
            .refresh_token_enc
            .as_deref()
            .ok_or_else(|| anyhow!("no refresh token stored"))?;
        let refresh_token = self.cipher.decrypt_str(encrypted)?;
        let tokens = self.refresher.refresh(connection.platform, &refresh_token).await?;

        let access_enc = self.cipher.encrypt_str(&tokens.access_token)?;
        let refresh_enc = tokens
            .refresh_token
            .as_deref()
            .map(|t| self.cipher.encrypt_str(t))
            .transpose()?;
        let expires_at = tokens.expires_at(Utc::now());
        self.db
            .blocking(move |db| db.update_connection_tokens(id, &access_enc, refresh_enc.as_deref(), expires_at))
            .await?;

        debug!("Stored refreshed token for {} connection {}", connection.platform, id);
        Ok(tokens.access_token)
    }

    /// Best-effort finalization after a job error so the claim is released.
    async fn abandon(&self, post_id: Uuid, claim_id: Uuid, reason: &str) {
        let reason = format!("publish aborted: {}", reason);
        let result = self
            .db
            .blocking(move |db| {
                db.fail_pending_targets(post_id, &reason)?;
                db.finalize_post(post_id, claim_id)
            })
            .await;
        if let Err(e) = result {
            error!("Could not finalize post {} after failure: {}", post_id, e);
        }
    }
}
