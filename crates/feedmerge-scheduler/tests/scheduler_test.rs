/// Scheduler behavior against a scripted publisher: claim exclusivity,
/// retries, token refresh, and recovery of interrupted claims.
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use feedmerge_crypto::TokenCipher;
use feedmerge_crypto::keys::generate_key;
use feedmerge_db::Database;
use feedmerge_db::queries::{NewConnection, NewPost, NewUser, PostChanges};
use feedmerge_oauth::{OAuthError, PlatformTokens};
use feedmerge_scheduler::{
    PublishError, PublishRequest, Publisher, Scheduler, SchedulerConfig, TokenRefresher,
};
use feedmerge_types::{Platform, PostStatus, TargetStatus};
use tempfile::TempDir;
use uuid::Uuid;

type Hook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct ScriptedPublisher {
    script: Mutex<HashMap<Platform, VecDeque<Result<String, PublishError>>>>,
    calls: Mutex<Vec<(Platform, String)>>,
    before_next_call: Mutex<Option<Hook>>,
}

impl ScriptedPublisher {
    fn push(&self, platform: Platform, result: Result<String, PublishError>) {
        self.script
            .lock()
            .unwrap()
            .entry(platform)
            .or_default()
            .push_back(result);
    }

    /// Run `hook` once, when the next publish call arrives.
    fn before_next_call(&self, hook: impl FnOnce() + Send + 'static) {
        *self.before_next_call.lock().unwrap() = Some(Box::new(hook));
    }

    fn calls_for(&self, platform: Platform) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| *p == platform)
            .map(|(_, token)| token.clone())
            .collect()
    }
}

#[async_trait]
impl Publisher for ScriptedPublisher {
    async fn publish(&self, request: &PublishRequest<'_>) -> Result<String, PublishError> {
        let hook = self.before_next_call.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        self.calls
            .lock()
            .unwrap()
            .push((request.platform, request.access_token.to_string()));
        // Give concurrent scanners a chance to interleave.
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.script
            .lock()
            .unwrap()
            .get_mut(&request.platform)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(format!("{}-post", request.platform)))
    }
}

#[derive(Default)]
struct CountingRefresher {
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl TokenRefresher for CountingRefresher {
    async fn refresh(&self, platform: Platform, refresh_token: &str) -> Result<PlatformTokens, OAuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail || refresh_token != "refresh-plain" {
            return Err(OAuthError::RefreshFailed(format!("{} said no", platform)));
        }
        Ok(PlatformTokens {
            access_token: "fresh-access".into(),
            refresh_token: Some("fresh-refresh".into()),
            expires_in: Some(3600),
            scopes: vec![],
        })
    }
}

struct Harness {
    _dir: TempDir,
    db: Arc<Database>,
    cipher: TokenCipher,
    publisher: Arc<ScriptedPublisher>,
    refresher: Arc<CountingRefresher>,
    scheduler: Arc<Scheduler>,
    user_id: Uuid,
}

impl Harness {
    fn new() -> Self {
        Self::with_refresher(CountingRefresher::default())
    }

    fn with_refresher(refresher: CountingRefresher) -> Self {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("scheduler.db")).unwrap());
        let cipher = TokenCipher::new(&generate_key());
        let publisher = Arc::new(ScriptedPublisher::default());
        let refresher = Arc::new(refresher);
        let config = SchedulerConfig {
            retry_base_delay: Duration::from_millis(1),
            retry_max_delay: Duration::from_millis(4),
            ..SchedulerConfig::default()
        };
        let scheduler = Scheduler::new(
            db.clone(),
            cipher.clone(),
            publisher.clone(),
            refresher.clone(),
            config,
        );
        let user_id = db
            .create_user(&NewUser {
                email: "ada@example.com".into(),
                ..Default::default()
            })
            .unwrap()
            .unwrap()
            .id;
        Self {
            _dir: dir,
            db,
            cipher,
            publisher,
            refresher,
            scheduler,
            user_id,
        }
    }

    fn connect(&self, platform: Platform, with_refresh: bool) -> Uuid {
        let connection = NewConnection {
            platform,
            platform_user_id: format!("{}-user", platform),
            platform_username: None,
            access_token_enc: self.cipher.encrypt_str("access-plain").unwrap(),
            refresh_token_enc: with_refresh.then(|| self.cipher.encrypt_str("refresh-plain").unwrap()),
            expires_at: Some(Utc::now() + chrono::Duration::minutes(2)),
            scopes: vec![],
        };
        self.db.attach_connection(self.user_id, &connection).unwrap().id
    }

    fn post(&self, status: PostStatus, connection_ids: &[Uuid]) -> Uuid {
        self.db
            .create_post(
                &NewPost {
                    user_id: self.user_id,
                    content: "launch day".into(),
                    media_urls: vec![],
                    status,
                    scheduled_at: Some(Utc::now() - chrono::Duration::seconds(1)),
                },
                connection_ids,
            )
            .unwrap()
            .id
    }

    async fn scan_and_wait(&self) -> usize {
        let handles = self.scheduler.scan_once().await.unwrap();
        let count = handles.len();
        for handle in handles {
            handle.await.unwrap();
        }
        count
    }

    fn status(&self, post_id: Uuid) -> PostStatus {
        self.db.get_post(post_id).unwrap().unwrap().status
    }
}

#[tokio::test]
async fn concurrent_scans_publish_once() {
    let h = Harness::new();
    let twitter = h.connect(Platform::Twitter, false);
    let post = h.post(PostStatus::Scheduled, &[twitter]);

    let (a, b) = tokio::join!(h.scheduler.scan_once(), h.scheduler.scan_once());
    let handles: Vec<_> = a.unwrap().into_iter().chain(b.unwrap()).collect();
    assert_eq!(handles.len(), 1);
    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(h.scan_and_wait().await, 0);

    assert_eq!(h.publisher.calls_for(Platform::Twitter).len(), 1);
    assert_eq!(h.status(post), PostStatus::Published);
    let targets = h.db.get_post_targets(post).unwrap();
    assert_eq!(targets[0].platform_post_id.as_deref(), Some("twitter-post"));
    assert!(h.db.get_post(post).unwrap().unwrap().published_at.is_some());
}

#[tokio::test]
async fn transient_failures_exhaust_retries_without_affecting_siblings() {
    let h = Harness::new();
    let twitter = h.connect(Platform::Twitter, false);
    let linkedin = h.connect(Platform::LinkedIn, false);
    for _ in 0..5 {
        h.publisher
            .push(Platform::Twitter, Err(PublishError::Transient("500 Internal Server Error".into())));
    }
    let post = h.post(PostStatus::Scheduled, &[twitter, linkedin]);

    h.scan_and_wait().await;

    assert_eq!(h.publisher.calls_for(Platform::Twitter).len(), 3);
    assert_eq!(h.status(post), PostStatus::PartiallyPublished);

    let targets = h.db.get_post_targets(post).unwrap();
    let tw = targets.iter().find(|t| t.connection_id == twitter).unwrap();
    assert_eq!(tw.status, TargetStatus::Failed);
    assert_eq!(tw.attempts, 3);
    assert!(tw.error_message.as_deref().is_some_and(|e| e.contains("500")));
    let li = targets.iter().find(|t| t.connection_id == linkedin).unwrap();
    assert_eq!(li.status, TargetStatus::Published);
    assert_eq!(li.attempts, 1);
}

#[tokio::test]
async fn rejection_fails_immediately() {
    let h = Harness::new();
    let twitter = h.connect(Platform::Twitter, false);
    h.publisher
        .push(Platform::Twitter, Err(PublishError::Rejected("403 duplicate content".into())));
    let post = h.post(PostStatus::Scheduled, &[twitter]);

    h.scan_and_wait().await;

    assert_eq!(h.publisher.calls_for(Platform::Twitter).len(), 1);
    assert_eq!(h.status(post), PostStatus::Failed);
    assert!(h.db.get_post(post).unwrap().unwrap().published_at.is_none());
}

#[tokio::test]
async fn unauthorized_refreshes_once_and_retries() {
    let h = Harness::new();
    let twitter = h.connect(Platform::Twitter, true);
    h.publisher
        .push(Platform::Twitter, Err(PublishError::Unauthorized("401".into())));
    let post = h.post(PostStatus::Scheduled, &[twitter]);

    h.scan_and_wait().await;

    assert_eq!(h.refresher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.publisher.calls_for(Platform::Twitter),
        vec!["access-plain".to_string(), "fresh-access".to_string()]
    );
    assert_eq!(h.status(post), PostStatus::Published);

    let stored = h.db.get_connection(twitter).unwrap().unwrap();
    assert_eq!(h.cipher.decrypt_str(&stored.access_token_enc).unwrap(), "fresh-access");
    let refresh = stored.refresh_token_enc.unwrap();
    assert_eq!(h.cipher.decrypt_str(&refresh).unwrap(), "fresh-refresh");
}

#[tokio::test]
async fn unauthorized_without_refresh_token_fails() {
    let h = Harness::new();
    let twitter = h.connect(Platform::Twitter, false);
    h.publisher
        .push(Platform::Twitter, Err(PublishError::Unauthorized("401".into())));
    let post = h.post(PostStatus::Scheduled, &[twitter]);

    h.scan_and_wait().await;

    assert_eq!(h.refresher.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.status(post), PostStatus::Failed);
    let target = &h.db.get_post_targets(post).unwrap()[0];
    assert!(target.error_message.as_deref().is_some_and(|e| e.contains("refresh")));
}

#[tokio::test]
async fn failed_refresh_fails_target() {
    let h = Harness::with_refresher(CountingRefresher {
        fail: true,
        ..Default::default()
    });
    let linkedin = h.connect(Platform::LinkedIn, true);
    h.publisher
        .push(Platform::LinkedIn, Err(PublishError::Unauthorized("401".into())));
    let post = h.post(PostStatus::Scheduled, &[linkedin]);

    h.scan_and_wait().await;

    assert_eq!(h.refresher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.publisher.calls_for(Platform::LinkedIn).len(), 1);
    assert_eq!(h.status(post), PostStatus::Failed);
}

#[tokio::test]
async fn unscheduled_post_is_skipped() {
    let h = Harness::new();
    let twitter = h.connect(Platform::Twitter, false);
    let post = h.post(PostStatus::Scheduled, &[twitter]);

    let changes = PostChanges {
        status: Some(PostStatus::Draft),
        ..Default::default()
    };
    h.db.update_post(post, &changes).unwrap().unwrap();

    assert_eq!(h.scan_and_wait().await, 0);
    assert!(h.publisher.calls_for(Platform::Twitter).is_empty());
    assert_eq!(h.status(post), PostStatus::Draft);
}

#[tokio::test]
async fn inactive_connection_fails_target() {
    let h = Harness::new();
    let twitter = h.connect(Platform::Twitter, false);
    let post = h.post(PostStatus::Scheduled, &[twitter]);
    h.db.deactivate_connection(twitter, h.user_id).unwrap().unwrap();

    h.scan_and_wait().await;

    assert!(h.publisher.calls_for(Platform::Twitter).is_empty());
    let target = &h.db.get_post_targets(post).unwrap()[0];
    assert_eq!(target.status, TargetStatus::Failed);
    assert_eq!(
        target.error_message.as_deref(),
        Some("social connection not found or inactive")
    );
}

#[tokio::test]
async fn dispatch_now_publishes_draft_once() {
    let h = Harness::new();
    let linkedin = h.connect(Platform::LinkedIn, false);
    let post = h.post(PostStatus::Draft, &[linkedin]);

    let handle = h.scheduler.dispatch_now(post).await.unwrap().unwrap();
    handle.await.unwrap();
    assert_eq!(h.status(post), PostStatus::Published);

    assert!(h.scheduler.dispatch_now(post).await.unwrap().is_none());
    assert_eq!(h.publisher.calls_for(Platform::LinkedIn).len(), 1);
}

#[tokio::test]
async fn interrupted_claims_are_failed_not_republished() {
    let h = Harness::new();
    let twitter = h.connect(Platform::Twitter, false);
    let post = h.post(PostStatus::Scheduled, &[twitter]);
    assert!(h.db.claim_due_post(post, Uuid::new_v4(), Utc::now()).unwrap());

    assert_eq!(h.scheduler.recover_interrupted().await.unwrap(), 1);

    assert_eq!(h.status(post), PostStatus::Failed);
    assert!(h.publisher.calls_for(Platform::Twitter).is_empty());
    let target = &h.db.get_post_targets(post).unwrap()[0];
    assert_eq!(
        target.error_message.as_deref(),
        Some("publish interrupted before completion")
    );
    assert_eq!(h.scan_and_wait().await, 0);
}

#[tokio::test]
async fn expiring_tokens_are_refreshed_ahead_of_time() {
    let h = Harness::new();
    let soon = h.connect(Platform::Twitter, true);
    let no_refresh = h.connect(Platform::LinkedIn, false);

    // Only connections inside the 5 minute window with a refresh token count.
    assert_eq!(h.scheduler.refresh_expiring().await.unwrap(), 1);
    assert_eq!(h.refresher.calls.load(Ordering::SeqCst), 1);

    let refreshed = h.db.get_connection(soon).unwrap().unwrap();
    assert_eq!(h.cipher.decrypt_str(&refreshed.access_token_enc).unwrap(), "fresh-access");
    assert!(refreshed.expires_at.unwrap() > Utc::now() + chrono::Duration::minutes(30));

    let untouched = h.db.get_connection(no_refresh).unwrap().unwrap();
    assert_eq!(h.cipher.decrypt_str(&untouched.access_token_enc).unwrap(), "access-plain");
}

#[tokio::test]
async fn deactivated_users_posts_are_not_published() {
    let h = Harness::new();
    let twitter = h.connect(Platform::Twitter, false);
    let scheduled = h.post(PostStatus::Scheduled, &[twitter]);
    let draft = h.post(PostStatus::Draft, &[twitter]);
    assert!(h.db.deactivate_user(h.user_id).unwrap());

    assert_eq!(h.scan_and_wait().await, 0);
    assert!(h.scheduler.dispatch_now(draft).await.unwrap().is_none());

    assert!(h.publisher.calls_for(Platform::Twitter).is_empty());
    assert_eq!(h.status(scheduled), PostStatus::Scheduled);
    assert_eq!(h.status(draft), PostStatus::Draft);
}

#[tokio::test]
async fn unauthorized_retry_uses_latest_stored_refresh_token() {
    let h = Harness::new();
    let twitter = h.connect(Platform::Twitter, false);
    let stale = h.cipher.encrypt_str("refresh-stale").unwrap();
    let access = h.cipher.encrypt_str("access-plain").unwrap();
    h.db.update_connection_tokens(twitter, &access, Some(&stale), None).unwrap();
    let post = h.post(PostStatus::Scheduled, &[twitter]);

    // The sweep rotates the refresh token while the job holds the old row.
    let (db, cipher) = (h.db.clone(), h.cipher.clone());
    h.publisher.before_next_call(move || {
        let rotated = cipher.encrypt_str("refresh-plain").unwrap();
        let access = cipher.encrypt_str("access-rotated").unwrap();
        db.update_connection_tokens(twitter, &access, Some(&rotated), None).unwrap();
    });
    h.publisher
        .push(Platform::Twitter, Err(PublishError::Unauthorized("401".into())));

    h.scan_and_wait().await;

    assert_eq!(h.refresher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.status(post), PostStatus::Published);
    assert_eq!(
        h.publisher.calls_for(Platform::Twitter),
        vec!["access-plain".to_string(), "fresh-access".to_string()]
    );
}
