/// Integration tests for the SQLite store: account linking, sessions, OAuth
/// flow records, and the post claim protocol the scheduler relies on.
use std::sync::{Arc, Barrier};
use std::thread;

use chrono::{Duration, Utc};
use feedmerge_db::Database;
use feedmerge_db::models::OAuthStateRow;
use feedmerge_db::queries::{NewConnection, NewPost, NewUser, PostChanges};
use feedmerge_types::{Platform, PostStatus, TargetStatus};
use tempfile::TempDir;
use uuid::Uuid;

fn open() -> (TempDir, Database) {
    let dir = TempDir::new().unwrap();
    let db = Database::open(&dir.path().join("feedmerge.db")).unwrap();
    (dir, db)
}

fn new_user(email: &str) -> NewUser {
    NewUser {
        email: email.to_string(),
        password_hash: Some("hash".into()),
        display_name: Some("Ada".into()),
        avatar_url: None,
    }
}

fn connection(platform: Platform, platform_user_id: &str) -> NewConnection {
    NewConnection {
        platform,
        platform_user_id: platform_user_id.to_string(),
        platform_username: Some("ada".into()),
        access_token_enc: "enc-access".into(),
        refresh_token_enc: Some("enc-refresh".into()),
        expires_at: Some(Utc::now() + Duration::hours(1)),
        scopes: vec!["openid".into(), "email".into()],
    }
}

fn scheduled_post(db: &Database, user_id: Uuid, connection_ids: &[Uuid]) -> Uuid {
    db.create_post(
        &NewPost {
            user_id,
            content: "hello".into(),
            media_urls: vec!["https://cdn.example/a.png".into()],
            status: PostStatus::Scheduled,
            scheduled_at: Some(Utc::now() - Duration::seconds(5)),
        },
        connection_ids,
    )
    .unwrap()
    .id
}

#[test]
fn duplicate_email_is_not_inserted() {
    let (_dir, db) = open();
    assert!(db.create_user(&new_user("ada@example.com")).unwrap().is_some());
    assert!(db.create_user(&new_user("ada@example.com")).unwrap().is_none());
}

#[test]
fn link_account_creates_user_then_reuses_it() {
    let (_dir, db) = open();
    let mut seed = new_user("ada@example.com");
    seed.password_hash = None;
    seed.avatar_url = Some("https://img/1.png".into());

    let (user, first) = db
        .link_account(&seed, &connection(Platform::Google, "g-1"))
        .unwrap()
        .unwrap();
    assert_eq!(user.avatar_url.as_deref(), Some("https://img/1.png"));
    assert!(user.password_hash.is_none());

    // Second login: same user, avatar not overwritten, one active connection.
    seed.avatar_url = Some("https://img/2.png".into());
    let (again, second) = db
        .link_account(&seed, &connection(Platform::Google, "g-1"))
        .unwrap()
        .unwrap();
    assert_eq!(again.id, user.id);
    assert_eq!(again.avatar_url.as_deref(), Some("https://img/1.png"));
    assert_ne!(first.id, second.id);

    let active = db.list_active_connections(user.id).unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, second.id);
    assert!(!db.get_connection(first.id).unwrap().unwrap().is_active);
}

#[test]
fn link_account_refuses_deactivated_user() {
    let (_dir, db) = open();
    let user = db.create_user(&new_user("gone@example.com")).unwrap().unwrap();
    assert!(db.deactivate_user(user.id).unwrap());

    let linked = db
        .link_account(&new_user("gone@example.com"), &connection(Platform::Twitter, "t-1"))
        .unwrap();
    assert!(linked.is_none());
    assert!(db.list_active_connections(user.id).unwrap().is_empty());
}

#[test]
fn relink_moves_pending_targets_of_unclaimed_posts() {
    let (_dir, db) = open();
    let user = db.create_user(&new_user("ada@example.com")).unwrap().unwrap();
    let old = db.attach_connection(user.id, &connection(Platform::Twitter, "t-1")).unwrap();
    let post = scheduled_post(&db, user.id, &[old.id]);

    let new = db.attach_connection(user.id, &connection(Platform::Twitter, "t-1")).unwrap();

    let targets = db.get_post_targets(post).unwrap();
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].connection_id, new.id);
}

#[test]
fn create_post_rejects_foreign_connection() {
    let (_dir, db) = open();
    let owner = db.create_user(&new_user("a@example.com")).unwrap().unwrap();
    let other = db.create_user(&new_user("b@example.com")).unwrap().unwrap();
    let foreign = db.attach_connection(other.id, &connection(Platform::LinkedIn, "li")).unwrap();

    let result = db.create_post(
        &NewPost {
            user_id: owner.id,
            content: "x".into(),
            media_urls: vec![],
            status: PostStatus::Draft,
            scheduled_at: None,
        },
        &[foreign.id],
    );
    assert!(result.is_err());
    assert!(db.list_posts(owner.id, 0, 100).unwrap().is_empty());
}

#[test]
fn refresh_rotation_invalidates_old_token() {
    let (_dir, db) = open();
    let user = db.create_user(&new_user("ada@example.com")).unwrap().unwrap();
    let expires = Utc::now() + Duration::days(30);
    db.insert_refresh_token(user.id, "hash-1", expires).unwrap();

    let rotated = db.rotate_refresh_token("hash-1", "hash-2", expires).unwrap();
    assert_eq!(rotated.map(|u| u.id), Some(user.id));
    assert!(db.rotate_refresh_token("hash-1", "hash-3", expires).unwrap().is_none());
    assert!(db.find_valid_refresh_token("hash-2").unwrap().is_some());

    assert!(db.revoke_refresh_token("hash-2").unwrap());
    assert!(!db.revoke_refresh_token("hash-2").unwrap());
    assert_eq!(db.delete_stale_refresh_tokens(Utc::now()).unwrap(), 2);
}

#[test]
fn expired_refresh_token_is_not_valid() {
    let (_dir, db) = open();
    let user = db.create_user(&new_user("ada@example.com")).unwrap().unwrap();
    db.insert_refresh_token(user.id, "old", Utc::now() - Duration::seconds(1))
        .unwrap();
    assert!(db.find_valid_refresh_token("old").unwrap().is_none());
    assert!(db.rotate_refresh_token("old", "new", Utc::now()).unwrap().is_none());
}

#[test]
fn oauth_state_is_single_use_and_newest_wins() {
    let (_dir, db) = open();
    let user = db.create_user(&new_user("ada@example.com")).unwrap().unwrap();
    let state = |s: &str| OAuthStateRow {
        state: s.to_string(),
        platform: Platform::Facebook,
        user_id: Some(user.id),
        code_verifier: None,
        redirect_uri: "https://app/callback".into(),
        expires_at: Utc::now() + Duration::minutes(10),
        created_at: Utc::now(),
    };

    db.insert_oauth_state(&state("first")).unwrap();
    db.insert_oauth_state(&state("second")).unwrap();
    assert!(db.find_oauth_state("first").unwrap().is_none());

    assert!(db.take_oauth_state("second").unwrap().is_some());
    assert!(db.take_oauth_state("second").unwrap().is_none());
}

#[test]
fn claim_has_exactly_one_winner() {
    let (_dir, db) = open();
    let db = Arc::new(db);
    let user = db.create_user(&new_user("ada@example.com")).unwrap().unwrap();
    let conn = db.attach_connection(user.id, &connection(Platform::Twitter, "t")).unwrap();
    let post = scheduled_post(&db, user.id, &[conn.id]);

    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let db = Arc::clone(&db);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                db.claim_due_post(post, Uuid::new_v4(), Utc::now()).unwrap()
            })
        })
        .collect();

    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);
}

#[test]
fn claimed_post_is_locked_until_finalized() {
    let (_dir, db) = open();
    let user = db.create_user(&new_user("ada@example.com")).unwrap().unwrap();
    let a = db.attach_connection(user.id, &connection(Platform::Twitter, "t")).unwrap();
    let b = db.attach_connection(user.id, &connection(Platform::LinkedIn, "l")).unwrap();
    let post = scheduled_post(&db, user.id, &[a.id, b.id]);

    let claim = Uuid::new_v4();
    assert!(db.claim_due_post(post, claim, Utc::now()).unwrap());
    assert!(db.update_post(post, &PostChanges::default()).unwrap().is_none());
    assert!(!db.delete_post(post).unwrap());

    let jobs = db.pending_publish_jobs(post).unwrap();
    assert_eq!(jobs.len(), 2);
    db.record_target_outcome(jobs[0].target_id, TargetStatus::Published, Some("p-1"), None, 1, Some(Utc::now()))
        .unwrap();
    db.record_target_outcome(jobs[1].target_id, TargetStatus::Failed, None, Some("rejected"), 1, None)
        .unwrap();

    assert_eq!(db.finalize_post(post, Uuid::new_v4()).unwrap(), None);
    assert_eq!(
        db.finalize_post(post, claim).unwrap(),
        Some(PostStatus::PartiallyPublished)
    );

    let row = db.get_post(post).unwrap().unwrap();
    assert!(row.claim_id.is_none());
    assert!(row.published_at.is_some());
    assert!(!row.is_editable());
}

#[test]
fn unscheduled_post_is_not_due() {
    let (_dir, db) = open();
    let user = db.create_user(&new_user("ada@example.com")).unwrap().unwrap();
    let conn = db.attach_connection(user.id, &connection(Platform::Twitter, "t")).unwrap();
    let post = scheduled_post(&db, user.id, &[conn.id]);
    assert_eq!(db.due_post_ids(Utc::now(), 10).unwrap(), vec![post]);

    let changes = PostChanges {
        status: Some(PostStatus::Draft),
        ..Default::default()
    };
    db.update_post(post, &changes).unwrap().unwrap();

    assert!(db.due_post_ids(Utc::now(), 10).unwrap().is_empty());
    assert!(!db.claim_due_post(post, Uuid::new_v4(), Utc::now()).unwrap());
}

#[test]
fn interrupted_claim_can_be_failed_and_finalized() {
    let (_dir, db) = open();
    let user = db.create_user(&new_user("ada@example.com")).unwrap().unwrap();
    let conn = db.attach_connection(user.id, &connection(Platform::Twitter, "t")).unwrap();
    let post = scheduled_post(&db, user.id, &[conn.id]);
    let claim = Uuid::new_v4();
    db.claim_due_post(post, claim, Utc::now()).unwrap();

    assert_eq!(db.claimed_posts().unwrap(), vec![(post, claim)]);
    assert_eq!(db.fail_pending_targets(post, "interrupted").unwrap(), 1);
    assert_eq!(db.finalize_post(post, claim).unwrap(), Some(PostStatus::Failed));
    assert!(db.claimed_posts().unwrap().is_empty());
}

#[test]
fn deactivating_user_revokes_sessions() {
    let (_dir, db) = open();
    let user = db.create_user(&new_user("ada@example.com")).unwrap().unwrap();
    db.insert_refresh_token(user.id, "h", Utc::now() + Duration::days(1)).unwrap();
    db.upsert_notification_token(user.id, "device-token", Some("ios"), None).unwrap();

    assert!(db.deactivate_user(user.id).unwrap());
    assert!(db.find_valid_refresh_token("h").unwrap().is_none());
    assert!(db.list_notification_tokens(user.id).unwrap().is_empty());
    assert!(!db.get_user_by_id(user.id).unwrap().unwrap().is_active);
}

#[test]
fn notification_token_moves_between_accounts() {
    let (_dir, db) = open();
    let a = db.create_user(&new_user("a@example.com")).unwrap().unwrap();
    let b = db.create_user(&new_user("b@example.com")).unwrap().unwrap();

    let first = db.upsert_notification_token(a.id, "tok", Some("android"), Some("d1")).unwrap();
    let second = db.upsert_notification_token(b.id, "tok", None, None).unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(second.user_id, b.id);
    assert_eq!(second.device_type.as_deref(), Some("android"));

    assert!(!db.deactivate_notification_token(a.id, "tok").unwrap());
    assert!(db.deactivate_notification_token(b.id, "tok").unwrap());
}
