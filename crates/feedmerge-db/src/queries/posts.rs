use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Utc};
use feedmerge_types::models::aggregate_post_status;
use feedmerge_types::{PostStatus, TargetStatus};
use rusqlite::{Connection, Row, params};
use uuid::Uuid;

use super::OptionalExt;
use super::connections::{CONNECTION_COLUMNS, map_connection_at, query_connection};
use crate::Database;
use crate::models::{
    PostRow, PostTargetRow, PublishJob, db_time, json_list, list, opt_db_time, opt_parsed, opt_time,
    parsed, time,
};

const POST_COLUMNS: &str = "id, user_id, content, media_urls, status, scheduled_at, published_at, \
     claim_id, claimed_at, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct NewPost {
    pub user_id: Uuid,
    pub content: String,
    pub media_urls: Vec<String>,
    pub status: PostStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Partial update of an unclaimed post. `None` leaves a field untouched;
/// `connection_ids` replaces the whole target set.
#[derive(Debug, Clone, Default)]
pub struct PostChanges {
    pub content: Option<String>,
    pub media_urls: Option<Vec<String>>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub status: Option<PostStatus>,
    pub connection_ids: Option<Vec<Uuid>>,
}

impl Database {
    // -- User-facing CRUD --

    /// Insert a post with one pending target per connection. Every
    /// connection must be active and owned by the post's user.
    pub fn create_post(&self, post: &NewPost, connection_ids: &[Uuid]) -> Result<PostRow> {
        self.transaction(|tx| {
            let now = Utc::now();
            let id = Uuid::new_v4();
            tx.execute(
                "INSERT INTO posts (id, user_id, content, media_urls, status, scheduled_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    id.to_string(),
                    post.user_id.to_string(),
                    post.content,
                    json_list(&post.media_urls),
                    post.status.as_str(),
                    opt_db_time(post.scheduled_at.as_ref()),
                    db_time(&now)
                ],
            )?;
            insert_targets(tx, id, post.user_id, connection_ids, now)?;
            query_post(tx, id)?.ok_or_else(|| anyhow!("post {} missing after insert", id))
        })
    }

    pub fn get_post(&self, id: Uuid) -> Result<Option<PostRow>> {
        self.with_conn(|conn| query_post(conn, id))
    }

    /// Newest first.
    pub fn list_posts(&self, user_id: Uuid, skip: u32, limit: u32) -> Result<Vec<PostRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {POST_COLUMNS} FROM posts WHERE user_id = ?1
                 ORDER BY created_at DESC LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt
                .query_map(params![user_id.to_string(), limit, skip], map_post)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_post_targets(&self, post_id: Uuid) -> Result<Vec<PostTargetRow>> {
        self.with_conn(|conn| query_targets(conn, post_id))
    }

    /// Apply `changes` unless the post is claimed or already finished.
    /// Returns `None` in that case and nothing is written.
    pub fn update_post(&self, id: Uuid, changes: &PostChanges) -> Result<Option<PostRow>> {
        self.transaction(|tx| {
            let Some(post) = query_post(tx, id)? else {
                return Ok(None);
            };
            if !post.is_editable() {
                return Ok(None);
            }

            let now = Utc::now();
            tx.execute(
                "UPDATE posts SET
                    content = COALESCE(?2, content),
                    media_urls = COALESCE(?3, media_urls),
                    scheduled_at = COALESCE(?4, scheduled_at),
                    status = COALESCE(?5, status),
                    updated_at = ?6
                 WHERE id = ?1 AND claim_id IS NULL",
                params![
                    id.to_string(),
                    changes.content,
                    changes.media_urls.as_deref().map(json_list),
                    opt_db_time(changes.scheduled_at.as_ref()),
                    changes.status.map(|s| s.as_str()),
                    db_time(&now)
                ],
            )?;

            if let Some(connection_ids) = &changes.connection_ids {
                tx.execute("DELETE FROM post_targets WHERE post_id = ?1", [id.to_string()])?;
                insert_targets(tx, id, post.user_id, connection_ids, now)?;
            }

            query_post(tx, id)
        })
    }

    /// Delete an unclaimed post and its targets. Returns false if the post is
    /// missing or currently being published.
    pub fn delete_post(&self, id: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let deleted = conn.execute(
                "DELETE FROM posts WHERE id = ?1 AND claim_id IS NULL",
                [id.to_string()],
            )?;
            Ok(deleted > 0)
        })
    }

    // -- Scheduler bookkeeping --

    /// Unclaimed scheduled posts due at `now`, oldest first. Posts of
    /// deactivated users are never picked up.
    pub fn due_post_ids(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM posts
                 WHERE status = 'scheduled' AND claim_id IS NULL
                   AND scheduled_at IS NOT NULL AND scheduled_at <= ?1
                   AND EXISTS (SELECT 1 FROM users u WHERE u.id = posts.user_id AND u.is_active = 1)
                 ORDER BY scheduled_at LIMIT ?2",
            )?;
            let ids = stmt
                .query_map(params![db_time(&now), limit], |row| parsed::<Uuid>(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    /// Claim a due scheduled post. Only one caller can win; a post that left
    /// `scheduled` in the meantime is not claimed.
    pub fn claim_due_post(&self, id: Uuid, claim_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let now = db_time(&now);
            let claimed = conn.execute(
                "UPDATE posts SET claim_id = ?2, claimed_at = ?3, updated_at = ?3
                 WHERE id = ?1 AND status = 'scheduled' AND claim_id IS NULL
                   AND scheduled_at IS NOT NULL AND scheduled_at <= ?3
                   AND EXISTS (SELECT 1 FROM users u WHERE u.id = posts.user_id AND u.is_active = 1)",
                params![id.to_string(), claim_id.to_string(), now],
            )?;
            Ok(claimed == 1)
        })
    }

    /// Claim a draft or scheduled post for immediate publishing.
    pub fn claim_post_now(&self, id: Uuid, claim_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let claimed = conn.execute(
                "UPDATE posts SET claim_id = ?2, claimed_at = ?3, updated_at = ?3
                 WHERE id = ?1 AND status IN ('draft', 'scheduled') AND claim_id IS NULL
                   AND EXISTS (SELECT 1 FROM users u WHERE u.id = posts.user_id AND u.is_active = 1)",
                params![id.to_string(), claim_id.to_string(), db_time(&now)],
            )?;
            Ok(claimed == 1)
        })
    }

    /// Pending targets of a post joined with their connection.
    pub fn pending_publish_jobs(&self, post_id: Uuid) -> Result<Vec<PublishJob>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT t.id, t.status, t.attempts, {CONNECTION_COLUMNS}
                 FROM post_targets t
                 JOIN social_connections c ON c.id = t.connection_id
                 WHERE t.post_id = ?1 AND t.status = 'pending'
                 ORDER BY t.created_at"
            ))?;
            let jobs = stmt
                .query_map([post_id.to_string()], |row| {
                    Ok(PublishJob {
                        target_id: parsed(row, 0)?,
                        status: parsed(row, 1)?,
                        attempts: row.get(2)?,
                        connection: map_connection_at(row, 3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(jobs)
        })
    }

    pub fn record_target_outcome(
        &self,
        target_id: Uuid,
        status: TargetStatus,
        platform_post_id: Option<&str>,
        error_message: Option<&str>,
        attempts: u32,
        published_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE post_targets SET
                    status = ?2, platform_post_id = ?3, error_message = ?4,
                    attempts = ?5, published_at = ?6, updated_at = ?7
                 WHERE id = ?1",
                params![
                    target_id.to_string(),
                    status.as_str(),
                    platform_post_id,
                    error_message,
                    attempts,
                    opt_db_time(published_at.as_ref()),
                    db_time(&Utc::now())
                ],
            )?;
            Ok(())
        })
    }

    /// Aggregate target outcomes into the post status and release the claim.
    /// Returns `None` if `claim_id` no longer holds the post.
    pub fn finalize_post(&self, id: Uuid, claim_id: Uuid) -> Result<Option<PostStatus>> {
        self.transaction(|tx| {
            let statuses: Vec<TargetStatus> = query_targets(tx, id)?
                .into_iter()
                .map(|t| t.status)
                .collect();
            let status = aggregate_post_status(&statuses);
            let now = db_time(&Utc::now());
            let published_at = (status != PostStatus::Failed).then_some(now.clone());

            let changed = tx.execute(
                "UPDATE posts SET status = ?3, published_at = COALESCE(?4, published_at),
                    claim_id = NULL, claimed_at = NULL, updated_at = ?5
                 WHERE id = ?1 AND claim_id = ?2",
                params![id.to_string(), claim_id.to_string(), status.as_str(), published_at, now],
            )?;
            Ok((changed == 1).then_some(status))
        })
    }

    /// Posts still holding a claim, with that claim.
    pub fn claimed_posts(&self) -> Result<Vec<(Uuid, Uuid)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, claim_id FROM posts WHERE claim_id IS NOT NULL")?;
            let rows = stmt
                .query_map([], |row| Ok((parsed::<Uuid>(row, 0)?, parsed::<Uuid>(row, 1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Fail every still-pending target of a post with `message`.
    pub fn fail_pending_targets(&self, post_id: Uuid, message: &str) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE post_targets SET status = 'failed', error_message = ?2, updated_at = ?3
                 WHERE post_id = ?1 AND status = 'pending'",
                params![post_id.to_string(), message, db_time(&Utc::now())],
            )?;
            Ok(changed)
        })
    }
}

fn insert_targets(
    conn: &Connection,
    post_id: Uuid,
    user_id: Uuid,
    connection_ids: &[Uuid],
    now: DateTime<Utc>,
) -> Result<()> {
    let now = db_time(&now);
    let mut seen = Vec::with_capacity(connection_ids.len());
    for &connection_id in connection_ids {
        if seen.contains(&connection_id) {
            continue;
        }
        seen.push(connection_id);

        match query_connection(conn, connection_id)? {
            Some(c) if c.user_id == user_id && c.is_active => {}
            _ => bail!("connection {} is not an active connection of user {}", connection_id, user_id),
        }
        conn.execute(
            "INSERT INTO post_targets (id, post_id, connection_id, status, attempts, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'pending', 0, ?4, ?4)",
            params![Uuid::new_v4().to_string(), post_id.to_string(), connection_id.to_string(), now],
        )?;
    }
    Ok(())
}

fn query_post(conn: &Connection, id: Uuid) -> Result<Option<PostRow>> {
    conn.query_row(
        &format!("SELECT {POST_COLUMNS} FROM posts WHERE id = ?1"),
        [id.to_string()],
        map_post,
    )
    .optional()
}

fn query_targets(conn: &Connection, post_id: Uuid) -> Result<Vec<PostTargetRow>> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.post_id, t.connection_id, c.platform, t.status, t.platform_post_id,
                t.error_message, t.attempts, t.published_at
         FROM post_targets t
         JOIN social_connections c ON c.id = t.connection_id
         WHERE t.post_id = ?1
         ORDER BY t.created_at",
    )?;
    let rows = stmt
        .query_map([post_id.to_string()], |row| {
            Ok(PostTargetRow {
                id: parsed(row, 0)?,
                post_id: parsed(row, 1)?,
                connection_id: parsed(row, 2)?,
                platform: parsed(row, 3)?,
                status: parsed(row, 4)?,
                platform_post_id: row.get(5)?,
                error_message: row.get(6)?,
                attempts: row.get(7)?,
                published_at: opt_time(row, 8)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn map_post(row: &Row<'_>) -> rusqlite::Result<PostRow> {
    Ok(PostRow {
        id: parsed(row, 0)?,
        user_id: parsed(row, 1)?,
        content: row.get(2)?,
        media_urls: list(row, 3)?,
        status: parsed(row, 4)?,
        scheduled_at: opt_time(row, 5)?,
        published_at: opt_time(row, 6)?,
        claim_id: opt_parsed(row, 7)?,
        claimed_at: opt_time(row, 8)?,
        created_at: time(row, 9)?,
        updated_at: time(row, 10)?,
    })
}
