use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use feedmerge_types::Platform;
use rusqlite::{Connection, Row, params};
use tracing::debug;
use uuid::Uuid;

use super::OptionalExt;
use super::users::{NewUser, backfill_avatar, insert_user, query_user_by_email, query_user_by_id};
use crate::Database;
use crate::models::{ConnectionRow, UserRow, db_time, json_list, list, opt_db_time, opt_time, parsed, time};

pub(crate) const CONNECTION_COLUMNS: &str = "c.id, c.user_id, c.platform, c.platform_user_id, \
     c.platform_username, c.access_token_enc, c.refresh_token_enc, c.expires_at, c.scopes, \
     c.is_active, c.created_at, c.updated_at";

/// A connection about to be stored. Token fields are already encrypted.
#[derive(Debug, Clone)]
pub struct NewConnection {
    pub platform: Platform,
    pub platform_user_id: String,
    pub platform_username: Option<String>,
    pub access_token_enc: String,
    pub refresh_token_enc: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Vec<String>,
}

impl Database {
    /// Find-or-create the user identified by `new_user.email` and make
    /// `connection` their active connection for its platform, all in one
    /// transaction.
    ///
    /// Returns `None` without touching anything if the user exists but has
    /// been deactivated.
    pub fn link_account(
        &self,
        new_user: &NewUser,
        connection: &NewConnection,
    ) -> Result<Option<(UserRow, ConnectionRow)>> {
        self.transaction(|tx| {
            let now = Utc::now();
            let user = match query_user_by_email(tx, &new_user.email)? {
                Some(user) if !user.is_active => return Ok(None),
                Some(user) => {
                    if let Some(avatar) = new_user.avatar_url.as_deref() {
                        backfill_avatar(tx, user.id, avatar)?;
                    }
                    user
                }
                None => insert_user(tx, new_user, now)?
                    .ok_or_else(|| anyhow!("user {} vanished during link", new_user.email))?,
            };

            let linked = replace_active_connection(tx, user.id, connection, now)?;
            let user = query_user_by_id(tx, user.id)?
                .ok_or_else(|| anyhow!("user {} missing after link", user.id))?;
            Ok(Some((user, linked)))
        })
    }

    /// Attach a connection to an existing, signed-in user.
    pub fn attach_connection(&self, user_id: Uuid, connection: &NewConnection) -> Result<ConnectionRow> {
        self.transaction(|tx| replace_active_connection(tx, user_id, connection, Utc::now()))
    }

    pub fn list_active_connections(&self, user_id: Uuid) -> Result<Vec<ConnectionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONNECTION_COLUMNS} FROM social_connections c
                 WHERE c.user_id = ?1 AND c.is_active = 1
                 ORDER BY c.created_at"
            ))?;
            let rows = stmt
                .query_map([user_id.to_string()], map_connection)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_connection(&self, id: Uuid) -> Result<Option<ConnectionRow>> {
        self.with_conn(|conn| query_connection(conn, id))
    }

    /// Mark a user's connection inactive. Returns the row as it was, or
    /// `None` if the user has no such active connection.
    pub fn deactivate_connection(&self, id: Uuid, user_id: Uuid) -> Result<Option<ConnectionRow>> {
        self.with_conn_mut(|conn| {
            let Some(row) = query_connection(conn, id)? else {
                return Ok(None);
            };
            if row.user_id != user_id || !row.is_active {
                return Ok(None);
            }
            conn.execute(
                "UPDATE social_connections SET is_active = 0, updated_at = ?2 WHERE id = ?1",
                params![id.to_string(), db_time(&Utc::now())],
            )?;
            Ok(Some(row))
        })
    }

    /// Store freshly refreshed platform tokens. A `None` refresh token keeps
    /// the one already stored, since not every platform rotates it.
    pub fn update_connection_tokens(
        &self,
        id: Uuid,
        access_token_enc: &str,
        refresh_token_enc: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE social_connections SET
                    access_token_enc = ?2,
                    refresh_token_enc = COALESCE(?3, refresh_token_enc),
                    expires_at = ?4,
                    updated_at = ?5
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    access_token_enc,
                    refresh_token_enc,
                    opt_db_time(expires_at.as_ref()),
                    db_time(&Utc::now())
                ],
            )?;
            Ok(())
        })
    }

    /// Active connections holding a refresh token whose access token expires
    /// at or before `cutoff`.
    pub fn connections_expiring_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<ConnectionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONNECTION_COLUMNS} FROM social_connections c
                 WHERE c.is_active = 1
                   AND c.refresh_token_enc IS NOT NULL
                   AND c.expires_at IS NOT NULL
                   AND c.expires_at <= ?1"
            ))?;
            let rows = stmt
                .query_map([db_time(&cutoff)], map_connection)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

/// Deactivate any active connection for (user, platform), then insert the new
/// one. When the same platform account is re-linked, pending targets of
/// unclaimed posts follow it to the new connection.
fn replace_active_connection(
    conn: &Connection,
    user_id: Uuid,
    new: &NewConnection,
    now: DateTime<Utc>,
) -> Result<ConnectionRow> {
    let now_s = db_time(&now);
    let prior = conn
        .query_row(
            &format!(
                "SELECT {CONNECTION_COLUMNS} FROM social_connections c
                 WHERE c.user_id = ?1 AND c.platform = ?2 AND c.is_active = 1"
            ),
            params![user_id.to_string(), new.platform.as_str()],
            map_connection,
        )
        .optional()?;

    if let Some(prior) = &prior {
        conn.execute(
            "UPDATE social_connections SET is_active = 0, updated_at = ?2 WHERE id = ?1",
            params![prior.id.to_string(), now_s],
        )?;
    }

    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO social_connections (
            id, user_id, platform, platform_user_id, platform_username,
            access_token_enc, refresh_token_enc, expires_at, scopes,
            is_active, created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10, ?10)",
        params![
            id.to_string(),
            user_id.to_string(),
            new.platform.as_str(),
            new.platform_user_id,
            new.platform_username,
            new.access_token_enc,
            new.refresh_token_enc,
            opt_db_time(new.expires_at.as_ref()),
            json_list(&new.scopes),
            now_s
        ],
    )?;

    if let Some(prior) = prior.filter(|p| p.platform_user_id == new.platform_user_id) {
        let moved = conn.execute(
            "UPDATE post_targets SET connection_id = ?2, updated_at = ?3
             WHERE connection_id = ?1 AND status = 'pending'
               AND post_id IN (SELECT id FROM posts WHERE claim_id IS NULL)",
            params![prior.id.to_string(), id.to_string(), now_s],
        )?;
        debug!("Re-linked {} connection {}, moved {} pending targets", new.platform, id, moved);
    }

    query_connection(conn, id)?.ok_or_else(|| anyhow!("connection {} missing after insert", id))
}

pub(crate) fn query_connection(conn: &Connection, id: Uuid) -> Result<Option<ConnectionRow>> {
    conn.query_row(
        &format!("SELECT {CONNECTION_COLUMNS} FROM social_connections c WHERE c.id = ?1"),
        [id.to_string()],
        map_connection,
    )
    .optional()
}

/// Maps the twelve `CONNECTION_COLUMNS` starting at `offset`.
pub(crate) fn map_connection_at(row: &Row<'_>, offset: usize) -> rusqlite::Result<ConnectionRow> {
    Ok(ConnectionRow {
        id: parsed(row, offset)?,
        user_id: parsed(row, offset + 1)?,
        platform: parsed(row, offset + 2)?,
        platform_user_id: row.get(offset + 3)?,
        platform_username: row.get(offset + 4)?,
        access_token_enc: row.get(offset + 5)?,
        refresh_token_enc: row.get(offset + 6)?,
        expires_at: opt_time(row, offset + 7)?,
        scopes: list(row, offset + 8)?,
        is_active: row.get(offset + 9)?,
        created_at: time(row, offset + 10)?,
        updated_at: time(row, offset + 11)?,
    })
}

fn map_connection(row: &Row<'_>) -> rusqlite::Result<ConnectionRow> {
    map_connection_at(row, 0)
}
