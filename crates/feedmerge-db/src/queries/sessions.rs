use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use uuid::Uuid;

use super::OptionalExt;
use super::users::query_user_by_id;
use crate::Database;
use crate::models::{OAuthStateRow, RefreshTokenRow, UserRow, db_time, opt_parsed, parsed, time};

impl Database {
    // -- Refresh tokens --

    pub fn insert_refresh_token(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshTokenRow> {
        self.with_conn_mut(|conn| insert_refresh(conn, user_id, token_hash, expires_at, Utc::now()))
    }

    /// Find a refresh token that is neither revoked nor expired.
    pub fn find_valid_refresh_token(&self, token_hash: &str) -> Result<Option<RefreshTokenRow>> {
        self.with_conn(|conn| query_valid_refresh(conn, token_hash, Utc::now()))
    }

    /// Revoke the presented token and store its replacement atomically.
    ///
    /// Returns the owning user, or `None` if the token is unknown, revoked,
    /// expired, or belongs to an inactive user. Nothing changes in that case.
    pub fn rotate_refresh_token(
        &self,
        old_hash: &str,
        new_hash: &str,
        new_expires_at: DateTime<Utc>,
    ) -> Result<Option<UserRow>> {
        self.transaction(|tx| {
            let now = Utc::now();
            let Some(current) = query_valid_refresh(tx, old_hash, now)? else {
                return Ok(None);
            };
            let Some(user) = query_user_by_id(tx, current.user_id)?.filter(|u| u.is_active) else {
                return Ok(None);
            };

            let revoked = tx.execute(
                "UPDATE refresh_tokens SET revoked = 1 WHERE id = ?1 AND revoked = 0",
                [current.id.to_string()],
            )?;
            if revoked == 0 {
                return Ok(None);
            }
            insert_refresh(tx, user.id, new_hash, new_expires_at, now)?;
            Ok(Some(user))
        })
    }

    /// Returns false if no live token matched.
    pub fn revoke_refresh_token(&self, token_hash: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE refresh_tokens SET revoked = 1
                 WHERE token_hash = ?1 AND revoked = 0 AND expires_at > ?2",
                params![token_hash, db_time(&Utc::now())],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn delete_stale_refresh_tokens(&self, now: DateTime<Utc>) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let deleted = conn.execute(
                "DELETE FROM refresh_tokens WHERE revoked = 1 OR expires_at <= ?1",
                [db_time(&now)],
            )?;
            Ok(deleted)
        })
    }

    // -- OAuth pending flows --

    /// Store a pending flow. An older pending flow of the same user and
    /// platform is dropped so only the newest state can complete.
    pub fn insert_oauth_state(&self, row: &OAuthStateRow) -> Result<()> {
        self.transaction(|tx| {
            if let Some(user_id) = row.user_id {
                tx.execute(
                    "DELETE FROM oauth_states WHERE user_id = ?1 AND platform = ?2",
                    params![user_id.to_string(), row.platform.as_str()],
                )?;
            }
            tx.execute(
                "INSERT INTO oauth_states (state, platform, user_id, code_verifier, redirect_uri, expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    row.state,
                    row.platform.as_str(),
                    row.user_id.map(|u| u.to_string()),
                    row.code_verifier,
                    row.redirect_uri,
                    db_time(&row.expires_at),
                    db_time(&row.created_at)
                ],
            )?;
            Ok(())
        })
    }

    pub fn find_oauth_state(&self, state: &str) -> Result<Option<OAuthStateRow>> {
        self.with_conn(|conn| query_oauth_state(conn, state))
    }

    /// Remove and return a pending flow. Exactly one caller can win.
    pub fn take_oauth_state(&self, state: &str) -> Result<Option<OAuthStateRow>> {
        self.transaction(|tx| {
            let Some(row) = query_oauth_state(tx, state)? else {
                return Ok(None);
            };
            tx.execute("DELETE FROM oauth_states WHERE state = ?1", [state])?;
            Ok(Some(row))
        })
    }

    pub fn delete_expired_oauth_states(&self, now: DateTime<Utc>) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let deleted = conn.execute(
                "DELETE FROM oauth_states WHERE expires_at <= ?1",
                [db_time(&now)],
            )?;
            Ok(deleted)
        })
    }
}

fn insert_refresh(
    conn: &Connection,
    user_id: Uuid,
    token_hash: &str,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<RefreshTokenRow> {
    let row = RefreshTokenRow {
        id: Uuid::new_v4(),
        user_id,
        token_hash: token_hash.to_string(),
        expires_at,
        revoked: false,
        created_at: now,
    };
    conn.execute(
        "INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at, revoked, created_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?5)",
        params![
            row.id.to_string(),
            user_id.to_string(),
            row.token_hash,
            db_time(&row.expires_at),
            db_time(&row.created_at)
        ],
    )?;
    Ok(row)
}

fn query_valid_refresh(
    conn: &Connection,
    token_hash: &str,
    now: DateTime<Utc>,
) -> Result<Option<RefreshTokenRow>> {
    conn.query_row(
        "SELECT id, user_id, token_hash, expires_at, revoked, created_at
         FROM refresh_tokens
         WHERE token_hash = ?1 AND revoked = 0 AND expires_at > ?2",
        params![token_hash, db_time(&now)],
        map_refresh,
    )
    .optional()
}

fn query_oauth_state(conn: &Connection, state: &str) -> Result<Option<OAuthStateRow>> {
    conn.query_row(
        "SELECT state, platform, user_id, code_verifier, redirect_uri, expires_at, created_at
         FROM oauth_states WHERE state = ?1",
        [state],
        |row| {
            Ok(OAuthStateRow {
                state: row.get(0)?,
                platform: parsed(row, 1)?,
                user_id: opt_parsed(row, 2)?,
                code_verifier: row.get(3)?,
                redirect_uri: row.get(4)?,
                expires_at: time(row, 5)?,
                created_at: time(row, 6)?,
            })
        },
    )
    .optional()
}

fn map_refresh(row: &Row<'_>) -> rusqlite::Result<RefreshTokenRow> {
    Ok(RefreshTokenRow {
        id: parsed(row, 0)?,
        user_id: parsed(row, 1)?,
        token_hash: row.get(2)?,
        expires_at: time(row, 3)?,
        revoked: row.get(4)?,
        created_at: time(row, 5)?,
    })
}
