use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use uuid::Uuid;

use super::OptionalExt;
use crate::Database;
use crate::models::{UserRow, db_time, parsed, time};

const USER_COLUMNS: &str =
    "id, email, password_hash, display_name, avatar_url, is_active, created_at, updated_at";

#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub email: String,
    pub password_hash: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl Database {
    /// Insert a user. Returns `None` when the email is already taken.
    pub fn create_user(&self, user: &NewUser) -> Result<Option<UserRow>> {
        self.with_conn_mut(|conn| insert_user(conn, user, Utc::now()))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_email(conn, email))
    }

    pub fn get_user_by_id(&self, id: Uuid) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    /// Apply the provided profile fields; `None` leaves a field untouched.
    pub fn update_user_profile(
        &self,
        id: Uuid,
        display_name: Option<&str>,
        avatar_url: Option<&str>,
        password_hash: Option<&str>,
    ) -> Result<Option<UserRow>> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE users SET
                    display_name = COALESCE(?2, display_name),
                    avatar_url = COALESCE(?3, avatar_url),
                    password_hash = COALESCE(?4, password_hash),
                    updated_at = ?5
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    display_name,
                    avatar_url,
                    password_hash,
                    db_time(&Utc::now())
                ],
            )?;
            query_user_by_id(conn, id)
        })
    }

    /// Soft-delete: the row stays, sessions and device tokens are revoked.
    pub fn deactivate_user(&self, id: Uuid) -> Result<bool> {
        self.transaction(|tx| {
            let now = db_time(&Utc::now());
            let changed = tx.execute(
                "UPDATE users SET is_active = 0, updated_at = ?2 WHERE id = ?1 AND is_active = 1",
                params![id.to_string(), now],
            )?;
            tx.execute(
                "UPDATE refresh_tokens SET revoked = 1 WHERE user_id = ?1",
                [id.to_string()],
            )?;
            tx.execute(
                "UPDATE notification_tokens SET is_active = 0, updated_at = ?2 WHERE user_id = ?1",
                params![id.to_string(), now],
            )?;
            Ok(changed > 0)
        })
    }
}

pub(crate) fn insert_user(
    conn: &Connection,
    user: &NewUser,
    now: DateTime<Utc>,
) -> Result<Option<UserRow>> {
    let id = Uuid::new_v4();
    let now = db_time(&now);
    let inserted = conn.execute(
        "INSERT INTO users (id, email, password_hash, display_name, avatar_url, is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)
         ON CONFLICT(email) DO NOTHING",
        params![
            id.to_string(),
            user.email,
            user.password_hash,
            user.display_name,
            user.avatar_url,
            now
        ],
    )?;
    if inserted == 0 {
        return Ok(None);
    }
    query_user_by_id(conn, id)
}

pub(crate) fn query_user_by_email(conn: &Connection, email: &str) -> Result<Option<UserRow>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
        [email],
        map_user,
    )
    .optional()
}

pub(crate) fn query_user_by_id(conn: &Connection, id: Uuid) -> Result<Option<UserRow>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        [id.to_string()],
        map_user,
    )
    .optional()
}

/// Backfill the avatar only when the user has none yet.
pub(crate) fn backfill_avatar(conn: &Connection, id: Uuid, avatar_url: &str) -> Result<()> {
    conn.execute(
        "UPDATE users SET avatar_url = ?2, updated_at = ?3
         WHERE id = ?1 AND (avatar_url IS NULL OR avatar_url = '')",
        params![id.to_string(), avatar_url, db_time(&Utc::now())],
    )?;
    Ok(())
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: parsed(row, 0)?,
        email: row.get(1)?,
        password_hash: row.get(2)?,
        display_name: row.get(3)?,
        avatar_url: row.get(4)?,
        is_active: row.get(5)?,
        created_at: time(row, 6)?,
        updated_at: time(row, 7)?,
    })
}
