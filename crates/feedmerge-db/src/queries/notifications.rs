use anyhow::{Result, anyhow};
use chrono::Utc;
use rusqlite::{Row, params};
use uuid::Uuid;

use crate::Database;
use crate::models::{NotificationTokenRow, db_time, parsed, time};

impl Database {
    /// Register a device push token for `user_id`. A token already known
    /// (possibly under another account on the same device) is reassigned and
    /// reactivated.
    pub fn upsert_notification_token(
        &self,
        user_id: Uuid,
        token: &str,
        device_type: Option<&str>,
        device_id: Option<&str>,
    ) -> Result<NotificationTokenRow> {
        self.with_conn_mut(|conn| {
            let now = db_time(&Utc::now());
            conn.execute(
                "INSERT INTO notification_tokens (id, user_id, token, device_type, device_id, is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)
                 ON CONFLICT(token) DO UPDATE SET
                    user_id = excluded.user_id,
                    device_type = COALESCE(excluded.device_type, device_type),
                    device_id = COALESCE(excluded.device_id, device_id),
                    is_active = 1,
                    updated_at = excluded.updated_at",
                params![
                    Uuid::new_v4().to_string(),
                    user_id.to_string(),
                    token,
                    device_type,
                    device_id,
                    now
                ],
            )?;
            conn.query_row(
                "SELECT id, user_id, token, device_type, device_id, is_active, created_at
                 FROM notification_tokens WHERE token = ?1",
                [token],
                map_notification_token,
            )
            .map_err(|e| anyhow!("notification token missing after upsert: {}", e))
        })
    }

    /// Returns false if the user has no active token with that value.
    pub fn deactivate_notification_token(&self, user_id: Uuid, token: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE notification_tokens SET is_active = 0, updated_at = ?3
                 WHERE user_id = ?1 AND token = ?2 AND is_active = 1",
                params![user_id.to_string(), token, db_time(&Utc::now())],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn list_notification_tokens(&self, user_id: Uuid) -> Result<Vec<NotificationTokenRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, token, device_type, device_id, is_active, created_at
                 FROM notification_tokens WHERE user_id = ?1 AND is_active = 1
                 ORDER BY created_at",
            )?;
            let rows = stmt
                .query_map([user_id.to_string()], map_notification_token)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn map_notification_token(row: &Row<'_>) -> rusqlite::Result<NotificationTokenRow> {
    Ok(NotificationTokenRow {
        id: parsed(row, 0)?,
        user_id: parsed(row, 1)?,
        token: row.get(2)?,
        device_type: row.get(3)?,
        device_id: row.get(4)?,
        is_active: row.get(5)?,
        created_at: time(row, 6)?,
    })
}
