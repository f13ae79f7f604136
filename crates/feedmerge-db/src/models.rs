//! Row types mapped straight from SQLite, plus the column helpers that
//! convert TEXT columns into typed values.
//!
//! Kept separate from the `feedmerge-types` API models so the storage layer
//! can change without touching the wire format.

use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use feedmerge_types::{Platform, PostStatus, TargetStatus};
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub password_hash: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Encrypted token fields are ciphertext produced by `TokenCipher`; this
/// layer never sees plaintext platform tokens.
#[derive(Debug, Clone)]
pub struct ConnectionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub platform: Platform,
    pub platform_user_id: String,
    pub platform_username: Option<String>,
    pub access_token_enc: String,
    pub refresh_token_enc: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RefreshTokenRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct OAuthStateRow {
    pub state: String,
    pub platform: Platform,
    pub user_id: Option<Uuid>,
    pub code_verifier: Option<String>,
    pub redirect_uri: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PostRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub media_urls: Vec<String>,
    pub status: PostStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub claim_id: Option<Uuid>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PostRow {
    /// Claimed posts and posts in a terminal state are read-only for users.
    pub fn is_editable(&self) -> bool {
        self.claim_id.is_none() && !self.status.is_terminal()
    }
}

#[derive(Debug, Clone)]
pub struct PostTargetRow {
    pub id: Uuid,
    pub post_id: Uuid,
    pub connection_id: Uuid,
    pub platform: Platform,
    pub status: TargetStatus,
    pub platform_post_id: Option<String>,
    pub error_message: Option<String>,
    pub attempts: u32,
    pub published_at: Option<DateTime<Utc>>,
}

/// Everything a publish worker needs for one target, joined with its
/// connection.
#[derive(Debug, Clone)]
pub struct PublishJob {
    pub target_id: Uuid,
    pub status: TargetStatus,
    pub attempts: u32,
    pub connection: ConnectionRow,
}

#[derive(Debug, Clone)]
pub struct NotificationTokenRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token: String,
    pub device_type: Option<String>,
    pub device_id: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Canonical storage form for timestamps. Fixed width so TEXT comparison in
/// SQL orders the same way as time does.
pub fn db_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn opt_db_time(t: Option<&DateTime<Utc>>) -> Option<String> {
    t.map(db_time)
}

pub(crate) fn json_list(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

fn conversion_error(idx: usize, err: impl Display) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.to_string().into())
}

pub(crate) fn parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| s.parse::<T>().map_err(|e| conversion_error(idx, e)))
        .transpose()
}

pub(crate) fn time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_time(&raw).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn opt_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_time(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

pub(crate) fn list(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|t| t.with_timezone(&Utc))
}
