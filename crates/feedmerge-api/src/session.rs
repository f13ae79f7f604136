use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{Duration, Utc};
use feedmerge_db::Database;
use feedmerge_db::models::UserRow;
use feedmerge_types::api::{Claims, SessionResponse};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{ApiError, ApiResult};

/// Issues and validates the application's own session tokens.
///
/// Access tokens are short-lived HS256 JWTs. Refresh tokens are opaque
/// random strings; only their SHA-256 hash is stored, and every refresh
/// rotates them.
pub struct TokenVault {
    db: Arc<Database>,
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenVault {
    pub fn new(db: Arc<Database>, jwt_secret: &str, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            db,
            encoding: EncodingKey::from_secret(jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(jwt_secret.as_bytes()),
            access_ttl,
            refresh_ttl,
        }
    }

    pub async fn issue_session(&self, user: &UserRow) -> ApiResult<SessionResponse> {
        let refresh_token = new_refresh_token();
        let hash = hash_refresh_token(&refresh_token);
        let expires_at = Utc::now() + self.refresh_ttl;
        let user_id = user.id;
        self.db
            .blocking(move |db| db.insert_refresh_token(user_id, &hash, expires_at))
            .await?;

        self.session_for(user, refresh_token)
    }

    /// Exchange a refresh token for a new pair. The presented token is
    /// revoked in the same transaction that stores its replacement.
    pub async fn refresh_session(&self, refresh_token: &str) -> ApiResult<SessionResponse> {
        let old_hash = hash_refresh_token(refresh_token);
        let replacement = new_refresh_token();
        let new_hash = hash_refresh_token(&replacement);
        let expires_at = Utc::now() + self.refresh_ttl;

        let user = self
            .db
            .blocking(move |db| db.rotate_refresh_token(&old_hash, &new_hash, expires_at))
            .await?
            .ok_or(ApiError::InvalidOrExpiredToken)?;

        debug!("Rotated refresh token for user {}", user.id);
        self.session_for(&user, replacement)
    }

    /// Revoke a refresh token (logout).
    pub async fn revoke(&self, refresh_token: &str) -> ApiResult<()> {
        let hash = hash_refresh_token(refresh_token);
        let revoked = self.db.blocking(move |db| db.revoke_refresh_token(&hash)).await?;
        if revoked { Ok(()) } else { Err(ApiError::InvalidOrExpiredToken) }
    }

    pub fn validate_access(&self, token: &str) -> ApiResult<Claims> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| {
                debug!("Rejected access token: {}", e);
                ApiError::Unauthorized
            })
    }

    fn session_for(&self, user: &UserRow, refresh_token: String) -> ApiResult<SessionResponse> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id,
            email: user.email.clone(),
            iat: now.timestamp() as usize,
            exp: (now + self.access_ttl).timestamp() as usize,
        };
        let access_token = encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| ApiError::Internal(anyhow::anyhow!("JWT encoding failed: {}", e)))?;

        Ok(SessionResponse {
            access_token,
            refresh_token,
            token_type: "bearer".into(),
            expires_in: self.access_ttl.num_seconds(),
        })
    }
}

fn new_refresh_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn hash_refresh_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
