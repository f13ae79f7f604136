use std::sync::Arc;

use chrono::Utc;
use feedmerge_crypto::TokenCipher;
use feedmerge_db::Database;
use feedmerge_db::models::{ConnectionRow, UserRow};
use feedmerge_db::queries::{NewConnection, NewUser};
use feedmerge_oauth::VerifiedLogin;
use feedmerge_types::Platform;
use tracing::info;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

/// Turns a verified platform login into a user and an active connection.
#[derive(Clone)]
pub struct AccountLinker {
    db: Arc<Database>,
    cipher: TokenCipher,
}

/// Email used to key users whose platform does not share one.
pub fn placeholder_email(platform: Platform, platform_user_id: &str) -> String {
    format!("{}@{}.placeholder", platform_user_id, platform)
}

impl AccountLinker {
    pub fn new(db: Arc<Database>, cipher: TokenCipher) -> Self {
        Self { db, cipher }
    }

    /// Find the user by the identity's email (or its placeholder), creating
    /// one seeded from the profile if needed, and make this login their
    /// active connection for the platform. Runs in one write transaction.
    pub async fn link_or_create(&self, login: &VerifiedLogin) -> ApiResult<UserRow> {
        let identity = &login.identity;
        let email = identity
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_lowercase)
            .unwrap_or_else(|| placeholder_email(login.platform, &identity.platform_user_id));

        let new_user = NewUser {
            email,
            password_hash: None,
            display_name: identity.name.clone().or_else(|| identity.username.clone()),
            avatar_url: identity.avatar_url.clone(),
        };
        let connection = self.encrypt(login)?;

        let (user, linked) = self
            .db
            .blocking(move |db| db.link_account(&new_user, &connection))
            .await?
            .ok_or(ApiError::Forbidden("This account has been deactivated"))?;

        info!("Linked {} account {} to user {}", linked.platform, linked.platform_user_id, user.id);
        Ok(user)
    }

    /// Attach a login to an already signed-in user, replacing any active
    /// connection they hold on that platform.
    pub async fn link_to_user(&self, user_id: Uuid, login: &VerifiedLogin) -> ApiResult<ConnectionRow> {
        let connection = self.encrypt(login)?;
        let linked = self
            .db
            .blocking(move |db| db.attach_connection(user_id, &connection))
            .await?;
        info!("User {} connected {} account {}", user_id, linked.platform, linked.platform_user_id);
        Ok(linked)
    }

    fn encrypt(&self, login: &VerifiedLogin) -> ApiResult<NewConnection> {
        let tokens = &login.tokens;
        let access_token_enc = self.cipher.encrypt_str(&tokens.access_token)?;
        let refresh_token_enc = tokens
            .refresh_token
            .as_deref()
            .map(|t| self.cipher.encrypt_str(t))
            .transpose()?;

        Ok(NewConnection {
            platform: login.platform,
            platform_user_id: login.identity.platform_user_id.clone(),
            platform_username: login.identity.username.clone(),
            access_token_enc,
            refresh_token_enc,
            expires_at: tokens.expires_at(Utc::now()),
            scopes: tokens.scopes.clone(),
        })
    }
}
