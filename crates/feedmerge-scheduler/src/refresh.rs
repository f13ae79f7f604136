use async_trait::async_trait;
use feedmerge_oauth::{OAuthBroker, OAuthError, PlatformTokens};
use feedmerge_types::Platform;

/// Renews platform tokens when a publish call is rejected as unauthorized.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, platform: Platform, refresh_token: &str) -> Result<PlatformTokens, OAuthError>;
}

#[async_trait]
impl TokenRefresher for OAuthBroker {
    async fn refresh(&self, platform: Platform, refresh_token: &str) -> Result<PlatformTokens, OAuthError> {
        self.refresh_tokens(platform, refresh_token).await
    }
}
