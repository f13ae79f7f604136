use feedmerge_types::Platform;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("OAuth credentials not configured for {0}")]
    MissingCredentials(Platform),

    #[error("Invalid or expired OAuth state")]
    InvalidState,

    #[error("Token exchange failed: {0}")]
    ExchangeFailed(String),

    #[error("Profile fetch failed: {0}")]
    ProfileFetchFailed(String),

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Pending flow storage failed: {0}")]
    Store(String),

    #[error("Invalid provider endpoint: {0}")]
    Endpoint(String),
}

impl OAuthError {
    /// Errors caused by the caller's input rather than server state.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, OAuthError::MissingCredentials(_) | OAuthError::Store(_) | OAuthError::Endpoint(_))
    }
}
