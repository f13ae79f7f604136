use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use feedmerge_oauth::OAuthError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Invalid or expired OAuth state")]
    InvalidState,

    #[error("Token exchange failed: {0}")]
    ExchangeFailed(String),

    #[error("Profile fetch failed: {0}")]
    ProfileFetchFailed(String),

    #[error("Invalid or expired token")]
    InvalidOrExpiredToken,

    #[error("Incorrect email or password")]
    InvalidCredentials,

    #[error("Could not validate credentials")]
    Unauthorized,

    #[error("Email already registered")]
    DuplicateEmail,

    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("{0}")]
    Conflict(&'static str),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::UnsupportedPlatform(_)
            | ApiError::InvalidState
            | ApiError::ExchangeFailed(_)
            | ApiError::ProfileFetchFailed(_)
            | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidOrExpiredToken | ApiError::InvalidCredentials | ApiError::Unauthorized => {
                StatusCode::UNAUTHORIZED
            }
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::DuplicateEmail | ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Config(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<OAuthError> for ApiError {
    fn from(e: OAuthError) -> Self {
        match e {
            OAuthError::UnsupportedPlatform(p) => ApiError::UnsupportedPlatform(p),
            OAuthError::InvalidState => ApiError::InvalidState,
            OAuthError::ExchangeFailed(msg) => ApiError::ExchangeFailed(msg),
            OAuthError::ProfileFetchFailed(msg) => ApiError::ProfileFetchFailed(msg),
            OAuthError::RefreshFailed(msg) => ApiError::ExchangeFailed(msg),
            OAuthError::MissingCredentials(_) | OAuthError::Endpoint(_) => ApiError::Config(e.to_string()),
            OAuthError::Store(msg) => ApiError::Internal(anyhow::anyhow!(msg)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match &self {
            ApiError::Config(msg) => {
                error!("Configuration error: {}", msg);
                "Server is not configured for this operation".to_string()
            }
            ApiError::Internal(e) => {
                error!("Internal error: {:#}", e);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let mut response = (status, Json(json!({ "detail": detail }))).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert("www-authenticate", axum::http::HeaderValue::from_static("Bearer"));
        }
        response
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use feedmerge_types::Platform;

    #[test]
    fn oauth_errors_map_to_client_or_server_status() {
        assert_eq!(ApiError::from(OAuthError::InvalidState).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::from(OAuthError::UnsupportedPlatform("myspace".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(OAuthError::MissingCredentials(Platform::TikTok)).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_detail_is_generic() {
        let response = ApiError::Internal(anyhow::anyhow!("disk I/O error at /var/db")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
