use chrono::{DateTime, Datelike, Utc};
use url::Url;

use crate::error::{ApiError, ApiResult};

pub const MIN_PASSWORD_LENGTH: usize = 8;
const MAX_PASSWORD_LENGTH: usize = 128;
const MAX_NAME_LENGTH: usize = 100;
const MAX_EMAIL_LENGTH: usize = 254;
pub const MAX_CONTENT_LENGTH: usize = 5000;
pub const MAX_MEDIA_URLS: usize = 10;

/// Trim and lowercase an email, rejecting anything without a plausible
/// `local@domain.tld` shape.
pub fn normalize_email(raw: &str) -> ApiResult<String> {
    let email = raw.trim().to_lowercase();
    let valid = email.len() <= MAX_EMAIL_LENGTH
        && !email.chars().any(char::is_whitespace)
        && match email.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty()
                    && !domain.contains('@')
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
            }
            None => false,
        };
    if !valid {
        return Err(ApiError::Validation("Invalid email address".into()));
    }
    Ok(email)
}

pub fn validate_password(password: &str) -> ApiResult<()> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::Validation(format!(
            "Password must be at least {} characters long",
            MIN_PASSWORD_LENGTH
        )));
    }
    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(ApiError::Validation("Password is too long".into()));
    }
    if !password.chars().any(|c| c.is_ascii_alphabetic()) {
        return Err(ApiError::Validation("Password must contain at least one letter".into()));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err(ApiError::Validation("Password must contain at least one digit".into()));
    }
    Ok(())
}

pub fn validate_name(name: &str) -> ApiResult<String> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_LENGTH {
        return Err(ApiError::Validation(format!(
            "Name must be between 1 and {} characters",
            MAX_NAME_LENGTH
        )));
    }
    Ok(name.to_string())
}

pub fn validate_content(content: &str) -> ApiResult<()> {
    if content.trim().is_empty() {
        return Err(ApiError::Validation("Post content cannot be empty".into()));
    }
    if content.chars().count() > MAX_CONTENT_LENGTH {
        return Err(ApiError::Validation(format!(
            "Post content exceeds {} characters",
            MAX_CONTENT_LENGTH
        )));
    }
    Ok(())
}

/// Stored timestamps carry a four-digit year.
pub fn validate_scheduled_at(scheduled_at: Option<&DateTime<Utc>>) -> ApiResult<()> {
    match scheduled_at {
        Some(at) if !(1..=9999).contains(&at.year()) => {
            Err(ApiError::Validation("scheduledAt must be between years 0001 and 9999".into()))
        }
        _ => Ok(()),
    }
}

/// Media references must be absolute http(s) URLs.
pub fn validate_media_urls(urls: &[String]) -> ApiResult<()> {
    if urls.len() > MAX_MEDIA_URLS {
        return Err(ApiError::Validation(format!("At most {} media URLs per post", MAX_MEDIA_URLS)));
    }
    for raw in urls {
        let ok = Url::parse(raw)
            .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
            .unwrap_or(false);
        if !ok {
            return Err(ApiError::Validation(format!("Invalid media URL: {}", raw)));
        }
    }
    Ok(())
}

pub fn validate_avatar_url(raw: &str) -> ApiResult<()> {
    validate_media_urls(&[raw.to_string()])
        .map_err(|_| ApiError::Validation("Invalid avatar URL".into()))
}
