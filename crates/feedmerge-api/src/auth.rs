use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use feedmerge_db::queries::NewUser;
use feedmerge_types::api::{
    LoginRequest, MessageResponse, OAuthExchangeRequest, OAuthStartRequest, OAuthStartResponse,
    RefreshRequest, RegisterRequest, RegisterResponse,
};
use tracing::{debug, info};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::validation::{normalize_email, validate_name, validate_password};
use crate::views;

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let name = validate_name(&req.name)?;
    let email = normalize_email(&req.email)?;
    validate_password(&req.password)?;

    let new_user = NewUser {
        email,
        password_hash: Some(hash_password(&req.password)?),
        display_name: Some(name),
        avatar_url: None,
    };
    let user = state
        .db
        .blocking(move |db| db.create_user(&new_user))
        .await?
        .ok_or(ApiError::DuplicateEmail)?;

    let session = state.vault.issue_session(&user).await?;
    info!("Registered user {}", user.id);

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user: views::user(&user),
            access_token: session.access_token,
            refresh_token: session.refresh_token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let email = normalize_email(&req.email).map_err(|_| ApiError::InvalidCredentials)?;
    let user = state
        .db
        .blocking(move |db| db.get_user_by_email(&email))
        .await?
        .filter(|u| u.is_active)
        .ok_or(ApiError::InvalidCredentials)?;

    // Social-only accounts have no password to check against.
    let stored = user.password_hash.as_deref().ok_or(ApiError::InvalidCredentials)?;
    if !verify_password(&req.password, stored)? {
        debug!("Password mismatch for user {}", user.id);
        return Err(ApiError::InvalidCredentials);
    }

    Ok(Json(state.vault.issue_session(&user).await?))
}

pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.vault.refresh_session(&req.refresh_token).await?))
}

pub async fn logout(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<impl IntoResponse> {
    state.vault.revoke(&req.refresh_token).await?;
    Ok(Json(MessageResponse {
        message: "Logged out".into(),
    }))
}

/// Begin a social login.
pub async fn oauth_start(
    State(state): State<AppState>,
    Json(req): Json<OAuthStartRequest>,
) -> ApiResult<impl IntoResponse> {
    let request = state.broker.start_flow(&req.platform, None).await?;
    Ok(Json(OAuthStartResponse {
        authorization_url: request.url,
        state: request.state,
    }))
}

/// Complete a social login: exchange the code, then find-or-create the user
/// and open a session. A failed exchange changes nothing.
pub async fn oauth_exchange(
    State(state): State<AppState>,
    Json(req): Json<OAuthExchangeRequest>,
) -> ApiResult<impl IntoResponse> {
    let login = state
        .broker
        .exchange_code(&req.platform, &req.authorization_code, &req.state, None)
        .await?;
    let user = state.linker.link_or_create(&login).await?;
    Ok(Json(state.vault.issue_session(&user).await?))
}

/// Argon2id with a random salt.
pub fn hash_password(password: &str) -> ApiResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("password hashing failed: {}", e)))
}

fn verify_password(password: &str, stored: &str) -> ApiResult<bool> {
    let parsed = PasswordHash::new(stored)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("stored password hash is malformed: {}", e)))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_verify_and_are_salted() {
        let a = hash_password("correct horse 1").unwrap();
        let b = hash_password("correct horse 1").unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("$argon2id$"));
        assert!(verify_password("correct horse 1", &a).unwrap());
        assert!(!verify_password("wrong horse 1", &a).unwrap());
    }
}
