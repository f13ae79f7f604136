use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use feedmerge_types::api::{MessageResponse, NotificationTokenRequest, UpdateProfileRequest};
use tracing::info;

use crate::auth::hash_password;
use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthUser;
use crate::state::AppState;
use crate::validation::{validate_avatar_url, validate_name, validate_password};
use crate::views;

const MAX_DEVICE_TOKEN_LENGTH: usize = 4096;

pub async fn me(Extension(AuthUser(user)): Extension<AuthUser>) -> impl IntoResponse {
    Json(views::user(&user))
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(req): Json<UpdateProfileRequest>,
) -> ApiResult<impl IntoResponse> {
    let name = req.name.as_deref().map(validate_name).transpose()?;
    if let Some(avatar) = &req.avatar_url {
        validate_avatar_url(avatar)?;
    }
    let password_hash = match req.password.as_deref() {
        Some(password) => {
            validate_password(password)?;
            Some(hash_password(password)?)
        }
        None => None,
    };

    let id = user.id;
    let updated = state
        .db
        .blocking(move |db| {
            db.update_user_profile(id, name.as_deref(), req.avatar_url.as_deref(), password_hash.as_deref())
        })
        .await?
        .ok_or(ApiError::NotFound("User"))?;
    Ok(Json(views::user(&updated)))
}

/// Soft-delete the account. Sessions and device tokens stop working.
pub async fn delete_me(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    let id = user.id;
    state.db.blocking(move |db| db.deactivate_user(id)).await?;
    info!("Deactivated user {}", id);
    Ok(Json(MessageResponse {
        message: "Account deactivated".into(),
    }))
}

pub async fn list_notification_tokens(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    let id = user.id;
    let rows = state.db.blocking(move |db| db.list_notification_tokens(id)).await?;
    Ok(Json(rows.iter().map(views::notification_token).collect::<Vec<_>>()))
}

pub async fn register_notification_token(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(req): Json<NotificationTokenRequest>,
) -> ApiResult<impl IntoResponse> {
    let token = req.token.trim().to_string();
    if token.is_empty() || token.len() > MAX_DEVICE_TOKEN_LENGTH {
        return Err(ApiError::Validation("Invalid device token".into()));
    }

    let id = user.id;
    let row = state
        .db
        .blocking(move |db| {
            db.upsert_notification_token(id, &token, req.device_type.as_deref(), req.device_id.as_deref())
        })
        .await?;
    Ok((StatusCode::CREATED, Json(views::notification_token(&row))))
}

pub async fn remove_notification_token(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(token): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = user.id;
    let removed = state
        .db
        .blocking(move |db| db.deactivate_notification_token(id, &token))
        .await?;
    if !removed {
        return Err(ApiError::NotFound("Notification token"));
    }
    Ok(Json(MessageResponse {
        message: "Notification token removed".into(),
    }))
}
