use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use feedmerge_types::api::{OAuthExchangeRequest, OAuthStartRequest, OAuthStartResponse};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthUser;
use crate::state::AppState;
use crate::views;

pub async fn list_connections(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
) -> ApiResult<impl IntoResponse> {
    let id = user.id;
    let rows = state.db.blocking(move |db| db.list_active_connections(id)).await?;
    Ok(Json(rows.iter().map(views::connection).collect::<Vec<_>>()))
}

/// Start linking another platform account to the signed-in user. The flow
/// can only be completed by the same user.
pub async fn oauth_start(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(req): Json<OAuthStartRequest>,
) -> ApiResult<impl IntoResponse> {
    let request = state.broker.start_flow(&req.platform, Some(user.id)).await?;
    Ok(Json(OAuthStartResponse {
        authorization_url: request.url,
        state: request.state,
    }))
}

pub async fn oauth_exchange(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(req): Json<OAuthExchangeRequest>,
) -> ApiResult<impl IntoResponse> {
    let login = state
        .broker
        .exchange_code(&req.platform, &req.authorization_code, &req.state, Some(user.id))
        .await?;
    let connection = state.linker.link_to_user(user.id, &login).await?;
    Ok((StatusCode::CREATED, Json(views::connection(&connection))))
}

/// Deactivate a connection, then ask the platform to revoke its token.
/// Revocation is best-effort; the connection is gone either way.
pub async fn delete_connection(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(connection_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let user_id = user.id;
    let connection = state
        .db
        .blocking(move |db| db.deactivate_connection(connection_id, user_id))
        .await?
        .ok_or(ApiError::NotFound("Social connection"))?;
    info!("User {} disconnected {} connection {}", user_id, connection.platform, connection.id);

    match state.cipher.decrypt_str(&connection.access_token_enc) {
        Ok(token) => {
            if state.broker.revoke(connection.platform, &token).await {
                debug!("Revoked {} token for connection {}", connection.platform, connection.id);
            }
        }
        Err(e) => warn!("Could not decrypt token of connection {} for revocation: {}", connection.id, e),
    }

    Ok(StatusCode::NO_CONTENT)
}
