use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use feedmerge_db::models::UserRow;

use crate::error::ApiError;
use crate::state::AppState;

/// The signed-in, active user behind the request's bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserRow);

/// Validate the bearer JWT and load its user. Deactivated users are
/// rejected even while their access token has not expired.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    let claims = state.vault.validate_access(token)?;
    let user = state
        .db
        .blocking(move |db| db.get_user_by_id(claims.sub))
        .await?
        .filter(|u| u.is_active)
        .ok_or(ApiError::Unauthorized)?;

    req.extensions_mut().insert(AuthUser(user));
    Ok(next.run(req).await)
}
