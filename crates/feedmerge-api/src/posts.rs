use std::collections::HashSet;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use feedmerge_db::models::{PostRow, PostTargetRow, UserRow};
use feedmerge_db::queries::{NewPost, PostChanges};
use feedmerge_types::PostStatus;
use feedmerge_types::api::{CreatePostRequest, MessageResponse, PostListQuery, UpdatePostRequest};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthUser;
use crate::state::AppState;
use crate::validation::{validate_content, validate_media_urls, validate_scheduled_at};
use crate::views;

const MAX_PAGE_SIZE: u32 = 100;
const NO_TARGETS: &str = "Select at least one connected account";

pub async fn create_post(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Json(req): Json<CreatePostRequest>,
) -> ApiResult<impl IntoResponse> {
    validate_content(&req.content)?;
    validate_media_urls(&req.media_urls)?;
    validate_scheduled_at(req.scheduled_at.as_ref())?;
    let connection_ids = dedup(&req.connection_ids);
    check_connections(&state, &user, &connection_ids).await?;
    if (req.publish_now || req.scheduled_at.is_some()) && connection_ids.is_empty() {
        return Err(ApiError::Validation(NO_TARGETS.into()));
    }

    // An immediate publish starts from draft and is claimed right away, so the
    // scan loop never sees it.
    let status = if req.scheduled_at.is_some() && !req.publish_now {
        PostStatus::Scheduled
    } else {
        PostStatus::Draft
    };
    let new_post = NewPost {
        user_id: user.id,
        content: req.content,
        media_urls: req.media_urls,
        status,
        scheduled_at: req.scheduled_at,
    };
    let post = state
        .db
        .blocking(move |db| db.create_post(&new_post, &connection_ids))
        .await?;
    info!("User {} created post {} ({})", user.id, post.id, post.status);

    if req.publish_now && state.scheduler.dispatch_now(post.id).await?.is_none() {
        warn!("Post {} could not be claimed for immediate publish", post.id);
    }

    let (post, targets) = load_with_targets(&state, post.id).await?;
    Ok((StatusCode::CREATED, Json(views::post(&post, Some(&targets)))))
}

pub async fn list_posts(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Query(query): Query<PostListQuery>,
) -> ApiResult<impl IntoResponse> {
    let limit = query.limit.clamp(1, MAX_PAGE_SIZE);
    let (id, skip) = (user.id, query.skip);
    let rows = state.db.blocking(move |db| db.list_posts(id, skip, limit)).await?;
    Ok(Json(rows.iter().map(|p| views::post(p, None)).collect::<Vec<_>>()))
}

pub async fn get_post(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(post_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let (post, targets) = load_with_targets(&state, post_id).await?;
    ensure_owner(&post, &user)?;
    Ok(Json(views::post(&post, Some(&targets))))
}

pub async fn update_post(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(post_id): Path<Uuid>,
    Json(req): Json<UpdatePostRequest>,
) -> ApiResult<impl IntoResponse> {
    let post = load_owned(&state, post_id, &user).await?;
    if !post.is_editable() {
        return Err(ApiError::Conflict("Post is being published or has already been published"));
    }

    if let Some(content) = &req.content {
        validate_content(content)?;
    }
    if let Some(urls) = &req.media_urls {
        validate_media_urls(urls)?;
    }
    validate_scheduled_at(req.scheduled_at.as_ref())?;
    if req.status.is_some_and(|s| !matches!(s, PostStatus::Draft | PostStatus::Scheduled)) {
        return Err(ApiError::Validation("Status can only be set to draft or scheduled".into()));
    }
    let status = req.status.unwrap_or(post.status);
    if status == PostStatus::Scheduled && req.scheduled_at.or(post.scheduled_at).is_none() {
        return Err(ApiError::Validation("A scheduled post needs a scheduledAt time".into()));
    }

    let connection_ids = req.connection_ids.as_deref().map(dedup);
    if let Some(ids) = &connection_ids {
        check_connections(&state, &user, ids).await?;
    }
    if status == PostStatus::Scheduled {
        let target_count = match &connection_ids {
            Some(ids) => ids.len(),
            None => state.db.blocking(move |db| db.get_post_targets(post_id)).await?.len(),
        };
        if target_count == 0 {
            return Err(ApiError::Validation(NO_TARGETS.into()));
        }
    }

    let changes = PostChanges {
        content: req.content,
        media_urls: req.media_urls,
        scheduled_at: req.scheduled_at,
        status: req.status,
        connection_ids,
    };
    state
        .db
        .blocking(move |db| db.update_post(post_id, &changes))
        .await?
        .ok_or(ApiError::Conflict("Post is being published or has already been published"))?;

    let (post, targets) = load_with_targets(&state, post_id).await?;
    Ok(Json(views::post(&post, Some(&targets))))
}

pub async fn delete_post(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(post_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    load_owned(&state, post_id, &user).await?;
    let deleted = state.db.blocking(move |db| db.delete_post(post_id)).await?;
    if !deleted {
        return Err(ApiError::Conflict("Post is being published"));
    }
    Ok(Json(MessageResponse {
        message: "Post deleted successfully".into(),
    }))
}

/// Publish a draft or scheduled post now. The work happens in the
/// background; progress shows up on `GET /posts/{id}`.
pub async fn publish_post(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    Path(post_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let (post, targets) = load_with_targets(&state, post_id).await?;
    ensure_owner(&post, &user)?;
    if targets.is_empty() {
        return Err(ApiError::Validation("Post has no target accounts".into()));
    }
    if state.scheduler.dispatch_now(post_id).await?.is_none() {
        return Err(ApiError::Conflict("Post is being published or has already been published"));
    }
    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: "Publishing started".into(),
        }),
    ))
}

fn dedup(ids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = HashSet::new();
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

fn ensure_owner(post: &PostRow, user: &UserRow) -> ApiResult<()> {
    if post.user_id != user.id {
        return Err(ApiError::Forbidden("Not authorized to access this post"));
    }
    Ok(())
}

async fn load_owned(state: &AppState, post_id: Uuid, user: &UserRow) -> ApiResult<PostRow> {
    let post = state
        .db
        .blocking(move |db| db.get_post(post_id))
        .await?
        .ok_or(ApiError::NotFound("Post"))?;
    ensure_owner(&post, user)?;
    Ok(post)
}

async fn load_with_targets(state: &AppState, post_id: Uuid) -> ApiResult<(PostRow, Vec<PostTargetRow>)> {
    state
        .db
        .blocking(move |db| {
            let Some(post) = db.get_post(post_id)? else {
                return Ok(None);
            };
            let targets = db.get_post_targets(post_id)?;
            Ok(Some((post, targets)))
        })
        .await?
        .ok_or(ApiError::NotFound("Post"))
}

/// Every id must name one of the user's active connections.
async fn check_connections(state: &AppState, user: &UserRow, ids: &[Uuid]) -> ApiResult<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let user_id = user.id;
    let owned: HashSet<Uuid> = state
        .db
        .blocking(move |db| db.list_active_connections(user_id))
        .await?
        .into_iter()
        .map(|c| c.id)
        .collect();
    match ids.iter().find(|id| !owned.contains(id)) {
        Some(bad) => Err(ApiError::Validation(format!("Invalid social connection ID: {}", bad))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_keeps_first_occurrence_order() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(dedup(&[a, b, a, b]), vec![a, b]);
    }
}
