use feedmerge_db::models::{ConnectionRow, NotificationTokenRow, PostRow, PostTargetRow, UserRow};
use feedmerge_types::api::{
    ConnectionResponse, NotificationTokenResponse, PostResponse, PostTargetResponse, UserResponse,
};

pub fn user(row: &UserRow) -> UserResponse {
    UserResponse {
        id: row.id,
        email: row.email.clone(),
        name: row.display_name.clone(),
        avatar_url: row.avatar_url.clone(),
        has_password: row.password_hash.is_some(),
        is_active: row.is_active,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

/// Never exposes the encrypted tokens.
pub fn connection(row: &ConnectionRow) -> ConnectionResponse {
    ConnectionResponse {
        id: row.id,
        platform: row.platform,
        platform_user_id: row.platform_user_id.clone(),
        platform_username: row.platform_username.clone(),
        scopes: row.scopes.clone(),
        expires_at: row.expires_at,
        created_at: row.created_at,
    }
}

pub fn notification_token(row: &NotificationTokenRow) -> NotificationTokenResponse {
    NotificationTokenResponse {
        id: row.id,
        token: row.token.clone(),
        device_type: row.device_type.clone(),
        device_id: row.device_id.clone(),
        is_active: row.is_active,
        created_at: row.created_at,
    }
}

pub fn post(row: &PostRow, targets: Option<&[PostTargetRow]>) -> PostResponse {
    PostResponse {
        id: row.id,
        content: row.content.clone(),
        media_urls: row.media_urls.clone(),
        status: row.status,
        scheduled_at: row.scheduled_at,
        published_at: row.published_at,
        created_at: row.created_at,
        updated_at: row.updated_at,
        targets: targets.map(|ts| ts.iter().map(target).collect()),
    }
}

fn target(row: &PostTargetRow) -> PostTargetResponse {
    PostTargetResponse {
        id: row.id,
        connection_id: row.connection_id,
        platform: row.platform,
        status: row.status,
        platform_post_id: row.platform_post_id.clone(),
        error_message: row.error_message.clone(),
        attempts: row.attempts,
        published_at: row.published_at,
    }
}
