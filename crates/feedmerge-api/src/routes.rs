use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::middleware::require_auth;
use crate::state::AppState;
use crate::{auth, connections, posts, uploads, users};

pub fn build_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/oauth/start", post(auth::oauth_start))
        .route("/auth/oauth/exchange", post(auth::oauth_exchange));

    let protected_routes = Router::new()
        .route("/users/me", get(users::me).put(users::update_me).delete(users::delete_me))
        .route(
            "/users/notification-tokens",
            get(users::list_notification_tokens).post(users::register_notification_token),
        )
        .route("/users/notification-tokens/{token}", delete(users::remove_notification_token))
        .route("/connections", get(connections::list_connections))
        .route("/connections/oauth/start", post(connections::oauth_start))
        .route("/connections/oauth/exchange", post(connections::oauth_exchange))
        .route("/connections/{connection_id}", delete(connections::delete_connection))
        .route("/posts", get(posts::list_posts).post(posts::create_post))
        .route(
            "/posts/{post_id}",
            get(posts::get_post).put(posts::update_post).delete(posts::delete_post),
        )
        .route("/posts/{post_id}/publish", post(posts::publish_post))
        .route("/upload/presigned-url", post(uploads::presigned_url))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
