//! HTTP API: sessions, social login and account linking, connections,
//! posts, and direct-upload URLs.

pub mod auth;
pub mod connections;
pub mod error;
pub mod flows;
pub mod linker;
pub mod middleware;
pub mod posts;
pub mod routes;
pub mod session;
pub mod state;
pub mod uploads;
pub mod users;
pub mod validation;
mod views;

pub use error::ApiError;
pub use routes::build_router;
pub use state::{AppState, AppStateInner};
