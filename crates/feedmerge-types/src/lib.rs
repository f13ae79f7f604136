//! Types shared between the FeedMerge crates: platforms, post lifecycle
//! statuses, and the JSON bodies of the HTTP API.

pub mod api;
pub mod models;
pub mod platform;

pub use models::{PostStatus, TargetStatus};
pub use platform::Platform;
