//! Publishes due posts to their connected platforms.
//!
//! A periodic scan claims each due post exactly once and hands it to a
//! bounded pool of publish jobs. Each target is published independently with
//! retries; the post's final status is aggregated from its targets.

pub mod config;
pub mod publisher;
pub mod refresh;
pub mod retry;
pub mod scheduler;

pub use config::SchedulerConfig;
pub use publisher::{HttpPublisher, PublishError, PublishRequest, Publisher, PublisherEndpoints};
pub use refresh::TokenRefresher;
pub use scheduler::Scheduler;
