//! OAuth 2.0 authorization-code broker for the supported social platforms.
//!
//! The broker builds authorization URLs, keeps the pending flow for each
//! state token in a [`FlowStore`], exchanges codes for platform tokens, and
//! normalizes each platform's profile into a [`PlatformIdentity`].

pub mod broker;
pub mod config;
pub mod error;
pub mod flow;
pub mod identity;
pub mod providers;

pub use broker::{AuthorizationRequest, OAuthBroker, VerifiedLogin};
pub use config::{BrokerConfig, ClientCredentials, Endpoints};
pub use error::OAuthError;
pub use flow::{FlowStore, MemoryFlowStore, PendingFlow};
pub use identity::{PlatformIdentity, PlatformTokens};
