use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use feedmerge_types::Platform;
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::OAuthError;

/// Server-side record of one started authorization attempt.
#[derive(Debug, Clone)]
pub struct PendingFlow {
    pub state: String,
    pub platform: Platform,
    /// Set when a signed-in user is linking another account.
    pub user_id: Option<Uuid>,
    pub code_verifier: Option<String>,
    pub redirect_uri: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl PendingFlow {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Storage for pending flows.
///
/// `take` must be atomic: of two concurrent calls for the same state at most
/// one returns the flow.
#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Store a flow, dropping older flows of the same user and platform.
    async fn save(&self, flow: PendingFlow) -> Result<(), OAuthError>;

    async fn find(&self, state: &str) -> Result<Option<PendingFlow>, OAuthError>;

    async fn take(&self, state: &str) -> Result<Option<PendingFlow>, OAuthError>;
}

/// In-process flow store for tests and single-node tools.
#[derive(Default)]
pub struct MemoryFlowStore {
    flows: Mutex<HashMap<String, PendingFlow>>,
}

impl MemoryFlowStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, PendingFlow>>, OAuthError> {
        self.flows
            .lock()
            .map_err(|e| OAuthError::Store(format!("flow store lock poisoned: {}", e)))
    }
}

#[async_trait]
impl FlowStore for MemoryFlowStore {
    async fn save(&self, flow: PendingFlow) -> Result<(), OAuthError> {
        let mut flows = self.lock()?;
        if let Some(user_id) = flow.user_id {
            flows.retain(|_, f| !(f.user_id == Some(user_id) && f.platform == flow.platform));
        }
        flows.insert(flow.state.clone(), flow);
        Ok(())
    }

    async fn find(&self, state: &str) -> Result<Option<PendingFlow>, OAuthError> {
        Ok(self.lock()?.get(state).cloned())
    }

    async fn take(&self, state: &str) -> Result<Option<PendingFlow>, OAuthError> {
        Ok(self.lock()?.remove(state))
    }
}

/// 256-bit random, URL-safe token.
pub fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// S256 PKCE challenge for `verifier`.
pub fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow(state: &str, user_id: Option<Uuid>, platform: Platform) -> PendingFlow {
        PendingFlow {
            state: state.to_string(),
            platform,
            user_id,
            code_verifier: None,
            redirect_uri: "https://app/cb".into(),
            expires_at: Utc::now() + chrono::Duration::minutes(10),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn tokens_are_unique_and_url_safe() {
        let a = random_token();
        let b = random_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn pkce_challenge_matches_rfc7636_example() {
        assert_eq!(
            pkce_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[tokio::test]
    async fn take_is_single_use() {
        let store = MemoryFlowStore::new();
        store.save(flow("s1", None, Platform::Google)).await.unwrap();
        assert!(store.find("s1").await.unwrap().is_some());
        assert!(store.take("s1").await.unwrap().is_some());
        assert!(store.take("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn newer_flow_replaces_older_for_same_user_and_platform() {
        let store = MemoryFlowStore::new();
        let user = Uuid::new_v4();
        store.save(flow("old", Some(user), Platform::LinkedIn)).await.unwrap();
        store.save(flow("other", Some(user), Platform::Twitter)).await.unwrap();
        store.save(flow("new", Some(user), Platform::LinkedIn)).await.unwrap();

        assert!(store.find("old").await.unwrap().is_none());
        assert!(store.find("other").await.unwrap().is_some());
        assert!(store.find("new").await.unwrap().is_some());
    }
}
