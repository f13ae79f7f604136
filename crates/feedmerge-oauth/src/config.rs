use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use feedmerge_types::Platform;

/// Application credentials registered with one platform.
#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

/// Replacement endpoints for one platform, e.g. a staging provider or a
/// local fake in tests.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub auth_url: String,
    pub token_url: String,
    pub profile_url: String,
    pub revoke_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub credentials: HashMap<Platform, ClientCredentials>,
    pub endpoint_overrides: HashMap<Platform, Endpoints>,
    /// How long a started flow stays redeemable.
    pub state_ttl: chrono::Duration,
    /// Bound on every outbound call to a platform.
    pub http_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            credentials: HashMap::new(),
            endpoint_overrides: HashMap::new(),
            state_ttl: chrono::Duration::minutes(10),
            http_timeout: Duration::from_secs(20),
        }
    }
}

impl BrokerConfig {
    pub fn with_credentials(mut self, platform: Platform, credentials: ClientCredentials) -> Self {
        self.credentials.insert(platform, credentials);
        self
    }

    pub fn with_endpoints(mut self, platform: Platform, endpoints: Endpoints) -> Self {
        self.endpoint_overrides.insert(platform, endpoints);
        self
    }

    /// Platforms with credentials configured.
    pub fn enabled_platforms(&self) -> Vec<Platform> {
        Platform::ALL
            .into_iter()
            .filter(|p| self.credentials.contains_key(p))
            .collect()
    }
}
