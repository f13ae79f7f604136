use std::sync::Arc;

use chrono::Utc;
use feedmerge_types::Platform;
use reqwest::{Client, Response};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::{BrokerConfig, ClientCredentials, Endpoints};
use crate::error::OAuthError;
use crate::flow::{FlowStore, PendingFlow, pkce_challenge, random_token};
use crate::identity::{PlatformIdentity, PlatformTokens, TokenResponse};
use crate::providers::{ProviderSpec, RevokeStyle, TokenAuth, spec_for};

/// Where to send the user, and the state token bound to that attempt.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
}

/// Result of a successful code exchange. The pending flow has been consumed.
#[derive(Debug, Clone)]
pub struct VerifiedLogin {
    pub platform: Platform,
    pub identity: PlatformIdentity,
    pub tokens: PlatformTokens,
    /// The signed-in user that started the flow, for account linking.
    pub user_id: Option<Uuid>,
}

pub struct OAuthBroker {
    http: Client,
    config: BrokerConfig,
    flows: Arc<dyn FlowStore>,
}

impl OAuthBroker {
    pub fn new(config: BrokerConfig, flows: Arc<dyn FlowStore>) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(config.http_timeout).build()?;
        Ok(Self { http, config, flows })
    }

    pub fn parse_platform(&self, raw: &str) -> Result<Platform, OAuthError> {
        raw.parse::<Platform>()
            .map_err(|_| OAuthError::UnsupportedPlatform(raw.to_string()))
    }

    pub fn enabled_platforms(&self) -> Vec<Platform> {
        self.config.enabled_platforms()
    }

    /// Begin an authorization attempt for `platform`. `user_id` is set when a
    /// signed-in user is linking an additional account.
    pub async fn start_flow(
        &self,
        platform: &str,
        user_id: Option<Uuid>,
    ) -> Result<AuthorizationRequest, OAuthError> {
        let platform = self.parse_platform(platform)?;
        let spec = spec_for(platform);
        let creds = self.credentials(platform)?;
        let endpoints = self.endpoints(spec);

        let state = random_token();
        let code_verifier = spec.pkce.then(random_token);

        let mut params: Vec<(&str, String)> = vec![
            (spec.client_id_param, creds.client_id.clone()),
            ("redirect_uri", creds.redirect_uri.clone()),
            ("response_type", "code".to_string()),
            ("scope", spec.scope_string()),
            ("state", state.clone()),
        ];
        params.extend(spec.extra_auth_params.iter().map(|(k, v)| (*k, v.to_string())));
        if let Some(verifier) = &code_verifier {
            params.push(("code_challenge", pkce_challenge(verifier)));
            params.push(("code_challenge_method", "S256".to_string()));
        }

        let url = Url::parse_with_params(&endpoints.auth_url, &params)
            .map_err(|e| OAuthError::Endpoint(format!("{}: {}", endpoints.auth_url, e)))?;

        let now = Utc::now();
        self.flows
            .save(PendingFlow {
                state: state.clone(),
                platform,
                user_id,
                code_verifier,
                redirect_uri: creds.redirect_uri.clone(),
                expires_at: now + self.config.state_ttl,
                created_at: now,
            })
            .await?;

        info!("Started {} OAuth flow (linking: {})", platform, user_id.is_some());
        Ok(AuthorizationRequest {
            url: url.into(),
            state,
        })
    }

    /// Redeem an authorization code.
    ///
    /// The state is only consumed once both the token and the profile call
    /// succeeded, so a failed exchange leaves no trace besides the log line.
    /// `user_id` must match the user that started the flow (`None` for login).
    pub async fn exchange_code(
        &self,
        platform: &str,
        code: &str,
        state: &str,
        user_id: Option<Uuid>,
    ) -> Result<VerifiedLogin, OAuthError> {
        let platform = self.parse_platform(platform)?;
        let flow = self.flows.find(state).await?.ok_or(OAuthError::InvalidState)?;
        if flow.platform != platform || flow.user_id != user_id || flow.is_expired(Utc::now()) {
            debug!("Rejected {} OAuth state (platform/user/expiry mismatch)", platform);
            return Err(OAuthError::InvalidState);
        }
        if code.trim().is_empty() {
            return Err(OAuthError::ExchangeFailed("missing authorization code".into()));
        }

        let spec = spec_for(platform);
        let creds = self.credentials(platform)?;
        let endpoints = self.endpoints(spec);

        let mut form: Vec<(&str, String)> = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
            ("redirect_uri", flow.redirect_uri.clone()),
        ];
        if let Some(verifier) = &flow.code_verifier {
            form.push(("code_verifier", verifier.clone()));
        }

        let tokens = self
            .token_request(spec, creds, &endpoints.token_url, form)
            .await
            .map_err(OAuthError::ExchangeFailed)?
            .into_tokens(spec.scopes)
            .ok_or_else(|| OAuthError::ExchangeFailed(format!("no access token received from {}", platform)))?;

        let identity = self.fetch_identity(spec, &endpoints, &tokens.access_token).await?;

        // Consume last; a concurrent replay that got here first wins.
        let flow = self.flows.take(state).await?.ok_or(OAuthError::InvalidState)?;

        info!("Completed {} OAuth exchange for account {}", platform, identity.platform_user_id);
        Ok(VerifiedLogin {
            platform,
            identity,
            tokens,
            user_id: flow.user_id,
        })
    }

    /// Renew platform tokens with a refresh token. The returned refresh token
    /// is `None` when the provider did not rotate it.
    pub async fn refresh_tokens(
        &self,
        platform: Platform,
        refresh_token: &str,
    ) -> Result<PlatformTokens, OAuthError> {
        let spec = spec_for(platform);
        if !spec.supports_refresh {
            return Err(OAuthError::RefreshFailed(format!("{} has no refresh grant", platform)));
        }
        let creds = self.credentials(platform)?;
        let endpoints = self.endpoints(spec);

        let form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
        ];
        let tokens = self
            .token_request(spec, creds, &endpoints.token_url, form)
            .await
            .map_err(OAuthError::RefreshFailed)?
            .into_tokens(&[])
            .ok_or_else(|| OAuthError::RefreshFailed(format!("no access token received from {}", platform)))?;

        debug!("Refreshed {} access token", platform);
        Ok(tokens)
    }

    /// Best-effort revocation. Returns false when the platform has no
    /// revocation endpoint or the call did not succeed.
    pub async fn revoke(&self, platform: Platform, access_token: &str) -> bool {
        let spec = spec_for(platform);
        let Some(url) = self.endpoints(spec).revoke_url else {
            return false;
        };

        let request = match spec.revoke_style {
            RevokeStyle::FormPost => self.http.post(&url).form(&[("token", access_token)]),
            RevokeStyle::Delete => self.http.delete(&url).query(&[("access_token", access_token)]),
        };
        match request.send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!("{} token revocation returned {}", platform, response.status());
                false
            }
            Err(e) => {
                warn!("{} token revocation failed: {}", platform, e);
                false
            }
        }
    }

    fn credentials(&self, platform: Platform) -> Result<&ClientCredentials, OAuthError> {
        self.config
            .credentials
            .get(&platform)
            .filter(|c| !c.client_id.is_empty() && !c.client_secret.is_empty())
            .ok_or(OAuthError::MissingCredentials(platform))
    }

    fn endpoints(&self, spec: &ProviderSpec) -> Endpoints {
        self.config
            .endpoint_overrides
            .get(&spec.platform)
            .cloned()
            .unwrap_or_else(|| Endpoints {
                auth_url: spec.auth_url.to_string(),
                token_url: spec.token_url.to_string(),
                profile_url: spec.profile_url.to_string(),
                revoke_url: spec.revoke_url.map(str::to_string),
            })
    }

    /// POST to the token endpoint; errors are returned as readable strings
    /// for the caller to wrap.
    async fn token_request(
        &self,
        spec: &ProviderSpec,
        creds: &ClientCredentials,
        token_url: &str,
        mut form: Vec<(&str, String)>,
    ) -> Result<TokenResponse, String> {
        let mut request = self.http.post(token_url).header("Accept", "application/json");
        match spec.token_auth {
            TokenAuth::Body => {
                form.push((spec.client_id_param, creds.client_id.clone()));
                form.push(("client_secret", creds.client_secret.clone()));
            }
            TokenAuth::Basic => {
                form.push(("client_id", creds.client_id.clone()));
                request = request.basic_auth(&creds.client_id, Some(&creds.client_secret));
            }
        }

        let response = request
            .form(&form)
            .send()
            .await
            .map_err(|e| format!("request to {} failed: {}", spec.platform, e))?;
        let response = ensure_success(response).await?;
        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| format!("malformed token response from {}: {}", spec.platform, e))
    }

    async fn fetch_identity(
        &self,
        spec: &ProviderSpec,
        endpoints: &Endpoints,
        access_token: &str,
    ) -> Result<PlatformIdentity, OAuthError> {
        let response = self
            .http
            .get(&endpoints.profile_url)
            .query(spec.profile_params)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| OAuthError::ProfileFetchFailed(format!("request to {} failed: {}", spec.platform, e)))?;
        let response = ensure_success(response)
            .await
            .map_err(OAuthError::ProfileFetchFailed)?;
        let profile: Value = response
            .json()
            .await
            .map_err(|e| OAuthError::ProfileFetchFailed(format!("malformed profile: {}", e)))?;

        (spec.normalize)(&profile).ok_or_else(|| {
            OAuthError::ProfileFetchFailed(format!("{} profile has no account id", spec.platform))
        })
    }
}

async fn ensure_success(response: Response) -> Result<Response, String> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(200).collect();
    Err(format!("{} {}", status, snippet))
}
