use std::time::Duration;

use async_trait::async_trait;
use feedmerge_types::Platform;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Error)]
pub enum PublishError {
    /// Timeouts, connection failures, 5xx and 429. Worth retrying.
    #[error("Transient publish error: {0}")]
    Transient(String),

    /// The platform rejected the access token.
    #[error("Platform rejected credentials: {0}")]
    Unauthorized(String),

    /// The platform refused the post itself.
    #[error("Platform rejected post: {0}")]
    Rejected(String),

    #[error("Publishing to {0} is not supported")]
    Unsupported(Platform),
}

impl PublishError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PublishError::Transient(_))
    }

    fn from_status(status: StatusCode, body: &str) -> Self {
        let detail = format!("{} {}", status, body.chars().take(200).collect::<String>());
        if status == StatusCode::UNAUTHORIZED {
            PublishError::Unauthorized(detail)
        } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            PublishError::Transient(detail)
        } else {
            PublishError::Rejected(detail)
        }
    }
}

impl From<reqwest::Error> for PublishError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            PublishError::Rejected(format!("unreadable response: {}", e))
        } else {
            PublishError::Transient(e.to_string())
        }
    }
}

/// One post destined for one connected account.
#[derive(Debug, Clone, Copy)]
pub struct PublishRequest<'a> {
    pub platform: Platform,
    pub platform_user_id: &'a str,
    pub access_token: &'a str,
    pub content: &'a str,
    pub media_urls: &'a [String],
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish and return the platform's id for the new post.
    async fn publish(&self, request: &PublishRequest<'_>) -> Result<String, PublishError>;
}

/// API base URLs per platform, overridable for staging and tests.
#[derive(Debug, Clone)]
pub struct PublisherEndpoints {
    pub facebook_graph: String,
    pub twitter_api: String,
    pub linkedin_api: String,
}

impl Default for PublisherEndpoints {
    fn default() -> Self {
        Self {
            facebook_graph: "https://graph.facebook.com/v18.0".into(),
            twitter_api: "https://api.twitter.com".into(),
            linkedin_api: "https://api.linkedin.com".into(),
        }
    }
}

/// Publishes through each platform's REST API.
pub struct HttpPublisher {
    http: Client,
    endpoints: PublisherEndpoints,
}

impl HttpPublisher {
    pub fn new(endpoints: PublisherEndpoints, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, endpoints })
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, PublishError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::from_status(status, &body));
        }
        Ok(response.json::<Value>().await?)
    }

    /// Posts to the account's own feed; the first media URL becomes the link.
    async fn facebook(&self, req: &PublishRequest<'_>) -> Result<String, PublishError> {
        let url = format!("{}/{}/feed", self.endpoints.facebook_graph, req.platform_user_id);
        let mut form = vec![("message", req.content), ("access_token", req.access_token)];
        if let Some(first) = req.media_urls.first() {
            form.push(("link", first.as_str()));
        }

        let body = self.send(self.http.post(url).form(&form)).await?;
        id_at(&body, "/id")
    }

    async fn twitter(&self, req: &PublishRequest<'_>) -> Result<String, PublishError> {
        if !req.media_urls.is_empty() {
            warn!("Twitter media attachments are not uploaded; posting text only");
        }
        let url = format!("{}/2/tweets", self.endpoints.twitter_api);
        let body = self
            .send(
                self.http
                    .post(url)
                    .bearer_auth(req.access_token)
                    .json(&json!({ "text": req.content })),
            )
            .await?;
        id_at(&body, "/data/id")
    }

    async fn linkedin(&self, req: &PublishRequest<'_>) -> Result<String, PublishError> {
        let category = if req.media_urls.is_empty() { "NONE" } else { "ARTICLE" };
        let mut share = json!({
            "shareCommentary": { "text": req.content },
            "shareMediaCategory": category,
        });
        if !req.media_urls.is_empty() {
            share["media"] = req
                .media_urls
                .iter()
                .map(|url| json!({ "status": "READY", "originalUrl": url }))
                .collect();
        }
        let payload = json!({
            "author": format!("urn:li:person:{}", req.platform_user_id),
            "lifecycleState": "PUBLISHED",
            "specificContent": { "com.linkedin.ugc.ShareContent": share },
            "visibility": { "com.linkedin.ugc.MemberNetworkVisibility": "PUBLIC" },
        });

        let url = format!("{}/v2/ugcPosts", self.endpoints.linkedin_api);
        let body = self
            .send(
                self.http
                    .post(url)
                    .bearer_auth(req.access_token)
                    .header("X-Restli-Protocol-Version", "2.0.0")
                    .json(&payload),
            )
            .await?;

        // Ids come back as URNs, e.g. `urn:li:share:123`.
        let urn = id_at(&body, "/id")?;
        Ok(urn.rsplit(':').next().unwrap_or(&urn).to_string())
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    async fn publish(&self, request: &PublishRequest<'_>) -> Result<String, PublishError> {
        debug!("Publishing to {} account {}", request.platform, request.platform_user_id);
        match request.platform {
            Platform::Facebook => self.facebook(request).await,
            Platform::Twitter => self.twitter(request).await,
            Platform::LinkedIn => self.linkedin(request).await,
            Platform::Google | Platform::TikTok => Err(PublishError::Unsupported(request.platform)),
        }
    }
}

fn id_at(body: &Value, pointer: &str) -> Result<String, PublishError> {
    match body.pointer(pointer) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(PublishError::Rejected("response did not contain a post id".into())),
    }
}
