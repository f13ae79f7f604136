use chrono::{DateTime, Utc};
use serde::Deserialize;

/// A platform account normalized across providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformIdentity {
    pub platform_user_id: String,
    pub username: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Plaintext platform tokens. Callers encrypt these before they are stored.
#[derive(Clone, PartialEq, Eq)]
pub struct PlatformTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub scopes: Vec<String>,
}

impl PlatformTokens {
    pub fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expires_in
            .filter(|secs| *secs > 0)
            .map(|secs| now + chrono::Duration::seconds(secs))
    }
}

impl std::fmt::Debug for PlatformTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformTokens")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_in", &self.expires_in)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Token endpoint response. Providers differ in which fields they send, so
/// everything is optional and validated afterwards.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Convert into tokens, falling back to `requested` scopes when the
    /// provider does not echo the granted ones.
    pub fn into_tokens(self, requested: &[&str]) -> Option<PlatformTokens> {
        let access_token = self.access_token.filter(|t| !t.is_empty())?;
        let scopes = match self.scope.as_deref() {
            Some(granted) if !granted.trim().is_empty() => split_scopes(granted),
            _ => requested.iter().map(|s| s.to_string()).collect(),
        };
        Some(PlatformTokens {
            access_token,
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            expires_in: self.expires_in,
            scopes,
        })
    }
}

/// Scope lists come back space- or comma-separated depending on provider.
pub(crate) fn split_scopes(raw: &str) -> Vec<String> {
    raw.split([' ', ','])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// Some providers send expires_in as a string.
fn lenient_seconds<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => s.parse().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> TokenResponse {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn granted_scopes_win_over_requested() {
        let tokens = parse(r#"{"access_token":"a","scope":"email,public_profile"}"#)
            .into_tokens(&["openid"])
            .unwrap();
        assert_eq!(tokens.scopes, vec!["email", "public_profile"]);
    }

    #[test]
    fn requested_scopes_used_when_not_echoed() {
        let tokens = parse(r#"{"access_token":"a","expires_in":"3600"}"#)
            .into_tokens(&["tweet.read", "users.read"])
            .unwrap();
        assert_eq!(tokens.scopes, vec!["tweet.read", "users.read"]);
        assert_eq!(tokens.expires_in, Some(3600));
    }

    #[test]
    fn missing_access_token_is_rejected() {
        assert!(parse(r#"{"refresh_token":"r"}"#).into_tokens(&[]).is_none());
        assert!(parse(r#"{"access_token":""}"#).into_tokens(&[]).is_none());
    }

    #[test]
    fn debug_redacts_tokens() {
        let tokens = parse(r#"{"access_token":"secret-a","refresh_token":"secret-r"}"#)
            .into_tokens(&[])
            .unwrap();
        let dbg = format!("{:?}", tokens);
        assert!(!dbg.contains("secret"));
    }
}
