//! Per-platform OAuth strategy table.
//!
//! Everything that differs between providers lives here as data plus one
//! profile normalizer per platform; the broker itself has no platform
//! branches.

use feedmerge_types::Platform;
use serde_json::Value;

use crate::identity::PlatformIdentity;

/// How the client authenticates at the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenAuth {
    /// `client_id` and `client_secret` in the form body.
    Body,
    /// HTTP Basic with the client credentials.
    Basic,
}

/// How a token is revoked on disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeStyle {
    /// `POST` with `token=<access token>` in the form body.
    FormPost,
    /// `DELETE` with `access_token` in the query.
    Delete,
}

#[derive(Debug)]
pub struct ProviderSpec {
    pub platform: Platform,
    pub auth_url: &'static str,
    pub token_url: &'static str,
    pub profile_url: &'static str,
    pub revoke_url: Option<&'static str>,
    pub revoke_style: RevokeStyle,
    pub scopes: &'static [&'static str],
    pub scope_separator: &'static str,
    pub extra_auth_params: &'static [(&'static str, &'static str)],
    pub profile_params: &'static [(&'static str, &'static str)],
    /// TikTok calls it `client_key`.
    pub client_id_param: &'static str,
    pub pkce: bool,
    pub token_auth: TokenAuth,
    /// Long-lived Facebook user tokens have no refresh grant.
    pub supports_refresh: bool,
    pub normalize: fn(&Value) -> Option<PlatformIdentity>,
}

impl ProviderSpec {
    pub fn scope_string(&self) -> String {
        self.scopes.join(self.scope_separator)
    }
}

static GOOGLE: ProviderSpec = ProviderSpec {
    platform: Platform::Google,
    auth_url: "https://accounts.google.com/o/oauth2/v2/auth",
    token_url: "https://oauth2.googleapis.com/token",
    profile_url: "https://people.googleapis.com/v1/people/me",
    revoke_url: Some("https://oauth2.googleapis.com/revoke"),
    revoke_style: RevokeStyle::FormPost,
    scopes: &[
        "openid",
        "email",
        "profile",
        "https://www.googleapis.com/auth/youtube.upload",
        "https://www.googleapis.com/auth/youtube.readonly",
    ],
    scope_separator: " ",
    extra_auth_params: &[("access_type", "offline"), ("prompt", "consent")],
    profile_params: &[("personFields", "names,emailAddresses,photos")],
    client_id_param: "client_id",
    pkce: false,
    token_auth: TokenAuth::Body,
    supports_refresh: true,
    normalize: normalize_google,
};

static FACEBOOK: ProviderSpec = ProviderSpec {
    platform: Platform::Facebook,
    auth_url: "https://www.facebook.com/v18.0/dialog/oauth",
    token_url: "https://graph.facebook.com/v18.0/oauth/access_token",
    profile_url: "https://graph.facebook.com/me",
    revoke_url: Some("https://graph.facebook.com/v18.0/me/permissions"),
    revoke_style: RevokeStyle::Delete,
    scopes: &["email", "public_profile"],
    scope_separator: ",",
    extra_auth_params: &[],
    profile_params: &[("fields", "id,name,email,picture.width(200).height(200)")],
    client_id_param: "client_id",
    pkce: false,
    token_auth: TokenAuth::Body,
    supports_refresh: false,
    normalize: normalize_facebook,
};

static TIKTOK: ProviderSpec = ProviderSpec {
    platform: Platform::TikTok,
    auth_url: "https://www.tiktok.com/v2/auth/authorize/",
    token_url: "https://open.tiktokapis.com/v2/oauth/token/",
    profile_url: "https://open.tiktokapis.com/v2/user/info/",
    revoke_url: None,
    revoke_style: RevokeStyle::FormPost,
    scopes: &["user.info.basic", "user.info.stats", "video.upload", "video.list"],
    scope_separator: ",",
    extra_auth_params: &[],
    profile_params: &[("fields", "open_id,union_id,avatar_url,display_name")],
    client_id_param: "client_key",
    pkce: false,
    token_auth: TokenAuth::Body,
    supports_refresh: true,
    normalize: normalize_tiktok,
};

static TWITTER: ProviderSpec = ProviderSpec {
    platform: Platform::Twitter,
    auth_url: "https://twitter.com/i/oauth2/authorize",
    token_url: "https://api.twitter.com/2/oauth2/token",
    profile_url: "https://api.twitter.com/2/users/me",
    revoke_url: None,
    revoke_style: RevokeStyle::FormPost,
    scopes: &["tweet.read", "tweet.write", "users.read", "offline.access"],
    scope_separator: " ",
    extra_auth_params: &[],
    profile_params: &[("user.fields", "profile_image_url")],
    client_id_param: "client_id",
    pkce: true,
    token_auth: TokenAuth::Basic,
    supports_refresh: true,
    normalize: normalize_twitter,
};

static LINKEDIN: ProviderSpec = ProviderSpec {
    platform: Platform::LinkedIn,
    auth_url: "https://www.linkedin.com/oauth/v2/authorization",
    token_url: "https://www.linkedin.com/oauth/v2/accessToken",
    profile_url: "https://api.linkedin.com/v2/userinfo",
    revoke_url: None,
    revoke_style: RevokeStyle::FormPost,
    scopes: &["openid", "profile", "email", "w_member_social"],
    scope_separator: " ",
    extra_auth_params: &[],
    profile_params: &[],
    client_id_param: "client_id",
    pkce: false,
    token_auth: TokenAuth::Body,
    supports_refresh: true,
    normalize: normalize_linkedin,
};

pub fn spec_for(platform: Platform) -> &'static ProviderSpec {
    match platform {
        Platform::Google => &GOOGLE,
        Platform::Facebook => &FACEBOOK,
        Platform::TikTok => &TIKTOK,
        Platform::Twitter => &TWITTER,
        Platform::LinkedIn => &LINKEDIN,
    }
}

fn str_at(value: &Value, pointer: &str) -> Option<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Google People API: `resourceName` is `people/<id>`.
fn normalize_google(profile: &Value) -> Option<PlatformIdentity> {
    let resource = str_at(profile, "/resourceName")?;
    let id = resource.strip_prefix("people/").unwrap_or(&resource).to_string();
    let email = str_at(profile, "/emailAddresses/0/value");
    Some(PlatformIdentity {
        platform_user_id: id,
        username: email.clone(),
        email,
        name: str_at(profile, "/names/0/displayName"),
        avatar_url: str_at(profile, "/photos/0/url"),
    })
}

fn normalize_facebook(profile: &Value) -> Option<PlatformIdentity> {
    let name = str_at(profile, "/name");
    let avatar_url = str_at(profile, "/picture/data/url").or_else(|| str_at(profile, "/picture"));
    Some(PlatformIdentity {
        platform_user_id: str_at(profile, "/id")?,
        username: name.clone(),
        email: str_at(profile, "/email"),
        name,
        avatar_url,
    })
}

/// TikTok nests the user under `data.user` and never shares an email.
fn normalize_tiktok(profile: &Value) -> Option<PlatformIdentity> {
    let user = profile.pointer("/data/user").unwrap_or(profile);
    let name = str_at(user, "/display_name");
    Some(PlatformIdentity {
        platform_user_id: str_at(user, "/open_id")?,
        username: name.clone(),
        email: None,
        name,
        avatar_url: str_at(user, "/avatar_url"),
    })
}

fn normalize_twitter(profile: &Value) -> Option<PlatformIdentity> {
    let data = profile.get("data")?;
    Some(PlatformIdentity {
        platform_user_id: str_at(data, "/id")?,
        username: str_at(data, "/username"),
        email: None,
        name: str_at(data, "/name"),
        avatar_url: str_at(data, "/profile_image_url"),
    })
}

/// LinkedIn OpenID userinfo.
fn normalize_linkedin(profile: &Value) -> Option<PlatformIdentity> {
    let email = str_at(profile, "/email");
    Some(PlatformIdentity {
        platform_user_id: str_at(profile, "/sub")?,
        username: email.clone(),
        email,
        name: str_at(profile, "/name"),
        avatar_url: str_at(profile, "/picture"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn google_profile() {
        let identity = normalize_google(&json!({
            "resourceName": "people/1234",
            "names": [{"displayName": "Ada Lovelace"}],
            "emailAddresses": [{"value": "ada@example.com"}],
            "photos": [{"url": "https://lh3/photo.jpg"}]
        }))
        .unwrap();
        assert_eq!(identity.platform_user_id, "1234");
        assert_eq!(identity.email.as_deref(), Some("ada@example.com"));
        assert_eq!(identity.name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(identity.avatar_url.as_deref(), Some("https://lh3/photo.jpg"));
    }

    #[test]
    fn facebook_profile_picture_variants() {
        let nested = normalize_facebook(&json!({
            "id": "fb1", "name": "Ada", "picture": {"data": {"url": "https://fb/p.jpg"}}
        }))
        .unwrap();
        assert_eq!(nested.avatar_url.as_deref(), Some("https://fb/p.jpg"));
        assert!(nested.email.is_none());

        let flat = normalize_facebook(&json!({"id": "fb1", "picture": "https://fb/q.jpg"})).unwrap();
        assert_eq!(flat.avatar_url.as_deref(), Some("https://fb/q.jpg"));
    }

    #[test]
    fn tiktok_profile_is_nested() {
        let identity = normalize_tiktok(&json!({
            "data": {"user": {"open_id": "tt-9", "display_name": "ada.tt", "avatar_url": "https://tt/a"}}
        }))
        .unwrap();
        assert_eq!(identity.platform_user_id, "tt-9");
        assert_eq!(identity.username.as_deref(), Some("ada.tt"));
        assert!(identity.email.is_none());
    }

    #[test]
    fn twitter_and_linkedin_profiles() {
        let tw = normalize_twitter(&json!({
            "data": {"id": "42", "name": "Ada", "username": "ada", "profile_image_url": "https://x/a"}
        }))
        .unwrap();
        assert_eq!(tw.platform_user_id, "42");
        assert_eq!(tw.username.as_deref(), Some("ada"));

        let li = normalize_linkedin(&json!({"sub": "li-7", "name": "Ada", "email": "ada@example.com"})).unwrap();
        assert_eq!(li.platform_user_id, "li-7");
        assert_eq!(li.email.as_deref(), Some("ada@example.com"));
    }

    #[test]
    fn profile_without_id_is_rejected() {
        assert!(normalize_google(&json!({"names": []})).is_none());
        assert!(normalize_facebook(&json!({"name": "x"})).is_none());
        assert!(normalize_tiktok(&json!({"data": {"user": {}}})).is_none());
        assert!(normalize_twitter(&json!({"errors": []})).is_none());
        assert!(normalize_linkedin(&json!({})).is_none());
    }

    #[test]
    fn only_twitter_uses_pkce_and_basic_auth() {
        for platform in Platform::ALL {
            let spec = spec_for(platform);
            assert_eq!(spec.platform, platform);
            assert_eq!(spec.pkce, platform == Platform::Twitter);
            assert_eq!(spec.token_auth == TokenAuth::Basic, platform == Platform::Twitter);
        }
        assert_eq!(spec_for(Platform::TikTok).client_id_param, "client_key");
        assert_eq!(spec_for(Platform::Facebook).scope_string(), "email,public_profile");
    }
}
