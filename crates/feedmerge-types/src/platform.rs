use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// External social networks a user can connect and publish to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Google,
    Facebook,
    TikTok,
    Twitter,
    LinkedIn,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unsupported platform: {0}")]
pub struct UnknownPlatform(pub String);

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::Google,
        Platform::Facebook,
        Platform::TikTok,
        Platform::Twitter,
        Platform::LinkedIn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Google => "google",
            Platform::Facebook => "facebook",
            Platform::TikTok => "tiktok",
            Platform::Twitter => "twitter",
            Platform::LinkedIn => "linkedin",
        }
    }

    /// Upper-case form used in environment variable names.
    pub fn env_key(&self) -> &'static str {
        match self {
            Platform::Google => "GOOGLE",
            Platform::Facebook => "FACEBOOK",
            Platform::TikTok => "TIKTOK",
            Platform::Twitter => "TWITTER",
            Platform::LinkedIn => "LINKEDIN",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| UnknownPlatform(s.to_string()))
    }
}
