use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use feedmerge_api::uploads::ObjectStorage;
use feedmerge_oauth::{BrokerConfig, ClientCredentials};
use feedmerge_scheduler::SchedulerConfig;
use feedmerge_types::Platform;
use thiserror::Error;

/// JWT secrets that must never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "your-secret-key-here",
];

const DEFAULT_REDIRECT_URI: &str = "com.feedmerge.app://oauth/callback";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("{0} is still a placeholder value")]
    Placeholder(&'static str),

    #[error("{key} has an invalid value '{value}'")]
    Invalid { key: String, value: String },
}

/// Everything the server reads from the environment, parsed once at startup.
#[derive(Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    /// Base64 AES-256 key for platform tokens at rest.
    pub token_encryption_key: String,
    pub access_token_ttl: chrono::Duration,
    pub refresh_token_ttl: chrono::Duration,
    pub broker: BrokerConfig,
    pub scheduler: SchedulerConfig,
    pub http_timeout: Duration,
    pub storage: Option<ObjectStorage>,
    pub cleanup_interval_secs: u64,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let jwt_secret = var("FEEDMERGE_JWT_SECRET").ok_or(ConfigError::Missing("FEEDMERGE_JWT_SECRET"))?;
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            return Err(ConfigError::Placeholder("FEEDMERGE_JWT_SECRET"));
        }
        let token_encryption_key = var("FEEDMERGE_TOKEN_ENCRYPTION_KEY")
            .ok_or(ConfigError::Missing("FEEDMERGE_TOKEN_ENCRYPTION_KEY"))?;

        let http_timeout = Duration::from_secs(parse_or(&var, "FEEDMERGE_HTTP_TIMEOUT_SECS", 20)?);

        let default_redirect = var("FEEDMERGE_OAUTH_REDIRECT_URI").unwrap_or_else(|| DEFAULT_REDIRECT_URI.into());
        let mut broker = BrokerConfig {
            http_timeout,
            ..BrokerConfig::default()
        };
        for platform in Platform::ALL {
            let key = platform.env_key();
            let id = var(&format!("FEEDMERGE_{}_CLIENT_ID", key));
            let secret = var(&format!("FEEDMERGE_{}_CLIENT_SECRET", key));
            if let (Some(client_id), Some(client_secret)) = (id, secret) {
                let redirect_uri =
                    var(&format!("FEEDMERGE_{}_REDIRECT_URI", key)).unwrap_or_else(|| default_redirect.clone());
                broker = broker.with_credentials(
                    platform,
                    ClientCredentials {
                        client_id,
                        client_secret,
                        redirect_uri,
                    },
                );
            }
        }

        let scheduler = SchedulerConfig {
            scan_interval: Duration::from_secs(parse_or(&var, "FEEDMERGE_SCAN_INTERVAL_SECS", 60)?.max(1)),
            max_attempts: parse_or(&var, "FEEDMERGE_PUBLISH_MAX_ATTEMPTS", 3)?.max(1),
            workers: parse_or(&var, "FEEDMERGE_PUBLISH_WORKERS", 8)?.max(1),
            ..SchedulerConfig::default()
        };

        let storage = match (
            var("FEEDMERGE_S3_BUCKET"),
            var("FEEDMERGE_S3_ACCESS_KEY_ID"),
            var("FEEDMERGE_S3_SECRET_ACCESS_KEY"),
        ) {
            (Some(bucket), Some(access_key_id), Some(secret_access_key)) => Some(ObjectStorage {
                bucket,
                region: var("FEEDMERGE_S3_REGION").unwrap_or_else(|| "us-east-1".into()),
                access_key_id,
                secret_access_key,
                endpoint: var("FEEDMERGE_S3_ENDPOINT"),
            }),
            _ => None,
        };

        Ok(Self {
            host: var("FEEDMERGE_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&var, "FEEDMERGE_PORT", 3000)?,
            db_path: var("FEEDMERGE_DB_PATH").unwrap_or_else(|| "feedmerge.db".into()).into(),
            jwt_secret,
            token_encryption_key,
            access_token_ttl: chrono::Duration::minutes(parse_or(&var, "FEEDMERGE_ACCESS_TOKEN_MINUTES", 30)?),
            refresh_token_ttl: chrono::Duration::days(parse_or(&var, "FEEDMERGE_REFRESH_TOKEN_DAYS", 30)?),
            broker,
            scheduler,
            http_timeout,
            storage,
            cleanup_interval_secs: 3600,
        })
    }
}

fn parse_or<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ConfigError> {
    match var(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value: raw,
        }),
    }
}
