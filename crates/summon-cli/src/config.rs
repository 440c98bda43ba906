use std::path::PathBuf;
use std::time::Duration;

use summon_common::{Credentials, CredentialsError, Endpoint};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {key}={value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("cannot read trust anchor {}: {source}", .path.display())]
    TrustAnchor {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid credential payload: {0}")]
    Credentials(#[from] CredentialsError),
}

/// Static startup configuration, read from `SUMMON_*` variables.
///
/// Unset or empty variables take the default; anything else must parse.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: Endpoint,
    pub ca_cert: PathBuf,
    pub auth_info: String,
    pub input: PathBuf,
    pub poll_interval: Duration,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub launch_deadline: Option<Duration>,
    pub otlp_url: Option<String>,
    pub otlp_token: Option<String>,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format {other:?}, expected text or json")),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            endpoint: Endpoint::new(
                var("SUMMON_HOST").unwrap_or_else(|| "localhost".to_string()),
                parse(&lookup, "SUMMON_PORT")?.unwrap_or(52001),
            ),
            ca_cert: var("SUMMON_CA_CERT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("ca/private-server.crt")),
            auth_info: var("SUMMON_AUTH_INFO").unwrap_or_else(|| "{}".to_string()),
            input: var("SUMMON_INPUT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/test_image.jpg")),
            poll_interval: Duration::from_millis(
                parse(&lookup, "SUMMON_POLL_INTERVAL_MS")?.unwrap_or(2_000),
            ),
            connect_timeout: Duration::from_secs(
                parse(&lookup, "SUMMON_CONNECT_TIMEOUT_SECS")?.unwrap_or(10),
            ),
            request_timeout: Duration::from_secs(
                parse(&lookup, "SUMMON_REQUEST_TIMEOUT_SECS")?.unwrap_or(300),
            ),
            launch_deadline: parse(&lookup, "SUMMON_LAUNCH_DEADLINE_SECS")?
                .map(Duration::from_secs),
            otlp_url: var("SUMMON_OTLP_URL"),
            otlp_token: var("SUMMON_OTLP_TOKEN"),
            log_format: parse(&lookup, "SUMMON_LOG_FORMAT")?.unwrap_or(LogFormat::Text),
        })
    }

    /// Read the trust anchor and parse the credential payload.
    pub fn load_credentials(&self) -> Result<Credentials, ConfigError> {
        let trust_anchor =
            std::fs::read(&self.ca_cert).map_err(|source| ConfigError::TrustAnchor {
                path: self.ca_cert.clone(),
                source,
            })?;
        Ok(Credentials::from_json(&self.auth_info, trust_anchor)?)
    }
}

fn parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => {
            value
                .trim()
                .parse()
                .map(Some)
                .map_err(|e: T::Err| ConfigError::Invalid {
                    key,
                    reason: e.to_string(),
                    value,
                })
        }
        _ => Ok(None),
    }
}
