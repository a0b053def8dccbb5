use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 2048;
pub const DEFAULT_RETRY_BACKOFF_MS: [u64; 4] = [500, 1000, 2000, 4000];

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("GEMINI_API_KEY must be set when RELAY_MODE is live")]
    MissingApiKey,

    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Whether the relay talks to the upstream API or answers with canned text.
#[derive(Clone, PartialEq)]
pub enum RelayMode {
    Live { api_key: String },
    Mock,
}

impl fmt::Debug for RelayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayMode::Live { .. } => f.write_str("Live { api_key: <redacted> }"),
            RelayMode::Mock => f.write_str("Mock"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub mode: RelayMode,
    pub model: String,
    pub base_url: String,
    /// Character cap applied to user content; 0 disables it.
    pub max_input_chars: usize,
    pub max_output_tokens: u32,
    pub retry_schedule: Vec<Duration>,
    pub upstream_timeout: Option<Duration>,
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub max_json_bytes: usize,
    pub max_upload_bytes: usize,
    pub static_dir: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            mode: RelayMode::Mock,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            max_input_chars: 0,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            retry_schedule: DEFAULT_RETRY_BACKOFF_MS
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            upstream_timeout: None,
            host: "0.0.0.0".to_string(),
            port: 8002,
            workers: None,
            max_json_bytes: 256 * 1024,
            max_upload_bytes: 10 * 1024 * 1024,
            static_dir: "./static".to_string(),
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup. Unset and blank values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let mode = match get("RELAY_MODE").as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("live") => match get("GEMINI_API_KEY") {
                Some(api_key) => RelayMode::Live { api_key },
                None => return Err(ConfigError::MissingApiKey),
            },
            Some("mock") => RelayMode::Mock,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "RELAY_MODE",
                    value: other.to_string(),
                    reason: "expected `live` or `mock`".to_string(),
                })
            }
        };

        let retry_schedule = match get("RETRY_BACKOFF_MS") {
            Some(raw) => parse_schedule(&raw)?,
            None => defaults.retry_schedule,
        };

        Ok(Self {
            mode,
            model: get("GEMINI_MODEL").unwrap_or(defaults.model),
            base_url: get("GEMINI_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            max_input_chars: parse_var(&get, "MAX_INPUT_CHARS")?.unwrap_or(defaults.max_input_chars),
            max_output_tokens: parse_var(&get, "MAX_OUTPUT_TOKENS")?
                .unwrap_or(defaults.max_output_tokens),
            retry_schedule,
            upstream_timeout: parse_var::<u64, _>(&get, "UPSTREAM_TIMEOUT_SECS")?
                .map(Duration::from_secs),
            host: get("HOST").unwrap_or(defaults.host),
            port: parse_var(&get, "PORT")?.unwrap_or(defaults.port),
            workers: parse_var(&get, "WORKERS")?,
            max_json_bytes: parse_var(&get, "MAX_JSON_BYTES")?.unwrap_or(defaults.max_json_bytes),
            max_upload_bytes: parse_var(&get, "MAX_UPLOAD_BYTES")?
                .unwrap_or(defaults.max_upload_bytes),
            static_dir: get("STATIC_DIR").unwrap_or(defaults.static_dir),
        })
    }
}

fn parse_var<T, G>(get: &G, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(raw) => raw.parse::<T>().map(Some).map_err(|e| ConfigError::Invalid {
            var,
            value: raw,
            reason: e.to_string(),
        }),
        None => Ok(None),
    }
}

fn parse_schedule(raw: &str) -> Result<Vec<Duration>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|step| !step.is_empty())
        .map(|step| {
            step.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| ConfigError::Invalid {
                    var: "RETRY_BACKOFF_MS",
                    value: raw.to_string(),
                    reason: e.to_string(),
                })
        })
        .collect()
}
