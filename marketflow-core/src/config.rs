//! Application configuration: TOML file plus API key discovery.
//!
//! Every field has a default, so `AppConfig::default()` works without a file.
//!
//! ```toml
//! [source]
//! sandbox = true
//! http_timeout_secs = 30
//! max_retries = 3
//!
//! [aggregate]
//! timeout_secs = 120
//! default_limit = 500
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Production REST endpoint of CoinAPI.
pub const COINAPI_URL: &str = "https://rest.coinapi.io/v1/";
/// Sandbox REST endpoint of CoinAPI.
pub const COINAPI_SANDBOX_URL: &str = "https://rest-sandbox.coinapi.io/v1/";

/// Primary environment variable holding the API key.
pub const API_KEY_VAR: &str = "MARKETFLOW_API_KEY";
/// Source-specific fallback variable.
pub const COINAPI_KEY_VAR: &str = "COINAPI_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("no API key provided: pass --api-key or set MARKETFLOW_API_KEY (or COINAPI_KEY)")]
    MissingApiKey,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub aggregate: AggregateConfig,
}

/// Remote source connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Overrides the endpoint chosen by `sandbox`.
    pub base_url: Option<String>,
    pub sandbox: bool,
    pub http_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub breaker_cooldown_secs: u64,
    pub breaker_threshold: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            sandbox: false,
            http_timeout_secs: 30,
            max_retries: 3,
            retry_base_delay_ms: 500,
            breaker_cooldown_secs: 30 * 60,
            breaker_threshold: 3,
        }
    }
}

impl SourceConfig {
    /// Base URL, always ending with `/`.
    pub fn endpoint(&self) -> String {
        let url = match &self.base_url {
            Some(url) => url.as_str(),
            None if self.sandbox => COINAPI_SANDBOX_URL,
            None => COINAPI_URL,
        };
        if url.ends_with('/') {
            url.to_string()
        } else {
            format!("{url}/")
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.breaker_cooldown_secs)
    }
}

/// Defaults for the aggregate operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateConfig {
    pub timeout_secs: u64,
    pub default_output: PathBuf,
    pub default_limit: usize,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            default_output: PathBuf::from("./MarketFlowDataset.dat"),
            default_limit: 100,
        }
    }
}

impl AggregateConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl AppConfig {
    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text, path)
    }

    /// Load `path` if given, otherwise use the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

/// Pick the API key: the explicit value first, then the environment.
pub fn resolve_api_key(explicit: Option<&str>) -> Result<String, ConfigError> {
    resolve_api_key_from(explicit, std::env::vars())
}

/// Environment lookup order: `MARKETFLOW_API_KEY`, any variable named like
/// `marketflow[_-]api[_-]key` in any case, `COINAPI_KEY`, then any
/// `coinapi[_-]key` variant. Empty values are ignored.
pub fn resolve_api_key_from<I>(explicit: Option<&str>, vars: I) -> Result<String, ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    if let Some(key) = explicit.map(str::trim).filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }

    let vars: Vec<(String, String)> = vars
        .into_iter()
        .filter(|(_, value)| !value.trim().is_empty())
        .collect();
    let exact = |name: &str| {
        vars.iter()
            .find(|(var, _)| var == name)
            .map(|(_, value)| value.trim().to_string())
    };
    let loose = |words: &[&str]| {
        vars.iter()
            .find(|(var, _)| matches_words(var, words))
            .map(|(_, value)| value.trim().to_string())
    };

    exact(API_KEY_VAR)
        .or_else(|| loose(&["marketflow", "api", "key"]))
        .or_else(|| exact(COINAPI_KEY_VAR))
        .or_else(|| loose(&["coinapi", "key"]))
        .ok_or(ConfigError::MissingApiKey)
}

/// `name` is `words` joined by `_` or `-`, compared case-insensitively.
fn matches_words(name: &str, words: &[&str]) -> bool {
    let parts: Vec<&str> = name.split(['_', '-']).collect();
    parts.len() == words.len()
        && parts
            .iter()
            .zip(words)
            .all(|(part, word)| part.eq_ignore_ascii_case(word))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_are_usable() {
        let config = AppConfig::default();
        assert_eq!(config.source.endpoint(), COINAPI_URL);
        assert_eq!(config.aggregate.timeout(), Duration::from_secs(60));
        assert_eq!(config.aggregate.default_output, PathBuf::from("./MarketFlowDataset.dat"));
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config = AppConfig::from_toml_str(
            "[source]\nsandbox = true\n\n[aggregate]\ndefault_limit = 250\n",
            Path::new("test.toml"),
        )
        .unwrap();
        assert_eq!(config.source.endpoint(), COINAPI_SANDBOX_URL);
        assert_eq!(config.source.max_retries, 3);
        assert_eq!(config.aggregate.default_limit, 250);
        assert_eq!(config.aggregate.timeout_secs, 60);
    }

    #[test]
    fn invalid_toml_reports_path() {
        let err = AppConfig::from_toml_str("[source\n", Path::new("broken.toml")).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn base_url_gets_trailing_slash() {
        let source = SourceConfig {
            base_url: Some("http://localhost:8080/v1".into()),
            ..SourceConfig::default()
        };
        assert_eq!(source.endpoint(), "http://localhost:8080/v1/");
    }

    #[test]
    fn explicit_key_wins() {
        let key = resolve_api_key_from(Some("abc"), vars(&[(API_KEY_VAR, "env")])).unwrap();
        assert_eq!(key, "abc");
    }

    #[test]
    fn env_lookup_order() {
        let env = vars(&[
            ("coinapi-key", "loose-coinapi"),
            ("COINAPI_KEY", "coinapi"),
            ("MarketFlow-Api_Key", "loose"),
        ]);
        assert_eq!(resolve_api_key_from(None, env.clone()).unwrap(), "loose");

        let mut with_exact = env;
        with_exact.push((API_KEY_VAR.into(), "exact".into()));
        assert_eq!(resolve_api_key_from(None, with_exact).unwrap(), "exact");

        let only_coinapi = vars(&[("coinapi-key", "loose-coinapi"), ("COINAPI_KEY", "coinapi")]);
        assert_eq!(resolve_api_key_from(None, only_coinapi).unwrap(), "coinapi");
    }

    #[test]
    fn blank_values_are_ignored() {
        let err = resolve_api_key_from(Some("  "), vars(&[(API_KEY_VAR, "")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingApiKey));
    }
}
