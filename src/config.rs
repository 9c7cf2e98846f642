//! The configuration surface read at (re)configuration time.
//!
//! Loading configuration is left to the application; this module only
//! describes its shape and turns it into validated engine settings.

use crate::request::CachePolicy;
use crate::retry::RetryStrategy;
use crate::transport::Timeouts;
use crate::{Error, Result};
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

/// Engine configuration.
///
/// Every field has a default, so partial documents deserialize.
///
/// # Examples
///
/// ```
/// use convoy::ClientConfig;
///
/// let config = ClientConfig::from_json(r#"{
///     "base_url": "https://api.example.com/v1",
///     "receive_timeout_ms": 5000,
///     "cache_enabled": true,
///     "retry_count": 2
/// }"#).unwrap();
///
/// assert_eq!(config.receive_timeout_ms, 5000);
/// assert_eq!(config.connect_timeout_ms, 10_000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base target every relative request path is resolved against.
    pub base_url: Option<String>,
    pub connect_timeout_ms: u64,
    pub send_timeout_ms: u64,
    pub receive_timeout_ms: u64,
    pub default_headers: BTreeMap<String, String>,
    /// Whether requests without their own cache policy are cached.
    pub cache_enabled: bool,
    pub cache_ttl_secs: u64,
    /// Retries after the first attempt. Zero disables retrying.
    pub retry_count: usize,
    pub retry_delay_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            connect_timeout_ms: 10_000,
            send_timeout_ms: 30_000,
            receive_timeout_ms: 30_000,
            default_headers: BTreeMap::new(),
            cache_enabled: false,
            cache_ttl_secs: 300,
            retry_count: 0,
            retry_delay_ms: 1_000,
        }
    }
}

impl ClientConfig {
    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the document is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::configuration(format!("Invalid client configuration: {}", e)))
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            connect: Duration::from_millis(self.connect_timeout_ms),
            send: Duration::from_millis(self.send_timeout_ms),
            receive: Duration::from_millis(self.receive_timeout_ms),
        }
    }

    pub fn cache_policy(&self) -> CachePolicy {
        if self.cache_enabled {
            CachePolicy::enabled(Duration::from_secs(self.cache_ttl_secs))
        } else {
            CachePolicy {
                ttl: Duration::from_secs(self.cache_ttl_secs),
                ..CachePolicy::disabled()
            }
        }
    }

    pub fn retry_strategy(&self) -> RetryStrategy {
        if self.retry_count == 0 {
            RetryStrategy::None
        } else {
            RetryStrategy::Linear {
                delay: Duration::from_millis(self.retry_delay_ms),
                max_retries: self.retry_count,
            }
        }
    }
}

/// Validated settings the engine reads on every call.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub base_url: Option<Url>,
    pub default_headers: HeaderMap,
    pub timeouts: Timeouts,
    pub cache: CachePolicy,
    pub retry_strategy: RetryStrategy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: None,
            default_headers: HeaderMap::new(),
            timeouts: Timeouts::default(),
            cache: CachePolicy::disabled(),
            retry_strategy: RetryStrategy::None,
        }
    }
}

impl Settings {
    pub(crate) fn from_config(config: &ClientConfig) -> Result<Self> {
        let base_url = config.base_url.as_deref().map(Url::parse).transpose()?;

        let mut default_headers = HeaderMap::new();
        for (name, value) in &config.default_headers {
            let (name, value) = parse_header(name, value)?;
            default_headers.insert(name, value);
        }

        Ok(Self {
            base_url,
            default_headers,
            timeouts: config.timeouts(),
            cache: config.cache_policy(),
            retry_strategy: config.retry_strategy(),
        })
    }
}

pub(crate) fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let name = HeaderName::try_from(name)
        .map_err(|e| Error::configuration(format!("Invalid header name: {}", e)))?;
    let value = HeaderValue::try_from(value)
        .map_err(|e| Error::configuration(format!("Invalid header value: {}", e)))?;
    Ok((name, value))
}
