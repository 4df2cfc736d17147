//! Client configuration.
//!
//! A [`ClientConfig`] is plain data and can be read from JSON (camelCase keys,
//! every field optional). Capabilities such as the engine, the cache store and the
//! HTTP fetcher are not configuration; they are handed to the
//! [`DecisionClientBuilder`](crate::DecisionClientBuilder).

use crate::datafile::DatafileSource;
use crate::error::ClientError;
use crate::model::Datafile;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_CACHE_KEY: &str = "optly_fs_datafile";
pub const DEFAULT_DATAFILE_URL_TEMPLATE: &str = "https://cdn.optimizely.com/datafiles/{sdk_key}.json";
pub const SDK_KEY_PLACEHOLDER: &str = "{sdk_key}";
pub const DEFAULT_MAX_CACHE_AGE_MS: u64 = 7 * 24 * 60 * 60 * 1000;
pub const DEFAULT_ON_READY_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MAX_PENDING_CALLS: usize = 1000;

/// What a cached datafile older than the maximum age is good for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StaleCachePolicy {
    /// Serve it as the initial datafile and count the client as configured while
    /// the refresh runs.
    #[default]
    ServeStale,
    /// Ignore it; the client is configured once the refresh completes.
    AwaitRefresh,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// Datafile supplied inline. Takes precedence over every remote source.
    pub datafile: Option<serde_json::Value>,
    /// Explicit datafile location. Takes precedence over `sdk_key`.
    pub datafile_url: Option<String>,
    pub sdk_key: Option<String>,
    /// Key of the cached datafile in the durable store.
    pub cache_key: String,
    /// URL used for `sdk_key`; `{sdk_key}` is substituted.
    pub datafile_url_template: String,
    pub stale_cache_policy: StaleCachePolicy,
    pub max_cache_age_ms: u64,
    /// Default timeout of `on_ready`.
    pub on_ready_timeout_ms: u64,
    /// Timeout of the datafile request made by the default fetcher.
    pub request_timeout_ms: u64,
    /// Calls queued before readiness beyond this many are dropped.
    pub max_pending_calls: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            datafile: None,
            datafile_url: None,
            sdk_key: None,
            cache_key: DEFAULT_CACHE_KEY.to_string(),
            datafile_url_template: DEFAULT_DATAFILE_URL_TEMPLATE.to_string(),
            stale_cache_policy: StaleCachePolicy::default(),
            max_cache_age_ms: DEFAULT_MAX_CACHE_AGE_MS,
            on_ready_timeout_ms: DEFAULT_ON_READY_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            max_pending_calls: DEFAULT_MAX_PENDING_CALLS,
        }
    }
}

/// Where the initial datafile comes from, after precedence has been applied.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ConfiguredSource {
    Provided(Datafile),
    Remote { source: DatafileSource, url: String },
}

impl ClientConfig {
    pub fn with_datafile(datafile: serde_json::Value) -> Self {
        Self {
            datafile: Some(datafile),
            ..Self::default()
        }
    }

    pub fn with_sdk_key(sdk_key: impl Into<String>) -> Self {
        Self {
            sdk_key: Some(sdk_key.into()),
            ..Self::default()
        }
    }

    pub fn with_datafile_url(url: impl Into<String>) -> Self {
        Self {
            datafile_url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ClientError> {
        serde_json::from_str(json).map_err(|e| ClientError::InvalidConfig(e.to_string()))
    }

    pub fn on_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.on_ready_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Applies source precedence: inline datafile, then URL, then SDK key.
    pub(crate) fn source(&self) -> Result<ConfiguredSource, ClientError> {
        if let Some(datafile) = &self.datafile {
            return Ok(ConfiguredSource::Provided(Datafile::new(datafile.clone())));
        }

        let source = match (&self.datafile_url, &self.sdk_key) {
            (Some(url), _) => DatafileSource::Url(url.clone()),
            (None, Some(sdk_key)) => DatafileSource::SdkKey(sdk_key.clone()),
            (None, None) => return Err(ClientError::ConfigurationMissing),
        };

        if self.cache_key.is_empty() {
            return Err(ClientError::InvalidConfig("cacheKey must not be empty".into()));
        }
        if matches!(source, DatafileSource::SdkKey(_))
            && !self.datafile_url_template.contains(SDK_KEY_PLACEHOLDER)
        {
            return Err(ClientError::InvalidConfig(format!(
                "datafileUrlTemplate must contain {}",
                SDK_KEY_PLACEHOLDER
            )));
        }

        let url = source.url(&self.datafile_url_template);
        Ok(ConfiguredSource::Remote { source, url })
    }
}
