//! Startup configuration, read once from the environment.

use std::path::PathBuf;

use reqwest::Url;

use crate::backend::{BackendConfig, BackendError};
use crate::domain::{InvalidRouteId, RouteId};
use crate::feed::{InvalidMergePolicy, MergePolicy};

pub const ENV_URL: &str = "SUPABASE_URL";
pub const ENV_KEY: &str = "SUPABASE_ANON_KEY";
pub const ENV_ROUTE: &str = "STATION_FEED_ROUTE";
pub const ENV_MERGE: &str = "STATION_FEED_MERGE";
pub const ENV_MOCK_FILE: &str = "STATION_FEED_MOCK_FILE";

/// Route shown when none is configured.
pub const DEFAULT_ROUTE: RouteId = RouteId::new(1);

/// Errors in the startup configuration. None of these are recoverable.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("SUPABASE_URL {value:?} is invalid: {reason}")]
    InvalidUrl { value: String, reason: String },

    #[error("STATION_FEED_ROUTE: {0}")]
    InvalidRoute(#[from] InvalidRouteId),

    #[error("STATION_FEED_MERGE: {0}")]
    InvalidMergePolicy(#[from] InvalidMergePolicy),

    #[error("cannot load fixture: {0}")]
    Fixture(#[source] BackendError),
}

/// Where station rows come from.
#[derive(Debug, Clone)]
pub enum BackendSource {
    /// The hosted backend.
    Hosted(BackendConfig),
    /// A local JSON fixture, served by the mock backend.
    Fixture(PathBuf),
}

/// Everything the binary needs to start.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub source: BackendSource,
    pub route: RouteId,
    pub merge_policy: MergePolicy,
}

impl AppConfig {
    /// Read the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let route = match get(ENV_ROUTE) {
            Some(v) => v.parse()?,
            None => DEFAULT_ROUTE,
        };

        let merge_policy = match get(ENV_MERGE) {
            Some(v) => v.parse()?,
            None => MergePolicy::default(),
        };

        let source = match get(ENV_MOCK_FILE) {
            Some(path) => BackendSource::Fixture(PathBuf::from(path)),
            None => {
                let url = get(ENV_URL).ok_or(ConfigError::Missing(ENV_URL))?;
                let key = get(ENV_KEY).ok_or(ConfigError::Missing(ENV_KEY))?;
                BackendSource::Hosted(BackendConfig::new(parse_url(&url)?, key))
            }
        };

        Ok(Self {
            source,
            route,
            merge_policy,
        })
    }
}

fn parse_url(value: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidUrl {
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(value).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host"));
    }
    Ok(url)
}
