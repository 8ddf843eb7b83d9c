//! REST query client for the hosted station table.

use reqwest::StatusCode;
use reqwest::Url;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};

use crate::domain::{RouteId, Station};

use super::error::{BackendError, PostgrestError};
use super::{ROUTE_COLUMN, STATIONS_TABLE};

/// Default request timeout.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default interval between realtime heartbeats.
const DEFAULT_HEARTBEAT_SECS: u64 = 25;

/// Default time allowed for a channel join to be acknowledged.
const DEFAULT_JOIN_TIMEOUT_SECS: u64 = 10;

/// Connection settings for the hosted backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Project base URL, e.g. `https://abc.supabase.co`
    pub url: Url,
    /// Access key, sent as both `apikey` and bearer token
    pub api_key: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Realtime heartbeat interval in seconds
    pub heartbeat_secs: u64,
    /// Realtime join acknowledgement timeout in seconds
    pub join_timeout_secs: u64,
}

impl BackendConfig {
    /// Create a config with default timeouts.
    pub fn new(url: Url, api_key: impl Into<String>) -> Self {
        Self {
            url,
            api_key: api_key.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            heartbeat_secs: DEFAULT_HEARTBEAT_SECS,
            join_timeout_secs: DEFAULT_JOIN_TIMEOUT_SECS,
        }
    }

    /// Set request timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set realtime heartbeat interval.
    pub fn with_heartbeat(mut self, secs: u64) -> Self {
        self.heartbeat_secs = secs;
        self
    }

    /// Base URL without a trailing slash.
    pub(crate) fn base(&self) -> &str {
        self.url.as_str().trim_end_matches('/')
    }
}

/// Client for the REST query endpoint.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
}

impl RestClient {
    /// Create a new REST client.
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let invalid_key = |_| BackendError::Api {
            status: 0,
            message: "Invalid API key format".to_string(),
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("apikey"),
            HeaderValue::from_str(&config.api_key).map_err(invalid_key)?,
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", config.api_key)).map_err(invalid_key)?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base().to_string(),
        })
    }

    /// Fetch all stations on a route, highest identifier first.
    pub async fn fetch_stations(&self, route: RouteId) -> Result<Vec<Station>, BackendError> {
        let url = format!("{}/rest/v1/{}", self.base_url, STATIONS_TABLE);

        let response = self
            .http
            .get(&url)
            .query(&station_query(route))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        decode_rows(status, &body)
    }
}

/// Query parameters selecting a route's stations, ordered by id descending.
fn station_query(route: RouteId) -> [(&'static str, String); 3] {
    [
        ("select", "*".to_string()),
        (ROUTE_COLUMN, format!("eq.{route}")),
        ("order", "id.desc".to_string()),
    ]
}

/// Turn a query response into rows or a typed error.
fn decode_rows(status: StatusCode, body: &str) -> Result<Vec<Station>, BackendError> {
    if !status.is_success() {
        // Prefer the structured body; it carries the message users should see.
        if let Ok(err) = serde_json::from_str::<PostgrestError>(body) {
            return Err(BackendError::Query(err));
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(BackendError::Unauthorized);
        }
        return Err(BackendError::Api {
            status: status.as_u16(),
            message: body.to_string(),
        });
    }

    serde_json::from_str(body).map_err(|e| BackendError::json(e, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BackendConfig {
        BackendConfig::new(Url::parse("https://example.supabase.co").unwrap(), "anon-key")
    }

    #[test]
    fn config_defaults() {
        let config = config();
        assert_eq!(config.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(config.heartbeat_secs, DEFAULT_HEARTBEAT_SECS);
        assert_eq!(config.join_timeout_secs, DEFAULT_JOIN_TIMEOUT_SECS);
        assert_eq!(config.base(), "https://example.supabase.co");
    }

    #[test]
    fn config_builder() {
        let config = config().with_timeout(5).with_heartbeat(10);
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.heartbeat_secs, 10);
    }

    #[test]
    fn client_creation() {
        assert!(RestClient::new(&config()).is_ok());
    }

    #[test]
    fn client_rejects_unprintable_key() {
        let config = BackendConfig::new(Url::parse("https://example.supabase.co").unwrap(), "bad\nkey");
        assert!(matches!(
            RestClient::new(&config),
            Err(BackendError::Api { status: 0, .. })
        ));
    }

    #[test]
    fn query_filters_route_and_orders_descending() {
        let query = station_query(RouteId::new(1));
        assert_eq!(query[0], ("select", "*".to_string()));
        assert_eq!(query[1], ("ruta", "eq.1".to_string()));
        assert_eq!(query[2], ("order", "id.desc".to_string()));
    }

    #[test]
    fn decode_success_keeps_backend_order() {
        let body = r#"[
            {"id":3,"estacion":"A","estado":"on-time","eta":4,"ruta":1},
            {"id":1,"estacion":"B","estado":"delayed","eta":12,"ruta":1}
        ]"#;
        let rows = decode_rows(StatusCode::OK, body).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], Station::new(3, "A", "on-time", 4.0));
        assert_eq!(rows[1], Station::new(1, "B", "delayed", 12.0));
    }

    #[test]
    fn decode_empty_result() {
        assert!(decode_rows(StatusCode::OK, "[]").unwrap().is_empty());
    }

    #[test]
    fn decode_structured_error() {
        let body = r#"{"code":"PGRST100","details":"unexpected \"x\"","hint":null,"message":"failed to parse filter"}"#;
        match decode_rows(StatusCode::BAD_REQUEST, body) {
            Err(BackendError::Query(err)) => {
                assert_eq!(err.message, "failed to parse filter");
                assert_eq!(err.code.as_deref(), Some("PGRST100"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn decode_unauthorized_without_body() {
        assert!(matches!(
            decode_rows(StatusCode::UNAUTHORIZED, ""),
            Err(BackendError::Unauthorized)
        ));
    }

    #[test]
    fn decode_plain_error() {
        match decode_rows(StatusCode::BAD_GATEWAY, "upstream down") {
            Err(BackendError::Api { status, message }) => {
                assert_eq!(status, 502);
                assert_eq!(message, "upstream down");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn decode_malformed_rows() {
        assert!(matches!(
            decode_rows(StatusCode::OK, r#"[{"id":"x"}]"#),
            Err(BackendError::Json { .. })
        ));
    }
}
