//! The upstream HTTP client.

use crate::headers::{sanitize_headers_for_logging, should_forward};
use rebound_engine::RawResponse;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const USER_AGENT_VALUE: &str = concat!("rebound-proxy/", env!("CARGO_PKG_VERSION"));

/// A genuine transport failure. Non-2xx statuses are not errors here;
/// interpreting them belongs to the retry engine.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Client for forwarding requests to the configured target.
///
/// Holds a shared `reqwest::Client` (connection pooling, configured
/// timeout) plus the per-config target URL and optional API-key override.
pub struct UpstreamClient {
    client: reqwest::Client,
    target_url: String,
    api_key: Option<String>,
    timeout: Option<Duration>,
}

impl UpstreamClient {
    pub fn new(
        client: reqwest::Client,
        target_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            target_url: target_url.into().trim_end_matches('/').to_string(),
            api_key,
            timeout: None,
        }
    }

    /// Per-request timeout for non-streaming calls. Streaming responses
    /// are exempt; a whole-body timeout would kill long streams.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    /// Merge the three header sources in precedence order: built-in
    /// defaults, caller headers minus the deny-list, then the configured
    /// API key which replaces any forwarded Authorization.
    fn build_headers(&self, forwarded: &[(String, String)], retry_count: Option<u32>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        for (name, value) in forwarded {
            if !should_forward(name) {
                continue;
            }
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(parsed_name), Ok(parsed_value)) => {
                    headers.insert(parsed_name, parsed_value);
                }
                _ => {
                    warn!(header = %name, "dropping unrepresentable forwarded header");
                }
            }
        }

        if let Some(key) = &self.api_key {
            match HeaderValue::from_str(&format!("Bearer {}", key)) {
                Ok(value) => {
                    info!("using API key from config file (overriding incoming authorization)");
                    headers.insert(AUTHORIZATION, value);
                }
                Err(_) => warn!("configured API key is not a valid header value"),
            }
        }

        if let Some(count) = retry_count {
            headers.insert(
                HeaderName::from_static("x-retry-count"),
                HeaderValue::from(count),
            );
        }

        headers
    }

    /// Forward a request and return the raw response, whatever its status.
    pub async fn send(
        &self,
        method: reqwest::Method,
        forwarded: &[(String, String)],
        json_body: Option<&Value>,
        retry_count: Option<u32>,
    ) -> Result<RawResponse, UpstreamError> {
        let headers = self.build_headers(forwarded, retry_count);
        debug!(
            url = %self.target_url,
            method = %method,
            headers = ?sanitize_headers_for_logging(forwarded),
            "forwarding request upstream"
        );

        let mut request = self
            .client
            .request(method, &self.target_url)
            .headers(headers);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        if let Some(body) = json_body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!(status, bytes = body.len(), "upstream response received");

        Ok(RawResponse::new(status, body))
    }

    /// Forward a streaming request and return the raw response handle.
    ///
    /// Streaming responses bypass classification and retries entirely;
    /// the caller relays the byte stream as-is.
    pub async fn send_streaming(
        &self,
        forwarded: &[(String, String)],
        json_body: &Value,
    ) -> Result<reqwest::Response, UpstreamError> {
        let headers = self.build_headers(forwarded, None);
        debug!(url = %self.target_url, "forwarding streaming request upstream");
        let response = self
            .client
            .post(&self.target_url)
            .headers(headers)
            .json(json_body)
            .send()
            .await?;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_with_key(key: Option<&str>) -> UpstreamClient {
        UpstreamClient::new(
            reqwest::Client::new(),
            "http://upstream.test/v1/chat/completions",
            key.map(String::from),
        )
    }

    #[test]
    fn test_defaults_are_present() {
        let headers = client_with_key(None).build_headers(&[], None);
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(headers.get(USER_AGENT).unwrap(), USER_AGENT_VALUE);
    }

    #[test]
    fn test_deny_listed_headers_are_dropped() {
        let forwarded = vec![
            ("Host".to_string(), "client-host".to_string()),
            ("X-Forwarded-For".to_string(), "1.2.3.4".to_string()),
            ("X-Custom".to_string(), "kept".to_string()),
        ];
        let headers = client_with_key(None).build_headers(&forwarded, None);
        assert!(headers.get("host").is_none());
        assert!(headers.get("x-forwarded-for").is_none());
        assert_eq!(headers.get("x-custom").unwrap(), "kept");
    }

    #[test]
    fn test_config_api_key_overrides_forwarded_authorization() {
        let forwarded = vec![("Authorization".to_string(), "Bearer sk-caller".to_string())];
        let headers = client_with_key(Some("sk-config")).build_headers(&forwarded, None);
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer sk-config");
    }

    #[test]
    fn test_forwarded_authorization_survives_without_override() {
        let forwarded = vec![("Authorization".to_string(), "Bearer sk-caller".to_string())];
        let headers = client_with_key(None).build_headers(&forwarded, None);
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer sk-caller");
    }

    #[test]
    fn test_retry_count_header() {
        let headers = client_with_key(None).build_headers(&[], Some(2));
        assert_eq!(headers.get("x-retry-count").unwrap(), "2");
        let headers = client_with_key(None).build_headers(&[], None);
        assert!(headers.get("x-retry-count").is_none());
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let client = UpstreamClient::new(reqwest::Client::new(), "http://u.test/v1/", None);
        assert_eq!(client.target_url(), "http://u.test/v1");
    }
}
