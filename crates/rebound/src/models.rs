//! The models-list proxy path.
//!
//! Forwards `GET /models` to the upstream through the same retry engine.
//! When the upstream cannot produce a list at all, a built-in fallback is
//! returned instead of an error so clients stay usable.

use actix_web::{HttpRequest, HttpResponse};
use rebound_config::Config;
use rebound_engine::{FinalOutcome, NoopAudit, TransportFailure};
use rebound_upstream::UpstreamClient;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::forward::{build_engine, extract_headers, short_request_id};
use crate::state::AppState;

/// `/models` URL derived from the configured chat-completions target.
pub fn derive_models_url(target_url: &str) -> String {
    let base = target_url.trim_end_matches('/');
    let base = base.strip_suffix("/chat/completions").unwrap_or(base);
    format!("{}/models", base)
}

fn fallback_models() -> Value {
    json!({
        "object": "list",
        "data": [
            {"id": "gpt-4o", "object": "model", "owned_by": "fallback"},
            {"id": "gpt-4o-mini", "object": "model", "owned_by": "fallback"},
            {"id": "gpt-4-turbo", "object": "model", "owned_by": "fallback"},
            {"id": "gpt-3.5-turbo", "object": "model", "owned_by": "fallback"},
        ]
    })
}

pub async fn handle_models(state: &AppState, active: &Config, req: &HttpRequest) -> HttpResponse {
    let headers = extract_headers(req);
    let request_id = short_request_id();
    let models_url = derive_models_url(&active.target().url);

    let engine = build_engine(active);
    let timeout = active.target().timeout.map(Duration::from_secs);
    let upstream = Arc::new(
        UpstreamClient::new(
            state.client.clone(),
            models_url,
            active.target().apikey.clone(),
        )
        .with_timeout(timeout),
    );

    let headers_arc = Arc::new(headers.clone());
    let result = engine
        .run(
            move |attempt| {
                let upstream = upstream.clone();
                let headers = headers_arc.clone();
                async move {
                    let retry_count = (attempt > 0).then_some(attempt);
                    upstream
                        .send(reqwest::Method::GET, &headers, None, retry_count)
                        .await
                        .map_err(|e| TransportFailure(e.to_string()))
                }
            },
            &NoopAudit,
        )
        .await;

    match result.outcome {
        FinalOutcome::Success { body } => {
            state
                .request_logger
                .log_models_request(&request_id, &headers, Some(&body), None, None);
            HttpResponse::Ok().json(body)
        }
        FinalOutcome::UpstreamError { status, body } => {
            let message = body["error"]["message"]
                .as_str()
                .unwrap_or("upstream error")
                .to_string();
            state
                .request_logger
                .log_models_request(&request_id, &headers, None, Some(&message), None);
            state
                .error_logger
                .log_error("models", "models_request", &message, Some(&body), None);
            warn!(status, "models request failed, returning fallback list");
            HttpResponse::Ok().json(fallback_models())
        }
        FinalOutcome::HardStop { body } => {
            let message = body["error"]["message"]
                .as_str()
                .unwrap_or("hard stop")
                .to_string();
            state
                .request_logger
                .log_models_request(&request_id, &headers, None, Some(&message), None);
            warn!("models request hard-stopped, returning fallback list");
            HttpResponse::Ok().json(fallback_models())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_models_url_strips_completions_suffix() {
        assert_eq!(
            derive_models_url("https://u.test/v1/chat/completions"),
            "https://u.test/v1/models"
        );
        assert_eq!(
            derive_models_url("https://u.test/v1/chat/completions/"),
            "https://u.test/v1/models"
        );
    }

    #[test]
    fn test_derive_models_url_plain_base() {
        assert_eq!(derive_models_url("https://u.test/v1"), "https://u.test/v1/models");
    }

    #[test]
    fn test_fallback_models_shape() {
        let fallback = fallback_models();
        assert_eq!(fallback["object"], "list");
        assert!(fallback["data"].as_array().unwrap().len() >= 3);
    }
}
