//! The chat-completion proxy path.
//!
//! Validates the inbound request, applies outbound transforms, strips
//! chat-metadata blocks, then either relays a streaming request opaquely
//! or drives the retry engine and maps its final outcome onto an HTTP
//! response.

use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::StreamExt;
use rebound_audit::RequestAudit;
use rebound_config::Config;
use rebound_engine::{FinalOutcome, RetryEngine, TransportFailure};
use rebound_transform::{chat_context, extract_from_messages, process_messages, process_response};
use rebound_upstream::UpstreamClient;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};
use uuid::Uuid;

use crate::state::AppState;

pub fn bad_request(message: &str) -> HttpResponse {
    HttpResponse::BadRequest().json(json!({"error": {"message": message}}))
}

/// Caller headers as plain pairs; values that are not valid UTF-8 are
/// dropped rather than mangled.
pub fn extract_headers(req: &HttpRequest) -> Vec<(String, String)> {
    req.headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

/// Short request ID for log correlation.
pub fn short_request_id() -> String {
    Uuid::new_v4().simple().to_string().chars().take(8).collect()
}

/// Assemble the engine from the active config's collaborators.
pub fn build_engine(config: &Config) -> RetryEngine {
    RetryEngine::new(
        config.retry_settings(),
        config.classifier(),
        config.hard_stop(),
        config.blank_detector(),
    )
}

pub async fn handle_chat(
    state: &AppState,
    active: &Config,
    req: &HttpRequest,
    body: web::Bytes,
) -> HttpResponse {
    let parsed: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => return bad_request("Invalid JSON in request body"),
    };
    if !parsed.is_object() {
        return bad_request("No JSON data provided");
    }
    let messages = match parsed.get("messages").and_then(|m| m.as_array()) {
        Some(messages) => messages.clone(),
        None => return bad_request("Missing required field: messages"),
    };

    let headers = extract_headers(req);
    let context = chat_context(&messages);

    // request-side transforms, then metadata stripping
    let transformed = process_messages(&messages, active.request_rules());
    let (_, cleaned) = extract_from_messages(&transformed);
    let mut outbound = parsed.clone();
    outbound["messages"] = Value::Array(cleaned);

    if parsed
        .get("stream")
        .and_then(|s| s.as_bool())
        .unwrap_or(false)
    {
        return stream_passthrough(state, active, &headers, &outbound).await;
    }

    let request_id = short_request_id();
    let start = Instant::now();
    info!(request_id = %request_id, "incoming chat completion request");

    let log_path = state.request_logger.start(
        &request_id,
        "/chat/completions",
        &outbound,
        &headers,
        context.as_ref(),
    );
    let audit = RequestAudit::new(state.request_logger.clone(), log_path.clone());

    let engine = build_engine(active);
    let timeout = active.target().timeout.map(Duration::from_secs);
    let upstream = Arc::new(
        UpstreamClient::new(
            state.client.clone(),
            active.target().url.clone(),
            active.target().apikey.clone(),
        )
        .with_timeout(timeout),
    );

    let headers_arc = Arc::new(headers);
    let body_arc = Arc::new(outbound);
    let result = engine
        .run(
            move |attempt| {
                let upstream = upstream.clone();
                let headers = headers_arc.clone();
                let body = body_arc.clone();
                async move {
                    let retry_count = (attempt > 0).then_some(attempt);
                    upstream
                        .send(reqwest::Method::POST, &headers, Some(&body), retry_count)
                        .await
                        .map_err(|e| TransportFailure(e.to_string()))
                }
            },
            &audit,
        )
        .await;

    let operation = context
        .as_ref()
        .map(|c| c.operation.clone())
        .unwrap_or_else(|| "chat".to_string());

    match result.outcome {
        FinalOutcome::Success { body } => {
            let response_body = process_response(&body, active.response_rules());
            if let Some(path) = &log_path {
                state
                    .request_logger
                    .complete(path, Some(&response_body), start.elapsed());
            }
            info!(
                request_id = %request_id,
                attempts = result.attempts.len(),
                duration_ms = start.elapsed().as_millis() as u64,
                "request succeeded"
            );
            HttpResponse::Ok().json(response_body)
        }
        FinalOutcome::UpstreamError { status, body } => {
            let message = body["error"]["message"]
                .as_str()
                .unwrap_or("upstream error")
                .to_string();
            state.error_logger.log_error(
                &operation,
                "forward_request",
                &message,
                Some(&body),
                context.as_ref(),
            );
            if let Some(path) = &log_path {
                state
                    .request_logger
                    .complete(path, Some(&body), start.elapsed());
            }
            error!(
                request_id = %request_id,
                status,
                attempts = result.attempts.len(),
                "request failed, relaying upstream error"
            );
            HttpResponse::build(StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY))
                .json(body)
        }
        FinalOutcome::HardStop { body } => {
            let message = body["error"]["message"]
                .as_str()
                .unwrap_or("hard stop")
                .to_string();
            state.error_logger.log_error(
                &operation,
                "hard_stop",
                &message,
                Some(&body),
                context.as_ref(),
            );
            if let Some(path) = &log_path {
                state
                    .request_logger
                    .complete(path, Some(&body), start.elapsed());
            }
            HttpResponse::Ok().json(body)
        }
    }
}

/// Relay a streaming request opaquely: one upstream call, no retries, no
/// classification, raw bytes back with the upstream status.
async fn stream_passthrough(
    state: &AppState,
    active: &Config,
    headers: &[(String, String)],
    outbound: &Value,
) -> HttpResponse {
    info!("streaming request, passing through without retries");

    let upstream = UpstreamClient::new(
        state.client.clone(),
        active.target().url.clone(),
        active.target().apikey.clone(),
    );
    let response = match upstream.send_streaming(headers, outbound).await {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "streaming request failed");
            return HttpResponse::BadGateway().json(json!({
                "error": {"message": e.to_string(), "type": "upstream_unreachable"}
            }));
        }
    };

    let status = StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("text/event-stream")
        .to_string();
    let stream = response
        .bytes_stream()
        .map(|chunk| chunk.map_err(|e| actix_web::error::ErrorInternalServerError(e.to_string())));

    HttpResponse::build(status)
        .content_type(content_type)
        .insert_header(("cache-control", "no-cache"))
        .streaming(stream)
}
