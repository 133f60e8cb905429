//! Actix Web HTTP surface.
//!
//! Routes:
//! - `POST /chat/completions` and `POST /{config}/chat/completions`
//! - `GET /models` and `GET /{config}/models`
//! - `GET /health`, `GET /health/detailed`
//!
//! A `/{config}` prefix resolves `config-{config}.yaml` for that request;
//! a missing file is a 404 with a `config_not_found` error body.

use actix_cors::Cors;
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use anyhow::{Context, Result};
use rebound_config::{load_for_route, Config, RouteConfigError};
use serde_json::json;
use tracing::{error, info};

use crate::forward::handle_chat;
use crate::models::handle_models;
use crate::state::AppState;

/// Route registration, shared between `serve` and the test harness.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/health/detailed", web::get().to(health_detailed))
        .route("/chat/completions", web::post().to(chat_default))
        .route("/models", web::get().to(models_default))
        .route("/{config_path}/chat/completions", web::post().to(chat_scoped))
        .route("/{config_path}/models", web::get().to(models_scoped));
}

pub async fn serve(config: Config, host: String, port: u16) -> Result<()> {
    let client = reqwest::Client::builder()
        .build()
        .context("failed to build reqwest client")?;

    let addr = format!("{}:{}", host, port);
    info!(
        addr = %addr,
        target = %config.target().url,
        request_logging = config.logging.enabled,
        error_logging = config.error_logging.enabled,
        "rebound proxy listening"
    );

    let state = web::Data::new(AppState::from_config(config, client));

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Cors::permissive())
            .configure(configure)
    })
    .bind(&addr)
    .with_context(|| format!("failed to bind {}", addr))?
    .run()
    .await
    .context("server error")?;

    Ok(())
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({"status": "healthy"}))
}

async fn health_detailed(state: web::Data<AppState>) -> HttpResponse {
    let eh = state.default_config.error_handling();
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "retry_config": {
            "max_retries": eh.max_retries,
            "base_delay": eh.base_delay,
            "max_delay": eh.max_delay,
        }
    }))
}

async fn chat_default(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> HttpResponse {
    let active = state.default_config.clone();
    handle_chat(&state, &active, &req, body).await
}

async fn chat_scoped(
    state: web::Data<AppState>,
    path: web::Path<String>,
    req: HttpRequest,
    body: web::Bytes,
) -> HttpResponse {
    let segment = path.into_inner();
    match resolve_route_config(&segment) {
        Ok(active) => handle_chat(&state, &active, &req, body).await,
        Err(response) => response,
    }
}

async fn models_default(state: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    let active = state.default_config.clone();
    handle_models(&state, &active, &req).await
}

async fn models_scoped(
    state: web::Data<AppState>,
    path: web::Path<String>,
    req: HttpRequest,
) -> HttpResponse {
    let segment = path.into_inner();
    match resolve_route_config(&segment) {
        Ok(active) => handle_models(&state, &active, &req).await,
        Err(response) => response,
    }
}

fn resolve_route_config(segment: &str) -> Result<Config, HttpResponse> {
    match load_for_route(segment) {
        Ok(config) => Ok(config),
        Err(RouteConfigError::NotFound { expected_file }) => {
            Err(HttpResponse::NotFound().json(json!({
                "error": {
                    "message": format!(
                        "Config file not found for path '{}': {}",
                        segment, expected_file
                    ),
                    "type": "config_not_found",
                    "config_path": segment,
                    "expected_file": expected_file,
                }
            })))
        }
        Err(RouteConfigError::Invalid(e)) => {
            error!(error = %e, config_path = %segment, "failed to load per-route config");
            Err(HttpResponse::InternalServerError()
                .json(json!({"error": {"message": e.to_string()}})))
        }
    }
}
