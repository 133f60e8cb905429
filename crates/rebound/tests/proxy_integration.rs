//! End-to-end tests: Actix service in front of a mock upstream.

use actix_web::{test, web, App};
use rebound::server::configure;
use rebound::state::AppState;
use rebound_config::Config;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(upstream_uri: &str, extra: &str) -> Config {
    let yaml = format!(
        r#"
target_proxy:
  url: "{}/chat/completions"
error_handling:
  max_retries: 3
  base_delay: 0.01
  max_delay: 0.05
{}
"#,
        upstream_uri, extra
    );
    serde_yaml_ng::from_str(&yaml).expect("test config must parse")
}

fn app_state(config: Config) -> web::Data<AppState> {
    web::Data::new(AppState::from_config(config, reqwest::Client::new()))
}

fn completion_body(content: &str) -> Value {
    json!({
        "object": "chat.completion",
        "choices": [{
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop",
            "index": 0
        }]
    })
}

fn chat_request() -> Value {
    json!({"messages": [{"role": "user", "content": "hi"}]})
}

#[actix_web::test]
async fn test_success_body_passes_through_unchanged() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("Hello there.")))
        .mount(&server)
        .await;

    let state = app_state(test_config(&server.uri(), ""));
    let app = test::init_service(App::new().app_data(state).configure(configure)).await;

    let req = test::TestRequest::post()
        .uri("/chat/completions")
        .set_json(chat_request())
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body, completion_body("Hello there."));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[actix_web::test]
async fn test_missing_messages_is_rejected_without_upstream_call() {
    let server = MockServer::start().await;
    let state = app_state(test_config(&server.uri(), ""));
    let app = test::init_service(App::new().app_data(state).configure(configure)).await;

    let req = test::TestRequest::post()
        .uri("/chat/completions")
        .set_json(json!({"model": "gpt-4o"}))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 400);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["message"], "Missing required field: messages");
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[actix_web::test]
async fn test_invalid_json_is_rejected() {
    let server = MockServer::start().await;
    let state = app_state(test_config(&server.uri(), ""));
    let app = test::init_service(App::new().app_data(state).configure(configure)).await;

    let req = test::TestRequest::post()
        .uri("/chat/completions")
        .insert_header(("content-type", "application/json"))
        .set_payload("{not json")
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 400);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["message"], "Invalid JSON in request body");
}

#[actix_web::test]
async fn test_retries_recover_from_transient_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(503).set_body_json(json!({"error": {"message": "busy"}})),
        )
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("Recovered.")))
        .mount(&server)
        .await;

    let state = app_state(test_config(&server.uri(), ""));
    let app = test::init_service(App::new().app_data(state).configure(configure)).await;

    let req = test::TestRequest::post()
        .uri("/chat/completions")
        .set_json(chat_request())
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["choices"][0]["message"]["content"], "Recovered.");
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[actix_web::test]
async fn test_permanent_error_is_relayed_verbatim() {
    let server = MockServer::start().await;
    let error_body = json!({"error": {"message": "invalid api key", "type": "auth_error"}});
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(error_body.clone()))
        .mount(&server)
        .await;

    let state = app_state(test_config(&server.uri(), ""));
    let app = test::init_service(App::new().app_data(state).configure(configure)).await;

    let req = test::TestRequest::post()
        .uri("/chat/completions")
        .set_json(chat_request())
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 401);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body, error_body);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[actix_web::test]
async fn test_retry_exhaustion_relays_last_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(503)
                .set_body_json(json!({"error": {"message": "still overloaded"}})),
        )
        .mount(&server)
        .await;

    let state = app_state(test_config(&server.uri(), ""));
    let app = test::init_service(App::new().app_data(state).configure(configure)).await;

    let req = test::TestRequest::post()
        .uri("/chat/completions")
        .set_json(chat_request())
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 503);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["message"], "still overloaded");
    // initial + 3 retries
    assert_eq!(server.received_requests().await.unwrap().len(), 4);
}

#[actix_web::test]
async fn test_hard_stop_aborts_retries_with_terminal_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .set_body_json(json!({"error": {"message": "Daily quota exhausted for key"}})),
        )
        .mount(&server)
        .await;

    let extra = r#"
  hard_stop_conditions:
    enabled: true
    rules:
      - pattern: "quota exhausted"
        description: "Out of quota"
        add_user_message: true
        user_message: "The upstream provider is out of quota."
"#;
    // hard_stop_conditions lives under error_handling
    let yaml = format!(
        r#"
target_proxy:
  url: "{}/chat/completions"
error_handling:
  max_retries: 3
  base_delay: 0.01
  max_delay: 0.05
{}
"#,
        server.uri(),
        extra
    );
    let config: Config = serde_yaml_ng::from_str(&yaml).unwrap();
    let state = app_state(config);
    let app = test::init_service(App::new().app_data(state).configure(configure)).await;

    let req = test::TestRequest::post()
        .uri("/chat/completions")
        .set_json(chat_request())
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["code"], "hard_stop_condition_met");
    assert_eq!(
        body["error"]["message"],
        "The upstream provider is out of quota."
    );
    assert_eq!(
        body["error"]["original_error"]["message"],
        "Daily quota exhausted for key"
    );
    // no retries despite the retryable 429
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[actix_web::test]
async fn test_blank_completion_is_retried_then_good_answer_returned() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("Real answer.")))
        .mount(&server)
        .await;

    let state = app_state(test_config(&server.uri(), ""));
    let app = test::init_service(App::new().app_data(state).configure(configure)).await;

    let req = test::TestRequest::post()
        .uri("/chat/completions")
        .set_json(chat_request())
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["choices"][0]["message"]["content"], "Real answer.");
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[actix_web::test]
async fn test_unknown_config_path_is_404() {
    let server = MockServer::start().await;
    let state = app_state(test_config(&server.uri(), ""));
    let app = test::init_service(App::new().app_data(state).configure(configure)).await;

    let req = test::TestRequest::post()
        .uri("/nonexistent-config/chat/completions")
        .set_json(chat_request())
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 404);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["type"], "config_not_found");
    assert_eq!(body["error"]["config_path"], "nonexistent-config");
    assert_eq!(
        body["error"]["expected_file"],
        "config-nonexistent-config.yaml"
    );
}

#[actix_web::test]
async fn test_request_transforms_and_metadata_stripping() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("ok")))
        .mount(&server)
        .await;

    let extra = r#"
regex_replacement:
  enabled: true
  rules:
    - pattern: "forbidden"
      replacement: "allowed"
      apply_to: "user"
"#;
    let state = app_state(test_config(&server.uri(), extra));
    let app = test::init_service(App::new().app_data(state).configure(configure)).await;

    let req = test::TestRequest::post()
        .uri("/chat/completions")
        .set_json(json!({"messages": [
            {"role": "user", "content": "<CHAT_METADATA>{\"chat\": \"Senta - now\"}</CHAT_METADATA>this is forbidden"}
        ]}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let requests = server.received_requests().await.unwrap();
    let forwarded: Value = serde_json::from_slice(&requests[0].body).unwrap();
    let content = forwarded["messages"][0]["content"].as_str().unwrap();
    assert_eq!(content, "this is allowed");
    assert!(!content.contains("CHAT_METADATA"));
}

#[actix_web::test]
async fn test_health_endpoints() {
    let server = MockServer::start().await;
    let state = app_state(test_config(&server.uri(), ""));
    let app = test::init_service(App::new().app_data(state).configure(configure)).await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "healthy");

    let resp = test::call_service(
        &app,
        test::TestRequest::get().uri("/health/detailed").to_request(),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["retry_config"]["max_retries"], 3);
}

#[actix_web::test]
async fn test_models_endpoint_relays_upstream_list() {
    let server = MockServer::start().await;
    let models = json!({"object": "list", "data": [{"id": "upstream-model", "object": "model"}]});
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(models.clone()))
        .mount(&server)
        .await;

    let state = app_state(test_config(&server.uri(), ""));
    let app = test::init_service(App::new().app_data(state).configure(configure)).await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/models").to_request()).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body, models);
}

#[actix_web::test]
async fn test_models_endpoint_falls_back_on_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"error": {"message": "no auth"}})),
        )
        .mount(&server)
        .await;

    let state = app_state(test_config(&server.uri(), ""));
    let app = test::init_service(App::new().app_data(state).configure(configure)).await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/models").to_request()).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["object"], "list");
    assert!(!body["data"].as_array().unwrap().is_empty());
}

#[actix_web::test]
async fn test_response_processing_rules_apply_to_final_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(completion_body("the secret word")),
        )
        .mount(&server)
        .await;

    let extra = r#"
response_processing:
  enabled: true
  rules:
    - pattern: "secret"
      replacement: "public"
"#;
    let state = app_state(test_config(&server.uri(), extra));
    let app = test::init_service(App::new().app_data(state).configure(configure)).await;

    let req = test::TestRequest::post()
        .uri("/chat/completions")
        .set_json(chat_request())
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(
        body["choices"][0]["message"]["content"],
        "the public word"
    );
}
