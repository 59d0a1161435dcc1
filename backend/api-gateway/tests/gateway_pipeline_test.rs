//! End-to-end pipeline tests: route classification, token verification,
//! role gating, rate limiting, header enrichment and dispatch against
//! mocked downstream services.

#[macro_use]
mod common;

use actix_web::test;
use common::{bearer, config};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use wiremock::matchers::{any, body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn peer() -> SocketAddr {
    "10.0.0.7:52100".parse().unwrap()
}

#[actix_web::test]
async fn test_public_route_forwards_without_token_and_strips_spoofed_identity() {
    let downstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/auth/login"))
        .and(body_string(r#"{"email":"ana@practicas.dev"}"#))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "abc"})))
        .expect(1)
        .mount(&downstream)
        .await;

    let app = gateway_app!(config(&downstream.uri(), &[]));
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/login")
        .peer_addr(peer())
        .insert_header(("content-type", "application/json"))
        .insert_header(("x-user-id", "admin-1"))
        .insert_header(("x-user-roles", "admin"))
        .set_payload(r#"{"email":"ana@practicas.dev"}"#)
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("x-ratelimit-limit").unwrap(), "5");
    assert_eq!(resp.headers().get("x-ratelimit-remaining").unwrap(), "4");
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["token"], "abc");

    let received = downstream.received_requests().await.unwrap();
    let forwarded = &received[0];
    assert!(forwarded.headers.get("x-user-id").is_none());
    assert!(forwarded.headers.get("x-user-roles").is_none());
    assert_eq!(forwarded.headers.get("content-type").unwrap(), "application/json");
    assert_eq!(forwarded.headers.get("x-forwarded-for").unwrap(), "10.0.0.7");
    assert!(forwarded.headers.get("x-correlation-id").is_some());
}

#[actix_web::test]
async fn test_protected_route_without_token_never_reaches_downstream() {
    let downstream = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&downstream)
        .await;

    let app = gateway_app!(config(&downstream.uri(), &[]));
    let req = test::TestRequest::get()
        .uri("/api/v1/practices/42")
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 401);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["statusCode"], 401);
    assert_eq!(body["message"], "Authentication required");
    assert_eq!(body["path"], "/api/v1/practices/42");
    assert!(body["timestamp"].is_string());
}

#[actix_web::test]
async fn test_invalid_token_is_unauthenticated() {
    let downstream = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&downstream)
        .await;

    let app = gateway_app!(config(&downstream.uri(), &[]));
    for value in ["Bearer not-a-jwt", "Basic dXNlcjpwYXNz", "Bearer"] {
        let req = test::TestRequest::get()
            .uri("/api/v1/documents/7")
            .insert_header(("authorization", value))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 401, "authorization: {}", value);
    }
}

#[actix_web::test]
async fn test_role_mismatch_is_forbidden() {
    let downstream = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&downstream)
        .await;

    let app = gateway_app!(config(&downstream.uri(), &[]));
    let req = test::TestRequest::get()
        .uri("/api/v1/reports/monthly")
        .insert_header(bearer("student-9", &["student"]))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 403);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["statusCode"], 403);
}

#[actix_web::test]
async fn test_dot_segments_cannot_escape_role_check() {
    let downstream = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&downstream)
        .await;

    let app = gateway_app!(config(&downstream.uri(), &[]));
    let req = test::TestRequest::get()
        .uri("/api/v1/documents/../reports/monthly")
        .insert_header(bearer("student-9", &["student"]))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 403);
}

#[actix_web::test]
async fn test_authorized_request_is_enriched_and_forwarded() {
    let downstream = MockServer::start().await;
    // practices uses the versioned prefix; the query string is preserved
    Mock::given(method("GET"))
        .and(path("/api/v1/practices/42"))
        .and(query_param("include", "company"))
        .and(header("x-user-id", "prof-3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 42})))
        .expect(1)
        .mount(&downstream)
        .await;

    let app = gateway_app!(config(&downstream.uri(), &[]));
    let (auth_name, auth_value) = bearer("prof-3", &["professor", "admin"]);
    let req = test::TestRequest::get()
        .uri("/api/v1/practices/42?include=company")
        .insert_header((auth_name, auth_value.clone()))
        .insert_header(("accept", "application/json"))
        .insert_header(("keep-alive", "timeout=5"))
        .insert_header(("proxy-authorization", "Basic Zm9vOmJhcg=="))
        .insert_header(("x-request-source", "web"))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["id"], 42);

    let received = downstream.received_requests().await.unwrap();
    let headers = &received[0].headers;
    assert_eq!(headers.get("authorization").unwrap(), auth_value.as_str());
    assert_eq!(headers.get("x-user-email").unwrap(), "prof-3@practicas.dev");
    assert_eq!(headers.get("x-user-roles").unwrap(), "admin,professor");
    assert_eq!(headers.get("x-request-source").unwrap(), "web");
    assert_eq!(headers.get("accept").unwrap(), "application/json");
    assert!(headers.get("keep-alive").is_none());
    assert!(headers.get("proxy-authorization").is_none());
}

#[actix_web::test]
async fn test_unversioned_service_receives_path_without_prefix() {
    let downstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/progress/milestones"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"created": true})))
        .expect(1)
        .mount(&downstream)
        .await;

    let app = gateway_app!(config(&downstream.uri(), &[]));
    let req = test::TestRequest::post()
        .uri("/api/v1/progress/milestones")
        .insert_header(bearer("student-1", &["student"]))
        .set_json(json!({"title": "week 1"}))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 201);
}

#[actix_web::test]
async fn test_downstream_errors_are_relayed_verbatim() {
    let downstream = MockServer::start().await;
    Mock::given(path("/api/v1/documents/404"))
        .respond_with(
            ResponseTemplate::new(404)
                .insert_header("x-service", "documents")
                .set_body_json(json!({"error": "document not found"})),
        )
        .mount(&downstream)
        .await;

    let app = gateway_app!(config(&downstream.uri(), &[]));
    let req = test::TestRequest::get()
        .uri("/api/v1/documents/404")
        .insert_header(bearer("student-1", &["student"]))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 404);
    assert_eq!(resp.headers().get("x-service").unwrap(), "documents");
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({"error": "document not found"}));
}

#[actix_web::test]
async fn test_rate_limit_rejects_request_over_quota() {
    let downstream = MockServer::start().await;
    Mock::given(path("/api/v1/auth/login"))
        .respond_with(ResponseTemplate::new(200))
        .expect(3)
        .mount(&downstream)
        .await;

    let app = gateway_app!(config(
        &downstream.uri(),
        &[("RATE_LIMIT_SHORT_LIMIT", "2"), ("RATE_LIMIT_SHORT_WINDOW_MS", "60000")]
    ));

    for _ in 0..2 {
        let req = test::TestRequest::post()
            .uri("/api/v1/auth/login")
            .peer_addr(peer())
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 200);
    }

    let req = test::TestRequest::post()
        .uri("/api/v1/auth/login")
        .peer_addr(peer())
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 429);
    assert_eq!(resp.headers().get("x-ratelimit-limit").unwrap(), "2");
    assert_eq!(resp.headers().get("x-ratelimit-remaining").unwrap(), "0");
    let retry_after: u64 = resp
        .headers()
        .get("retry-after")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0 && retry_after <= 60);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["statusCode"], 429);

    // A different client has its own window
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/login")
        .peer_addr("10.0.0.8:40000".parse().unwrap())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
}

#[actix_web::test]
async fn test_rate_limit_window_rolls_over() {
    let downstream = MockServer::start().await;
    Mock::given(path("/api/v1/auth/register"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&downstream)
        .await;

    let app = gateway_app!(config(
        &downstream.uri(),
        &[("RATE_LIMIT_SHORT_LIMIT", "1"), ("RATE_LIMIT_SHORT_WINDOW_MS", "300")]
    ));
    let register = || {
        test::TestRequest::post()
            .uri("/api/v1/auth/register")
            .peer_addr(peer())
            .to_request()
    };

    assert_eq!(test::call_service(&app, register()).await.status(), 201);
    assert_eq!(test::call_service(&app, register()).await.status(), 429);

    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(test::call_service(&app, register()).await.status(), 201);
}

#[actix_web::test]
async fn test_slow_downstream_times_out_with_gateway_timeout() {
    let downstream = MockServer::start().await;
    Mock::given(path("/notifications/unread"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"partial": true}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&downstream)
        .await;

    let app = gateway_app!(config(&downstream.uri(), &[("REQUEST_TIMEOUT_MS", "200")]));
    let req = test::TestRequest::get()
        .uri("/api/v1/notifications/unread")
        .insert_header(bearer("student-1", &["student"]))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 504);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["statusCode"], 504);
    assert!(body.get("partial").is_none());
}

#[actix_web::test]
async fn test_unreachable_downstream_is_bad_gateway() {
    let downstream = MockServer::start().await;
    let app = gateway_app!(config(
        &downstream.uri(),
        &[("DOCUMENTS_SERVICE_URL", "http://127.0.0.1:9")]
    ));
    let req = test::TestRequest::get()
        .uri("/api/v1/documents/7")
        .insert_header(bearer("student-1", &["student"]))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 502);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["message"], "Downstream service is unavailable");
    assert!(!body.to_string().contains("127.0.0.1"));
}

#[actix_web::test]
async fn test_unmatched_path_requires_auth_then_is_not_found() {
    let downstream = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&downstream)
        .await;

    let app = gateway_app!(config(&downstream.uri(), &[]));

    let req = test::TestRequest::get().uri("/api/v1/unknown/thing").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let req = test::TestRequest::get()
        .uri("/api/v1/unknown/thing")
        .insert_header(bearer("admin-1", &["admin"]))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["path"], "/api/v1/unknown/thing");
}

#[actix_web::test]
async fn test_path_outside_prefix_is_not_found() {
    let downstream = MockServer::start().await;
    let app = gateway_app!(config(&downstream.uri(), &[]));

    let req = test::TestRequest::get().uri("/graphql").to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 404);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["statusCode"], 404);
    assert_eq!(body["path"], "/graphql");
}

#[actix_web::test]
async fn test_repeated_get_is_idempotent() {
    let downstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/users/students"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "s-1"}])))
        .expect(2)
        .mount(&downstream)
        .await;

    let app = gateway_app!(config(&downstream.uri(), &[]));
    let mut bodies = Vec::new();
    for _ in 0..2 {
        let req = test::TestRequest::get()
            .uri("/api/v1/users/students")
            .peer_addr(peer())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 200);
        bodies.push(test::read_body(resp).await);
    }

    assert_eq!(bodies[0], bodies[1]);
}

#[actix_web::test]
async fn test_public_list_exception_is_method_scoped() {
    let downstream = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&downstream)
        .await;

    let app = gateway_app!(config(&downstream.uri(), &[]));
    // Creating users is admin-only even though listing them is public
    let req = test::TestRequest::post()
        .uri("/api/v1/users/students")
        .insert_header(bearer("student-1", &["student"]))
        .to_request();

    assert_eq!(test::call_service(&app, req).await.status(), 403);
}

#[actix_web::test]
async fn test_correlation_id_is_echoed_and_forwarded() {
    let downstream = MockServer::start().await;
    Mock::given(path("/api/v1/auth/refresh"))
        .and(header("x-correlation-id", "req-abc-123"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&downstream)
        .await;

    let app = gateway_app!(config(&downstream.uri(), &[]));
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/refresh")
        .insert_header(("x-correlation-id", "req-abc-123"))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("x-correlation-id").unwrap(), "req-abc-123");
}

#[actix_web::test]
async fn test_rotating_forwarded_for_does_not_reset_login_limit() {
    let downstream = MockServer::start().await;
    Mock::given(path("/api/v1/auth/login"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&downstream)
        .await;

    let app = gateway_app!(config(&downstream.uri(), &[("RATE_LIMIT_SHORT_LIMIT", "2")]));

    let mut statuses = Vec::new();
    for i in 0..5 {
        let req = test::TestRequest::post()
            .uri("/api/v1/auth/login")
            .peer_addr(peer())
            .insert_header(("x-forwarded-for", format!("198.51.100.{}", i)))
            .to_request();
        statuses.push(test::call_service(&app, req).await.status().as_u16());
    }

    assert_eq!(statuses, vec![200, 200, 429, 429, 429]);
}

#[actix_web::test]
async fn test_forwarded_for_keys_clients_when_trusted() {
    let downstream = MockServer::start().await;
    Mock::given(path("/api/v1/auth/login"))
        .respond_with(ResponseTemplate::new(200))
        .expect(3)
        .mount(&downstream)
        .await;

    let app = gateway_app!(config(
        &downstream.uri(),
        &[("RATE_LIMIT_SHORT_LIMIT", "1"), ("TRUST_FORWARDED_FOR", "true")]
    ));

    // One load balancer peer, three distinct callers behind it
    for i in 0..3 {
        let req = test::TestRequest::post()
            .uri("/api/v1/auth/login")
            .peer_addr(peer())
            .insert_header(("x-forwarded-for", format!("198.51.100.{}", i)))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 200);
    }
}

#[actix_web::test]
async fn test_oversized_body_is_rejected_with_envelope() {
    let downstream = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&downstream)
        .await;

    let app = gateway_app!(config(&downstream.uri(), &[("MAX_BODY_BYTES", "16")]));
    let body = "x".repeat(64);

    let req = test::TestRequest::post()
        .uri("/api/v1/documents/1")
        .insert_header(bearer("student-1", &["student"]))
        .set_payload(body.clone())
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 413);
    let envelope: Value = test::read_body_json(resp).await;
    assert_eq!(envelope["statusCode"], 413);
    assert_eq!(envelope["message"], "Request body too large");
    assert_eq!(envelope["path"], "/api/v1/documents/1");

    // Authentication is decided before the body is read
    let req = test::TestRequest::post()
        .uri("/api/v1/documents/1")
        .set_payload(body)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);
}

#[actix_web::test]
async fn test_body_within_limit_is_forwarded() {
    let downstream = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/v1/documents/1"))
        .and(body_string("0123456789abcdef"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&downstream)
        .await;

    let app = gateway_app!(config(&downstream.uri(), &[("MAX_BODY_BYTES", "16")]));
    let req = test::TestRequest::put()
        .uri("/api/v1/documents/1")
        .insert_header(bearer("student-1", &["student"]))
        .set_payload("0123456789abcdef")
        .to_request();

    assert_eq!(test::call_service(&app, req).await.status(), 204);
}
