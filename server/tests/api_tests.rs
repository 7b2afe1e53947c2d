use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
};
use chrono::Duration;
use serde_json::{json, Value};
use skillswap::{auth::JwtConfig, routes::routes, state::AppState};
use sqlx::postgres::PgPoolOptions;
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &str = "integration-test-secret";

/// State whose pool never connects; every request here is answered before storage
fn test_state() -> AppState {
    let db = PgPoolOptions::new()
        .connect_lazy("postgres://localhost/skillswap_test")
        .unwrap();

    AppState {
        db,
        cookie_key: cja::server::cookies::CookieKey::from_env_or_generate().unwrap(),
        jwt: JwtConfig::new(SECRET, Duration::hours(1)),
    }
}

fn bearer() -> String {
    let token = JwtConfig::new(SECRET, Duration::hours(1))
        .issue(Uuid::new_v4(), "tester")
        .unwrap();
    format!("Bearer {token}")
}

async fn send(request: Request<Body>) -> (StatusCode, Value) {
    let response = routes(test_state()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

    (status, body)
}

fn json_request(method: &str, uri: &str, auth: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, auth: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health() {
    let (status, body) = send(get("/", None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "SkillSwap API is running");
}

#[tokio::test]
async fn test_missing_token() {
    let (status, body) = send(get("/user/me", None)).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "message": "No token provided" }));
}

#[tokio::test]
async fn test_bad_token() {
    let (status, body) = send(get("/exchange/sessions", Some("Bearer nope"))).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid token");
}

#[tokio::test]
async fn test_token_from_another_server() {
    let foreign = JwtConfig::new("some-other-secret", Duration::hours(1))
        .issue(Uuid::new_v4(), "mallory")
        .unwrap();
    let (status, body) = send(get("/user/me", Some(&format!("Bearer {foreign}")))).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid token");
}

#[tokio::test]
async fn test_post_validation_errors() {
    let auth = bearer();
    let request = json_request(
        "POST",
        "/post",
        Some(&auth),
        json!({ "title": "a", "mediaUrl": "nowhere" }),
    );
    let (status, body) = send(request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Validation error");
    let fields: Vec<&str> = body["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["field"].as_str().unwrap())
        .collect();
    assert_eq!(fields, vec!["title", "mediaUrl"]);
}

#[tokio::test]
async fn test_auth_checked_before_body() {
    let request = json_request("POST", "/post", None, json!({ "title": "a" }));
    let (status, _) = send(request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_malformed_json_is_a_bad_request() {
    let auth = bearer();
    let request = Request::builder()
        .method("POST")
        .uri("/event/create")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, &auth)
        .body(Body::from("{\"title\": "))
        .unwrap();
    let (status, body) = send(request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn test_invalid_ids() {
    let auth = bearer();
    let cases = [
        ("/post/123", "Invalid post ID"),
        ("/event/abc", "Invalid event ID"),
        ("/listing/xyz", "Invalid listing ID"),
        ("/exchange/requests/42", "Invalid request ID"),
        ("/exchange/sessions/nope", "Invalid session ID"),
        ("/exchange/reviews/1", "Invalid review ID"),
        ("/exchange/disputes/2", "Invalid dispute ID"),
    ];

    for (uri, message) in cases {
        let (status, body) = send(get(uri, Some(&auth))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["message"], message, "{uri}");
    }
}

#[tokio::test]
async fn test_unknown_sort_field() {
    let (status, body) = send(get("/post?sort=password_hash", None)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid sort field");
}

#[tokio::test]
async fn test_invalid_milestone_index() {
    let auth = bearer();
    let uri = format!("/exchange/sessions/{}/milestones/first/complete", Uuid::new_v4());
    let request = json_request("POST", &uri, Some(&auth), json!({}));
    let (status, body) = send(request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid milestone index");
}

#[tokio::test]
async fn test_login_requires_fields() {
    let request = json_request(
        "POST",
        "/user/login",
        None,
        json!({ "username": "", "password": "" }),
    );
    let (status, body) = send(request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"][0]["message"], "Username is required");
    assert_eq!(body["errors"][1]["message"], "Password is required");
}

#[tokio::test]
async fn test_review_ratings_checked_before_storage() {
    let auth = bearer();
    let uri = format!("/exchange/sessions/{}/reviews", Uuid::new_v4());
    let request = json_request(
        "POST",
        &uri,
        Some(&auth),
        json!({
            "rating": 9,
            "skillRating": 5,
            "communicationRating": 5,
            "reliabilityRating": 5,
        }),
    );
    let (status, body) = send(request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"][0]["field"], "rating");
}

#[tokio::test]
async fn test_admin_routes_need_a_token() {
    let (status, _) = send(get("/report", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let uri = format!("/exchange/disputes/{}/resolve", Uuid::new_v4());
    let request = json_request(
        "POST",
        &uri,
        None,
        json!({ "resolution": "Refunded", "status": "resolved" }),
    );
    let (status, _) = send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_request_responses_are_public() {
    let (status, body) = send(get("/exchange/requests/not-an-id/responses", None)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid request ID");
}
