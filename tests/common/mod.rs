#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    extract::ConnectInfo,
    http::{HeaderMap, Request, StatusCode},
};
use serde_json::{Value, json};
use std::net::SocketAddr;
use tower::ServiceExt;
use turnstile::{ServerConfig, create_app, db::Database, session::SessionPolicy};

pub const TEST_PASSWORD: &str = "correct horse battery";

pub struct TestApp {
    pub app: Router,
    pub db: Database,
}

/// Create a test app with generous rate limits.
pub async fn create_test_app() -> TestApp {
    create_test_app_with(|_| {}).await
}

/// Create a test app, letting the caller adjust the config first.
pub async fn create_test_app_with(configure: impl FnOnce(&mut ServerConfig)) -> TestApp {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");

    let mut config = ServerConfig {
        db: db.clone(),
        jwt_secret: b"test-jwt-secret-that-is-long-enough".to_vec(),
        policy: SessionPolicy::default(),
        no_signup: false,
        login_attempts_per_minute: 1000,
        ip_header: None,
    };
    configure(&mut config);

    let app = create_app(&config);
    TestApp { app, db }
}

/// Response status, headers and JSON body (`Null` for an empty body).
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub json: Value,
}

async fn send(app: &Router, mut request: Request<Body>) -> TestResponse {
    // What `into_make_service_with_connect_info` provides in production
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 3001))));
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    TestResponse {
        status,
        headers,
        json,
    }
}

pub async fn post_json(
    app: &Router,
    uri: &str,
    body: Value,
    bearer: Option<&str>,
) -> TestResponse {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    send(app, builder.body(Body::from(body.to_string())).unwrap()).await
}

pub async fn request(
    app: &Router,
    method: &str,
    uri: &str,
    bearer: Option<&str>,
) -> TestResponse {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    send(app, builder.body(Body::empty()).unwrap()).await
}

/// Register `email` with `TEST_PASSWORD` and return the session JSON.
pub async fn register(app: &Router, email: &str) -> Value {
    let response = post_json(
        app,
        "/api/auth/register",
        json!({ "email": email, "password": TEST_PASSWORD }),
        None,
    )
    .await;
    assert_eq!(response.status, StatusCode::CREATED, "{}", response.json);
    response.json
}

pub async fn login(app: &Router, email: &str, password: &str) -> TestResponse {
    post_json(
        app,
        "/api/auth/login",
        json!({ "email": email, "password": password }),
        None,
    )
    .await
}

pub async fn refresh(app: &Router, refresh_token: &str) -> TestResponse {
    post_json(
        app,
        "/api/auth/refresh",
        json!({ "refreshToken": refresh_token }),
        None,
    )
    .await
}

pub async fn logout(app: &Router, refresh_token: &str) -> TestResponse {
    post_json(
        app,
        "/api/auth/logout",
        json!({ "refreshToken": refresh_token }),
        None,
    )
    .await
}

pub fn refresh_token_of(session: &Value) -> String {
    session["refreshToken"].as_str().unwrap().to_string()
}

pub fn access_token_of(session: &Value) -> String {
    session["accessToken"].as_str().unwrap().to_string()
}
