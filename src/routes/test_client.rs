//! In-process request helpers for route tests.

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use serde_json::Value;
use tower::ServiceExt;

use super::auth::COOKIE_NAME;

pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
    /// Value of the session cookie set by this response, if any.
    pub set_session: Option<String>,
}

/// Send one request through the router. Non-JSON bodies come back as a
/// JSON string; empty bodies as `null`.
pub async fn send(app: &Router, method: Method, uri: &str, cookie: Option<&str>, body: Option<Value>) -> TestResponse {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = cookie {
        req = req.header(header::COOKIE, format!("{COOKIE_NAME}={token}"));
    }
    let req = match body {
        Some(json) => req
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let set_session = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|v| v.strip_prefix(&format!("{COOKIE_NAME}=")).map(|rest| rest.split(';').next().unwrap_or("").to_owned()));
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    TestResponse { status, body, set_session }
}

/// Log in and return the response; `set_session` holds the cookie token.
pub async fn login(app: &Router, email: &str, password: &str) -> TestResponse {
    send(
        app,
        Method::POST,
        "/api/auth/login",
        None,
        Some(serde_json::json!({ "email": email, "password": password })),
    )
    .await
}
