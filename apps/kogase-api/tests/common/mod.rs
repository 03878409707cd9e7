#![allow(dead_code)]

use axum::Router;
use axum_test::TestServer;
use http::{HeaderName, HeaderValue, StatusCode, header};
use kogase_api::{AppState, create_app};
use kogase_core::{
    Cache, GeoLocator,
    adapters::{InMemoryCache, InMemoryStore, StaticGeoLocator},
    domain::auth_token::TokenIssuer,
};
use serde_json::{Value, json};
use std::{sync::Arc, time::Duration};
use uuid::Uuid;

pub const PASSWORD: &str = "hunter22";

pub struct TestApp {
    pub server: TestServer,
    pub store: Arc<InMemoryStore>,
    pub cache: Arc<dyn Cache>,
}

// Helper function to set up the test application with in-memory dependencies
pub fn setup_test_app() -> TestApp {
    let store = Arc::new(InMemoryStore::new());
    let geo: Arc<dyn GeoLocator> = Arc::new(StaticGeoLocator::new("SE"));
    let cache: Arc<dyn Cache> = Arc::new(InMemoryCache::default());
    let issuer = Arc::new(TokenIssuer::new(b"test-secret", Duration::from_secs(3600)));

    let app_state = AppState::with_store(store.clone(), geo, cache.clone(), issuer);
    let app: Router = create_app(app_state);
    TestApp {
        server: TestServer::new(app).expect("Failed to create TestServer"),
        store,
        cache,
    }
}

pub fn bearer(token: &str) -> (HeaderName, HeaderValue) {
    (
        header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
    )
}

pub fn api_key(key: &str) -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("x-kogase-api-key"),
        HeaderValue::from_str(key).unwrap(),
    )
}

pub fn forwarded_for(ip: &str) -> (HeaderName, HeaderValue) {
    (
        HeaderName::from_static("x-forwarded-for"),
        HeaderValue::from_str(ip).unwrap(),
    )
}

/// A dashboard user with a live token.
pub struct Account {
    pub user_id: Uuid,
    pub email: String,
    pub token: String,
}

pub async fn register_and_login(server: &TestServer) -> Account {
    let email = format!("dev_{}@studio.io", Uuid::new_v4().simple());
    let response = server
        .post("/api/v1/users")
        .json(&json!({ "email": email, "name": "Dev", "password": PASSWORD }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    let user_id = response.json::<Value>()["id"]
        .as_str()
        .and_then(|id| Uuid::parse_str(id).ok())
        .expect("user id");

    let response = server
        .post("/api/v1/auth/login")
        .json(&json!({ "email": email, "password": PASSWORD }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let token = response.json::<Value>()["token"]
        .as_str()
        .expect("token")
        .to_string();

    Account {
        user_id,
        email,
        token,
    }
}

/// Creates a project owned by `account` and returns `(project_id, api_key)`.
pub async fn create_project(server: &TestServer, account: &Account, name: &str) -> (Uuid, String) {
    let (name_header, value) = bearer(&account.token);
    let response = server
        .post("/api/v1/projects")
        .add_header(name_header, value)
        .json(&json!({ "name": name }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    let body = response.json::<Value>();
    let id = Uuid::parse_str(body["id"].as_str().expect("project id")).expect("uuid");
    (id, body["api_key"].as_str().expect("api key").to_string())
}

pub fn device_body(identifier: &str) -> Value {
    json!({
        "identifier": identifier,
        "platform": "iOS",
        "platform_version": "17.0",
        "app_version": "1.0.3",
    })
}

/// Registers a device through the SDK route and returns its id.
pub async fn register_device(server: &TestServer, key: &str, identifier: &str) -> Uuid {
    let (name, value) = api_key(key);
    let response = server
        .post("/api/v1/devices")
        .add_header(name, value)
        .json(&device_body(identifier))
        .await;
    assert!(
        response.status_code() == StatusCode::CREATED || response.status_code() == StatusCode::OK
    );
    Uuid::parse_str(response.json::<Value>()["device_id"].as_str().expect("device id"))
        .expect("uuid")
}
