#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use atelier_api::auth::{AppState, AppStateInner, create_token};
use atelier_db::{Database, format_timestamp};
use atelier_gateway::dispatcher::Dispatcher;
use atelier_types::models::Role;

pub const SECRET: &str = "test-secret";

pub struct TestUser {
    pub id: Uuid,
    pub token: String,
}

/// The full REST router over a private in-memory database.
pub struct TestApp {
    pub state: AppState,
    router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        let state: AppState = Arc::new(AppStateInner {
            db: Arc::new(Database::open_in_memory().unwrap()),
            jwt_secret: SECRET.into(),
            dispatcher: Dispatcher::new(),
        });
        let router = atelier_api::router(state.clone());
        Self { state, router }
    }

    /// Insert a user directly and mint a token, skipping password hashing.
    pub fn add_user(&self, name: &str, role: Role) -> TestUser {
        let id = Uuid::new_v4();
        let email = format!("{}@example.com", name.to_lowercase());
        self.state
            .db
            .create_user(
                &id.to_string(),
                name,
                &email,
                None,
                role.as_str(),
                "",
                &format_timestamp(chrono::Utc::now()),
            )
            .unwrap();
        let token = create_token(SECRET, id, name, role).unwrap();
        TestUser { id, token }
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    pub async fn get(&self, uri: &str, user: &TestUser) -> (StatusCode, Value) {
        self.send(Method::GET, uri, Some(&user.token), None).await
    }

    pub async fn post(&self, uri: &str, user: &TestUser, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, Some(&user.token), Some(body)).await
    }

    /// Resolve a conversation and expect success.
    pub async fn resolve(&self, user: &TestUser, query: &str) -> Uuid {
        let (status, body) = self.get(&format!("/conversations?{}", query), user).await;
        assert_eq!(status, StatusCode::OK, "resolve failed: {}", body);
        body["conversationId"].as_str().unwrap().parse().unwrap()
    }

    pub async fn send_text(&self, user: &TestUser, conversation_id: Uuid, text: &str) -> Value {
        let (status, body) = self
            .post(
                "/messages",
                user,
                serde_json::json!({ "conversationId": conversation_id, "text": text }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "send failed: {}", body);
        body
    }

    pub async fn list_messages(&self, user: &TestUser, conversation_id: Uuid) -> Vec<Value> {
        let (status, body) = self
            .get(&format!("/messages?conversationId={}", conversation_id), user)
            .await;
        assert_eq!(status, StatusCode::OK, "list failed: {}", body);
        body.as_array().unwrap().clone()
    }

    /// The caller's unread flag for a conversation, as the list view shows it.
    pub async fn unread(&self, user: &TestUser, conversation_id: Uuid) -> bool {
        let (status, body) = self.get("/conversations/mine", user).await;
        assert_eq!(status, StatusCode::OK);
        body.as_array()
            .unwrap()
            .iter()
            .find(|c| c["id"] == conversation_id.to_string())
            .map(|c| c["unread"].as_bool().unwrap())
            .expect("conversation missing from list")
    }
}
