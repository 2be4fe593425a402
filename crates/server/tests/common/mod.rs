//! Common test utilities for in-process API testing.
//!
//! The fixture builds the real router over a temp-file SQLite store, the real
//! job queue and event bus, and a [`MockExecutor`] in place of Splash. Two API
//! keys are configured: `alice-key` (user `alice`) and `bob-key` (user `bob`).
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;

use scriptrelay_core::{
    config::{ApiKeyEntry, AuthConfig, DatabaseConfig, MediaConfig},
    session_topic,
    testing::MockExecutor,
    ApiKeyAuthenticator, AuthMethod, Config, EventBus, EventReceiver, JobQueue, SqliteStore,
};
use scriptrelay_server::{create_router, AppState};

/// Re-export fixtures for test convenience
pub use scriptrelay_core::testing::fixtures;

pub const ALICE_KEY: &str = "alice-key";
pub const BOB_KEY: &str = "bob-key";

pub struct TestFixture {
    pub router: Router,
    pub store: Arc<SqliteStore>,
    pub executor: Arc<MockExecutor>,
    pub queue: Arc<JobQueue>,
    pub bus: EventBus,
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Fixture whose executor succeeds with an empty Splash response.
    pub async fn new() -> Self {
        Self::with_executor(MockExecutor::succeeding(serde_json::json!({}))).await
    }

    pub async fn with_executor(executor: MockExecutor) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let config = Config {
            auth: AuthConfig {
                method: AuthMethod::ApiKey,
                api_keys: vec![
                    ApiKeyEntry {
                        key: ALICE_KEY.to_string(),
                        user_id: "alice".to_string(),
                    },
                    ApiKeyEntry {
                        key: BOB_KEY.to_string(),
                        user_id: "bob".to_string(),
                    },
                ],
            },
            database: DatabaseConfig {
                path: temp_dir.path().join("test.db"),
            },
            media: MediaConfig {
                root: temp_dir.path().join("media"),
                url_prefix: "/media/".to_string(),
            },
            ..fixtures::test_config()
        };

        let store = Arc::new(
            SqliteStore::new(&config.database.path).expect("Failed to create store"),
        );
        let executor = Arc::new(executor);
        let queue = Arc::new(JobQueue::new(&config.queues));
        let bus = EventBus::new();
        let authenticator = Arc::new(ApiKeyAuthenticator::new(config.auth.api_keys.clone()));

        let state = Arc::new(AppState::new(
            config,
            authenticator,
            Arc::clone(&store),
            Arc::clone(&executor) as _,
            Arc::clone(&queue),
            bus.clone(),
        ));

        Self {
            router: create_router(state),
            store,
            executor,
            queue,
            bus,
            temp_dir,
        }
    }

    /// Join a session topic directly on the bus, as a gateway connection would.
    pub fn subscribe(&self, session_id: &str) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.bus.group_add(
            &session_topic(session_id),
            &format!("test-{}", session_id),
            tx,
        );
        rx
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None, None).await
    }

    pub async fn get_as(&self, key: &str, path: &str) -> TestResponse {
        self.request("GET", path, None, Some(key)).await
    }

    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body.to_string()), None).await
    }

    pub async fn post_as(&self, key: &str, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body.to_string()), Some(key))
            .await
    }

    pub async fn put_as(&self, key: &str, path: &str, body: Value) -> TestResponse {
        self.request("PUT", path, Some(body.to_string()), Some(key))
            .await
    }

    pub async fn delete_as(&self, key: &str, path: &str) -> TestResponse {
        self.request("DELETE", path, None, Some(key)).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        self.request("POST", path, Some(body.to_string()), None).await
    }

    async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<String>,
        api_key: Option<&str>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(key) = api_key {
            builder = builder.header("X-API-Key", key);
        }
        let request = match body {
            Some(body) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(body)),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}

/// Receive events until the terminal one, failing after `limit`.
pub async fn collect_until_terminal(
    rx: &mut EventReceiver,
    limit: Duration,
) -> Vec<scriptrelay_core::JobEvent> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(limit, rx.recv())
            .await
            .expect("Timed out waiting for events")
            .expect("Bus channel closed");
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            return events;
        }
    }
}

/// Splash stand-in answering every `/execute` with a fixed JSON body.
pub async fn spawn_fake_splash(body: Value) -> SocketAddr {
    let app = Router::new().route(
        "/execute",
        post(move |Json(_request): Json<Value>| {
            let body = body.clone();
            async move { Json(body) }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind fake Splash");
    let addr = listener.local_addr().expect("Failed to read fake Splash address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    addr
}
