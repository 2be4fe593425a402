//! Minimal Splash stand-in served on an ephemeral port.

use axum::{http::StatusCode, routing::post, Json, Router};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

/// Running fake endpoint answering every `/execute` with a fixed reply.
pub struct FakeSplash {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<Value>>>,
}

impl FakeSplash {
    pub fn url(&self) -> String {
        format!("http://{}/execute", self.addr)
    }

    /// Body of the most recent request.
    pub fn last_request(&self) -> Option<Value> {
        self.requests.lock().unwrap().last().cloned()
    }
}

pub async fn spawn_fake_splash(status: StatusCode, body: Value) -> FakeSplash {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&requests);

    let app = Router::new().route(
        "/execute",
        post(move |Json(request): Json<Value>| {
            let recorded = Arc::clone(&recorded);
            let body = body.clone();
            async move {
                recorded.lock().unwrap().push(request);
                (status, Json(body))
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    FakeSplash { addr, requests }
}
