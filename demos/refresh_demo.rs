//! Runs a small API whose access tokens expire after two seconds, then drives
//! it with bursts of concurrent requests.
//!
//! ```text
//! RUST_LOG=authed_http=debug cargo run --example refresh_demo
//! ```
//!
//! The second burst hits an expired token: exactly one refresh is issued and
//! every request in the burst is replayed with the new token.

use anyhow::Context;
use authed_http::{ClientConfig, JsonFileStore, RequestEnvelope, SessionClient, SignOut};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const ACCESS_TTL: Duration = Duration::from_secs(2);

#[derive(Default)]
struct MockApi {
    access: Mutex<HashMap<String, Instant>>,
    refresh: Mutex<HashSet<String>>,
    issued: AtomicU64,
    refreshes: AtomicU64,
}

impl MockApi {
    fn issue(&self) -> (String, String) {
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        let access = format!("access-{}", n);
        let refresh = format!("refresh-{}", n);
        self.access.lock().insert(access.clone(), Instant::now());
        self.refresh.lock().insert(refresh.clone());
        (access, refresh)
    }

    fn check(&self, headers: &HeaderMap) -> Result<(), Response> {
        let token = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(authed_http::protocol::parse_bearer)
            .unwrap_or_default();

        match self.access.lock().get(token) {
            Some(issued) if issued.elapsed() < ACCESS_TTL => Ok(()),
            Some(_) => Err(unauthorized("token.expired")),
            None => Err(unauthorized("token.invalid")),
        }
    }
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "status": "error", "message": message })),
    )
        .into_response()
}

async fn sign_in(State(api): State<Arc<MockApi>>, Json(body): Json<Value>) -> Response {
    if body["password"] != "123456" {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "status": "error", "message": "E-mail and/or password incorrect." })),
        )
            .into_response();
    }
    let (token, refresh_token) = api.issue();
    Json(json!({
        "user": { "id": 1, "name": "Ana", "email": body["email"] },
        "token": token,
        "refresh_token": refresh_token,
    }))
    .into_response()
}

async fn refresh(State(api): State<Arc<MockApi>>, Json(body): Json<Value>) -> Response {
    let presented = body["refreshToken"].as_str().unwrap_or_default();
    if !api.refresh.lock().remove(presented) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "status": "error", "message": "Invalid refresh token." })),
        )
            .into_response();
    }
    api.refreshes.fetch_add(1, Ordering::SeqCst);
    let (access, refresh) = api.issue();
    Json(json!({ "accessToken": access, "refreshToken": refresh })).into_response()
}

async fn history(State(api): State<Arc<MockApi>>, headers: HeaderMap) -> Response {
    if let Err(rejected) = api.check(&headers) {
        return rejected;
    }
    Json(json!([{ "exercise_id": 3 }])).into_response()
}

async fn record(
    State(api): State<Arc<MockApi>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(rejected) = api.check(&headers) {
        return rejected;
    }
    (StatusCode::CREATED, Json(body)).into_response()
}

async fn burst(client: &SessionClient, label: &str) -> anyhow::Result<()> {
    let calls = (0..5).map(|i| {
        let client = client.clone();
        tokio::spawn(async move {
            if i % 2 == 0 {
                client.get("/history").await
            } else {
                client
                    .send(RequestEnvelope::post("/history").with_json(json!({ "exercise_id": i })))
                    .await
            }
        })
    });

    for (i, joined) in futures::future::join_all(calls).await.into_iter().enumerate() {
        match joined? {
            Ok(response) => tracing::info!(burst = label, request = i, status = response.status, "ok"),
            Err(e) => tracing::error!(burst = label, request = i, error = %e, "failed"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let api = Arc::new(MockApi::default());
    let app = Router::new()
        .route("/sessions", post(sign_in))
        .route("/sessions/refresh-token", post(refresh))
        .route("/history", get(history).post(record))
        .with_state(api.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "mock api stopped");
        }
    });

    let dir = tempfile::tempdir()?;
    let client = SessionClient::new(ClientConfig::with_base_url(format!("http://{}", addr)))?;
    let store = Arc::new(JsonFileStore::new(dir.path().join("session.json")));
    let sign_out = SignOut::new(client.session().clone(), store.clone())
        .with_profile_store(store.clone())
        .on_sign_out(|| tracing::warn!("session ended, sign in again"));
    let coordinator = Arc::new(client.coordinator(store, sign_out)?);
    let _handle = client.intercept(coordinator.clone());

    let user = client
        .sign_in("ana@example.com", "123456")
        .await
        .context("sign in")?;
    tracing::info!(name = %user["name"], "signed in");

    burst(&client, "fresh").await?;
    tokio::time::sleep(ACCESS_TTL + Duration::from_millis(500)).await;
    burst(&client, "expired").await?;

    tracing::info!(
        refresh_calls = api.refreshes.load(Ordering::SeqCst),
        coordinator_refreshes = coordinator.refresh_count(),
        "done"
    );

    client.sign_out().await;
    Ok(())
}
