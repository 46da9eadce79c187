//! Common Test Utilities for Integration Tests
//!
//! A scripted OAuth broker served over real HTTP on an ephemeral port.

#![allow(dead_code)]

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use procore_embed::config::{AuthConfig, RetryConfig};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted broker reply
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: StatusCode,
    pub body: String,
    pub content_type: &'static str,
}

impl Reply {
    pub fn json(status: StatusCode, body: Value) -> Self {
        Self {
            status,
            body: body.to_string(),
            content_type: "application/json",
        }
    }

    pub fn ok(body: Value) -> Self {
        Self::json(StatusCode::OK, body)
    }

    pub fn text(status: StatusCode, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
            content_type: "text/plain",
        }
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        (self.status, [(header::CONTENT_TYPE, self.content_type)], self.body).into_response()
    }
}

#[derive(Default)]
struct Script {
    status: VecDeque<Reply>,
    refresh: VecDeque<Reply>,
    status_hits: usize,
    refresh_hits: usize,
    refresh_delay: Duration,
}

/// Fake backend OAuth broker
#[derive(Clone, Default)]
pub struct FakeBroker {
    script: Arc<Mutex<Script>>,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_status(&self, reply: Reply) -> &Self {
        self.script.lock().unwrap().status.push_back(reply);
        self
    }

    pub fn push_refresh(&self, reply: Reply) -> &Self {
        self.script.lock().unwrap().refresh.push_back(reply);
        self
    }

    /// Hold every refresh response for `delay`
    pub fn delay_refresh(&self, delay: Duration) -> &Self {
        self.script.lock().unwrap().refresh_delay = delay;
        self
    }

    pub fn status_hits(&self) -> usize {
        self.script.lock().unwrap().status_hits
    }

    pub fn refresh_hits(&self) -> usize {
        self.script.lock().unwrap().refresh_hits
    }

    /// Serve the broker on 127.0.0.1 and return its base URL
    pub async fn spawn(&self) -> String {
        let app = Router::new()
            .route("/api/oauth/status", get(status))
            .route("/api/oauth/refresh", post(refresh))
            .with_state(self.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake broker");
        let addr = listener.local_addr().expect("Failed to read broker address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Fake broker failed");
        });

        format!("http://{}", addr)
    }
}

fn unscripted() -> Reply {
    Reply::text(StatusCode::SERVICE_UNAVAILABLE, "unscripted")
}

async fn status(State(broker): State<FakeBroker>) -> Reply {
    let mut script = broker.script.lock().unwrap();
    script.status_hits += 1;
    script.status.pop_front().unwrap_or_else(unscripted)
}

async fn refresh(State(broker): State<FakeBroker>) -> Reply {
    let (reply, delay) = {
        let mut script = broker.script.lock().unwrap();
        script.refresh_hits += 1;
        let reply = script.refresh.pop_front().unwrap_or_else(unscripted);
        (reply, script.refresh_delay)
    };
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    reply
}

/// Base URL nothing listens on
pub async fn unreachable_base_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind probe port");
    let addr = listener.local_addr().expect("Failed to read probe address");
    drop(listener);
    format!("http://{}", addr)
}

/// Auth config pointing at `base_url` with fast retries
pub fn auth_config(base_url: &str) -> AuthConfig {
    AuthConfig {
        backend_base_url: base_url.to_string(),
        request_timeout: Duration::from_secs(2),
        retry: RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
        },
    }
}

/// Initialize tracing for tests (call once per test if needed)
pub fn init_test_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "procore_embed=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}
