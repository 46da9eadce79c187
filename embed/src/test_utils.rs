//! Test Utilities Module
//!
//! Scripted backend transport and status fixtures for unit tests.
//! This module is only compiled when running tests.

#![cfg(test)]

use crate::auth::BackendTransport;
use crate::error::TransportError;
use crate::protocol::{BackendStatus, OAuthInfo, RefreshResponse};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

// ============================================================================
// Fixtures
// ============================================================================

/// Status with both providers in the given states
pub fn status_with(procore: bool, signiflow: bool) -> BackendStatus {
    BackendStatus {
        procore: Some(OAuthInfo {
            authenticated: procore,
            expires_at: None,
        }),
        signiflow: Some(OAuthInfo {
            authenticated: signiflow,
            expires_at: None,
        }),
        authenticated: Some(procore && signiflow),
        ..BackendStatus::default()
    }
}

pub fn authenticated_status() -> BackendStatus {
    status_with(true, true)
}

// ============================================================================
// Mock Transport
// ============================================================================

/// `BackendTransport` answering from scripted queues.
///
/// An exhausted queue answers `Unreachable`. A gated endpoint blocks every
/// call until the gate is notified.
#[derive(Default)]
pub struct MockTransport {
    statuses: Mutex<VecDeque<Result<BackendStatus, TransportError>>>,
    refreshes: Mutex<VecDeque<Result<RefreshResponse, TransportError>>>,
    status_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    status_gate: Mutex<Option<Arc<Notify>>>,
    refresh_gate: Mutex<Option<Arc<Notify>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_status(&self, response: Result<BackendStatus, TransportError>) {
        self.statuses.lock().unwrap().push_back(response);
    }

    pub fn push_refresh(&self, response: Result<RefreshResponse, TransportError>) {
        self.refreshes.lock().unwrap().push_back(response);
    }

    /// Script a refresh answer from its wire body
    pub fn push_refresh_json(&self, body: Value) {
        let response: RefreshResponse =
            serde_json::from_value(body).expect("Invalid refresh fixture");
        self.push_refresh(Ok(response));
    }

    pub fn gate_status(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.status_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn gate_refresh(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.refresh_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` refresh requests have started
    pub async fn wait_for_refresh_calls(&self, count: usize) {
        while self.refresh_calls() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

fn exhausted() -> TransportError {
    TransportError::Unreachable("no scripted response".to_string())
}

#[async_trait]
impl BackendTransport for MockTransport {
    async fn status(&self) -> Result<BackendStatus, TransportError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.status_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(exhausted()))
    }

    async fn refresh(&self) -> Result<RefreshResponse, TransportError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.refresh_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.refreshes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(exhausted()))
    }
}
