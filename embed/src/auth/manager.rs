use crate::auth::state::{Completion, SessionPhase, SessionSnapshot};
use crate::auth::transport::{BackendTransport, HttpBackend};
use crate::config::AuthConfig;
use crate::error::{SessionError, TransportError};
use crate::protocol::{BackendStatus, RefreshOutcome};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use metrics::{counter, histogram};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Public auth operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    CheckStatus,
    Refresh,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::CheckStatus => "check_status",
            Operation::Refresh => "refresh",
        }
    }
}

/// The single outstanding operation
struct InFlight {
    operation: Operation,
    seq: u64,
    result: Shared<BoxFuture<'static, bool>>,
}

struct Inner {
    transport: Arc<dyn BackendTransport>,
    config: AuthConfig,
    state: watch::Sender<SessionSnapshot>,
    in_flight: Mutex<Option<InFlight>>,
    next_seq: AtomicU64,
}

/// Auth session against the backend OAuth broker.
///
/// Owns the current `BackendStatus` and session error. At most one status or
/// refresh operation is outstanding: callers arriving while one runs await
/// its result instead of issuing another request. Completions carry a
/// monotonic sequence number and a stale one never overwrites a newer result.
///
/// Cloning is cheap; clones share the same session.
#[derive(Clone)]
pub struct AuthSessionManager {
    inner: Arc<Inner>,
}

impl AuthSessionManager {
    pub fn new(transport: Arc<dyn BackendTransport>, config: AuthConfig) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                state,
                in_flight: Mutex::new(None),
                next_seq: AtomicU64::new(0),
            }),
        }
    }

    /// Session manager talking HTTP to the configured broker
    pub fn from_config(config: AuthConfig) -> Result<Self, TransportError> {
        let backend = HttpBackend::from_config(&config)?;
        Ok(Self::new(Arc::new(backend), config))
    }

    /// Fetch backend status; on an unauthenticated status, attempt one refresh.
    ///
    /// Resolves to whether the session is authenticated afterwards.
    pub async fn check_status(&self) -> bool {
        self.run(Operation::CheckStatus).await
    }

    /// Ask the broker to refresh both provider sessions.
    pub async fn refresh(&self) -> bool {
        self.run(Operation::Refresh).await
    }

    /// Observe session changes
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.state.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.state.borrow().clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.state.borrow().phase
    }

    pub fn status(&self) -> Option<BackendStatus> {
        self.inner.state.borrow().status.clone()
    }

    pub fn error(&self) -> Option<SessionError> {
        self.inner.state.borrow().error.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.borrow().is_authenticated()
    }

    /// Operation currently outstanding, if any
    pub async fn in_flight(&self) -> Option<Operation> {
        self.inner
            .in_flight
            .lock()
            .await
            .as_ref()
            .map(|flight| flight.operation)
    }

    /// Re-check the session every `every`, starting immediately.
    ///
    /// Ticks are skipped while the session waits for a manual provider
    /// login. Abort the handle when the hosting page goes away.
    pub fn start_polling(&self, every: Duration) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;

                if let Some(error) = manager.error()
                    && error.requires_user_action()
                {
                    debug!(error = %error, "Skipping status poll until user logs in");
                    continue;
                }

                manager.check_status().await;
            }
        })
    }

    /// Drop any outstanding operation. Callers already awaiting it keep their result.
    pub async fn shutdown(&self) {
        if let Some(flight) = self.inner.in_flight.lock().await.take() {
            debug!(
                operation = flight.operation.as_str(),
                seq = flight.seq,
                "Released in-flight auth operation on shutdown"
            );
        }
    }

    async fn run(&self, operation: Operation) -> bool {
        let result = {
            let mut slot = self.inner.in_flight.lock().await;
            match slot.as_ref() {
                Some(flight) => {
                    counter!("procore_embed_single_flight_joins_total", "operation" => operation.as_str())
                        .increment(1);
                    debug!(
                        requested = operation.as_str(),
                        in_flight = flight.operation.as_str(),
                        seq = flight.seq,
                        "Joining in-flight auth operation"
                    );
                    flight.result.clone()
                }
                None => {
                    let seq = self.inner.next_seq();
                    let inner = Arc::clone(&self.inner);
                    let result = inner.execute(operation, seq).boxed().shared();
                    *slot = Some(InFlight {
                        operation,
                        seq,
                        result: result.clone(),
                    });
                    result
                }
            }
        };

        result.await
    }
}

impl Inner {
    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn execute(self: Arc<Self>, operation: Operation, seq: u64) -> bool {
        let start = Instant::now();

        let authenticated = match operation {
            Operation::CheckStatus => self.check(seq).await,
            Operation::Refresh => self.refresh(seq).await,
        };

        histogram!("procore_embed_auth_operation_duration_seconds", "operation" => operation.as_str())
            .record(start.elapsed());

        let mut slot = self.in_flight.lock().await;
        if slot.as_ref().is_some_and(|flight| flight.seq == seq) {
            *slot = None;
        }

        authenticated
    }

    async fn check(&self, seq: u64) -> bool {
        counter!("procore_embed_status_checks_total").increment(1);
        self.set_phase(SessionPhase::Checking);

        match self.with_retry("status", || self.transport.status()).await {
            Ok(status) => {
                let authenticated = status.is_authenticated();
                info!(seq, authenticated, "Auth status received");

                if !self.commit(seq, Completion::Status(status)) {
                    return self.state.borrow().is_authenticated();
                }
                if authenticated {
                    return true;
                }

                // Auto-recover once per check; the chained refresh never checks again
                let refresh_seq = self.next_seq();
                debug!(seq, refresh_seq, "Status unauthenticated, attempting refresh");
                self.refresh(refresh_seq).await
            }
            Err(err) => {
                warn!(seq, error = %err, "Auth status check failed");
                self.commit(seq, Completion::Error(SessionError::from(err)));
                false
            }
        }
    }

    async fn refresh(&self, seq: u64) -> bool {
        counter!("procore_embed_refreshes_total").increment(1);
        self.set_phase(SessionPhase::Refreshing);

        let completion = match self.with_retry("refresh", || self.transport.refresh()).await {
            Ok(response) => match response.into_outcome() {
                RefreshOutcome::Refreshed(status) => {
                    info!(seq, "Auth refreshed");
                    Completion::Status(status)
                }
                RefreshOutcome::ProviderAuthRequired(provider) => {
                    warn!(
                        seq,
                        provider = provider.as_str(),
                        "Refresh failed, manual provider login required"
                    );
                    Completion::Error(SessionError::ProviderAuthRequired(provider))
                }
                RefreshOutcome::Rejected(detail) => {
                    warn!(seq, detail = %detail, "Refresh rejected by backend");
                    Completion::Error(SessionError::ServerError(detail))
                }
            },
            Err(err) => {
                warn!(seq, error = %err, "Refresh request failed");
                Completion::Error(SessionError::from(err))
            }
        };

        if let Completion::Error(error) = &completion {
            counter!("procore_embed_refresh_failures_total", "kind" => error.kind()).increment(1);
        }

        self.commit(seq, completion);
        self.state.borrow().is_authenticated()
    }

    /// Run one backend call with the per-request timeout and bounded backoff.
    ///
    /// Only transient failures are retried.
    async fn with_retry<T, F, Fut>(
        &self,
        endpoint: &'static str,
        mut call: F,
    ) -> Result<T, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let retry = &self.config.retry;
        let max_attempts = retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            let result = match tokio::time::timeout(self.config.request_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(self.config.request_timeout)),
            };

            match result {
                Err(err) if err.is_transient() && attempt + 1 < max_attempts => {
                    let delay = retry.delay_for_attempt(attempt);
                    counter!("procore_embed_backend_retries_total", "endpoint" => endpoint)
                        .increment(1);
                    debug!(
                        endpoint,
                        attempt = attempt + 1,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient backend failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn set_phase(&self, phase: SessionPhase) {
        self.state.send_if_modified(|snapshot| {
            if snapshot.phase == phase {
                return false;
            }
            debug!(from = snapshot.phase.as_str(), to = phase.as_str(), "Auth phase transition");
            snapshot.phase = phase;
            true
        });
    }

    fn commit(&self, seq: u64, completion: Completion) -> bool {
        let applied = self
            .state
            .send_if_modified(|snapshot| snapshot.complete(seq, completion));
        if !applied {
            counter!("procore_embed_stale_completions_total").increment(1);
            debug!(seq, current = self.state.borrow().seq, "Dropped stale auth completion");
        }
        applied
    }
}
