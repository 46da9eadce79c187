use crate::bridge::host::{HostFrame, MessageEvent};
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::protocol::{FrameMessage, HostMessage, OperatingContext};
use metrics::counter;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use url::Url;

/// What the app knows about its host
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ContextState {
    /// Waiting for the host to send a context
    #[default]
    Pending,
    /// Latest context received from the host
    Ready(OperatingContext),
    /// Not embedded in a host frame
    Unavailable,
}

impl ContextState {
    pub fn context(&self) -> Option<&OperatingContext> {
        match self {
            ContextState::Ready(context) => Some(context),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ContextState::Ready(_))
    }
}

/// What the bridge did with one inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    /// Context replaced
    Accepted,
    /// Sent by our own window
    IgnoredEcho,
    /// Sent from an origin other than the host's
    RejectedOrigin,
    /// Declared type carries no context
    Unrecognized,
    /// Context-typed message failed validation
    Malformed(String),
    /// Bridge not initialized, unavailable or shut down
    NotListening,
}

impl MessageOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageOutcome::Accepted => "accepted",
            MessageOutcome::IgnoredEcho => "ignored_echo",
            MessageOutcome::RejectedOrigin => "rejected_origin",
            MessageOutcome::Unrecognized => "unrecognized",
            MessageOutcome::Malformed(_) => "malformed",
            MessageOutcome::NotListening => "not_listening",
        }
    }
}

enum Lifecycle {
    Idle,
    Listening {
        origin: String,
        listener: JoinHandle<()>,
    },
    Unavailable,
    ShutDown,
}

struct BridgeInner {
    host: Arc<dyn HostFrame>,
    config: BridgeConfig,
    state: watch::Sender<ContextState>,
    raw: broadcast::Sender<MessageEvent>,
    lifecycle: Mutex<Lifecycle>,
}

/// Handshake with the host frame and owner of the `OperatingContext`.
///
/// `initialize` attaches one listener and announces readiness to the host.
/// Every valid `context`/`setup` message from the host origin replaces the
/// context wholesale; everything else leaves it untouched.
#[derive(Clone)]
pub struct ContextBridge {
    inner: Arc<BridgeInner>,
}

impl ContextBridge {
    pub fn new(host: Arc<dyn HostFrame>, config: BridgeConfig) -> Self {
        let (state, _) = watch::channel(ContextState::Pending);
        let (raw, _) = broadcast::channel(config.raw_tap_capacity.max(1));
        Self {
            inner: Arc::new(BridgeInner {
                host,
                config,
                state,
                raw,
                lifecycle: Mutex::new(Lifecycle::Idle),
            }),
        }
    }

    /// Attach the message listener and post `initialize` to the host.
    ///
    /// Without a referrer the state becomes `Unavailable` and no listener is
    /// attached. If the announcement cannot be posted the listener is detached
    /// again and a later call retries. Once listening, calling this again is a
    /// no-op. Must run inside a Tokio runtime.
    pub fn initialize(&self) -> Result<(), BridgeError> {
        let mut lifecycle = self.inner.lifecycle();
        match &*lifecycle {
            Lifecycle::Idle => {}
            Lifecycle::Listening { .. } => return Ok(()),
            Lifecycle::Unavailable => return Err(BridgeError::ContextUnavailable),
            Lifecycle::ShutDown => return Err(BridgeError::ShutDown),
        }

        let referrer = match self.inner.host.referrer() {
            Some(referrer) if !referrer.trim().is_empty() => referrer,
            _ => {
                warn!("No host referrer, app is not embedded");
                *lifecycle = Lifecycle::Unavailable;
                self.inner.state.send_replace(ContextState::Unavailable);
                return Err(BridgeError::ContextUnavailable);
            }
        };

        let origin = match host_origin(&referrer) {
            Ok(origin) => origin,
            Err(e) => {
                warn!(referrer = %referrer, error = %e, "Unusable host referrer");
                *lifecycle = Lifecycle::Unavailable;
                self.inner.state.send_replace(ContextState::Unavailable);
                return Err(e);
            }
        };

        let mut events = self.inner.host.listen();
        let weak: Weak<BridgeInner> = Arc::downgrade(&self.inner);
        let listener = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.handle(&event);
            }
            debug!("Host message listener detached");
        });

        info!(origin = %origin, "Listening for host context");
        *lifecycle = Lifecycle::Listening {
            origin: origin.clone(),
            listener,
        };
        drop(lifecycle);

        if let Err(e) = self
            .inner
            .host
            .post_to_parent(&FrameMessage::Initialize, &origin)
        {
            warn!(error = %e, "Failed to announce readiness to host");
            // Back to idle so a later initialize() attaches and announces again
            let mut lifecycle = self.inner.lifecycle();
            if matches!(&*lifecycle, Lifecycle::Listening { .. }) {
                let previous = std::mem::replace(&mut *lifecycle, Lifecycle::Idle);
                if let Lifecycle::Listening { listener, .. } = previous {
                    listener.abort();
                }
            }
            return Err(e);
        }
        counter!("procore_embed_handshakes_total").increment(1);
        Ok(())
    }

    /// Process one inbound message as the listener would
    pub fn handle_message(&self, event: &MessageEvent) -> MessageOutcome {
        self.inner.handle(event)
    }

    pub fn current(&self) -> ContextState {
        self.inner.state.borrow().clone()
    }

    pub fn context(&self) -> Option<OperatingContext> {
        self.inner.state.borrow().context().cloned()
    }

    /// Observe context changes
    pub fn subscribe(&self) -> watch::Receiver<ContextState> {
        self.inner.state.subscribe()
    }

    /// Every inbound event, before any filtering
    pub fn raw_messages(&self) -> broadcast::Receiver<MessageEvent> {
        self.inner.raw.subscribe()
    }

    /// Wait for the first context, up to `timeout`.
    ///
    /// The state itself stays `Pending` on timeout; a late context is still accepted.
    pub async fn wait_for_context(&self, timeout: Duration) -> Result<OperatingContext, BridgeError> {
        let mut rx = self.subscribe();
        let settled = rx.wait_for(|state| !matches!(state, ContextState::Pending));

        match tokio::time::timeout(timeout, settled).await {
            Ok(Ok(state)) => match &*state {
                ContextState::Ready(context) => Ok(context.clone()),
                ContextState::Unavailable => Err(BridgeError::ContextUnavailable),
                ContextState::Pending => Err(BridgeError::HandshakeTimeout(timeout)),
            },
            Ok(Err(_)) => Err(BridgeError::ShutDown),
            Err(_) => {
                counter!("procore_embed_handshake_timeouts_total").increment(1);
                warn!(timeout_ms = timeout.as_millis() as u64, "Host did not send a context");
                Err(BridgeError::HandshakeTimeout(timeout))
            }
        }
    }

    /// `wait_for_context` with the configured handshake timeout
    pub async fn handshake(&self) -> Result<OperatingContext, BridgeError> {
        self.wait_for_context(self.inner.config.handshake_timeout).await
    }

    /// Detach the listener. Later messages are not processed.
    pub fn shutdown(&self) {
        let previous = std::mem::replace(&mut *self.inner.lifecycle(), Lifecycle::ShutDown);
        if let Lifecycle::Listening { listener, .. } = previous {
            listener.abort();
            info!("Context bridge shut down");
        }
    }
}

impl BridgeInner {
    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle(&self, event: &MessageEvent) -> MessageOutcome {
        trace!(origin = %event.origin, data = %event.data, "Raw host message");
        // No receivers is fine
        let _ = self.raw.send(event.clone());

        let outcome = self.classify(event);
        counter!("procore_embed_host_messages_total", "outcome" => outcome.as_str()).increment(1);
        outcome
    }

    fn classify(&self, event: &MessageEvent) -> MessageOutcome {
        let host_origin = match &*self.lifecycle() {
            Lifecycle::Listening { origin, .. } => origin.clone(),
            _ => return MessageOutcome::NotListening,
        };

        if event.source == Some(self.host.window_id()) {
            return MessageOutcome::IgnoredEcho;
        }

        if event.origin != host_origin {
            warn!(origin = %event.origin, expected = %host_origin, "Dropping message from foreign origin");
            return MessageOutcome::RejectedOrigin;
        }

        let message = match HostMessage::parse(&event.data) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Dropping malformed host message");
                return MessageOutcome::Malformed(e.to_string());
            }
        };

        let kind = message.kind();
        match message.into_context() {
            Some(context) => {
                info!(
                    message_type = kind.message_type(),
                    company_id = %context.company_id,
                    project_id = %context.project_id,
                    view = %context.view,
                    "Host context received"
                );
                self.state.send_replace(ContextState::Ready(context));
                MessageOutcome::Accepted
            }
            None => {
                debug!("Ignoring host message without context");
                MessageOutcome::Unrecognized
            }
        }
    }
}

impl Drop for BridgeInner {
    fn drop(&mut self) {
        if let Lifecycle::Listening { listener, .. } = &*self.lifecycle() {
            listener.abort();
        }
    }
}

/// Serialized origin (`scheme://host[:port]`) of the embedding page
fn host_origin(referrer: &str) -> Result<String, BridgeError> {
    let url = Url::parse(referrer).map_err(|e| BridgeError::InvalidOrigin(e.to_string()))?;
    let origin = url.origin();
    if !origin.is_tuple() {
        return Err(BridgeError::InvalidOrigin(referrer.to_string()));
    }
    Ok(origin.ascii_serialization())
}
