//! Host frame abstraction
//!
//! The embedded app only sees its parent through `HostFrame`: the referrer
//! it was loaded from, a way to post to the parent, and a stream of inbound
//! `message` events.

use crate::error::BridgeError;
use crate::protocol::FrameMessage;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Identity of a browsing context, used to recognise our own echoes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(Uuid);

impl WindowId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WindowId {
    fn default() -> Self {
        Self::new()
    }
}

/// An inbound `message` event
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    /// Origin of the sender, e.g. `https://app.procore.com`
    pub origin: String,
    /// Sending window, when known
    pub source: Option<WindowId>,
    pub data: Value,
}

impl MessageEvent {
    pub fn new(origin: impl Into<String>, data: Value) -> Self {
        Self {
            origin: origin.into(),
            source: None,
            data,
        }
    }

    pub fn with_source(mut self, source: WindowId) -> Self {
        self.source = Some(source);
        self
    }
}

/// The frame the app is embedded in
pub trait HostFrame: Send + Sync {
    /// Window the app itself runs in
    fn window_id(&self) -> WindowId;

    /// URL of the embedding page; `None` when loaded top-level
    fn referrer(&self) -> Option<String>;

    /// Post `message` to the parent frame, restricted to `target_origin`
    fn post_to_parent(&self, message: &FrameMessage, target_origin: &str)
    -> Result<(), BridgeError>;

    /// Attach a listener for inbound messages. Dropping the receiver detaches it.
    fn listen(&self) -> mpsc::UnboundedReceiver<MessageEvent>;
}

/// A message posted to the parent frame
#[derive(Debug, Clone, PartialEq)]
pub struct PostedMessage {
    pub message: FrameMessage,
    pub target_origin: String,
}

#[derive(Default)]
struct ChannelHostState {
    listeners: Vec<mpsc::UnboundedSender<MessageEvent>>,
    posted: Vec<PostedMessage>,
}

/// In-process `HostFrame` driven through channels.
///
/// Clones share the same frame, so one clone can be handed to a
/// `ContextBridge` while another plays the parent.
#[derive(Clone)]
pub struct ChannelHost {
    window_id: WindowId,
    referrer: Option<String>,
    state: Arc<Mutex<ChannelHostState>>,
}

impl ChannelHost {
    pub fn new(referrer: Option<String>) -> Self {
        Self {
            window_id: WindowId::new(),
            referrer,
            state: Arc::new(Mutex::new(ChannelHostState::default())),
        }
    }

    /// A frame embedded by the page at `referrer`
    pub fn embedded_in(referrer: impl Into<String>) -> Self {
        Self::new(Some(referrer.into()))
    }

    /// A frame loaded top-level
    pub fn top_level() -> Self {
        Self::new(None)
    }

    fn state(&self) -> MutexGuard<'_, ChannelHostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver `event` to every attached listener, returning how many received it
    pub fn dispatch(&self, event: MessageEvent) -> usize {
        let mut state = self.state();
        state
            .listeners
            .retain(|listener| listener.send(event.clone()).is_ok());
        state.listeners.len()
    }

    /// Listeners still attached
    pub fn listener_count(&self) -> usize {
        let mut state = self.state();
        state.listeners.retain(|listener| !listener.is_closed());
        state.listeners.len()
    }

    /// Everything posted to the parent so far
    pub fn posted(&self) -> Vec<PostedMessage> {
        self.state().posted.clone()
    }
}

impl HostFrame for ChannelHost {
    fn window_id(&self) -> WindowId {
        self.window_id
    }

    fn referrer(&self) -> Option<String> {
        self.referrer.clone()
    }

    fn post_to_parent(
        &self,
        message: &FrameMessage,
        target_origin: &str,
    ) -> Result<(), BridgeError> {
        if self.referrer.is_none() {
            return Err(BridgeError::Post("no parent frame".to_string()));
        }
        debug!(target_origin, "Posting message to parent frame");
        self.state().posted.push(PostedMessage {
            message: message.clone(),
            target_origin: target_origin.to_string(),
        });
        Ok(())
    }

    fn listen(&self) -> mpsc::UnboundedReceiver<MessageEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state().listeners.push(tx);
        rx
    }
}
