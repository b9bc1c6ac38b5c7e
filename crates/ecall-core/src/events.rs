use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::navigator::Route;

/// Events emitted by the core to UI listeners.
#[derive(Debug, Clone)]
pub enum AppEvent {
    SessionChanged(Option<Session>),
    Navigated(Route),
    /// Blocking modal alert for the login flow.
    Alert(String),
    MessagesUpdated(Vec<ChatMessage>),
    MessageRejected(String),
    CallStateChanged(CallState),
    RemoteTrackAttached(RemoteTrackInfo),
    RemoteTrackDetached(RemoteTrackInfo),
    CallFailed(String),
}

/// An authenticated identity established after OTP verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub uid: String,
    pub phone_number: String,
    /// Opaque bearer token issued by the identity provider.
    pub id_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub text: String,
    pub sender: String,
    pub created_at_ms: u64,
}

/// Append record. `createdAt` is always assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub text: String,
    pub sender: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Joining,
    Joined,
    Leaving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrackInfo {
    pub track_id: String,
    pub participant_id: String,
    pub kind: TrackKind,
}

/// Trait for receiving events from the core.
/// Implementations must be Send + Sync (called from tokio tasks).
pub trait AppEventListener: Send + Sync {
    fn on_event(&self, event: AppEvent);
}

/// Internal event emitter that dispatches to registered listeners.
#[derive(Clone, Default)]
pub struct EventEmitter {
    listeners: Arc<RwLock<Vec<Arc<dyn AppEventListener>>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn AppEventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    pub fn emit(&self, event: AppEvent) {
        let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
        for listener in listeners.iter() {
            listener.on_event(event.clone());
        }
    }
}
