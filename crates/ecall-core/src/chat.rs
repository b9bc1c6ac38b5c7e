use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use tokio::sync::watch;

use crate::errors::EcallError;
use crate::events::{AppEvent, ChatMessage, EventEmitter, NewMessage};

/// Collection holding the group chat.
pub const MESSAGES_COLLECTION: &str = "messages";
/// Server-assigned creation timestamp field the chat is ordered by.
pub const CREATED_AT_FIELD: &str = "createdAt";

/// Ordered document store holding chat messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Live subscription to the collection ordered ascending by `order_field`.
    /// Every change produces a complete snapshot, never a delta.
    fn subscribe_ordered(
        &self,
        collection: &str,
        order_field: &str,
    ) -> Result<MessageSubscription, EcallError>;

    /// Append a record. The store assigns the id and `createdAt`.
    /// Returns the new document id.
    async fn append(&self, collection: &str, record: NewMessage) -> Result<String, EcallError>;
}

/// Display order: creation timestamp ascending, ties broken by id.
pub fn order_messages(messages: &mut [ChatMessage]) {
    messages.sort_by(|a, b| {
        a.created_at_ms
            .cmp(&b.created_at_ms)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Snapshot stream over a store subscription. The first call to `next`
/// yields the snapshot at subscribe time.
pub struct MessageSubscription {
    rx: watch::Receiver<Vec<ChatMessage>>,
    primed: bool,
}

impl MessageSubscription {
    pub fn new(rx: watch::Receiver<Vec<ChatMessage>>) -> Self {
        Self { rx, primed: false }
    }

    /// Next ordered snapshot, or `None` once the store is gone.
    pub async fn next(&mut self) -> Option<Vec<ChatMessage>> {
        if self.primed {
            self.rx.changed().await.ok()?;
        }
        self.primed = true;
        let mut snapshot = self.rx.borrow_and_update().clone();
        order_messages(&mut snapshot);
        Some(snapshot)
    }

    pub fn into_stream(self) -> BoxStream<'static, Vec<ChatMessage>> {
        Box::pin(stream::unfold(self, |mut sub| async move {
            sub.next().await.map(|snapshot| (snapshot, sub))
        }))
    }
}

/// Chat wiring on top of a `MessageStore`.
#[derive(Clone)]
pub struct ChatService {
    store: Arc<dyn MessageStore>,
    emitter: EventEmitter,
}

impl ChatService {
    pub fn new(store: Arc<dyn MessageStore>, emitter: EventEmitter) -> Self {
        Self { store, emitter }
    }

    pub fn subscribe(&self) -> Result<MessageSubscription, EcallError> {
        self.store
            .subscribe_ordered(MESSAGES_COLLECTION, CREATED_AT_FIELD)
    }

    /// Append a message from `sender`. Whitespace-only text is ignored and
    /// yields `Ok(None)`.
    pub async fn send_message(
        &self,
        sender: &str,
        text: &str,
    ) -> Result<Option<String>, EcallError> {
        if text.trim().is_empty() {
            return Ok(None);
        }

        let record = NewMessage {
            text: text.to_string(),
            sender: sender.to_string(),
        };
        match self.store.append(MESSAGES_COLLECTION, record).await {
            Ok(id) => {
                tracing::debug!("message appended: id={id}");
                Ok(Some(id))
            }
            Err(e) => {
                tracing::warn!("message append failed: {e}");
                self.emitter.emit(AppEvent::MessageRejected(e.to_string()));
                Err(e)
            }
        }
    }
}
