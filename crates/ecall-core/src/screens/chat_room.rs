use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use tokio::task::JoinHandle;

use crate::chat::ChatService;
use crate::errors::EcallError;
use crate::events::{AppEvent, ChatMessage, EventEmitter};
use crate::sync::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Left,
    Right,
}

/// One rendered chat bubble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageView {
    pub id: String,
    pub text: String,
    pub align: Alignment,
    /// Shown under bubbles from other participants only.
    pub sender_label: Option<String>,
}

impl MessageView {
    pub fn new(message: &ChatMessage, current_user: &str) -> Self {
        let mine = message.sender == current_user;
        Self {
            id: message.id.clone(),
            text: message.text.clone(),
            align: if mine { Alignment::Right } else { Alignment::Left },
            sender_label: (!mine).then(|| message.sender.clone()),
        }
    }
}

/// Group chat bound to the `messages` collection.
pub struct ChatRoomScreen {
    chat: ChatService,
    emitter: EventEmitter,
    current_user: String,
    messages: Arc<Mutex<Vec<ChatMessage>>>,
    draft: String,
    feed: Option<JoinHandle<()>>,
}

impl ChatRoomScreen {
    pub fn new(chat: ChatService, emitter: EventEmitter, current_user: impl Into<String>) -> Self {
        Self {
            chat,
            emitter,
            current_user: current_user.into(),
            messages: Arc::new(Mutex::new(Vec::new())),
            draft: String::new(),
            feed: None,
        }
    }

    /// Subscribe to the ordered snapshot stream. Idempotent.
    pub fn mount(&mut self) -> Result<(), EcallError> {
        if self.feed.is_some() {
            return Ok(());
        }
        let mut snapshots = self.chat.subscribe()?.into_stream();
        let messages = self.messages.clone();
        let emitter = self.emitter.clone();

        self.feed = Some(tokio::spawn(async move {
            while let Some(snapshot) = snapshots.next().await {
                tracing::debug!("chat snapshot: {} messages", snapshot.len());
                *lock(&messages) = snapshot.clone();
                emitter.emit(AppEvent::MessagesUpdated(snapshot));
            }
            tracing::debug!("chat feed ended");
        }));
        Ok(())
    }

    pub fn unmount(&mut self) {
        if let Some(feed) = self.feed.take() {
            feed.abort();
        }
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    /// Send the draft. It is cleared once the append returns and kept if
    /// the store rejects it.
    pub async fn send(&mut self) -> Result<(), EcallError> {
        if self.chat.send_message(&self.current_user, &self.draft).await?.is_some() {
            self.draft.clear();
        }
        Ok(())
    }

    /// Latest snapshot, in display order.
    pub fn messages(&self) -> Vec<ChatMessage> {
        lock(&self.messages).clone()
    }

    pub fn render(&self) -> Vec<MessageView> {
        self.messages()
            .iter()
            .map(|m| MessageView::new(m, &self.current_user))
            .collect()
    }
}

impl Drop for ChatRoomScreen {
    fn drop(&mut self) {
        self.unmount();
    }
}
