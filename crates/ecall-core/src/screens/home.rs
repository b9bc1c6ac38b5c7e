use std::sync::Arc;

use crate::auth::IdentityProvider;
use crate::chat::ChatService;
use crate::errors::EcallError;
use crate::events::Session;
use crate::screens::chat_room::ChatRoomScreen;
use crate::screens::video_call::VideoCallScreen;
use crate::services::AppServices;

/// Home: greeting, logout, chat and video call.
pub struct HomeScreen {
    session: Session,
    identity: Arc<dyn IdentityProvider>,
    chat_room: ChatRoomScreen,
    video_call: VideoCallScreen,
}

impl HomeScreen {
    /// Mount Home for `session`; the chat subscription starts immediately,
    /// the call waits for the user.
    pub fn mount(services: &AppServices, session: Session) -> Result<Self, EcallError> {
        let chat = ChatService::new(services.store.clone(), services.emitter.clone());
        let mut chat_room =
            ChatRoomScreen::new(chat, services.emitter.clone(), session.phone_number.clone());
        chat_room.mount()?;

        Ok(Self {
            session,
            identity: services.identity.clone(),
            chat_room,
            video_call: VideoCallScreen::new(services),
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn title(&self) -> String {
        format!("Welcome, {}", self.session.phone_number)
    }

    pub fn chat_room(&self) -> &ChatRoomScreen {
        &self.chat_room
    }

    pub fn chat_room_mut(&mut self) -> &mut ChatRoomScreen {
        &mut self.chat_room
    }

    pub fn video_call(&self) -> &VideoCallScreen {
        &self.video_call
    }

    /// Sign out. Navigation back to `/` follows from the session stream.
    pub async fn logout(&self) -> Result<(), EcallError> {
        self.identity.sign_out().await
    }

    pub async fn unmount(&mut self) {
        self.chat_room.unmount();
        self.video_call.unmount().await;
    }
}
