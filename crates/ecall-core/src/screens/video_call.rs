use crate::call::CallManager;
use crate::errors::EcallError;
use crate::events::CallState;
use crate::services::AppServices;
use crate::tracks::RenderTargets;

/// One-room video call, joined manually. Owns the media session.
pub struct VideoCallScreen {
    call: CallManager,
}

impl VideoCallScreen {
    pub fn new(services: &AppServices) -> Self {
        Self {
            call: CallManager::new(
                services.media.clone(),
                services.config.media.clone(),
                services.emitter.clone(),
            ),
        }
    }

    pub fn state(&self) -> CallState {
        self.call.state()
    }

    pub fn primary_action_label(&self) -> &'static str {
        if self.call.is_joined() { "Leave Call" } else { "Join Call" }
    }

    /// The Join/Leave button.
    pub async fn on_primary_action(&self) -> Result<(), EcallError> {
        if self.call.is_joined() {
            self.call.leave().await
        } else {
            self.call.join().await
        }
    }

    pub fn render_targets(&self) -> RenderTargets {
        self.call.render_targets()
    }

    pub fn set_remote_audio_audible(&self, audible: bool) {
        self.call.set_remote_audio_audible(audible);
    }

    pub fn call(&self) -> &CallManager {
        &self.call
    }

    pub async fn unmount(&self) {
        self.call.unmount().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::services::MemoryBackends;

    #[tokio::test]
    async fn button_toggles_between_join_and_leave() {
        let backends = MemoryBackends::new();
        let screen = VideoCallScreen::new(&backends.services("alice", AppConfig::default()));

        assert_eq!(screen.primary_action_label(), "Join Call");
        screen.on_primary_action().await.unwrap();
        assert_eq!(screen.primary_action_label(), "Leave Call");
        assert_eq!(backends.network.members("ecall-room"), ["alice"]);

        screen.on_primary_action().await.unwrap();
        assert_eq!(screen.primary_action_label(), "Join Call");
        assert_eq!(screen.state(), CallState::Idle);
    }

    #[tokio::test]
    async fn unmount_releases_the_session() {
        let backends = MemoryBackends::new();
        let screen = VideoCallScreen::new(&backends.services("alice", AppConfig::default()));
        screen.on_primary_action().await.unwrap();

        screen.unmount().await;
        assert_eq!(backends.network.active_local_tracks("alice"), 0);
        assert!(backends.network.members("ecall-room").is_empty());
    }
}
