use std::sync::Arc;

use crate::auth::{BotCheckFactory, IdentityProvider};
use crate::call::MediaSdk;
use crate::chat::MessageStore;
use crate::config::{AppConfig, ConfigStore};
use crate::events::EventEmitter;
use crate::memory::{
    InvisibleBotCheckFactory, MemoryIdentity, MemoryMediaNetwork, MemoryMessageStore,
};

/// Service clients, constructed once at process start and handed to every
/// screen by reference.
#[derive(Clone)]
pub struct AppServices {
    pub identity: Arc<dyn IdentityProvider>,
    pub store: Arc<dyn MessageStore>,
    pub media: Arc<dyn MediaSdk>,
    pub bot_checks: Arc<dyn BotCheckFactory>,
    pub config: AppConfig,
    pub config_store: Option<Arc<ConfigStore>>,
    pub emitter: EventEmitter,
}

impl AppServices {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn MessageStore>,
        media: Arc<dyn MediaSdk>,
        bot_checks: Arc<dyn BotCheckFactory>,
        config: AppConfig,
    ) -> Self {
        Self {
            identity,
            store,
            media,
            bot_checks,
            config,
            config_store: None,
            emitter: EventEmitter::new(),
        }
    }

    /// Take the config from a persistent store and write user preferences
    /// back to it.
    pub fn with_config_store(mut self, store: Arc<ConfigStore>) -> Self {
        self.config = store.get();
        self.config_store = Some(store);
        self
    }
}

/// Handles on the in-process backends behind an offline `AppServices`.
#[derive(Clone)]
pub struct MemoryBackends {
    pub identity: Arc<MemoryIdentity>,
    pub store: Arc<MemoryMessageStore>,
    pub network: MemoryMediaNetwork,
    pub bot_checks: Arc<InvisibleBotCheckFactory>,
}

impl MemoryBackends {
    pub fn new() -> Self {
        Self {
            identity: Arc::new(MemoryIdentity::new()),
            store: Arc::new(MemoryMessageStore::new()),
            network: MemoryMediaNetwork::new(),
            bot_checks: Arc::new(InvisibleBotCheckFactory::new()),
        }
    }

    /// Services for one participant. Participants built from the same
    /// backends share the chat and the media room.
    pub fn services(&self, participant_id: &str, config: AppConfig) -> AppServices {
        AppServices::new(
            self.identity.clone(),
            self.store.clone(),
            Arc::new(self.network.sdk(participant_id)),
            self.bot_checks.clone(),
            config,
        )
    }
}

impl Default for MemoryBackends {
    fn default() -> Self {
        Self::new()
    }
}
