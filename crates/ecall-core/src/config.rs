use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::errors::EcallError;
use crate::sync::lock;

pub const DEFAULT_ROOM: &str = "ecall-room";
pub const DEFAULT_PHONE_PREFIX: &str = "+88";

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct FirebaseConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub auth_domain: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    Vp8,
    H264,
}

/// `rtc` is routed many-to-many, `live` is broadcaster/audience.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMode {
    #[default]
    Rtc,
    Live,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MediaConfig {
    /// Application identifier for the media relay network. Any holder of it
    /// can join the room.
    #[serde(default)]
    pub app_id: String,
    #[serde(default = "default_room")]
    pub room: String,
    #[serde(default)]
    pub codec: VideoCodec,
    #[serde(default)]
    pub mode: ChannelMode,
}

fn default_room() -> String {
    DEFAULT_ROOM.to_string()
}

fn default_phone_prefix() -> String {
    DEFAULT_PHONE_PREFIX.to_string()
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            room: default_room(),
            codec: VideoCodec::default(),
            mode: ChannelMode::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub firebase: FirebaseConfig,
    #[serde(default)]
    pub media: MediaConfig,
    /// Country prefix prepended to the number typed on the Login screen.
    #[serde(default = "default_phone_prefix")]
    pub phone_prefix: String,
    #[serde(default)]
    pub last_phone_number: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            firebase: FirebaseConfig::default(),
            media: MediaConfig::default(),
            phone_prefix: default_phone_prefix(),
            last_phone_number: None,
        }
    }
}

impl AppConfig {
    /// Parse a config strictly. `ConfigStore` is the lenient loader.
    pub fn from_json(json: &str) -> Result<Self, EcallError> {
        serde_json::from_str(json).map_err(|e| EcallError::Config(e.to_string()))
    }
}

/// `config.json` in the application data directory.
pub struct ConfigStore {
    config: Mutex<AppConfig>,
    file_path: PathBuf,
}

impl ConfigStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let file_path = data_dir.as_ref().join("config.json");
        let config = Self::load(&file_path);
        Self {
            config: Mutex::new(config),
            file_path,
        }
    }

    pub fn get(&self) -> AppConfig {
        lock(&self.config).clone()
    }

    pub fn set_last_phone_number(&self, phone: Option<String>) -> Result<(), EcallError> {
        lock(&self.config).last_phone_number = phone;
        self.save()
    }

    fn save(&self) -> Result<(), EcallError> {
        let config = self.get();
        if let Some(parent) = self.file_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| EcallError::Config(e.to_string()))?;
        }
        let json =
            serde_json::to_string_pretty(&config).map_err(|e| EcallError::Config(e.to_string()))?;
        std::fs::write(&self.file_path, json).map_err(|e| EcallError::Config(e.to_string()))
    }

    fn load(path: &Path) -> AppConfig {
        match std::fs::read_to_string(path) {
            Ok(contents) => AppConfig::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("ignoring unreadable {}: {e}", path.display());
                AppConfig::default()
            }),
            Err(_) => AppConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_match_the_shared_room() {
        let c = AppConfig::default();
        assert_eq!(c.media.room, "ecall-room");
        assert_eq!(c.media.codec, VideoCodec::Vp8);
        assert_eq!(c.media.mode, ChannelMode::Rtc);
        assert_eq!(c.phone_prefix, "+88");
        assert!(c.last_phone_number.is_none());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        assert_eq!(store.get(), AppConfig::default());
    }

    #[test]
    fn last_phone_number_persists() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = ConfigStore::new(dir.path());
            store.set_last_phone_number(Some("1711000000".to_string())).unwrap();
        }
        let store = ConfigStore::new(dir.path());
        assert_eq!(store.get().last_phone_number.as_deref(), Some("1711000000"));
    }

    #[test]
    fn corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("config.json"), "{{ nope").unwrap();
        let store = ConfigStore::new(dir.path());
        assert_eq!(store.get(), AppConfig::default());
    }

    #[test]
    fn partial_json_uses_serde_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.json"),
            r#"{"media":{"app_id":"abc","codec":"h264"},"firebase":{"api_key":"k","project_id":"ecall"}}"#,
        )
        .unwrap();
        let c = ConfigStore::new(dir.path()).get();
        assert_eq!(c.media.app_id, "abc");
        assert_eq!(c.media.codec, VideoCodec::H264);
        assert_eq!(c.media.room, "ecall-room");
        assert_eq!(c.firebase.project_id, "ecall");
        assert_eq!(c.phone_prefix, "+88");
    }

    #[test]
    fn strict_parse_reports_config_error() {
        assert!(matches!(AppConfig::from_json("[]"), Err(EcallError::Config(_))));
    }
}
