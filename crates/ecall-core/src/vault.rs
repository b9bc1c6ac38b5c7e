use std::sync::Mutex;

use crate::errors::EcallError;
use crate::events::Session;
use crate::sync::lock;

/// Persists the established session across restarts.
pub trait SessionVault: Send + Sync {
    fn load(&self) -> Result<Option<Session>, EcallError>;
    fn store(&self, session: &Session) -> Result<(), EcallError>;
    fn clear(&self) -> Result<(), EcallError>;
}

/// Desktop secure storage (Keychain/libsecret/Credential Manager).
#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
pub struct KeyringVault {
    entry: keyring::Entry,
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
impl KeyringVault {
    pub fn new(service: &str, account: &str) -> Result<Self, EcallError> {
        let entry =
            keyring::Entry::new(service, account).map_err(|e| EcallError::Vault(e.to_string()))?;
        Ok(Self { entry })
    }
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
impl SessionVault for KeyringVault {
    fn load(&self) -> Result<Option<Session>, EcallError> {
        match self.entry.get_password() {
            Ok(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| EcallError::Vault(format!("stored session unreadable: {e}"))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(EcallError::Vault(e.to_string())),
        }
    }

    fn store(&self, session: &Session) -> Result<(), EcallError> {
        let json = serde_json::to_string(session).map_err(|e| EcallError::Vault(e.to_string()))?;
        self.entry
            .set_password(&json)
            .map_err(|e| EcallError::Vault(e.to_string()))
    }

    fn clear(&self) -> Result<(), EcallError> {
        match self.entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(EcallError::Vault(e.to_string())),
        }
    }
}

#[derive(Default)]
pub struct MemoryVault {
    session: Mutex<Option<Session>>,
}

impl SessionVault for MemoryVault {
    fn load(&self) -> Result<Option<Session>, EcallError> {
        Ok(lock(&self.session).clone())
    }

    fn store(&self, session: &Session) -> Result<(), EcallError> {
        *lock(&self.session) = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), EcallError> {
        lock(&self.session).take();
        Ok(())
    }
}
