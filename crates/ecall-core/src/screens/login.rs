use crate::auth::{BotCheck, ConfirmationHandle, normalize_phone_number};
use crate::errors::EcallError;
use crate::events::{AppEvent, Session};
use crate::navigator::{Navigator, Route};
use crate::services::AppServices;

/// Host container the bot-check widget is mounted in.
pub const BOT_CHECK_CONTAINER: &str = "recaptcha-container";

const INVALID_CODE_ALERT: &str = "Invalid OTP";

/// Phone + OTP login.
///
/// Owns the bot-check widget of the current attempt: a new attempt disposes
/// the previous widget, and so does `unmount`.
pub struct LoginScreen {
    services: AppServices,
    navigator: Navigator,
    phone: String,
    code: String,
    pending: Option<ConfirmationHandle>,
    bot_check: Option<Box<dyn BotCheck>>,
}

impl LoginScreen {
    pub fn new(services: AppServices, navigator: Navigator) -> Self {
        let phone = services.config.last_phone_number.clone().unwrap_or_default();
        Self {
            services,
            navigator,
            phone,
            code: String::new(),
            pending: None,
            bot_check: None,
        }
    }

    pub fn phone(&self) -> &str {
        &self.phone
    }

    pub fn set_phone(&mut self, phone: impl Into<String>) {
        self.phone = phone.into();
    }

    pub fn set_code(&mut self, code: impl Into<String>) {
        self.code = code.into();
    }

    /// True once a code was sent; the screen then shows the code input.
    pub fn awaiting_code(&self) -> bool {
        self.pending.is_some()
    }

    pub fn primary_action_label(&self) -> &'static str {
        if self.awaiting_code() { "Verify OTP" } else { "Send OTP" }
    }

    /// Start a verification challenge for the entered number.
    pub async fn send_code(&mut self) -> Result<(), EcallError> {
        self.dispose_bot_check();

        match self.request_code().await {
            Ok(handle) => {
                tracing::info!("code requested for {}", handle.phone_number);
                self.pending = Some(handle);
                self.remember_phone();
                Ok(())
            }
            Err(e) => {
                tracing::warn!("code request failed: {e}");
                self.alert(e.to_string());
                Err(e)
            }
        }
    }

    async fn request_code(&mut self) -> Result<ConfirmationHandle, EcallError> {
        let phone = normalize_phone_number(&self.services.config.phone_prefix, &self.phone)?;
        let widget = self.services.bot_checks.create(BOT_CHECK_CONTAINER)?;
        let widget = self.bot_check.insert(widget);
        self.services
            .identity
            .request_code(&phone, widget.as_ref())
            .await
    }

    /// Confirm the entered code. Without a pending challenge this is a
    /// no-op returning `Ok(None)`.
    pub async fn verify_code(&mut self) -> Result<Option<Session>, EcallError> {
        let Some(handle) = &self.pending else {
            return Ok(None);
        };

        match self
            .services
            .identity
            .confirm_code(handle, self.code.trim())
            .await
        {
            Ok(session) => {
                self.navigator.navigate(Route::Home);
                Ok(Some(session))
            }
            Err(e) => {
                tracing::warn!("code confirmation failed: {e}");
                self.alert(INVALID_CODE_ALERT.to_string());
                Err(e)
            }
        }
    }

    pub fn unmount(&mut self) {
        self.dispose_bot_check();
    }

    fn dispose_bot_check(&mut self) {
        if let Some(widget) = self.bot_check.take() {
            tracing::debug!("disposing bot-check {}", widget.id());
            widget.dispose();
        }
    }

    fn remember_phone(&self) {
        if let Some(store) = &self.services.config_store {
            if let Err(e) = store.set_last_phone_number(Some(self.phone.trim().to_string())) {
                tracing::warn!("could not remember phone number: {e}");
            }
        }
    }

    fn alert(&self, message: String) {
        self.services.emitter.emit(AppEvent::Alert(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, ConfigStore};
    use crate::events::tests::EventCapture;
    use crate::services::MemoryBackends;
    use std::sync::Arc;

    fn screen(backends: &MemoryBackends) -> (LoginScreen, Navigator, Arc<EventCapture>) {
        let services = backends.services("alice", AppConfig::default());
        let capture = Arc::new(EventCapture::default());
        services.emitter.add_listener(capture.clone());
        let navigator = Navigator::new(services.emitter.clone());
        (LoginScreen::new(services, navigator.clone()), navigator, capture)
    }

    fn alerts(capture: &EventCapture) -> Vec<String> {
        capture
            .snapshot()
            .into_iter()
            .filter_map(|e| match e {
                AppEvent::Alert(msg) => Some(msg),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn correct_code_establishes_session_and_goes_home() {
        let backends = MemoryBackends::new();
        backends.identity.expect_code("+881711000000", "123456");
        let (mut login, nav, _) = screen(&backends);

        assert_eq!(login.primary_action_label(), "Send OTP");
        login.set_phone("1711000000");
        login.send_code().await.unwrap();
        assert_eq!(login.primary_action_label(), "Verify OTP");

        login.set_code("123456");
        let session = login.verify_code().await.unwrap().unwrap();
        assert_eq!(session.phone_number, "+881711000000");
        assert_eq!(nav.current(), Route::Home);
    }

    #[tokio::test]
    async fn wrong_code_alerts_and_stays() {
        let backends = MemoryBackends::new();
        backends.identity.expect_code("+881711000000", "123456");
        let (mut login, nav, capture) = screen(&backends);

        login.set_phone("1711000000");
        login.send_code().await.unwrap();
        login.set_code("654321");
        assert_eq!(login.verify_code().await.unwrap_err(), EcallError::InvalidCode);
        assert_eq!(alerts(&capture), ["Invalid OTP"]);
        assert_eq!(nav.current(), Route::Login);
        assert!(login.awaiting_code());
    }

    #[tokio::test]
    async fn verify_without_pending_challenge_is_a_noop() {
        let backends = MemoryBackends::new();
        let (mut login, _, capture) = screen(&backends);
        login.set_code("123456");
        assert_eq!(login.verify_code().await.unwrap(), None);
        assert!(capture.snapshot().is_empty());
    }

    #[tokio::test]
    async fn bad_number_alerts_without_reaching_the_provider() {
        let backends = MemoryBackends::new();
        let (mut login, _, capture) = screen(&backends);
        login.set_phone("12ab");
        let err = login.send_code().await.unwrap_err();
        assert!(matches!(err, EcallError::InvalidPhoneNumber(_)));
        assert_eq!(backends.identity.challenges_issued(), 0);
        assert_eq!(backends.bot_checks.created(), 0);
        assert_eq!(alerts(&capture).len(), 1);
    }

    #[tokio::test]
    async fn widget_setup_failure_is_challenge_error() {
        let backends = MemoryBackends::new();
        backends.bot_checks.fail_setup(true);
        let (mut login, _, capture) = screen(&backends);
        login.set_phone("1711000000");
        let err = login.send_code().await.unwrap_err();
        assert!(matches!(err, EcallError::ChallengeSetupFailed(_)));
        assert_eq!(alerts(&capture).len(), 1);
        assert!(!login.awaiting_code());
    }

    #[tokio::test]
    async fn superseding_attempt_disposes_previous_widget() {
        let backends = MemoryBackends::new();
        let (mut login, _, _) = screen(&backends);
        login.set_phone("1711000000");

        login.send_code().await.unwrap();
        login.send_code().await.unwrap();
        login.send_code().await.unwrap();
        assert_eq!(backends.bot_checks.created(), 3);
        assert_eq!(backends.bot_checks.live(), 1);

        login.unmount();
        assert_eq!(backends.bot_checks.live(), 0);
    }

    #[tokio::test]
    async fn requested_number_is_remembered() {
        let dir = tempfile::tempdir().unwrap();
        let backends = MemoryBackends::new();
        let store = Arc::new(ConfigStore::new(dir.path()));
        let services = backends
            .services("alice", AppConfig::default())
            .with_config_store(store.clone());
        let navigator = Navigator::new(services.emitter.clone());

        let mut login = LoginScreen::new(services.clone(), navigator.clone());
        login.set_phone(" 1711000000 ");
        login.send_code().await.unwrap();
        assert_eq!(store.get().last_phone_number.as_deref(), Some("1711000000"));

        let services = services.with_config_store(store);
        let login = LoginScreen::new(services, navigator);
        assert_eq!(login.phone(), "1711000000");
    }
}
