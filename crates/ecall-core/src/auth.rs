use async_trait::async_trait;
use regex::Regex;
use tokio::sync::watch;

use crate::errors::EcallError;
use crate::events::Session;

/// Pending confirmation returned by `request_code`, consumed by `confirm_code`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationHandle {
    pub verification_id: String,
    pub phone_number: String,
}

/// A bot-check challenge widget. One instance per code request, never reused.
#[async_trait]
pub trait BotCheck: Send + Sync {
    fn id(&self) -> &str;

    /// Run the (invisible) challenge and return the verification token.
    async fn token(&self) -> Result<String, EcallError>;

    /// Tear down the widget. Idempotent.
    fn dispose(&self);
}

/// Creates bot-check widgets bound to a container in the host UI.
pub trait BotCheckFactory: Send + Sync {
    fn create(&self, container: &str) -> Result<Box<dyn BotCheck>, EcallError>;
}

/// Phone-number identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn request_code(
        &self,
        phone_number: &str,
        bot_check: &dyn BotCheck,
    ) -> Result<ConfirmationHandle, EcallError>;

    async fn confirm_code(
        &self,
        handle: &ConfirmationHandle,
        code: &str,
    ) -> Result<Session, EcallError>;

    /// Subscribe to session changes. The first value is the state at
    /// subscribe time.
    fn on_session_change(&self) -> SessionSubscription;

    async fn sign_out(&self) -> Result<(), EcallError>;
}

/// Process-wide auth state shared by provider implementations.
pub struct AuthState {
    tx: watch::Sender<Option<Session>>,
}

impl AuthState {
    pub fn new(initial: Option<Session>) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn current(&self) -> Option<Session> {
        self.tx.borrow().clone()
    }

    pub fn set(&self, session: Option<Session>) {
        match &session {
            Some(s) => tracing::info!("session established for {}", s.phone_number),
            None => tracing::info!("session cleared"),
        }
        self.tx.send_replace(session);
    }

    pub fn subscribe(&self) -> SessionSubscription {
        SessionSubscription::new(self.tx.subscribe())
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Session change stream. Yields the current value first, then each change.
/// Rapid successive changes may be coalesced into the latest one.
pub struct SessionSubscription {
    rx: watch::Receiver<Option<Session>>,
    primed: bool,
}

impl SessionSubscription {
    fn new(rx: watch::Receiver<Option<Session>>) -> Self {
        Self { rx, primed: false }
    }

    pub fn current(&self) -> Option<Session> {
        self.rx.borrow().clone()
    }

    /// Returns `None` once the provider has been dropped.
    pub async fn next(&mut self) -> Option<Option<Session>> {
        if !self.primed {
            self.primed = true;
            return Some(self.rx.borrow_and_update().clone());
        }
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

/// Build an E.164 number from what the user typed on the Login screen.
///
/// Input without a leading `+` is treated as a national number and gets
/// `prefix` prepended. Spaces, dashes, dots and parentheses are ignored.
pub fn normalize_phone_number(prefix: &str, input: &str) -> Result<String, EcallError> {
    let compact: String = input
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect();
    if compact.is_empty() {
        return Err(EcallError::InvalidPhoneNumber("phone number is empty".into()));
    }

    let candidate = if compact.starts_with('+') {
        compact
    } else {
        format!("{prefix}{compact}")
    };

    let re = Regex::new(r"^\+[1-9][0-9]{7,14}$")
        .map_err(|e| EcallError::InvalidPhoneNumber(e.to_string()))?;
    if re.is_match(&candidate) {
        Ok(candidate)
    } else {
        Err(EcallError::InvalidPhoneNumber(format!(
            "'{candidate}' is not a valid E.164 number"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(phone: &str) -> Session {
        Session {
            uid: "u1".into(),
            phone_number: phone.into(),
            id_token: "tok".into(),
            refresh_token: None,
        }
    }

    #[test]
    fn national_number_gets_prefix() {
        assert_eq!(
            normalize_phone_number("+88", "1711000000").unwrap(),
            "+881711000000"
        );
    }

    #[test]
    fn separators_are_ignored() {
        assert_eq!(
            normalize_phone_number("+88", " 1711-000 000 ").unwrap(),
            "+881711000000"
        );
    }

    #[test]
    fn full_international_number_is_kept() {
        assert_eq!(
            normalize_phone_number("+88", "+14155550100").unwrap(),
            "+14155550100"
        );
    }

    #[test]
    fn garbage_is_rejected() {
        for input in ["", "   ", "abc", "12", "+0123456789", "17110000001234567"] {
            assert!(
                matches!(
                    normalize_phone_number("+88", input),
                    Err(EcallError::InvalidPhoneNumber(_))
                ),
                "accepted {input:?}"
            );
        }
    }

    #[tokio::test]
    async fn subscription_yields_initial_state_first() {
        let state = AuthState::new(Some(session("+881711000000")));
        let mut sub = state.subscribe();
        let first = sub.next().await.unwrap();
        assert_eq!(first.unwrap().phone_number, "+881711000000");
    }

    #[tokio::test]
    async fn subscription_sees_sign_out() {
        let state = AuthState::default();
        let mut sub = state.subscribe();
        assert_eq!(sub.next().await, Some(None));

        state.set(Some(session("+881711000000")));
        assert!(sub.next().await.unwrap().is_some());

        state.set(None);
        assert_eq!(sub.next().await, Some(None));
    }

    #[tokio::test]
    async fn subscription_ends_when_state_dropped() {
        let state = AuthState::default();
        let mut sub = state.subscribe();
        sub.next().await;
        drop(state);
        assert_eq!(sub.next().await, None);
    }
}
