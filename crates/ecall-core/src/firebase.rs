use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::auth::{AuthState, BotCheck, ConfirmationHandle, IdentityProvider, SessionSubscription};
use crate::config::FirebaseConfig;
use crate::errors::EcallError;
use crate::events::Session;
use crate::vault::SessionVault;

const IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com/v1";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendCodeRequest<'a> {
    phone_number: &'a str,
    recaptcha_token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendCodeResponse {
    session_info: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignInRequest<'a> {
    session_info: &'a str,
    code: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    id_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    local_id: String,
    #[serde(default)]
    phone_number: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Hosted phone-auth provider reached over its REST API.
pub struct FirebaseIdentity {
    http: reqwest::Client,
    config: FirebaseConfig,
    base_url: String,
    state: AuthState,
    vault: Arc<dyn SessionVault>,
}

impl FirebaseIdentity {
    /// Restores a previously persisted session, which becomes the initial
    /// value seen by session subscribers.
    pub fn new(config: FirebaseConfig, vault: Arc<dyn SessionVault>) -> Self {
        let restored = vault.load().unwrap_or_else(|e| {
            tracing::warn!("could not restore session: {e}");
            None
        });
        if let Some(s) = &restored {
            tracing::info!("restored session for {}", s.phone_number);
        }
        Self {
            http: reqwest::Client::new(),
            config,
            base_url: IDENTITY_TOOLKIT_URL.to_string(),
            state: AuthState::new(restored),
            vault,
        }
    }

    /// Point the adapter at another endpoint (emulator).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self, method: &str) -> Result<Url, EcallError> {
        Url::parse_with_params(
            &format!("{}/accounts:{method}", self.base_url),
            &[("key", self.config.api_key.as_str())],
        )
        .map_err(|e| EcallError::Config(format!("bad identity endpoint: {e}")))
    }

    async fn post<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        body: &Req,
    ) -> Result<Resp, EcallError> {
        let url = self.endpoint(method)?;
        tracing::debug!("identity request: accounts:{method}");

        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| EcallError::Http(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return resp
                .json()
                .await
                .map_err(|e| EcallError::Http(format!("invalid identity response: {e}")));
        }

        let text = resp.text().await.unwrap_or_default();
        let code = serde_json::from_str::<ErrorEnvelope>(&text)
            .map(|env| env.error.message)
            .unwrap_or_else(|_| format!("HTTP {status}"));
        Err(map_error_code(method, &code))
    }
}

/// Map a provider error code (e.g. `INVALID_PHONE_NUMBER : Invalid format.`)
/// onto the error taxonomy.
pub(crate) fn map_error_code(method: &str, message: &str) -> EcallError {
    let code = message.split([' ', ':']).next().unwrap_or(message);
    match code {
        "INVALID_PHONE_NUMBER" | "MISSING_PHONE_NUMBER" => {
            EcallError::InvalidPhoneNumber(message.to_string())
        }
        "CAPTCHA_CHECK_FAILED" | "MISSING_RECAPTCHA_TOKEN" | "INVALID_RECAPTCHA_TOKEN"
        | "QUOTA_EXCEEDED" | "TOO_MANY_ATTEMPTS_TRY_LATER" => {
            EcallError::ChallengeSetupFailed(message.to_string())
        }
        "INVALID_CODE" | "SESSION_EXPIRED" | "INVALID_SESSION_INFO" | "MISSING_CODE" => {
            EcallError::InvalidCode
        }
        _ if method == "signInWithPhoneNumber" => EcallError::InvalidCode,
        _ => EcallError::Http(message.to_string()),
    }
}

#[async_trait]
impl IdentityProvider for FirebaseIdentity {
    async fn request_code(
        &self,
        phone_number: &str,
        bot_check: &dyn BotCheck,
    ) -> Result<ConfirmationHandle, EcallError> {
        let token = bot_check.token().await?;
        let resp: SendCodeResponse = self
            .post(
                "sendVerificationCode",
                &SendCodeRequest {
                    phone_number,
                    recaptcha_token: &token,
                },
            )
            .await?;
        tracing::info!("verification code sent to {phone_number}");
        Ok(ConfirmationHandle {
            verification_id: resp.session_info,
            phone_number: phone_number.to_string(),
        })
    }

    async fn confirm_code(
        &self,
        handle: &ConfirmationHandle,
        code: &str,
    ) -> Result<Session, EcallError> {
        let resp: SignInResponse = self
            .post(
                "signInWithPhoneNumber",
                &SignInRequest {
                    session_info: &handle.verification_id,
                    code,
                },
            )
            .await?;

        let session = Session {
            uid: resp.local_id,
            phone_number: resp.phone_number.unwrap_or_else(|| handle.phone_number.clone()),
            id_token: resp.id_token,
            refresh_token: resp.refresh_token,
        };
        if let Err(e) = self.vault.store(&session) {
            tracing::warn!("session not persisted: {e}");
        }
        self.state.set(Some(session.clone()));
        Ok(session)
    }

    fn on_session_change(&self) -> SessionSubscription {
        self.state.subscribe()
    }

    async fn sign_out(&self) -> Result<(), EcallError> {
        if let Err(e) = self.vault.clear() {
            tracing::warn!("stored session not cleared: {e}");
        }
        self.state.set(None);
        Ok(())
    }
}
