use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EcallError {
    #[error("invalid phone number: {0}")]
    InvalidPhoneNumber(String),
    #[error("verification challenge setup failed: {0}")]
    ChallengeSetupFailed(String),
    #[error("invalid verification code")]
    InvalidCode,
    #[error("message write rejected: {0}")]
    WriteRejected(String),
    #[error("media acquisition failed: {0}")]
    MediaAcquisitionFailed(String),
    #[error("transport join failed: {0}")]
    TransportJoinFailed(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("session vault error: {0}")]
    Vault(String),
}
