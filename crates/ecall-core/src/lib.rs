//! Ecall core: phone OTP login, group chat and a one-room video call.
//!
//! Pure Rust crate; the identity provider, document store and media SDK
//! are reached through traits. Consumed by UI shells, which render the
//! screen state and forward user actions.

pub mod app;
pub mod auth;
pub mod call;
pub mod chat;
pub mod config;
pub mod errors;
pub mod events;
pub mod firebase;
pub mod logging;
pub mod memory;
pub mod navigator;
pub mod screens;
pub mod services;
mod sync;
pub mod tracks;
pub mod vault;

pub use app::App;
pub use auth::{
    BotCheck, BotCheckFactory, ConfirmationHandle, IdentityProvider, SessionSubscription,
};
pub use call::{CallManager, LocalTrack, MediaClient, MediaSdk, RemoteEvent};
pub use chat::{ChatService, MessageStore, MessageSubscription};
pub use config::{AppConfig, ConfigStore};
pub use errors::EcallError;
pub use events::{AppEvent, AppEventListener, CallState, ChatMessage, Session, TrackKind};
pub use logging::init_logging;
pub use navigator::{Navigator, Route};
pub use services::{AppServices, MemoryBackends};
