//! In-process backends for the three external collaborators.
//!
//! Used for offline runs and as test collaborators. They honour the same
//! contracts as the hosted services: server-assigned ids and timestamps,
//! push-based snapshots, and publish/subscribe semantics in a shared room.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::auth::{
    AuthState, BotCheck, BotCheckFactory, ConfirmationHandle, IdentityProvider, SessionSubscription,
    normalize_phone_number,
};
use crate::call::{ClientConfig, LocalTrack, MediaClient, MediaSdk, RemoteEvent};
use crate::chat::{
    CREATED_AT_FIELD, MESSAGES_COLLECTION, MessageStore, MessageSubscription, order_messages,
};
use crate::errors::EcallError;
use crate::events::{ChatMessage, NewMessage, RemoteTrackInfo, Session, TrackKind};
use crate::sync::lock;

fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Identity provider with a registry of expected codes.
#[derive(Default)]
pub struct MemoryIdentity {
    state: AuthState,
    codes: Mutex<HashMap<String, String>>,
    pending: Mutex<HashMap<String, String>>,
    challenges: AtomicUsize,
}

impl MemoryIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `code` for `phone_number` (E.164).
    pub fn expect_code(&self, phone_number: &str, code: &str) {
        lock(&self.codes).insert(phone_number.to_string(), code.to_string());
    }

    /// Number of challenges that reached the provider.
    pub fn challenges_issued(&self) -> usize {
        self.challenges.load(Ordering::SeqCst)
    }

    /// Simulate the provider revoking the session.
    pub fn invalidate_session(&self) {
        self.state.set(None);
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentity {
    async fn request_code(
        &self,
        phone_number: &str,
        bot_check: &dyn BotCheck,
    ) -> Result<ConfirmationHandle, EcallError> {
        if !phone_number.starts_with('+') {
            return Err(EcallError::InvalidPhoneNumber(format!(
                "'{phone_number}' lacks a country prefix"
            )));
        }
        normalize_phone_number("", phone_number)?;

        let token = bot_check.token().await?;
        if token.is_empty() {
            return Err(EcallError::ChallengeSetupFailed("empty bot-check token".into()));
        }

        self.challenges.fetch_add(1, Ordering::SeqCst);
        let verification_id = new_id();
        lock(&self.pending).insert(verification_id.clone(), phone_number.to_string());
        tracing::debug!("issued challenge {verification_id} for {phone_number}");

        Ok(ConfirmationHandle {
            verification_id,
            phone_number: phone_number.to_string(),
        })
    }

    async fn confirm_code(
        &self,
        handle: &ConfirmationHandle,
        code: &str,
    ) -> Result<Session, EcallError> {
        let phone = lock(&self.pending)
            .get(&handle.verification_id)
            .cloned()
            .ok_or(EcallError::InvalidCode)?;

        let matches = lock(&self.codes).get(&phone).is_some_and(|expected| expected == code);
        if !matches {
            return Err(EcallError::InvalidCode);
        }
        lock(&self.pending).remove(&handle.verification_id);

        let session = Session {
            uid: new_id(),
            phone_number: phone,
            id_token: new_id(),
            refresh_token: None,
        };
        self.state.set(Some(session.clone()));
        Ok(session)
    }

    fn on_session_change(&self) -> SessionSubscription {
        self.state.subscribe()
    }

    async fn sign_out(&self) -> Result<(), EcallError> {
        self.state.set(None);
        Ok(())
    }
}

/// Invisible bot-check widget that always passes.
pub struct InvisibleBotCheck {
    id: String,
    disposed: AtomicBool,
    live: Arc<AtomicUsize>,
}

#[async_trait]
impl BotCheck for InvisibleBotCheck {
    fn id(&self) -> &str {
        &self.id
    }

    async fn token(&self) -> Result<String, EcallError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(EcallError::ChallengeSetupFailed(format!(
                "bot-check {} already disposed",
                self.id
            )));
        }
        Ok(format!("bot-check-token-{}", self.id))
    }

    fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[derive(Default)]
pub struct InvisibleBotCheckFactory {
    created: AtomicUsize,
    live: Arc<AtomicUsize>,
    fail_setup: AtomicBool,
}

impl InvisibleBotCheckFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Widgets created and not yet disposed.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn fail_setup(&self, fail: bool) {
        self.fail_setup.store(fail, Ordering::SeqCst);
    }
}

impl BotCheckFactory for InvisibleBotCheckFactory {
    fn create(&self, container: &str) -> Result<Box<dyn BotCheck>, EcallError> {
        if self.fail_setup.load(Ordering::SeqCst) {
            return Err(EcallError::ChallengeSetupFailed(format!(
                "container '{container}' unavailable"
            )));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InvisibleBotCheck {
            id: new_id(),
            disposed: AtomicBool::new(false),
            live: self.live.clone(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Message store
// ---------------------------------------------------------------------------

/// Ordered document store with push snapshots.
///
/// Timestamps are strictly increasing per store, so appends from this store
/// never tie; `insert` lets tests land foreign writes with arbitrary ids and
/// timestamps.
#[derive(Default)]
pub struct MemoryMessageStore {
    collections: Mutex<HashMap<String, watch::Sender<Vec<ChatMessage>>>>,
    last_ts: Mutex<u64>,
    reject: AtomicBool,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent append fail with `WriteRejected`.
    pub fn reject_writes(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    /// Land a write as if another participant's client produced it.
    pub fn insert(&self, collection: &str, message: ChatMessage) {
        self.with_collection(collection, |tx| tx.send_modify(|docs| docs.push(message)));
    }

    /// Ordered contents of the chat collection.
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut docs = self.with_collection(MESSAGES_COLLECTION, |tx| tx.borrow().clone());
        order_messages(&mut docs);
        docs
    }

    fn with_collection<R>(
        &self,
        collection: &str,
        f: impl FnOnce(&watch::Sender<Vec<ChatMessage>>) -> R,
    ) -> R {
        let mut collections = lock(&self.collections);
        let tx = collections
            .entry(collection.to_string())
            .or_insert_with(|| watch::channel(Vec::new()).0);
        f(tx)
    }

    fn server_timestamp(&self) -> u64 {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let mut last = lock(&self.last_ts);
        *last = now.max(*last + 1);
        *last
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    fn subscribe_ordered(
        &self,
        collection: &str,
        order_field: &str,
    ) -> Result<MessageSubscription, EcallError> {
        if order_field != CREATED_AT_FIELD {
            return Err(EcallError::Config(format!(
                "ordering by '{order_field}' is not indexed"
            )));
        }
        Ok(MessageSubscription::new(self.with_collection(collection, |tx| tx.subscribe())))
    }

    async fn append(&self, collection: &str, record: NewMessage) -> Result<String, EcallError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(EcallError::WriteRejected("permission denied".into()));
        }
        let message = ChatMessage {
            id: new_id(),
            text: record.text,
            sender: record.sender,
            created_at_ms: self.server_timestamp(),
        };
        let id = message.id.clone();
        self.insert(collection, message);
        Ok(id)
    }
}

// ---------------------------------------------------------------------------
// Media relay network
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaFault {
    RejectJoin,
    DenyDevices,
    RejectPublish,
    /// `stop()` fails on local tracks; `close()` still releases them.
    StopFails,
}

struct Member {
    participant_id: String,
    events: Option<mpsc::UnboundedSender<RemoteEvent>>,
    published: Vec<TrackKind>,
}

#[derive(Default)]
struct ParticipantRecord {
    clients_created: usize,
    last_config: Option<ClientConfig>,
    last_token: Option<Option<String>>,
    tracks: Vec<Arc<MemoryTrack>>,
    faults: Vec<MediaFault>,
}

#[derive(Default)]
struct NetworkInner {
    rooms: HashMap<String, Vec<Member>>,
    participants: HashMap<String, ParticipantRecord>,
}

impl NetworkInner {
    fn has_fault(&self, participant_id: &str, fault: MediaFault) -> bool {
        self.participants
            .get(participant_id)
            .is_some_and(|p| p.faults.contains(&fault))
    }

    fn notify_others(&self, room: &str, except: &str, event: RemoteEvent) {
        for member in self.rooms.get(room).into_iter().flatten() {
            if member.participant_id == except {
                continue;
            }
            if let Some(tx) = &member.events {
                let _ = tx.send(event.clone());
            }
        }
    }
}

/// A shared media relay network. Clone handles share the same rooms.
#[derive(Clone, Default)]
pub struct MemoryMediaNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

impl MemoryMediaNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// SDK instance for one participant.
    pub fn sdk(&self, participant_id: &str) -> MemoryMediaSdk {
        MemoryMediaSdk {
            network: self.clone(),
            participant_id: participant_id.to_string(),
        }
    }

    pub fn inject_fault(&self, participant_id: &str, fault: MediaFault) {
        lock(&self.inner)
            .participants
            .entry(participant_id.to_string())
            .or_default()
            .faults
            .push(fault);
    }

    pub fn clear_faults(&self, participant_id: &str) {
        if let Some(p) = lock(&self.inner).participants.get_mut(participant_id) {
            p.faults.clear();
        }
    }

    /// Local tracks of `participant_id` that have not been closed.
    pub fn active_local_tracks(&self, participant_id: &str) -> usize {
        lock(&self.inner)
            .participants
            .get(participant_id)
            .map(|p| p.tracks.iter().filter(|t| !t.is_closed()).count())
            .unwrap_or(0)
    }

    pub fn members(&self, room: &str) -> Vec<String> {
        lock(&self.inner)
            .rooms
            .get(room)
            .map(|m| m.iter().map(|m| m.participant_id.clone()).collect())
            .unwrap_or_default()
    }

    pub fn clients_created(&self, participant_id: &str) -> usize {
        lock(&self.inner)
            .participants
            .get(participant_id)
            .map(|p| p.clients_created)
            .unwrap_or(0)
    }

    pub fn client_config(&self, participant_id: &str) -> Option<ClientConfig> {
        lock(&self.inner)
            .participants
            .get(participant_id)
            .and_then(|p| p.last_config)
    }

    /// Token used on the last join: `None` if never joined, `Some(None)` if
    /// joined without a token.
    pub fn join_token(&self, participant_id: &str) -> Option<Option<String>> {
        lock(&self.inner)
            .participants
            .get(participant_id)
            .and_then(|p| p.last_token.clone())
    }
}

pub struct MemoryMediaSdk {
    network: MemoryMediaNetwork,
    participant_id: String,
}

#[async_trait]
impl MediaSdk for MemoryMediaSdk {
    fn create_client(&self, config: ClientConfig) -> Arc<dyn MediaClient> {
        {
            let mut inner = lock(&self.network.inner);
            let record = inner.participants.entry(self.participant_id.clone()).or_default();
            record.clients_created += 1;
            record.last_config = Some(config);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(MemoryMediaClient {
            network: self.network.clone(),
            participant_id: self.participant_id.clone(),
            events_tx: Mutex::new(Some(tx)),
            events_rx: Mutex::new(Some(rx)),
            room: Mutex::new(None),
        })
    }

    async fn create_microphone_and_camera_tracks(
        &self,
    ) -> Result<(Arc<dyn LocalTrack>, Arc<dyn LocalTrack>), EcallError> {
        tokio::task::yield_now().await;

        let mut inner = lock(&self.network.inner);
        if inner.has_fault(&self.participant_id, MediaFault::DenyDevices) {
            return Err(EcallError::MediaAcquisitionFailed(
                "camera/microphone permission denied".into(),
            ));
        }
        let stop_fails = inner.has_fault(&self.participant_id, MediaFault::StopFails);
        let microphone = Arc::new(MemoryTrack::new(TrackKind::Audio, stop_fails));
        let camera = Arc::new(MemoryTrack::new(TrackKind::Video, stop_fails));

        let record = inner.participants.entry(self.participant_id.clone()).or_default();
        record.tracks.push(microphone.clone());
        record.tracks.push(camera.clone());

        Ok((microphone as Arc<dyn LocalTrack>, camera as Arc<dyn LocalTrack>))
    }
}

pub struct MemoryMediaClient {
    network: MemoryMediaNetwork,
    participant_id: String,
    events_tx: Mutex<Option<mpsc::UnboundedSender<RemoteEvent>>>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<RemoteEvent>>>,
    room: Mutex<Option<String>>,
}

#[async_trait]
impl MediaClient for MemoryMediaClient {
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<RemoteEvent>> {
        lock(&self.events_rx).take()
    }

    async fn join(
        &self,
        app_id: &str,
        room: &str,
        token: Option<&str>,
    ) -> Result<String, EcallError> {
        tokio::task::yield_now().await;

        let mut inner = lock(&self.network.inner);
        if inner.has_fault(&self.participant_id, MediaFault::RejectJoin) {
            return Err(EcallError::TransportJoinFailed(format!(
                "app '{app_id}' rejected by relay"
            )));
        }
        let mut current = lock(&self.room);
        if current.is_some() {
            return Err(EcallError::TransportJoinFailed("client already joined".into()));
        }

        let events = lock(&self.events_tx).clone();
        // Existing publications are announced to the newcomer.
        if let Some(tx) = &events {
            for member in inner.rooms.get(room).into_iter().flatten() {
                for kind in &member.published {
                    let _ = tx.send(RemoteEvent::Published {
                        participant_id: member.participant_id.clone(),
                        kind: *kind,
                    });
                }
            }
        }

        inner.rooms.entry(room.to_string()).or_default().push(Member {
            participant_id: self.participant_id.clone(),
            events,
            published: Vec::new(),
        });
        inner
            .participants
            .entry(self.participant_id.clone())
            .or_default()
            .last_token = Some(token.map(str::to_string));
        *current = Some(room.to_string());

        Ok(self.participant_id.clone())
    }

    async fn publish(&self, tracks: &[Arc<dyn LocalTrack>]) -> Result<(), EcallError> {
        let mut inner = lock(&self.network.inner);
        if inner.has_fault(&self.participant_id, MediaFault::RejectPublish) {
            return Err(EcallError::TransportJoinFailed("publish rejected".into()));
        }
        let room = lock(&self.room)
            .clone()
            .ok_or_else(|| EcallError::TransportJoinFailed("not connected".into()))?;

        let kinds: Vec<TrackKind> = tracks.iter().map(|t| t.kind()).collect();
        if let Some(member) = inner
            .rooms
            .get_mut(&room)
            .and_then(|m| m.iter_mut().find(|m| m.participant_id == self.participant_id))
        {
            for kind in &kinds {
                if !member.published.contains(kind) {
                    member.published.push(*kind);
                }
            }
        }
        for kind in kinds {
            inner.notify_others(
                &room,
                &self.participant_id,
                RemoteEvent::Published {
                    participant_id: self.participant_id.clone(),
                    kind,
                },
            );
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        participant_id: &str,
        kind: TrackKind,
    ) -> Result<RemoteTrackInfo, EcallError> {
        let inner = lock(&self.network.inner);
        let room = lock(&self.room)
            .clone()
            .ok_or_else(|| EcallError::TransportJoinFailed("not connected".into()))?;

        let published = inner
            .rooms
            .get(&room)
            .and_then(|m| m.iter().find(|m| m.participant_id == participant_id))
            .is_some_and(|m| m.published.contains(&kind));
        if !published {
            return Err(EcallError::TransportJoinFailed(format!(
                "{participant_id} has not published {kind:?}"
            )));
        }

        Ok(RemoteTrackInfo {
            track_id: format!("{participant_id}-{kind:?}").to_lowercase(),
            participant_id: participant_id.to_string(),
            kind,
        })
    }

    async fn leave(&self) -> Result<(), EcallError> {
        let mut inner = lock(&self.network.inner);
        let Some(room) = lock(&self.room).take() else {
            return Ok(());
        };
        if let Some(members) = inner.rooms.get_mut(&room) {
            members.retain(|m| m.participant_id != self.participant_id);
            if members.is_empty() {
                inner.rooms.remove(&room);
            }
        }
        inner.notify_others(
            &room,
            &self.participant_id,
            RemoteEvent::Left {
                participant_id: self.participant_id.clone(),
            },
        );
        Ok(())
    }

    fn remove_all_listeners(&self) {
        lock(&self.events_tx).take();
        lock(&self.events_rx).take();
    }
}

pub struct MemoryTrack {
    id: String,
    kind: TrackKind,
    stop_fails: bool,
    surface: Mutex<Option<String>>,
    stopped: AtomicBool,
    closed: AtomicBool,
}

impl MemoryTrack {
    fn new(kind: TrackKind, stop_fails: bool) -> Self {
        Self {
            id: new_id(),
            kind,
            stop_fails,
            surface: Mutex::new(None),
            stopped: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn surface(&self) -> Option<String> {
        lock(&self.surface).clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl LocalTrack for MemoryTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn play(&self, surface: &str) -> Result<(), EcallError> {
        *lock(&self.surface) = Some(surface.to_string());
        Ok(())
    }

    fn stop(&self) -> Result<(), EcallError> {
        if self.stop_fails {
            return Err(EcallError::MediaAcquisitionFailed("device busy".into()));
        }
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<(), EcallError> {
        self.stopped.store(true, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        lock(&self.surface).take();
        Ok(())
    }
}
