use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{ChannelMode, MediaConfig, VideoCodec};
use crate::errors::EcallError;
use crate::events::{AppEvent, CallState, EventEmitter, RemoteTrackInfo, TrackKind};
use crate::sync::lock;
use crate::tracks::{LOCAL_VIDEO_SURFACE, RenderTargets};

/// Transport client options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    pub codec: VideoCodec,
    pub mode: ChannelMode,
}

/// Remote publication events, delivered over the channel returned by
/// `MediaClient::take_events`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEvent {
    Published { participant_id: String, kind: TrackKind },
    Unpublished { participant_id: String, kind: TrackKind },
    Left { participant_id: String },
}

/// A captured local microphone or camera track.
pub trait LocalTrack: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> TrackKind;
    fn play(&self, surface: &str) -> Result<(), EcallError>;
    /// Stop capture.
    fn stop(&self) -> Result<(), EcallError>;
    /// Release the underlying device.
    fn close(&self) -> Result<(), EcallError>;
}

/// Connection to the media relay network.
#[async_trait]
pub trait MediaClient: Send + Sync {
    /// Take the remote event channel. Returns `None` after the first call.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<RemoteEvent>>;

    /// Connect to `room`. Returns the local participant id.
    async fn join(
        &self,
        app_id: &str,
        room: &str,
        token: Option<&str>,
    ) -> Result<String, EcallError>;

    async fn publish(&self, tracks: &[Arc<dyn LocalTrack>]) -> Result<(), EcallError>;

    async fn subscribe(
        &self,
        participant_id: &str,
        kind: TrackKind,
    ) -> Result<RemoteTrackInfo, EcallError>;

    async fn leave(&self) -> Result<(), EcallError>;

    fn remove_all_listeners(&self);
}

/// Real-time media SDK entry point.
#[async_trait]
pub trait MediaSdk: Send + Sync {
    fn create_client(&self, config: ClientConfig) -> Arc<dyn MediaClient>;

    /// Returns `(microphone, camera)`.
    async fn create_microphone_and_camera_tracks(
        &self,
    ) -> Result<(Arc<dyn LocalTrack>, Arc<dyn LocalTrack>), EcallError>;
}

#[derive(Default)]
struct Resources {
    client: Option<Arc<dyn MediaClient>>,
    local_tracks: Vec<Arc<dyn LocalTrack>>,
    event_task: Option<JoinHandle<()>>,
}

struct CallInner {
    state: CallState,
    leave_requested: bool,
    resources: Resources,
}

/// Manages the lifecycle of the single media session of a VideoCall.
///
/// `Idle -> Joining -> Joined -> Leaving -> Idle`. State checks happen
/// before the first suspension point, so a `join` while Joining/Joined and
/// a `leave` while Idle/Leaving are no-ops. A `leave` while Joining is
/// deferred until the join sequence finishes.
pub struct CallManager {
    sdk: Arc<dyn MediaSdk>,
    config: MediaConfig,
    emitter: EventEmitter,
    inner: Arc<Mutex<CallInner>>,
    targets: Arc<Mutex<RenderTargets>>,
}

impl CallManager {
    pub fn new(sdk: Arc<dyn MediaSdk>, config: MediaConfig, emitter: EventEmitter) -> Self {
        Self {
            sdk,
            config,
            emitter,
            inner: Arc::new(Mutex::new(CallInner {
                state: CallState::Idle,
                leave_requested: false,
                resources: Resources::default(),
            })),
            targets: Arc::new(Mutex::new(RenderTargets::new())),
        }
    }

    pub fn state(&self) -> CallState {
        self.lock_inner().state
    }

    pub fn is_joined(&self) -> bool {
        self.state() == CallState::Joined
    }

    /// Current render targets, for the UI shell.
    pub fn render_targets(&self) -> RenderTargets {
        lock(&self.targets).clone()
    }

    pub fn set_remote_audio_audible(&self, audible: bool) {
        lock(&self.targets).set_audio_audible(audible);
    }

    /// Join the shared room and publish microphone + camera.
    pub async fn join(&self) -> Result<(), EcallError> {
        {
            let mut inner = self.lock_inner();
            if inner.state != CallState::Idle {
                tracing::debug!("join ignored in state {:?}", inner.state);
                return Ok(());
            }
            inner.state = CallState::Joining;
            inner.leave_requested = false;
        }
        self.emitter.emit(AppEvent::CallStateChanged(CallState::Joining));

        if let Err(e) = self.run_join().await {
            tracing::warn!("join failed: {e}");
            let resources = {
                let mut inner = self.lock_inner();
                inner.leave_requested = false;
                std::mem::take(&mut inner.resources)
            };
            if let Err(release_err) = self.release(resources).await {
                tracing::warn!("cleanup after failed join: {release_err}");
            }
            self.set_state(CallState::Idle);
            self.emitter.emit(AppEvent::CallFailed(e.to_string()));
            return Err(e);
        }

        let leave_now = {
            let mut inner = self.lock_inner();
            inner.state = CallState::Joined;
            std::mem::take(&mut inner.leave_requested)
        };
        tracing::info!("joined room '{}'", self.config.room);
        self.emitter.emit(AppEvent::CallStateChanged(CallState::Joined));

        if leave_now {
            tracing::info!("running leave requested during join");
            self.leave().await?;
        }
        Ok(())
    }

    /// Connect, acquire, render, publish. Strictly sequential.
    async fn run_join(&self) -> Result<(), EcallError> {
        let client = self.sdk.create_client(ClientConfig {
            codec: self.config.codec,
            mode: self.config.mode,
        });

        // Listener goes in before connecting so no publication is missed.
        let event_task = client.take_events().map(|events| {
            let client = client.clone();
            let targets = self.targets.clone();
            let emitter = self.emitter.clone();
            tokio::spawn(async move {
                Self::event_loop(events, client, targets, emitter).await;
            })
        });
        {
            let mut inner = self.lock_inner();
            inner.resources.client = Some(client.clone());
            inner.resources.event_task = event_task;
        }

        tracing::warn!(
            "joining shared room '{}' without a per-user token",
            self.config.room
        );
        let uid = client.join(&self.config.app_id, &self.config.room, None).await?;
        tracing::info!("connected to room '{}' as {uid}", self.config.room);

        let (microphone, camera) = self.sdk.create_microphone_and_camera_tracks().await?;
        self.lock_inner().resources.local_tracks = vec![microphone.clone(), camera.clone()];

        camera.play(LOCAL_VIDEO_SURFACE)?;
        lock(&self.targets).set_local_video(camera.id().to_string());

        client.publish(&[microphone, camera]).await?;
        tracing::info!("local microphone and camera published");
        Ok(())
    }

    /// Stop and release local tracks, disconnect, detach listeners.
    pub async fn leave(&self) -> Result<(), EcallError> {
        let resources = {
            let mut inner = self.lock_inner();
            match inner.state {
                CallState::Joined => {}
                CallState::Joining => {
                    tracing::debug!("leave deferred until join completes");
                    inner.leave_requested = true;
                    return Ok(());
                }
                CallState::Idle | CallState::Leaving => return Ok(()),
            }
            inner.state = CallState::Leaving;
            std::mem::take(&mut inner.resources)
        };
        self.emitter.emit(AppEvent::CallStateChanged(CallState::Leaving));

        let result = self.release(resources).await;
        self.set_state(CallState::Idle);
        tracing::info!("left room '{}'", self.config.room);
        result
    }

    /// Screen unmount: tear down whatever session exists.
    pub async fn unmount(&self) {
        if let Err(e) = self.leave().await {
            tracing::warn!("leave on unmount: {e}");
        }
    }

    async fn release(&self, resources: Resources) -> Result<(), EcallError> {
        let Resources {
            client,
            local_tracks,
            event_task,
        } = resources;

        release_tracks(&local_tracks);

        if let Some(task) = event_task {
            task.abort();
        }
        lock(&self.targets).clear();

        let mut result = Ok(());
        if let Some(client) = client {
            if let Err(e) = client.leave().await {
                tracing::warn!("transport leave: {e}");
                result = Err(e);
            }
            client.remove_all_listeners();
        }
        result
    }

    fn set_state(&self, state: CallState) {
        self.lock_inner().state = state;
        self.emitter.emit(AppEvent::CallStateChanged(state));
    }

    fn lock_inner(&self) -> MutexGuard<'_, CallInner> {
        lock(&self.inner)
    }

    async fn event_loop(
        mut events: mpsc::UnboundedReceiver<RemoteEvent>,
        client: Arc<dyn MediaClient>,
        targets: Arc<Mutex<RenderTargets>>,
        emitter: EventEmitter,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                RemoteEvent::Published { participant_id, kind } => {
                    match client.subscribe(&participant_id, kind).await {
                        Ok(track) => {
                            tracing::info!("attaching remote {kind:?} of {participant_id}");
                            let replaced = lock(&targets).attach_remote(track.clone());
                            if let Some(old) = replaced {
                                emitter.emit(AppEvent::RemoteTrackDetached(old));
                            }
                            emitter.emit(AppEvent::RemoteTrackAttached(track));
                        }
                        Err(e) => {
                            tracing::warn!("subscribe to {kind:?} of {participant_id} failed: {e}");
                        }
                    }
                }

                RemoteEvent::Unpublished { participant_id, kind } => {
                    let detached = lock(&targets).detach_remote(&participant_id, Some(kind));
                    for track in detached {
                        emitter.emit(AppEvent::RemoteTrackDetached(track));
                    }
                }

                RemoteEvent::Left { participant_id } => {
                    tracing::info!("remote participant left: {participant_id}");
                    let detached = lock(&targets).detach_remote(&participant_id, None);
                    for track in detached {
                        emitter.emit(AppEvent::RemoteTrackDetached(track));
                    }
                }
            }
        }

        tracing::debug!("call event loop ended");
    }
}

impl Drop for CallManager {
    fn drop(&mut self) {
        let Resources {
            client,
            local_tracks,
            event_task,
        } = std::mem::take(&mut lock(&self.inner).resources);
        if client.is_none() && local_tracks.is_empty() && event_task.is_none() {
            return;
        }
        tracing::info!("call dropped while active, releasing media session");

        release_tracks(&local_tracks);
        if let Some(task) = event_task {
            task.abort();
        }

        let Some(client) = client else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = client.leave().await {
                        tracing::warn!("transport leave on drop: {e}");
                    }
                    client.remove_all_listeners();
                });
            }
            Err(_) => {
                tracing::warn!("no runtime on drop, transport left connected until it times out");
                client.remove_all_listeners();
            }
        }
    }
}

/// Stop and close every track. Each release is independent; one failure
/// must not block the rest.
fn release_tracks(tracks: &[Arc<dyn LocalTrack>]) {
    for track in tracks {
        if let Err(e) = track.stop() {
            tracing::warn!("stopping track {}: {e}", track.id());
        }
        if let Err(e) = track.close() {
            tracing::warn!("closing track {}: {e}", track.id());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::tests::EventCapture;
    use crate::memory::{MediaFault, MemoryMediaNetwork};
    use std::time::Duration;

    fn manager(
        network: &MemoryMediaNetwork,
        participant: &str,
    ) -> (CallManager, Arc<EventCapture>) {
        let emitter = EventEmitter::new();
        let capture = Arc::new(EventCapture::default());
        emitter.add_listener(capture.clone());
        let sdk = Arc::new(network.sdk(participant));
        (CallManager::new(sdk, MediaConfig::default(), emitter), capture)
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn join_then_leave_releases_every_local_track() {
        let network = MemoryMediaNetwork::new();
        let (call, _) = manager(&network, "alice");

        call.join().await.unwrap();
        assert_eq!(call.state(), CallState::Joined);
        assert_eq!(network.active_local_tracks("alice"), 2);
        assert!(call.render_targets().local_video().is_some());

        call.leave().await.unwrap();
        assert_eq!(call.state(), CallState::Idle);
        assert_eq!(network.active_local_tracks("alice"), 0);
        assert!(network.members(crate::config::DEFAULT_ROOM).is_empty());
        assert!(call.render_targets().local_video().is_none());
    }

    #[tokio::test]
    async fn join_publishes_with_vp8_in_rtc_mode() {
        let network = MemoryMediaNetwork::new();
        let (call, _) = manager(&network, "alice");
        call.join().await.unwrap();
        assert_eq!(
            network.client_config("alice"),
            Some(ClientConfig {
                codec: VideoCodec::Vp8,
                mode: ChannelMode::Rtc
            })
        );
        assert_eq!(network.join_token("alice"), Some(None));
    }

    #[tokio::test]
    async fn second_join_in_direct_succession_is_a_noop() {
        let network = MemoryMediaNetwork::new();
        let (call, _) = manager(&network, "alice");

        let (first, second) = tokio::join!(call.join(), call.join());
        first.unwrap();
        second.unwrap();

        assert_eq!(network.clients_created("alice"), 1);
        assert_eq!(network.active_local_tracks("alice"), 2);
        assert_eq!(call.state(), CallState::Joined);
    }

    #[tokio::test]
    async fn leave_during_join_is_deferred_not_lost() {
        let network = MemoryMediaNetwork::new();
        let (call, _) = manager(&network, "alice");

        let (joined, left) = tokio::join!(call.join(), call.leave());
        joined.unwrap();
        left.unwrap();

        assert_eq!(call.state(), CallState::Idle);
        assert_eq!(network.active_local_tracks("alice"), 0);
    }

    #[tokio::test]
    async fn leave_when_idle_is_a_noop() {
        let network = MemoryMediaNetwork::new();
        let (call, capture) = manager(&network, "alice");
        call.leave().await.unwrap();
        assert_eq!(call.state(), CallState::Idle);
        assert!(capture.snapshot().is_empty());
    }

    #[tokio::test]
    async fn remote_tracks_attach_only_after_publish() {
        let network = MemoryMediaNetwork::new();
        let (alice, capture) = manager(&network, "alice");

        // bob is in the room but has not published yet
        let bob_client = network.sdk("bob").create_client(ClientConfig {
            codec: VideoCodec::Vp8,
            mode: ChannelMode::Rtc,
        });
        bob_client
            .join("app", crate::config::DEFAULT_ROOM, None)
            .await
            .unwrap();

        alice.join().await.unwrap();
        settle().await;
        assert!(!alice.render_targets().has_remote());

        let bob_sdk = network.sdk("bob");
        let (mic, cam) = bob_sdk.create_microphone_and_camera_tracks().await.unwrap();
        bob_client.publish(&[mic, cam]).await.unwrap();
        settle().await;

        let targets = alice.render_targets();
        assert_eq!(targets.remote_video().unwrap().participant_id, "bob");
        assert_eq!(targets.remote_audio().len(), 1);
        assert!(!targets.remote_audio()[0].audible);
        assert!(capture
            .snapshot()
            .iter()
            .any(|e| matches!(e, AppEvent::RemoteTrackAttached(t) if t.kind == TrackKind::Video)));

        bob_client.leave().await.unwrap();
        settle().await;
        assert!(!alice.render_targets().has_remote());
    }

    #[tokio::test]
    async fn earlier_publisher_is_attached_when_joining_later() {
        let network = MemoryMediaNetwork::new();
        let (bob, _) = manager(&network, "bob");
        bob.join().await.unwrap();

        let (alice, _) = manager(&network, "alice");
        alice.join().await.unwrap();
        settle().await;

        assert_eq!(alice.render_targets().remote_video().unwrap().participant_id, "bob");
        assert_eq!(bob.render_targets().remote_video().unwrap().participant_id, "alice");
    }

    #[tokio::test]
    async fn camera_denial_rolls_back_to_idle() {
        let network = MemoryMediaNetwork::new();
        network.inject_fault("alice", MediaFault::DenyDevices);
        let (call, capture) = manager(&network, "alice");

        let err = call.join().await.unwrap_err();
        assert!(matches!(err, EcallError::MediaAcquisitionFailed(_)));
        assert_eq!(call.state(), CallState::Idle);
        assert!(network.members(crate::config::DEFAULT_ROOM).is_empty());
        assert!(capture
            .snapshot()
            .iter()
            .any(|e| matches!(e, AppEvent::CallFailed(_))));

        network.clear_faults("alice");
        call.join().await.unwrap();
        assert!(call.is_joined());
    }

    #[tokio::test]
    async fn transport_failure_acquires_no_tracks() {
        let network = MemoryMediaNetwork::new();
        network.inject_fault("alice", MediaFault::RejectJoin);
        let (call, _) = manager(&network, "alice");

        let err = call.join().await.unwrap_err();
        assert!(matches!(err, EcallError::TransportJoinFailed(_)));
        assert_eq!(network.active_local_tracks("alice"), 0);
        assert_eq!(call.state(), CallState::Idle);
    }

    #[tokio::test]
    async fn failing_track_release_does_not_block_the_other() {
        let network = MemoryMediaNetwork::new();
        network.inject_fault("alice", MediaFault::StopFails);
        let (call, _) = manager(&network, "alice");

        call.join().await.unwrap();
        call.leave().await.unwrap();
        assert_eq!(network.active_local_tracks("alice"), 0);
        assert!(network.members(crate::config::DEFAULT_ROOM).is_empty());
    }

    #[tokio::test]
    async fn dropping_a_joined_call_releases_the_session() {
        let network = MemoryMediaNetwork::new();
        let (call, _) = manager(&network, "alice");
        call.join().await.unwrap();
        assert_eq!(network.active_local_tracks("alice"), 2);

        drop(call);
        assert_eq!(network.active_local_tracks("alice"), 0);
        settle().await;
        assert!(network.members(crate::config::DEFAULT_ROOM).is_empty());
    }

    #[tokio::test]
    async fn audio_preference_does_not_survive_a_rejoin() {
        let network = MemoryMediaNetwork::new();
        let (bob, _) = manager(&network, "bob");
        bob.join().await.unwrap();

        let (alice, _) = manager(&network, "alice");
        alice.join().await.unwrap();
        settle().await;
        alice.set_remote_audio_audible(true);
        assert!(alice.render_targets().remote_audio()[0].audible);

        alice.leave().await.unwrap();
        alice.join().await.unwrap();
        settle().await;
        let targets = alice.render_targets();
        assert_eq!(targets.remote_audio().len(), 1);
        assert!(!targets.remote_audio()[0].audible);
    }

    #[tokio::test]
    async fn state_transitions_are_emitted_in_order() {
        let network = MemoryMediaNetwork::new();
        let (call, capture) = manager(&network, "alice");
        call.join().await.unwrap();
        call.leave().await.unwrap();

        let states: Vec<CallState> = capture
            .snapshot()
            .into_iter()
            .filter_map(|e| match e {
                AppEvent::CallStateChanged(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            [CallState::Joining, CallState::Joined, CallState::Leaving, CallState::Idle]
        );
    }
}
