use crate::events::{RemoteTrackInfo, TrackKind};

/// Surface the local camera preview is rendered on.
pub const LOCAL_VIDEO_SURFACE: &str = "local-video";
/// Visible surface remote video is attached to.
pub const REMOTE_VIDEO_SURFACE: &str = "remote-video";

/// Autoplay sink for one remote audio track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSink {
    pub track: RemoteTrackInfo,
    pub audible: bool,
}

/// What is currently attached to the VideoCall render targets.
///
/// Updated by the call event loop. Read by the UI shell.
#[derive(Debug, Clone, Default)]
pub struct RenderTargets {
    local_video: Option<String>,
    remote_video: Option<RemoteTrackInfo>,
    remote_audio: Vec<AudioSink>,
    audio_audible: bool,
}

impl RenderTargets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_local_video(&mut self, track_id: String) {
        self.local_video = Some(track_id);
    }

    pub fn local_video(&self) -> Option<&str> {
        self.local_video.as_deref()
    }

    /// Attach a subscribed remote track. Video goes to the single remote
    /// surface, replacing whatever was shown; the replaced track is returned.
    /// Audio gets its own sink, one per participant.
    pub fn attach_remote(&mut self, track: RemoteTrackInfo) -> Option<RemoteTrackInfo> {
        match track.kind {
            TrackKind::Video => self.remote_video.replace(track),
            TrackKind::Audio => {
                self.remote_audio
                    .retain(|s| s.track.participant_id != track.participant_id);
                self.remote_audio.push(AudioSink {
                    track,
                    audible: self.audio_audible,
                });
                None
            }
        }
    }

    /// Detach a participant's tracks, all kinds when `kind` is `None`.
    pub fn detach_remote(
        &mut self,
        participant_id: &str,
        kind: Option<TrackKind>,
    ) -> Vec<RemoteTrackInfo> {
        let mut detached = Vec::new();

        if kind.is_none() || kind == Some(TrackKind::Video) {
            if self
                .remote_video
                .as_ref()
                .is_some_and(|t| t.participant_id == participant_id)
            {
                detached.extend(self.remote_video.take());
            }
        }

        if kind.is_none() || kind == Some(TrackKind::Audio) {
            let (gone, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.remote_audio)
                .into_iter()
                .partition(|s| s.track.participant_id == participant_id);
            self.remote_audio = kept;
            detached.extend(gone.into_iter().map(|s| s.track));
        }

        detached
    }

    pub fn remote_video(&self) -> Option<&RemoteTrackInfo> {
        self.remote_video.as_ref()
    }

    pub fn remote_audio(&self) -> &[AudioSink] {
        &self.remote_audio
    }

    /// Remote audio sinks start inaudible until the user opts in.
    pub fn set_audio_audible(&mut self, audible: bool) {
        self.audio_audible = audible;
        for sink in &mut self.remote_audio {
            sink.audible = audible;
        }
    }

    pub fn has_remote(&self) -> bool {
        self.remote_video.is_some() || !self.remote_audio.is_empty()
    }

    /// Detach everything. Audio goes back to inaudible for the next session.
    pub fn clear(&mut self) {
        self.local_video = None;
        self.remote_video = None;
        self.remote_audio.clear();
        self.audio_audible = false;
    }
}
