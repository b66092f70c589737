use p2d_core::ContentHint;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Where a local track's samples come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackSource {
    Microphone,
    /// Screen share, tagged with its `screen-<n>` stream id.
    Screen(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Live,
    Ended,
}

struct TrackInner {
    kind: TrackKind,
    source: TrackSource,
    content_hint: Option<ContentHint>,
    rtc: Arc<TrackLocalStaticSample>,
    enabled: AtomicBool,
    state_tx: watch::Sender<TrackState>,
}

/// A pipeline-owned media track. Sessions and the controller hold
/// clones; all of them observe the same enabled bit and end event.
/// Ending is one-way: a track never comes back to life.
#[derive(Clone)]
pub struct LocalTrack {
    inner: Arc<TrackInner>,
}

impl LocalTrack {
    pub fn new(
        kind: TrackKind,
        source: TrackSource,
        content_hint: Option<ContentHint>,
        rtc: Arc<TrackLocalStaticSample>,
    ) -> Self {
        let (state_tx, _) = watch::channel(TrackState::Live);
        Self {
            inner: Arc::new(TrackInner {
                kind,
                source,
                content_hint,
                rtc,
                enabled: AtomicBool::new(true),
                state_tx,
            }),
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn source(&self) -> &TrackSource {
        &self.inner.source
    }

    pub fn content_hint(&self) -> Option<ContentHint> {
        self.inner.content_hint
    }

    /// Identifier used for sender bookkeeping across sessions.
    pub fn id(&self) -> String {
        match &self.inner.source {
            TrackSource::Microphone => "microphone".to_owned(),
            TrackSource::Screen(stream_id) => stream_id.clone(),
        }
    }

    pub fn rtc(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.inner.rtc.clone()
    }

    pub fn sample_track(&self) -> Arc<TrackLocalStaticSample> {
        self.inner.rtc.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn state(&self) -> TrackState {
        *self.inner.state_tx.borrow()
    }

    /// Mark the track ended and wake every watcher.
    pub fn end(&self) {
        let _ = self.inner.state_tx.send(TrackState::Ended);
    }

    /// Subscribe to the end event.
    pub fn watch_state(&self) -> watch::Receiver<TrackState> {
        self.inner.state_tx.subscribe()
    }
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("kind", &self.inner.kind)
            .field("source", &self.inner.source)
            .field("state", &self.state())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
