use crate::config::VadConfig;
use crate::error::EngineError;
use crate::media::microphone::Microphone;
use crate::media::screen::{ScreenSource, ScreenTrack};
use crate::media::track::LocalTrack;
use p2d_core::QualityProfile;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::info;

/// Owns every local media source. The mesh controller is the only
/// caller; sessions only ever see non-owning `LocalTrack` clones.
pub struct MediaPipeline {
    vad: VadConfig,
    vad_tx: mpsc::UnboundedSender<bool>,
    microphone: Option<Microphone>,
    screens: HashMap<String, ScreenTrack>,
    screen_seq: u64,
}

impl MediaPipeline {
    /// `vad_tx` receives local speaking transitions at the VAD tick rate.
    pub fn new(vad: VadConfig, vad_tx: mpsc::UnboundedSender<bool>) -> Self {
        Self {
            vad,
            vad_tx,
            microphone: None,
            screens: HashMap::new(),
            screen_seq: 0,
        }
    }

    pub async fn start_microphone(
        &mut self,
        device_id: Option<String>,
    ) -> Result<LocalTrack, EngineError> {
        if self.microphone.is_some() {
            return Err(EngineError::Misuse("microphone already running"));
        }
        let microphone =
            Microphone::start(device_id, self.vad.clone(), self.vad_tx.clone()).await?;
        let track = microphone.track();
        self.microphone = Some(microphone);
        Ok(track)
    }

    /// Idempotent. Returns the ended track for sender cleanup.
    pub fn stop_microphone(&mut self) -> Option<LocalTrack> {
        self.microphone.take().map(|m| {
            info!("Stopping microphone");
            m.stop()
        })
    }

    /// Returns the new muted state.
    pub fn toggle_mute(&mut self) -> Result<bool, EngineError> {
        self.microphone
            .as_ref()
            .map(|m| m.toggle_mute())
            .ok_or(EngineError::Misuse("microphone is not running"))
    }

    pub fn is_muted(&self) -> bool {
        self.microphone.as_ref().map(|m| m.is_muted()).unwrap_or(false)
    }

    pub async fn start_screen(
        &mut self,
        source: Box<dyn ScreenSource>,
        profile: &QualityProfile,
    ) -> Result<LocalTrack, EngineError> {
        self.screen_seq += 1;
        let stream_id = format!("screen-{}", self.screen_seq);

        let screen = ScreenTrack::start(source, profile, stream_id.clone()).await?;
        let track = screen.track();
        info!("Screen share {stream_id} started");
        self.screens.insert(stream_id, screen);
        Ok(track)
    }

    /// Stop one share by stream id, or every share when `None`.
    pub fn stop_screen(&mut self, stream_id: Option<&str>) -> Vec<LocalTrack> {
        let ids: Vec<String> = match stream_id {
            Some(id) => self
                .screens
                .keys()
                .filter(|k| k.as_str() == id)
                .cloned()
                .collect(),
            None => self.screens.keys().cloned().collect(),
        };

        ids.iter()
            .filter_map(|id| {
                self.screens.remove(id).map(|screen| {
                    info!("Screen share {id} stopped");
                    screen.stop()
                })
            })
            .collect()
    }

    /// Drop the bookkeeping for a screen track that ended on its own
    /// (source revoked). Returns whether it was still registered.
    pub fn forget_screen(&mut self, stream_id: &str) -> bool {
        self.screens.remove(stream_id).is_some()
    }

    /// Every live local track, microphone first, then screens in id
    /// order. Stable ordering keeps session attach order deterministic.
    pub fn live_tracks(&self) -> Vec<LocalTrack> {
        let mut tracks: Vec<LocalTrack> = Vec::new();
        if let Some(m) = &self.microphone {
            tracks.push(m.track());
        }
        let mut ids: Vec<&String> = self.screens.keys().collect();
        ids.sort();
        for id in ids {
            tracks.push(self.screens[id].track());
        }
        tracks
    }

    /// Stop everything the pipeline owns; used by the leave sequence.
    pub fn stop_all(&mut self) -> Vec<LocalTrack> {
        let mut ended = Vec::new();
        if let Some(track) = self.stop_microphone() {
            ended.push(track);
        }
        ended.extend(self.stop_screen(None));
        ended
    }
}
