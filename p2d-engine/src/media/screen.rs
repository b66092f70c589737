use crate::error::EngineError;
use crate::media::track::{LocalTrack, TrackKind, TrackSource};
use async_trait::async_trait;
use bytes::Bytes;
use p2d_core::{BitrateMode, ContentHint, QualityProfile};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Capture constraints derived from a quality profile. The host-side
/// source is expected to honour them on a best-effort basis, the way a
/// display-media request treats ideal/max constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceConstraints {
    /// Ideal resolution cap; `None` keeps the native size.
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
    /// Applied as both ideal and max.
    pub frame_rate: u32,
    /// Encoder target in bits per second; `None` leaves the source's
    /// adaptive control in charge.
    pub bitrate: Option<u32>,
    pub content_hint: ContentHint,
}

impl SourceConstraints {
    pub fn from_profile(profile: &QualityProfile) -> Self {
        let (max_width, max_height) = match profile.resolution.dimensions() {
            Some((w, h)) => (Some(w), Some(h)),
            None => (None, None),
        };
        Self {
            max_width,
            max_height,
            frame_rate: profile.frame_rate.get(),
            bitrate: match profile.bitrate {
                BitrateMode::Explicit(bps) => Some(bps),
                BitrateMode::Auto => None,
            },
            content_hint: profile.content_hint,
        }
    }
}

/// One encoded video frame from a screen source. The engine never
/// transcodes; the payload must already match the negotiated codec.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub duration: Duration,
}

/// Host-provided frame producer. Acquisition of the actual display
/// surface lives with the host shell; the engine only pulls frames.
/// Returning `Ok(None)` means the source ended (the user stopped
/// sharing at the OS level).
#[async_trait]
pub trait ScreenSource: Send + 'static {
    async fn start(&mut self, constraints: SourceConstraints) -> Result<(), EngineError>;

    async fn next_frame(&mut self) -> Result<Option<VideoFrame>, EngineError>;

    /// Hook for an external bandwidth controller to retarget the
    /// encoder mid-share. Sources without dynamic rate control may
    /// keep the default no-op.
    async fn set_target_bitrate(&mut self, _bps: u32) -> Result<(), EngineError> {
        Ok(())
    }
}

/// A live screen-share track: pipeline-owned, indexed by stream id,
/// independent of any sibling shares.
pub struct ScreenTrack {
    track: LocalTrack,
    stop_tx: watch::Sender<bool>,
}

impl ScreenTrack {
    /// Pull frames from the source into a fresh video track. The track
    /// ends when the source does, or when `stop` is called.
    pub async fn start(
        mut source: Box<dyn ScreenSource>,
        profile: &QualityProfile,
        stream_id: String,
    ) -> Result<Self, EngineError> {
        let constraints = SourceConstraints::from_profile(profile);
        source.start(constraints).await?;

        let rtc = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: profile.codec.resolve().mime_type().to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
            "video".to_owned(),
            stream_id.clone(),
        ));
        let track = LocalTrack::new(
            TrackKind::Video,
            TrackSource::Screen(stream_id.clone()),
            Some(profile.content_hint),
            rtc,
        );

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let writer_track = track.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    frame = source.next_frame() => match frame {
                        Ok(Some(frame)) => {
                            if !writer_track.is_enabled() {
                                continue;
                            }
                            let sample = Sample {
                                data: frame.data,
                                duration: frame.duration,
                                ..Default::default()
                            };
                            if let Err(e) = writer_track.sample_track().write_sample(&sample).await {
                                debug!("Screen sample write failed for {stream_id}: {e}");
                            }
                        }
                        Ok(None) => {
                            debug!("Screen source {stream_id} ended");
                            break;
                        }
                        Err(e) => {
                            warn!("Screen source {stream_id} failed: {e}");
                            break;
                        }
                    },
                }
            }
            writer_track.end();
        });

        Ok(Self { track, stop_tx })
    }

    pub fn track(&self) -> LocalTrack {
        self.track.clone()
    }

    pub fn stream_id(&self) -> String {
        self.track.id()
    }

    /// Stop this share. Siblings are unaffected.
    pub fn stop(self) -> LocalTrack {
        let _ = self.stop_tx.send(true);
        self.track
    }
}
