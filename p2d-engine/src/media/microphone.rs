use crate::config::VadConfig;
use crate::error::EngineError;
use crate::media::analyser::VoiceDetector;
use crate::media::track::{LocalTrack, TrackKind, TrackSource};
use audiopus::{coder::Encoder as OpusEncoder, Application, Channels, SampleRate};
use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// 20 ms at 48 kHz.
const FRAME_SIZE_PER_CHANNEL: usize = 960;
const ANALYSIS_WINDOW: usize = 512;

/// Microphone capture: raw device input (no echo-cancel, noise-suppress
/// or AGC in the path), Opus-encoded 20 ms frames into a local track,
/// with the spectrum detector ticking alongside.
pub struct Microphone {
    track: LocalTrack,
    running: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl Microphone {
    /// Open the device and start capturing. Device faults surface here;
    /// nothing is retried silently.
    pub async fn start(
        device_id: Option<String>,
        vad: VadConfig,
        vad_tx: mpsc::UnboundedSender<bool>,
    ) -> Result<Self, EngineError> {
        let host = cpal::default_host();
        let device = match &device_id {
            Some(id) => host
                .input_devices()
                .map_err(EngineError::device)?
                .find(|d| d.name().map(|n| &n == id).unwrap_or(false))
                .ok_or_else(|| EngineError::Device(format!("no input device named {id}")))?,
            None => host
                .default_input_device()
                .ok_or_else(|| EngineError::Device("no default input device".into()))?,
        };
        info!(
            "Using input device: {}",
            device.name().unwrap_or_else(|_| "<unnamed>".into())
        );

        let supported = device
            .supported_input_configs()
            .map_err(EngineError::device)?
            .find(|c| c.max_sample_rate().0 >= 48_000 && c.min_sample_rate().0 <= 48_000)
            .ok_or_else(|| EngineError::Device("input device cannot run at 48 kHz".into()))?
            .with_sample_rate(cpal::SampleRate(48_000));
        let config: cpal::StreamConfig = supported.into();
        let channels = config.channels as usize;

        let track = LocalTrack::new(
            TrackKind::Audio,
            TrackSource::Microphone,
            None,
            Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    ..Default::default()
                },
                "audio".to_owned(),
                "p2d".to_owned(),
            )),
        );

        let mut encoder =
            OpusEncoder::new(SampleRate::Hz48000, Channels::Stereo, Application::Voip)
                .map_err(EngineError::media)?;

        // Sync capture callback → async track writer.
        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<Bytes>();
        let sample_track = track.sample_track();
        tokio::spawn(async move {
            while let Some(data) = frame_rx.recv().await {
                let sample = Sample {
                    data,
                    duration: Duration::from_millis(20),
                    ..Default::default()
                };
                if let Err(e) = sample_track.write_sample(&sample).await {
                    debug!("Audio sample write failed: {e}");
                    break;
                }
            }
        });

        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), EngineError>>();

        let thread_running = running.clone();
        let enabled_track = track.clone();
        let ticks_per_vad = (vad.tick.as_millis() as usize / 20).max(1);
        let mut detector = VoiceDetector::new(vad.threshold);

        let handle = std::thread::Builder::new()
            .name("mic-capture".to_owned())
            .spawn(move || {
                let mut stereo: Vec<f32> = Vec::with_capacity(FRAME_SIZE_PER_CHANNEL * 2);
                let mut analysis: Vec<f32> = Vec::with_capacity(ANALYSIS_WINDOW);
                let mut frames_since_tick = 0usize;
                let mut opus_out = [0u8; 4000];

                let callback_running = thread_running.clone();
                let stream = device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !callback_running.load(Ordering::Relaxed) {
                            return;
                        }
                        let muted = !enabled_track.is_enabled();

                        // Normalise to interleaved stereo.
                        match channels {
                            1 => {
                                for &sample in data {
                                    stereo.push(sample);
                                    stereo.push(sample);
                                }
                            }
                            2 => stereo.extend_from_slice(data),
                            n => {
                                for chunk in data.chunks(n) {
                                    if chunk.len() >= 2 {
                                        stereo.push(chunk[0]);
                                        stereo.push(chunk[1]);
                                    }
                                }
                            }
                        }

                        while stereo.len() >= FRAME_SIZE_PER_CHANNEL * 2 {
                            let frame_len = FRAME_SIZE_PER_CHANNEL * 2;

                            for pair in stereo[..frame_len].chunks(2) {
                                if analysis.len() == ANALYSIS_WINDOW {
                                    analysis.remove(0);
                                }
                                analysis.push((pair[0] + pair[1]) * 0.5);
                            }

                            frames_since_tick += 1;
                            if frames_since_tick >= ticks_per_vad {
                                frames_since_tick = 0;
                                if let Some(speaking) = detector.tick(&analysis, muted) {
                                    let _ = vad_tx.send(speaking);
                                }
                            }

                            if !muted {
                                match encoder.encode_float(&stereo[..frame_len], &mut opus_out) {
                                    Ok(len) => {
                                        let _ = frame_tx
                                            .send(Bytes::copy_from_slice(&opus_out[..len]));
                                    }
                                    Err(e) => warn!("Opus encode failed: {e}"),
                                }
                            }

                            stereo.drain(..frame_len);
                        }
                    },
                    |err| warn!("Input stream error: {err}"),
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(EngineError::device(e)));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(EngineError::device(e)));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // The stream lives exactly as long as this thread.
                while thread_running.load(Ordering::Relaxed) {
                    std::thread::sleep(Duration::from_millis(50));
                }
                debug!("Microphone capture thread stopping");
            })
            .map_err(EngineError::device)?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(Self {
                track,
                running,
                handle: Some(handle),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(EngineError::Device("capture thread died during start".into())),
        }
    }

    pub fn track(&self) -> LocalTrack {
        self.track.clone()
    }

    /// Flip the track's enabled bit and return the new muted state. The
    /// device stays open; encoded frames simply stop flowing while muted.
    pub fn toggle_mute(&self) -> bool {
        let now_muted = self.track.is_enabled();
        self.track.set_enabled(!now_muted);
        now_muted
    }

    pub fn is_muted(&self) -> bool {
        !self.track.is_enabled()
    }

    /// Release the device and end the track. The end event propagates
    /// to every session holding the track.
    pub fn stop(mut self) -> LocalTrack {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.track.end();
        self.track.clone()
    }
}

impl Drop for Microphone {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
