use crate::error::EngineError;
use audiopus::{coder::Decoder as OpusDecoder, Channels, SampleRate};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::track::track_remote::TrackRemote;

/// Fill target before playback starts, ~80 ms at 48 kHz.
const JITTER_TARGET: usize = 3840;

/// Decode a remote Opus track and feed it to the default output device.
/// Returns once the track ends. The deafen flag silences output while
/// still draining the jitter buffer.
pub fn spawn_remote_audio(track: Arc<TrackRemote>, deafened: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let sink = match start_playback(deafened) {
            Ok(sink) => sink,
            Err(e) => {
                warn!("Audio playback unavailable: {e}");
                return;
            }
        };

        let mut decoder = match OpusDecoder::new(SampleRate::Hz48000, Channels::Stereo) {
            Ok(d) => d,
            Err(e) => {
                warn!("Opus decoder init failed: {e}");
                return;
            }
        };
        let mut pcm = [0.0f32; 1920 * 2];

        while let Ok((rtp, _)) = track.read_rtp().await {
            if rtp.payload.is_empty() {
                continue;
            }
            match decoder.decode_float(Some(&rtp.payload[..]), &mut pcm[..], false) {
                Ok(samples_per_channel) => {
                    let data = pcm[..samples_per_channel * 2].to_vec();
                    if sink.send(data).is_err() {
                        debug!("Playback sink closed");
                        break;
                    }
                }
                Err(e) => warn!("Opus decode failed: {e}"),
            }
        }
        debug!("Remote audio track ended");
    });
}

/// Open the default output device and return a channel for decoded
/// stereo 48 kHz samples. A small jitter buffer absorbs network spread;
/// linear interpolation bridges the device's native rate.
pub fn start_playback(
    deafened: Arc<AtomicBool>,
) -> Result<std::sync::mpsc::Sender<Vec<f32>>, EngineError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| EngineError::Device("no default output device".into()))?;
    info!(
        "Using output device: {}",
        device.name().unwrap_or_else(|_| "<unnamed>".into())
    );

    let supported = device
        .supported_output_configs()
        .map_err(EngineError::device)?
        .find(|c| c.max_sample_rate().0 >= 48_000 && c.min_sample_rate().0 <= 48_000)
        .ok_or_else(|| EngineError::Device("output device cannot run at 48 kHz".into()))?
        .with_sample_rate(cpal::SampleRate(48_000));
    let config: cpal::StreamConfig = supported.into();
    let device_rate = config.sample_rate.0 as f32;

    let (tx, rx) = std::sync::mpsc::channel::<Vec<f32>>();

    std::thread::Builder::new()
        .name("audio-playback".to_owned())
        .spawn(move || {
            let mut buffer: VecDeque<f32> = VecDeque::new();
            let ratio = 48_000.0 / device_rate;
            let mut fractional_pos = 0.0f32;
            let mut buffering = true;
            let closed = Arc::new(AtomicBool::new(false));
            let closed_in_callback = closed.clone();

            let stream = device.build_output_stream(
                &config,
                move |output: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    loop {
                        match rx.try_recv() {
                            Ok(packet) => buffer.extend(packet),
                            Err(std::sync::mpsc::TryRecvError::Empty) => break,
                            Err(std::sync::mpsc::TryRecvError::Disconnected) => {
                                closed_in_callback.store(true, Ordering::Relaxed);
                                break;
                            }
                        }
                    }

                    if buffering {
                        if buffer.len() >= JITTER_TARGET {
                            buffering = false;
                        } else {
                            output.fill(0.0);
                            return;
                        }
                    } else if buffer.is_empty() {
                        // Underrun; refill before resuming.
                        buffering = true;
                        output.fill(0.0);
                        return;
                    }

                    let deaf = deafened.load(Ordering::Relaxed);

                    for sample in output.iter_mut() {
                        let current = *buffer.front().unwrap_or(&0.0);
                        let next = *buffer.get(1).unwrap_or(&current);
                        let value = current + (next - current) * fractional_pos;
                        *sample = if deaf { 0.0 } else { value };

                        fractional_pos += ratio;
                        while fractional_pos >= 1.0 {
                            buffer.pop_front();
                            fractional_pos -= 1.0;
                        }
                    }
                },
                |err| warn!("Output stream error: {err}"),
                None,
            );

            match stream {
                Ok(stream) => {
                    if let Err(e) = stream.play() {
                        warn!("Failed to start output stream: {e}");
                        return;
                    }
                    // Keep the stream alive until the decode side hangs up.
                    while !closed.load(Ordering::Relaxed) {
                        std::thread::sleep(std::time::Duration::from_millis(200));
                    }
                    debug!("Playback thread stopping");
                }
                Err(e) => warn!("Failed to build output stream: {e}"),
            }
        })
        .map_err(EngineError::device)?;

    Ok(tx)
}
