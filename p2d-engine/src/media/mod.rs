mod analyser;
mod codec;
mod microphone;
mod pipeline;
mod playback;
mod screen;
mod track;

pub use analyser::{SpectrumAnalyser, VoiceDetector, SPECTRUM_BINS};
pub use codec::{default_video_codecs, order_codecs};
pub use microphone::Microphone;
pub use pipeline::MediaPipeline;
pub use playback::spawn_remote_audio;
pub use screen::{ScreenSource, ScreenTrack, SourceConstraints, VideoFrame};
pub use track::{LocalTrack, TrackKind, TrackSource, TrackState};
