use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Video codec on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    Av1,
    Vp9,
    H264,
    Vp8,
}

impl VideoCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoCodec::Av1 => "av1",
            VideoCodec::Vp9 => "vp9",
            VideoCodec::H264 => "h264",
            VideoCodec::Vp8 => "vp8",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            VideoCodec::Av1 => "video/AV1",
            VideoCodec::Vp9 => "video/VP9",
            VideoCodec::H264 => "video/H264",
            VideoCodec::Vp8 => "video/VP8",
        }
    }
}

/// Requested codec; `Auto` resolves to AV1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CodecPreference {
    #[default]
    Auto,
    Av1,
    Vp9,
    H264,
    Vp8,
}

impl CodecPreference {
    pub fn resolve(&self) -> VideoCodec {
        match self {
            CodecPreference::Auto | CodecPreference::Av1 => VideoCodec::Av1,
            CodecPreference::Vp9 => VideoCodec::Vp9,
            CodecPreference::H264 => VideoCodec::H264,
            CodecPreference::Vp8 => VideoCodec::Vp8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Resolution {
    #[default]
    #[serde(rename = "native")]
    Native,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "720p")]
    P720,
}

impl Resolution {
    /// Ideal width/height cap, or `None` for no downscale constraint.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match self {
            Resolution::Native => None,
            Resolution::P1080 => Some((1920, 1080)),
            Resolution::P720 => Some((1280, 720)),
        }
    }
}

/// Frames per second, restricted to the supported set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct FrameRate(u32);

impl FrameRate {
    pub const SUPPORTED: [u32; 4] = [15, 30, 60, 120];

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        Self(30)
    }
}

impl TryFrom<u32> for FrameRate {
    type Error = String;

    fn try_from(fps: u32) -> Result<Self, Self::Error> {
        if Self::SUPPORTED.contains(&fps) {
            Ok(Self(fps))
        } else {
            Err(format!("unsupported frame rate: {fps}"))
        }
    }
}

impl From<FrameRate> for u32 {
    fn from(fr: FrameRate) -> u32 {
        fr.0
    }
}

/// `"auto"` on the wire, or a bare number in bits per second. The mixed
/// shape rules out a derive, so the impls are written by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitrateMode {
    #[default]
    Auto,
    Explicit(u32),
}

impl Serialize for BitrateMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            BitrateMode::Auto => serializer.serialize_str("auto"),
            BitrateMode::Explicit(bps) => serializer.serialize_u32(*bps),
        }
    }
}

impl<'de> Deserialize<'de> for BitrateMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BitrateModeVisitor;

        impl<'de> Visitor<'de> for BitrateModeVisitor {
            type Value = BitrateMode;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("\"auto\" or a bitrate in bits per second")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<BitrateMode, E> {
                if v == "auto" {
                    Ok(BitrateMode::Auto)
                } else {
                    Err(E::invalid_value(de::Unexpected::Str(v), &self))
                }
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<BitrateMode, E> {
                u32::try_from(v)
                    .map(BitrateMode::Explicit)
                    .map_err(|_| E::invalid_value(de::Unexpected::Unsigned(v), &self))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<BitrateMode, E> {
                u32::try_from(v)
                    .map(BitrateMode::Explicit)
                    .map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))
            }
        }

        deserializer.deserialize_any(BitrateModeVisitor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentHint {
    #[default]
    Motion,
    Detail,
    Text,
}

impl ContentHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentHint::Motion => "motion",
            ContentHint::Detail => "detail",
            ContentHint::Text => "text",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct QualityProfile {
    pub resolution: Resolution,
    pub frame_rate: FrameRate,
    pub bitrate: BitrateMode,
    pub codec: CodecPreference,
    pub content_hint: ContentHint,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_wire_names() {
        let profile: QualityProfile = serde_json::from_str(
            r#"{"resolution":"1080p","frameRate":60,"bitrate":"auto","codec":"av1","contentHint":"motion"}"#,
        )
        .unwrap();
        assert_eq!(profile.resolution, Resolution::P1080);
        assert_eq!(profile.frame_rate.get(), 60);
        assert_eq!(profile.bitrate, BitrateMode::Auto);
        assert_eq!(profile.codec, CodecPreference::Av1);
    }

    #[test]
    fn explicit_bitrate_is_a_number() {
        let profile: QualityProfile = serde_json::from_str(r#"{"bitrate":2500000}"#).unwrap();
        assert_eq!(profile.bitrate, BitrateMode::Explicit(2_500_000));
        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["bitrate"], 2_500_000);
    }

    #[test]
    fn auto_bitrate_round_trips_as_a_string() {
        let json = serde_json::to_value(QualityProfile::default()).unwrap();
        assert_eq!(json["bitrate"], "auto");

        let back: BitrateMode = serde_json::from_value(json["bitrate"].clone()).unwrap();
        assert_eq!(back, BitrateMode::Auto);

        let bad: Result<BitrateMode, _> = serde_json::from_str(r#""fast""#);
        assert!(bad.is_err());
    }

    #[test]
    fn frame_rate_rejects_unsupported() {
        let res: Result<QualityProfile, _> = serde_json::from_str(r#"{"frameRate":24}"#);
        assert!(res.is_err());
    }

    #[test]
    fn auto_codec_resolves_to_av1() {
        assert_eq!(CodecPreference::Auto.resolve(), VideoCodec::Av1);
        assert_eq!(CodecPreference::Auto.resolve().mime_type(), "video/AV1");
    }
}
