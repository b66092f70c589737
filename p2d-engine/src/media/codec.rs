use p2d_core::CodecPreference;
use webrtc::api::media_engine::{MIME_TYPE_AV1, MIME_TYPE_H264, MIME_TYPE_VP8, MIME_TYPE_VP9};
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters};

/// Video codecs this engine registers, in platform order.
pub fn default_video_codecs() -> Vec<RTCRtpCodecParameters> {
    let entries = [
        (MIME_TYPE_VP8, 96u8),
        (MIME_TYPE_VP9, 98),
        (MIME_TYPE_H264, 102),
        (MIME_TYPE_AV1, 45),
    ];

    entries
        .into_iter()
        .map(|(mime_type, payload_type)| RTCRtpCodecParameters {
            capability: RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
            payload_type,
            ..Default::default()
        })
        .collect()
}

/// Order the supported codec set so the requested codec comes first.
/// Everything else keeps platform order; `auto` resolves to AV1.
pub fn order_codecs(
    preference: CodecPreference,
    supported: Vec<RTCRtpCodecParameters>,
) -> Vec<RTCRtpCodecParameters> {
    let target = preference.resolve().mime_type();
    let (mut ordered, rest): (Vec<_>, Vec<_>) = supported
        .into_iter()
        .partition(|codec| codec.capability.mime_type.eq_ignore_ascii_case(target));
    ordered.extend(rest);
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mimes(codecs: &[RTCRtpCodecParameters]) -> Vec<&str> {
        codecs.iter().map(|c| c.capability.mime_type.as_str()).collect()
    }

    #[test]
    fn auto_puts_av1_first() {
        let ordered = order_codecs(CodecPreference::Auto, default_video_codecs());
        assert_eq!(
            mimes(&ordered),
            ["video/AV1", "video/VP8", "video/VP9", "video/H264"]
        );
    }

    #[test]
    fn explicit_preference_leads() {
        let ordered = order_codecs(CodecPreference::Vp9, default_video_codecs());
        assert_eq!(
            mimes(&ordered),
            ["video/VP9", "video/VP8", "video/H264", "video/AV1"]
        );
    }

    #[test]
    fn ties_keep_platform_order() {
        let ordered = order_codecs(CodecPreference::Vp8, default_video_codecs());
        // VP8 already led the platform set; nothing else moves.
        assert_eq!(
            mimes(&ordered),
            ["video/VP8", "video/VP9", "video/H264", "video/AV1"]
        );
    }

    #[test]
    fn unsupported_preference_changes_nothing() {
        let only_vp8 = vec![default_video_codecs().swap_remove(0)];
        let ordered = order_codecs(CodecPreference::Av1, only_vp8);
        assert_eq!(mimes(&ordered), ["video/VP8"]);
    }
}
