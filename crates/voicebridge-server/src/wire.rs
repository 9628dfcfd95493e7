//! The audio WebSocket's JSON text-frame shapes, bit-exact per spec.md §6.
//! Binary frames carry raw audio and need no parsing; everything else
//! (metadata, DTMF, hangup, the bridge-to-switch `streamAudio` envelope)
//! travels as one of these.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use voicebridge_core::AudioFormat;

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundTextFrame {
    Metadata {
        caller_id: String,
        destination: String,
        tenant_id: String,
        call_id: String,
        timestamp: u64,
    },
    Dtmf {
        digit: char,
    },
    Hangup {
        #[serde(default)]
        reason: Option<String>,
    },
}

/// Parses one inbound text frame. Unknown `type` values are logged and
/// ignored by the caller rather than treated as a protocol violation — a
/// switch implementation is free to send frame kinds this bridge does not
/// act on.
pub fn parse_inbound_text(text: &str) -> Result<InboundTextFrame, serde_json::Error> {
    serde_json::from_str(text)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StreamAudioData<'a> {
    audio_data_type: &'a str,
    sample_rate: u32,
    audio_data: String,
}

#[derive(Serialize)]
struct StreamAudioFrame<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    data: StreamAudioData<'a>,
}

/// Build the bridge→switch `streamAudio` envelope for one outbound frame.
pub fn build_stream_audio_frame(frame: &[u8], format: AudioFormat) -> String {
    let sample_rate = match format {
        AudioFormat::G711 => 8000,
        AudioFormat::Pcm16 => 16000,
    };
    let envelope = StreamAudioFrame {
        kind: "streamAudio",
        data: StreamAudioData {
            audio_data_type: "raw",
            sample_rate,
            audio_data: voicebridge_provider::base64_encode(frame),
        },
    };
    serde_json::to_string(&envelope).unwrap_or_else(|_| "{}".to_string())
}

/// Extract `type` from an arbitrary JSON text frame, for logging unknown
/// frame kinds without failing strict deserialization.
pub fn frame_type(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    value.get("type").and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_metadata_frame() {
        let text = r#"{"type":"metadata","caller_id":"+1555","destination":"1000","tenant_id":"t1","call_id":"c1","timestamp":123}"#;
        let frame = parse_inbound_text(text).unwrap();
        assert!(matches!(frame, InboundTextFrame::Metadata { .. }));
    }

    #[test]
    fn parses_dtmf_frame() {
        let frame = parse_inbound_text(r#"{"type":"dtmf","digit":"5"}"#).unwrap();
        assert!(matches!(frame, InboundTextFrame::Dtmf { digit: '5' }));
    }

    #[test]
    fn builds_stream_audio_envelope() {
        let json = build_stream_audio_frame(&[1, 2, 3], AudioFormat::Pcm16);
        assert!(json.contains("\"type\":\"streamAudio\""));
        assert!(json.contains("\"sampleRate\":16000"));
    }
}
