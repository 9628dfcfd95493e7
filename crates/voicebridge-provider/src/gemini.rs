//! Gemini Live adapter: `realtimeInput.audio` frames with an explicit
//! `mimeType`, `activityEnd` for barge-in, `systemInstruction` carried in the
//! initial `setup` message, 16 kHz both ways, per spec.md §6.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, warn};

use voicebridge_core::{CallId, SecretaryConfig, VoiceError};

use crate::adapter::{base64_encode, event_channel, provider_name, ProviderAdapter, RECONNECT_BACKOFF};
use crate::event::ProviderEvent;

const GEMINI_LIVE_URL_BASE: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

const PCM_MIME_TYPE: &str = "audio/pcm;rate=16000";

type WsSink = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    WsMessage,
>;

/// Builds the connect URL carrying the API key as a query parameter, the
/// way Gemini Live's WebSocket handshake expects it (no custom header).
pub fn connect_url(api_key: &str) -> String {
    format!("{GEMINI_LIVE_URL_BASE}?key={api_key}")
}

/// The first message on the socket: model, voice config and the system
/// prompt as `systemInstruction`. Gemini has no separate session-update
/// message, so this single `setup` frame carries everything `session.update`
/// carries for OpenAI.
pub fn build_setup(config: &SecretaryConfig) -> Value {
    json!({
        "setup": {
            "model": "models/gemini-2.0-flash-live-001",
            "systemInstruction": {
                "parts": [{ "text": config.system_prompt }],
            },
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": config.voice },
                    },
                },
            },
        }
    })
}

pub fn build_audio_input(frame: &[u8]) -> Value {
    json!({
        "realtimeInput": {
            "audio": {
                "data": base64_encode(frame),
                "mimeType": PCM_MIME_TYPE,
            }
        }
    })
}

pub fn build_activity_end() -> Value {
    json!({ "realtimeInput": { "activityEnd": {} } })
}

pub fn parse_server_event(text: &str) -> Vec<ProviderEvent> {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(err) => return vec![ProviderEvent::Error(format!("malformed event: {err}"))],
    };

    if let Some(content) = value
        .get("serverContent")
        .and_then(|c| c.get("modelTurn"))
        .and_then(|t| t.get("parts"))
        .and_then(Value::as_array)
    {
        let mut events = Vec::new();
        for part in content {
            if let Some(inline) = part.get("inlineData") {
                let mime = inline.get("mimeType").and_then(Value::as_str).unwrap_or("");
                if mime.starts_with("audio/pcm") {
                    if let Some(data) = inline.get("data").and_then(Value::as_str) {
                        events.extend(decode_pcm16(data));
                    }
                }
            }
            if let Some(text_part) = part.get("text").and_then(Value::as_str) {
                events.push(ProviderEvent::AssistantTextDelta(text_part.to_string()));
            }
        }
        return events;
    }

    if value
        .get("serverContent")
        .and_then(|c| c.get("turnComplete"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        return vec![ProviderEvent::AssistantDone];
    }

    if value
        .get("serverContent")
        .and_then(|c| c.get("interrupted"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        return vec![ProviderEvent::AssistantDone];
    }

    if let Some(tool_call) = value.get("toolCall").and_then(|t| t.get("functionCalls")).and_then(Value::as_array) {
        return tool_call
            .iter()
            .map(|call| ProviderEvent::FunctionCall {
                name: call.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                arguments: call.get("args").cloned().unwrap_or(Value::Null),
                call_ref: call.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
            })
            .collect();
    }

    vec![]
}

fn decode_pcm16(b64: &str) -> Vec<ProviderEvent> {
    use base64::Engine;
    let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(b64) else {
        return vec![ProviderEvent::Error("invalid base64 audio".into())];
    };
    let samples: Vec<i16> = bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect();
    vec![ProviderEvent::AssistantAudio(samples)]
}

enum Outbound {
    Json(Value),
    Close,
}

pub struct GeminiLiveAdapter {
    outbound_tx: Option<mpsc::Sender<Outbound>>,
    event_rx: Option<mpsc::Receiver<ProviderEvent>>,
    api_key: String,
}

impl GeminiLiveAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            outbound_tx: None,
            event_rx: None,
            api_key: api_key.into(),
        }
    }

    async fn connect_once(&mut self, config: &SecretaryConfig) -> Result<(), String> {
        let url = connect_url(&self.api_key);
        let (ws, _resp) = tokio_tungstenite::connect_async(url).await.map_err(|e| e.to_string())?;
        let (mut sink, stream) = ws.split();

        sink.send(WsMessage::Text(build_setup(config).to_string()))
            .await
            .map_err(|e| e.to_string())?;

        let (outbound_tx, outbound_rx) = mpsc::channel::<Outbound>(256);
        let (event_tx, event_rx) = event_channel();

        tokio::spawn(outbound_loop(Arc::new(Mutex::new(sink)), outbound_rx));
        tokio::spawn(inbound_loop(stream, event_tx));

        self.outbound_tx = Some(outbound_tx);
        self.event_rx = Some(event_rx);
        Ok(())
    }

    async fn send(&self, value: Value) -> Result<(), VoiceError> {
        let Some(tx) = &self.outbound_tx else {
            return Err(VoiceError::Internal {
                detail: "Gemini adapter used before connect()".into(),
            });
        };
        tx.send(Outbound::Json(value)).await.map_err(|_| VoiceError::Internal {
            detail: "Gemini outbound channel closed".into(),
        })
    }
}

async fn outbound_loop(sink: Arc<Mutex<WsSink>>, mut rx: mpsc::Receiver<Outbound>) {
    while let Some(msg) = rx.recv().await {
        let mut sink = sink.lock().await;
        let result = match msg {
            Outbound::Json(v) => sink.send(WsMessage::Text(v.to_string())).await,
            Outbound::Close => {
                let _ = sink.send(WsMessage::Close(None)).await;
                break;
            }
        };
        if let Err(err) = result {
            warn!(%err, "Gemini send failed, closing outbound loop");
            break;
        }
    }
}

async fn inbound_loop(
    mut stream: futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>,
    tx: mpsc::Sender<ProviderEvent>,
) {
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => {
                for event in parse_server_event(&text) {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
            Ok(WsMessage::Binary(bytes)) => {
                if let Ok(text) = String::from_utf8(bytes) {
                    for event in parse_server_event(&text) {
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                }
            }
            Ok(WsMessage::Close(_)) => {
                debug!("Gemini connection closed by peer");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                error!(%err, "Gemini WebSocket error");
                let _ = tx.send(ProviderEvent::Error(err.to_string())).await;
                break;
            }
        }
    }
}

#[async_trait]
impl ProviderAdapter for GeminiLiveAdapter {
    async fn connect(&mut self, call_id: &CallId, config: &SecretaryConfig) -> Result<(), VoiceError> {
        if let Err(detail) = self.connect_once(config).await {
            warn!(call_id = %call_id, %detail, "Gemini connect failed, retrying once");
            tokio::time::sleep(RECONNECT_BACKOFF).await;
            self.connect_once(config).await.map_err(|detail| VoiceError::ProviderUnavailable {
                call_id: call_id.to_string(),
                provider: provider_name(voicebridge_core::ProviderKind::Gemini).to_string(),
                detail,
            })?;
        }
        Ok(())
    }

    async fn send_audio(&self, frame: &[u8]) -> Result<(), VoiceError> {
        self.send(build_audio_input(frame)).await
    }

    async fn commit_user_turn(&self) -> Result<(), VoiceError> {
        // Gemini Live uses server-side VAD by default; no explicit commit.
        Ok(())
    }

    async fn interrupt(&self) -> Result<(), VoiceError> {
        self.send(build_activity_end()).await
    }

    fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<ProviderEvent>> {
        self.event_rx.take()
    }

    async fn close(&self, reason: &str) -> Result<(), VoiceError> {
        debug!(reason, "closing Gemini adapter");
        if let Some(tx) = &self.outbound_tx {
            let _ = tx.send(Outbound::Close).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SecretaryConfig {
        SecretaryConfig {
            tenant_id: "t".into(),
            extension: "1000".into(),
            greeting_text: "oi".into(),
            farewell_text: "tchau".into(),
            system_prompt: "be helpful".into(),
            voice: "Puck".into(),
            provider: voicebridge_core::ProviderKind::Gemini,
            audio_format: voicebridge_core::AudioFormat::Pcm16,
            vad_threshold: 0.3,
            silence_duration_ms: 700,
            max_turns: 50,
            max_duration_s: 600,
            transfer_rules: vec![],
            webhook_url: "https://backend.example/api/tickets/realtime-handoff".into(),
        }
    }

    #[test]
    fn setup_carries_system_instruction() {
        let msg = build_setup(&config());
        assert_eq!(
            msg["setup"]["systemInstruction"]["parts"][0]["text"],
            "be helpful"
        );
        assert_eq!(
            msg["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Puck"
        );
    }

    #[test]
    fn audio_input_shape_has_mime_type() {
        let msg = build_audio_input(b"hi");
        assert_eq!(msg["realtimeInput"]["audio"]["mimeType"], "audio/pcm;rate=16000");
        assert!(msg["realtimeInput"]["audio"]["data"].is_string());
    }

    #[test]
    fn activity_end_shape_matches_spec() {
        assert_eq!(
            build_activity_end(),
            json!({"realtimeInput": {"activityEnd": {}}})
        );
    }

    #[test]
    fn parses_audio_part_into_linear16() {
        use base64::Engine;
        let samples: Vec<i16> = vec![1, -1, 32767];
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let b64 = base64::engine::general_purpose::STANDARD.encode(&bytes);
        let text = json!({
            "serverContent": {
                "modelTurn": {
                    "parts": [{ "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": b64 } }]
                }
            }
        })
        .to_string();
        let events = parse_server_event(&text);
        match &events[0] {
            ProviderEvent::AssistantAudio(decoded) => assert_eq!(decoded, &samples),
            other => panic!("expected AssistantAudio, got {other:?}"),
        }
    }

    #[test]
    fn parses_function_call() {
        let text = json!({
            "toolCall": {
                "functionCalls": [{ "name": "transfer_call", "id": "call-1", "args": {"destination": "1004"} }]
            }
        })
        .to_string();
        let events = parse_server_event(&text);
        match &events[0] {
            ProviderEvent::FunctionCall { name, call_ref, .. } => {
                assert_eq!(name, "transfer_call");
                assert_eq!(call_ref, "call-1");
            }
            other => panic!("expected FunctionCall, got {other:?}"),
        }
    }

    #[test]
    fn turn_complete_maps_to_assistant_done() {
        let text = json!({"serverContent": {"turnComplete": true}}).to_string();
        assert!(matches!(parse_server_event(&text)[0], ProviderEvent::AssistantDone));
    }

    #[test]
    fn unrecognized_event_type_is_ignored() {
        let text = json!({"somethingElse": true}).to_string();
        assert!(parse_server_event(&text).is_empty());
    }
}
