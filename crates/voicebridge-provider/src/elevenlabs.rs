//! ElevenLabs Conversational adapter: 16 kHz both ways, `user_audio_chunk`
//! frames with no `type` field, `user_activity` for barge-in, per spec.md §6.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, warn};

use voicebridge_core::{CallId, SecretaryConfig, VoiceError};

use crate::adapter::{base64_encode, event_channel, provider_name, ProviderAdapter, RECONNECT_BACKOFF};
use crate::event::ProviderEvent;

const ELEVENLABS_CONVAI_URL: &str = "wss://api.elevenlabs.io/v1/convai/conversation";

type WsSink = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    WsMessage,
>;

/// Initial `conversation_initiation_client_data` message, carrying the
/// system prompt, voice and VAD parameters the same way `session.update`
/// does for OpenAI.
pub fn build_conversation_init(config: &SecretaryConfig) -> Value {
    json!({
        "type": "conversation_initiation_client_data",
        "conversation_config_override": {
            "agent": {
                "prompt": { "prompt": config.system_prompt },
                "first_message": config.greeting_text,
            },
            "tts": { "voice_id": config.voice },
        },
    })
}

/// Audio frames have no `type` field at all, per spec.md §6.
pub fn build_audio_chunk(frame: &[u8]) -> Value {
    json!({ "user_audio_chunk": base64_encode(frame) })
}

pub fn build_user_activity() -> Value {
    json!({ "type": "user_activity" })
}

pub fn parse_server_event(text: &str) -> Vec<ProviderEvent> {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(err) => return vec![ProviderEvent::Error(format!("malformed event: {err}"))],
    };
    let kind = value.get("type").and_then(Value::as_str).unwrap_or("");

    match kind {
        "audio" => value
            .get("audio_event")
            .and_then(|e| e.get("audio_base_64"))
            .and_then(Value::as_str)
            .map(decode_pcm16)
            .unwrap_or_default(),
        "agent_response" => value
            .get("agent_response_event")
            .and_then(|e| e.get("agent_response"))
            .and_then(Value::as_str)
            .map(|t| vec![ProviderEvent::AssistantTextDelta(t.to_string())])
            .unwrap_or_default(),
        "client_tool_call" => {
            let call = value.get("client_tool_call").cloned().unwrap_or(Value::Null);
            let name = call.get("tool_name").and_then(Value::as_str).unwrap_or_default().to_string();
            let call_ref = call.get("tool_call_id").and_then(Value::as_str).unwrap_or_default().to_string();
            let arguments = call.get("parameters").cloned().unwrap_or(Value::Null);
            vec![ProviderEvent::FunctionCall { name, arguments, call_ref }]
        }
        "interruption" => vec![ProviderEvent::AssistantDone],
        _ => vec![],
    }
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

pub struct ElevenLabsAdapter {
    outbound_tx: Option<mpsc::Sender<Outbound>>,
    event_rx: Option<mpsc::Receiver<ProviderEvent>>,
    api_key: String,
}

impl ElevenLabsAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            outbound_tx: None,
            event_rx: None,
            api_key: api_key.into(),
        }
    }

    async fn connect_once(&mut self, config: &SecretaryConfig) -> Result<(), String> {
        let mut request = ELEVENLABS_CONVAI_URL
            .into_client_request()
            .map_err(|e| e.to_string())?;
        request
            .headers_mut()
            .insert("xi-api-key", self.api_key.parse().map_err(|_| "invalid api key header")?);

        let (ws, _resp) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| e.to_string())?;
        let (mut sink, stream) = ws.split();

        sink.send(WsMessage::Text(build_conversation_init(config).to_string()))
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
                detail: "ElevenLabs adapter used before connect()".into(),
            });
        };
        tx.send(Outbound::Json(value)).await.map_err(|_| VoiceError::Internal {
            detail: "ElevenLabs outbound channel closed".into(),
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
            warn!(%err, "ElevenLabs send failed, closing outbound loop");
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
            Ok(WsMessage::Close(_)) => {
                debug!("ElevenLabs connection closed by peer");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                error!(%err, "ElevenLabs WebSocket error");
                let _ = tx.send(ProviderEvent::Error(err.to_string())).await;
                break;
            }
        }
    }
}

#[async_trait]
impl ProviderAdapter for ElevenLabsAdapter {
    async fn connect(&mut self, call_id: &CallId, config: &SecretaryConfig) -> Result<(), VoiceError> {
        if let Err(detail) = self.connect_once(config).await {
            warn!(call_id = %call_id, %detail, "ElevenLabs connect failed, retrying once");
            tokio::time::sleep(RECONNECT_BACKOFF).await;
            self.connect_once(config).await.map_err(|detail| VoiceError::ProviderUnavailable {
                call_id: call_id.to_string(),
                provider: provider_name(voicebridge_core::ProviderKind::ElevenLabs).to_string(),
                detail,
            })?;
        }
        Ok(())
    }

    async fn send_audio(&self, frame: &[u8]) -> Result<(), VoiceError> {
        self.send(build_audio_chunk(frame)).await
    }

    async fn commit_user_turn(&self) -> Result<(), VoiceError> {
        // ElevenLabs Conversational does server-side VAD; no explicit commit.
        Ok(())
    }

    async fn interrupt(&self) -> Result<(), VoiceError> {
        self.send(build_user_activity()).await
    }

    fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<ProviderEvent>> {
        self.event_rx.take()
    }

    async fn close(&self, reason: &str) -> Result<(), VoiceError> {
        debug!(reason, "closing ElevenLabs adapter");
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
            voice: "rachel".into(),
            provider: voicebridge_core::ProviderKind::ElevenLabs,
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
    fn audio_chunk_has_no_type_field() {
        let msg = build_audio_chunk(b"hi");
        assert!(msg.get("type").is_none());
        assert!(msg.get("user_audio_chunk").is_some());
    }

    #[test]
    fn conversation_init_carries_greeting_and_voice() {
        let msg = build_conversation_init(&config());
        assert_eq!(
            msg["conversation_config_override"]["agent"]["first_message"],
            "oi"
        );
        assert_eq!(msg["conversation_config_override"]["tts"]["voice_id"], "rachel");
    }

    #[test]
    fn user_activity_shape() {
        assert_eq!(build_user_activity(), json!({"type": "user_activity"}));
    }

    #[test]
    fn parses_tool_call() {
        let text = json!({
            "type": "client_tool_call",
            "client_tool_call": {
                "tool_name": "transfer_call",
                "tool_call_id": "tc-1",
                "parameters": {"destination": "1004"},
            }
        })
        .to_string();
        let events = parse_server_event(&text);
        match &events[0] {
            ProviderEvent::FunctionCall { name, call_ref, .. } => {
                assert_eq!(name, "transfer_call");
                assert_eq!(call_ref, "tc-1");
            }
            other => panic!("expected FunctionCall, got {other:?}"),
        }
    }
}
