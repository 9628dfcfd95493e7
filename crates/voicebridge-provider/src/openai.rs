//! OpenAI Realtime adapter: `wss://.../v1/realtime`, `session.update` /
//! `input_audio_buffer.append` / `response.cancel` per spec.md §6.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, warn};

use voicebridge_core::{AudioFormat, CallId, SecretaryConfig, VoiceError};

use crate::adapter::{base64_encode, event_channel, provider_name, ProviderAdapter, RECONNECT_BACKOFF};
use crate::event::ProviderEvent;

const OPENAI_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

type WsSink = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    WsMessage,
>;

/// Build the initial `session.update` per spec.md §6: `audio.input.format`
/// is `audio/pcmu` for μ-law calls, `audio/pcm` otherwise.
pub fn build_session_update(config: &SecretaryConfig) -> Value {
    let audio_format = match config.audio_format {
        AudioFormat::G711 => "audio/pcmu",
        AudioFormat::Pcm16 => "audio/pcm",
    };
    json!({
        "type": "session.update",
        "session": {
            "instructions": config.system_prompt,
            "voice": config.voice,
            "audio": {
                "input": { "format": audio_format },
                "output": { "format": audio_format },
            },
            "turn_detection": {
                "type": "server_vad",
                "threshold": config.vad_threshold,
                "silence_duration_ms": config.silence_duration_ms,
            },
        }
    })
}

pub fn build_audio_append(frame: &[u8]) -> Value {
    json!({
        "type": "input_audio_buffer.append",
        "audio": base64_encode(frame),
    })
}

pub fn build_commit() -> Value {
    json!({ "type": "input_audio_buffer.commit" })
}

pub fn build_cancel() -> Value {
    json!({ "type": "response.cancel" })
}

/// Parse one server event into zero or more [`ProviderEvent`]s.
pub fn parse_server_event(text: &str) -> Vec<ProviderEvent> {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(err) => return vec![ProviderEvent::Error(format!("malformed event: {err}"))],
    };
    let kind = value.get("type").and_then(Value::as_str).unwrap_or("");

    match kind {
        "response.audio.delta" => {
            let Some(b64) = value.get("delta").and_then(Value::as_str) else {
                return vec![];
            };
            decode_pcm16_delta(b64)
        }
        "response.audio_transcript.delta" => value
            .get("delta")
            .and_then(Value::as_str)
            .map(|d| vec![ProviderEvent::AssistantTextDelta(d.to_string())])
            .unwrap_or_default(),
        "response.function_call_arguments.done" => {
            let name = value.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
            let call_ref = value.get("call_id").and_then(Value::as_str).unwrap_or_default().to_string();
            let arguments = value
                .get("arguments")
                .and_then(Value::as_str)
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or(Value::Null);
            vec![ProviderEvent::FunctionCall { name, arguments, call_ref }]
        }
        "response.done" => vec![ProviderEvent::AssistantDone],
        "error" => {
            let message = value
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("unknown OpenAI Realtime error")
                .to_string();
            vec![ProviderEvent::Error(message)]
        }
        _ => vec![],
    }
}

fn decode_pcm16_delta(b64: &str) -> Vec<ProviderEvent> {
    use base64::Engine;
    let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(b64) else {
        return vec![ProviderEvent::Error("invalid base64 audio delta".into())];
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

pub struct OpenAiRealtimeAdapter {
    outbound_tx: Option<mpsc::Sender<Outbound>>,
    event_rx: Option<mpsc::Receiver<ProviderEvent>>,
    api_key: String,
}

impl OpenAiRealtimeAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            outbound_tx: None,
            event_rx: None,
            api_key: api_key.into(),
        }
    }

    async fn connect_once(&mut self, config: &SecretaryConfig) -> Result<(), String> {
        let request = OPENAI_REALTIME_URL
            .into_client_request()
            .map_err(|e| e.to_string())?;
        let mut request = request;
        request
            .headers_mut()
            .insert("Authorization", format!("Bearer {}", self.api_key).parse().map_err(|_| "invalid auth header")?);
        request
            .headers_mut()
            .insert("OpenAI-Beta", "realtime=v1".parse().map_err(|_| "invalid header")?);

        let (ws, _resp) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| e.to_string())?;
        let (mut sink, stream) = ws.split();

        sink.send(WsMessage::Text(build_session_update(config).to_string()))
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
            warn!(%err, "OpenAI Realtime send failed, closing outbound loop");
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
                debug!("OpenAI Realtime connection closed by peer");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                error!(%err, "OpenAI Realtime WebSocket error");
                let _ = tx.send(ProviderEvent::Error(err.to_string())).await;
                break;
            }
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiRealtimeAdapter {
    async fn connect(&mut self, call_id: &CallId, config: &SecretaryConfig) -> Result<(), VoiceError> {
        if let Err(detail) = self.connect_once(config).await {
            warn!(call_id = %call_id, %detail, "OpenAI Realtime connect failed, retrying once");
            tokio::time::sleep(RECONNECT_BACKOFF).await;
            self.connect_once(config).await.map_err(|detail| VoiceError::ProviderUnavailable {
                call_id: call_id.to_string(),
                provider: provider_name(voicebridge_core::ProviderKind::OpenAi).to_string(),
                detail,
            })?;
        }
        Ok(())
    }

    async fn send_audio(&self, frame: &[u8]) -> Result<(), VoiceError> {
        self.send(build_audio_append(frame)).await
    }

    async fn commit_user_turn(&self) -> Result<(), VoiceError> {
        self.send(build_commit()).await
    }

    async fn interrupt(&self) -> Result<(), VoiceError> {
        self.send(build_cancel()).await
    }

    fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<ProviderEvent>> {
        self.event_rx.take()
    }

    async fn close(&self, reason: &str) -> Result<(), VoiceError> {
        debug!(reason, "closing OpenAI Realtime adapter");
        if let Some(tx) = &self.outbound_tx {
            let _ = tx.send(Outbound::Close).await;
        }
        Ok(())
    }
}

impl OpenAiRealtimeAdapter {
    async fn send(&self, value: Value) -> Result<(), VoiceError> {
        let Some(tx) = &self.outbound_tx else {
            return Err(VoiceError::Internal {
                detail: "OpenAI Realtime adapter used before connect()".into(),
            });
        };
        tx.send(Outbound::Json(value)).await.map_err(|_| VoiceError::Internal {
            detail: "OpenAI Realtime outbound channel closed".into(),
        })
    }
}
