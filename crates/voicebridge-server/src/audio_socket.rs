//! The A-leg audio WebSocket (spec.md §6): `ws://host:8085/stream/{tenant_id}/{call_id}`.
//! Accepts one connection per call, reads the opening `metadata` frame to
//! resolve the tenant's `SecretaryConfig`, wires up a `RealtimeSession`, then
//! pumps binary audio frames and text control frames for the rest of the
//! call's life. Grounded on `spark-transport-tcp`'s listener bind/accept
//! loop, generalized to Tokio-tungstenite's WebSocket handshake since this
//! binary talks WebSocket rather than raw TCP framing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex as AsyncMutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{error, info, warn};

use voicebridge_core::{AudioFormat, CallId, ProviderKind, TenantId, VoiceError};
use voicebridge_provider::{ElevenLabsAdapter, GeminiLiveAdapter, OpenAiRealtimeAdapter, ProviderAdapter};
use voicebridge_session::{
    ConfigProvider, CustomerLookupClient, FunctionRegistry, LoggingTranscriptSink, RealtimeSession,
    RealtimeSessionDeps, SessionRegistry, SwitchAudioLink, SystemWallClock,
};
use voicebridge_transfer::{PresenceCache, TicketWebhookClient};

use crate::config::RuntimeEnv;
use crate::control::EslControlClient;
use crate::wire::{build_stream_audio_frame, parse_inbound_text, InboundTextFrame};

type WsWriter = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Outbound half of the audio socket: wraps the WebSocket sink and issues
/// `uuid_kill` on hangup through the shared control-socket client.
struct AudioSocketLink {
    writer: AsyncMutex<WsWriter>,
    control: Arc<EslControlClient>,
    switch_uuid: String,
    audio_format: AudioFormat,
}

#[async_trait]
impl SwitchAudioLink for AudioSocketLink {
    async fn send_wire(&self, frame: Vec<u8>) -> Result<(), VoiceError> {
        let text = build_stream_audio_frame(&frame, self.audio_format);
        self.writer
            .lock()
            .await
            .send(Message::Text(text))
            .await
            .map_err(|e| VoiceError::Internal {
                detail: format!("audio socket send failed: {e}"),
            })
    }

    async fn hangup(&self, cause: &str) -> Result<(), VoiceError> {
        crate::control::uuid_kill(&self.control, &self.switch_uuid, cause).await;
        let _ = self.writer.lock().await.close().await;
        Ok(())
    }
}

/// Everything the per-connection handler needs, shared across every accepted
/// call on this listener.
pub struct AudioSocketServer {
    pub env: RuntimeEnv,
    pub control: Arc<EslControlClient>,
    pub config_provider: Arc<dyn ConfigProvider>,
    pub presence_cache: PresenceCache,
    pub sessions: Arc<SessionRegistry<RealtimeSession>>,
}

impl AudioSocketServer {
    pub async fn run(self: Arc<Self>, bind_port: u16) -> Result<(), VoiceError> {
        let listener = TcpListener::bind(("0.0.0.0", bind_port)).await.map_err(|e| VoiceError::Internal {
            detail: format!("failed to bind audio socket on {bind_port}: {e}"),
        })?;
        info!(port = bind_port, "audio socket listening");

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(%err, "audio socket accept failed");
                    continue;
                }
            };
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(err) = this.handle_connection(stream).await {
                    error!(%peer, %err, "audio socket connection ended with an error");
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream) -> Result<(), VoiceError> {
        let ws = tokio_tungstenite::accept_async(stream).await.map_err(|e| VoiceError::Internal {
            detail: format!("websocket handshake failed: {e}"),
        })?;
        let (writer, mut reader) = ws.split();
        let writer = AsyncMutex::new(writer);

        // The protocol's first frame is always the metadata frame
        // identifying the call; nothing useful can happen before it arrives.
        let metadata = loop {
            match reader.next().await {
                Some(Ok(Message::Text(text))) => match parse_inbound_text(&text) {
                    Ok(InboundTextFrame::Metadata { caller_id, destination, tenant_id, call_id, timestamp }) => {
                        break (caller_id, destination, tenant_id, call_id, timestamp);
                    }
                    _ => continue,
                },
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(VoiceError::Internal {
                        detail: format!("websocket read failed before metadata frame: {e}"),
                    })
                }
                None => {
                    return Err(VoiceError::Internal {
                        detail: "connection closed before metadata frame arrived".to_string(),
                    })
                }
            }
        };
        let (caller_id, destination, tenant_id_raw, call_id_raw, _timestamp) = metadata;

        let call_id = CallId::new(call_id_raw)?;
        let tenant_id = TenantId::new(tenant_id_raw)?;
        let config = self.config_provider.load(&tenant_id, &destination).await?;
        info!(%call_id, %tenant_id, caller_id, "inbound call accepted");

        let provider: Box<dyn ProviderAdapter> = match config.provider {
            ProviderKind::OpenAi => Box::new(OpenAiRealtimeAdapter::new(self.env.openai_api_key.clone())),
            ProviderKind::ElevenLabs => Box::new(ElevenLabsAdapter::new(self.env.elevenlabs_api_key.clone())),
            ProviderKind::Gemini => Box::new(GeminiLiveAdapter::new(self.env.gemini_api_key.clone())),
        };

        let audio_link = Arc::new(AudioSocketLink {
            writer,
            control: Arc::clone(&self.control),
            switch_uuid: call_id.to_string(),
            audio_format: config.audio_format,
        });

        let ticket_client = Arc::new(TicketWebhookClient::new(
            self.env.backend_api_url.clone(),
            self.env.backend_api_token.clone(),
        )?);
        let lookup_client = Arc::new(CustomerLookupClient::new(
            self.env.backend_api_url.clone(),
            self.env.backend_api_token.clone(),
        )?);

        let session = RealtimeSession::start(RealtimeSessionDeps {
            call_id: call_id.clone(),
            tenant_id: tenant_id.clone(),
            config: config.clone(),
            clock: Arc::new(voicebridge_core::SystemClock),
            wall_clock: Arc::new(SystemWallClock),
            provider,
            audio_link: audio_link.clone(),
            switch_control: Arc::clone(&self.control),
            presence_source: Arc::clone(&self.control),
            presence_cache: self.presence_cache.clone(),
            ticket_client,
            functions: build_function_registry(lookup_client),
            transcript_sink: Arc::new(LoggingTranscriptSink),
        })
        .await?;

        self.sessions.insert(call_id.clone(), Arc::clone(&session))?;
        let torn_down = Arc::new(AtomicBool::new(false));

        let result = pump_inbound_frames(&session, &mut reader, &torn_down).await;
        if !torn_down.swap(true, Ordering::SeqCst) {
            session.teardown("caller_hangup").await;
        }
        let _ = self.sessions.remove(&call_id);
        result
    }
}

async fn pump_inbound_frames(
    session: &Arc<RealtimeSession>,
    reader: &mut futures_util::stream::SplitStream<WebSocketStream<TcpStream>>,
    torn_down: &Arc<AtomicBool>,
) -> Result<(), VoiceError> {
    while let Some(message) = reader.next().await {
        let message = message.map_err(|e| VoiceError::Internal {
            detail: format!("websocket read error: {e}"),
        })?;
        match message {
            Message::Binary(frame) => session.handle_inbound_wire(&frame).await,
            Message::Text(text) => match parse_inbound_text(&text) {
                Ok(InboundTextFrame::Dtmf { digit }) => session.handle_dtmf_digit(digit).await,
                Ok(InboundTextFrame::Hangup { reason }) => {
                    info!(call_id = %session.call_id(), ?reason, "switch requested hangup");
                    torn_down.store(true, Ordering::SeqCst);
                    session.teardown(reason.as_deref().unwrap_or("caller_hangup")).await;
                    return Ok(());
                }
                Ok(InboundTextFrame::Metadata { .. }) => {}
                Err(err) => warn!(%err, "unparseable text frame on audio socket"),
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }
    Ok(())
}

fn build_function_registry(lookup_client: Arc<CustomerLookupClient>) -> FunctionRegistry {
    let mut registry = FunctionRegistry::new();
    registry.register(
        "lookup_customer",
        Box::new(move |args: serde_json::Value| {
            let lookup_client = Arc::clone(&lookup_client);
            Box::pin(async move { lookup_client.lookup(&args).await })
        }),
    );
    // `transfer_call` and `create_ticket` have no side effect of their own
    // beyond the bus event `RealtimeSession` already emits from the call's
    // arguments, so they are registered as acknowledging no-ops.
    registry.register(
        "transfer_call",
        Box::new(|args: serde_json::Value| Box::pin(async move { Ok(args) })),
    );
    registry.register(
        "create_ticket",
        Box::new(|args: serde_json::Value| Box::pin(async move { Ok(args) })),
    );
    registry
}
