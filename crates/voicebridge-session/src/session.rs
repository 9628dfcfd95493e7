//! `RealtimeSession`: the per-call orchestrator that owns and wires every
//! other component together (spec.md §4.8). Construction connects the
//! provider and installs every event-bus handler; `start` then drives the
//! opening sequence (`Start` → `Connected` → `Greet`) and arms the session's
//! standing timers. Everything created here is released in reverse order by
//! [`RealtimeSession::teardown`].

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use voicebridge_audio::{AudioPipeline, InboundEvent};
use voicebridge_bus::{
    EventBus, EventPayload, FunctionCallPayload, MonitoredLink, TransferRequestedPayload, VoiceEvent,
    VoiceEventKind,
};
use voicebridge_core::{AudioFormat, CallId, Clock, SecretaryConfig, TenantId, Turn, TurnRole, VoiceError};
use voicebridge_provider::{ProviderAdapter, ProviderEvent};
use voicebridge_switch::{CallState, HeartbeatMonitor, StateMachine, TimeoutManager, Trigger};
use voicebridge_transfer::{
    PresenceCache, PresenceSource, SwitchTransferControl, TicketWebhookClient, TransferManager,
    TransferOutcome, TransferRequest,
};

use crate::audio_link::SwitchAudioLink;
use crate::dtmf::DtmfAccumulator;
use crate::functions::FunctionRegistry;
use crate::transcript::TranscriptSink;
use crate::wall_clock::WallClockSource;

/// Guard window for the provider's first response after the greeting is
/// triggered; a provider that never says anything is treated as dead.
const PROVIDER_INITIAL_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);
/// How long before `max_duration_s` a warning is logged.
const MAX_DURATION_WARNING_LEAD: Duration = Duration::from_secs(30);
/// Transcript cap (supplemented feature): oldest turns are dropped past this.
const TRANSCRIPT_CAP: usize = 500;
/// Three misaligned/garbled frames in a row end the call rather than limping
/// along on silence.
const MAX_CONSECUTIVE_FORMAT_ERRORS: u32 = 3;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Everything `RealtimeSession::start` needs to construct one call's
/// components. The provider is still unconnected and owned outright —
/// `start` connects it, then promotes it to a shared `Arc` once its
/// `&mut self` setup calls are behind it.
pub struct RealtimeSessionDeps {
    pub call_id: CallId,
    pub tenant_id: TenantId,
    pub config: SecretaryConfig,
    pub clock: Arc<dyn Clock>,
    pub wall_clock: Arc<dyn WallClockSource>,
    pub provider: Box<dyn ProviderAdapter>,
    pub audio_link: Arc<dyn SwitchAudioLink>,
    pub switch_control: Arc<dyn SwitchTransferControl>,
    pub presence_source: Arc<dyn PresenceSource>,
    /// The tenant-wide presence cache (spec.md §5's one piece of
    /// cross-session mutable state). Shared by `ServerShell` across every
    /// session it spawns; a fresh one here would make each call re-dial a
    /// destination another call on the same tenant just rang.
    pub presence_cache: PresenceCache,
    pub ticket_client: Arc<TicketWebhookClient>,
    pub functions: FunctionRegistry,
    pub transcript_sink: Arc<dyn TranscriptSink>,
}

pub struct RealtimeSession {
    call_id: CallId,
    tenant_id: TenantId,
    config: SecretaryConfig,
    clock: Arc<dyn Clock>,
    wall_clock: Arc<dyn WallClockSource>,
    started_at: Instant,

    bus: Arc<EventBus>,
    state_machine: Arc<StateMachine>,
    timeouts: TimeoutManager,
    heartbeat: Arc<HeartbeatMonitor>,
    pipeline: AsyncMutex<AudioPipeline>,
    provider: Arc<dyn ProviderAdapter>,
    audio_link: Arc<dyn SwitchAudioLink>,
    transfer: TransferManager,
    functions: FunctionRegistry,
    transcript_sink: Arc<dyn TranscriptSink>,

    dtmf: Mutex<DtmfAccumulator>,
    turns: Mutex<Vec<Turn>>,
    user_turn_started_ms: Mutex<Option<u64>>,
    assistant_text: Mutex<String>,
    assistant_turn_started_ms: Mutex<Option<u64>>,
    format_error_streak: AtomicU32,

    provider_task: Mutex<Option<JoinHandle<()>>>,
    outbound_task: Mutex<Option<JoinHandle<()>>>,
    torn_down: AtomicBool,
}

impl RealtimeSession {
    /// Connect the provider, wire every handler, and run the opening
    /// sequence. The returned session is already live: audio and DTMF can be
    /// fed to it immediately.
    pub async fn start(deps: RealtimeSessionDeps) -> Result<Arc<Self>, VoiceError> {
        let RealtimeSessionDeps {
            call_id,
            tenant_id,
            config,
            clock,
            wall_clock,
            mut provider,
            audio_link,
            switch_control,
            presence_source,
            presence_cache,
            ticket_client,
            functions,
            transcript_sink,
        } = deps;

        provider.connect(&call_id, &config).await?;
        let event_rx = provider.take_event_receiver().ok_or_else(|| VoiceError::Internal {
            detail: "provider adapter produced no event receiver after connect".to_string(),
        })?;
        let provider: Arc<dyn ProviderAdapter> = Arc::from(provider);

        let bus = Arc::new(EventBus::new());
        let state_machine = Arc::new(StateMachine::new(call_id.clone(), tenant_id.clone(), Arc::clone(&bus)));
        let heartbeat = Arc::new(HeartbeatMonitor::new(
            call_id.clone(),
            tenant_id.clone(),
            Arc::clone(&bus),
            Arc::clone(&clock),
        ));
        let pipeline = AsyncMutex::new(AudioPipeline::new(
            Arc::clone(&clock),
            config.audio_format,
            config.provider,
            config.vad_threshold,
            config.silence_duration(),
        ));
        let transfer = TransferManager::new(
            Arc::clone(&bus),
            presence_cache,
            presence_source,
            switch_control,
            ticket_client,
        );

        let started_at = clock.now();
        let session = Arc::new(Self {
            call_id,
            tenant_id,
            config,
            clock,
            wall_clock,
            started_at,
            bus,
            state_machine,
            timeouts: TimeoutManager::new(),
            heartbeat,
            pipeline,
            provider,
            audio_link,
            transfer,
            functions,
            transcript_sink,
            dtmf: Mutex::new(DtmfAccumulator::new()),
            turns: Mutex::new(Vec::new()),
            user_turn_started_ms: Mutex::new(None),
            assistant_text: Mutex::new(String::new()),
            assistant_turn_started_ms: Mutex::new(None),
            format_error_streak: AtomicU32::new(0),
            provider_task: Mutex::new(None),
            outbound_task: Mutex::new(None),
            torn_down: AtomicBool::new(false),
        });

        session.install_bus_handlers();

        let provider_loop = Arc::clone(&session);
        *session.provider_task.lock().unwrap() =
            Some(tokio::spawn(provider_loop.run_provider_events(event_rx)));

        let outbound_pump = Arc::clone(&session);
        *session.outbound_task.lock().unwrap() = Some(tokio::spawn(outbound_pump.run_outbound_pump()));

        session.run_start_sequence().await?;
        Ok(session)
    }

    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn state(&self) -> CallState {
        self.state_machine.state()
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Subscribes every bus handler that needs to reach back into the
    /// session. Each closure holds only a [`std::sync::Weak`] reference:
    /// `bus` is itself a field of `Self`, so a strong `Arc<Self>` captured
    /// here would form an uncollectable reference cycle.
    fn install_bus_handlers(self: &Arc<Self>) {
        let bus = Arc::clone(&self.bus);

        let weak = Arc::downgrade(self);
        let _ = bus.subscribe(VoiceEventKind::FunctionCall, move |ev: VoiceEvent| {
            let (Some(sess), EventPayload::FunctionCall(payload)) = (weak.upgrade(), ev.payload) else {
                return;
            };
            tokio::spawn(async move { sess.handle_function_call(payload).await });
        });

        let weak = Arc::downgrade(self);
        let _ = bus.subscribe(VoiceEventKind::TransferRequested, move |ev: VoiceEvent| {
            let (Some(sess), EventPayload::TransferRequested(payload)) = (weak.upgrade(), ev.payload) else {
                return;
            };
            tokio::spawn(async move { sess.handle_transfer_requested(payload).await });
        });

        // The transfer track's intermediate states all collapse onto one
        // bus-driven step each: `TransferManager::execute` runs the whole
        // dial/whisper/bridge sequence in one async call with no pause for a
        // separate "caller confirms" signal, so the announce/caller-ok
        // triggers fire back-to-back as soon as the B-leg answers.
        let weak = Arc::downgrade(self);
        let _ = bus.subscribe(VoiceEventKind::TransferDialing, move |_ev| {
            if let Some(sess) = weak.upgrade() {
                let _ = sess.state_machine.trigger(Trigger::DestinationValidated);
            }
        });

        let weak = Arc::downgrade(self);
        let _ = bus.subscribe(VoiceEventKind::TransferAnswered, move |_ev| {
            if let Some(sess) = weak.upgrade() {
                let _ = sess.state_machine.trigger(Trigger::BLegAnswered);
                let _ = sess.state_machine.trigger(Trigger::AnnounceComplete);
                let _ = sess.state_machine.trigger(Trigger::CallerOk);
            }
        });

        let weak = Arc::downgrade(self);
        let _ = bus.subscribe(VoiceEventKind::BridgeComplete, move |_ev| {
            let Some(sess) = weak.upgrade() else { return };
            let _ = sess.state_machine.trigger(Trigger::BridgeComplete);
            tokio::spawn(async move {
                if let Err(err) = sess.provider.close("transferred").await {
                    warn!(call_id = %sess.call_id, %err, "provider close after bridge failed");
                }
            });
        });

        let weak = Arc::downgrade(self);
        let _ = bus.subscribe(VoiceEventKind::TransferFailed, move |_ev| {
            if let Some(sess) = weak.upgrade() {
                tokio::spawn(async move { sess.handle_transfer_failed().await });
            }
        });

        let weak = Arc::downgrade(self);
        let _ = bus.subscribe(VoiceEventKind::HeartbeatTimeout, move |_ev| {
            if let Some(sess) = weak.upgrade() {
                tokio::spawn(async move { sess.handle_heartbeat_timeout().await });
            }
        });
    }

    async fn run_start_sequence(self: &Arc<Self>) -> Result<(), VoiceError> {
        self.emit(VoiceEventKind::CallStarted, EventPayload::Empty);
        self.state_machine.trigger(Trigger::Start)?;
        self.state_machine.trigger(Trigger::Connected)?;
        self.state_machine.trigger(Trigger::Greet)?;
        self.emit(VoiceEventKind::AgentSpeechStart, EventPayload::Empty);
        self.pipeline.lock().await.note_playback_start();

        let weak = Arc::downgrade(self);
        self.timeouts
            .set("provider_initial_response", PROVIDER_INITIAL_RESPONSE_TIMEOUT, move || {
                if let Some(sess) = weak.upgrade() {
                    tokio::spawn(async move { sess.handle_provider_initial_timeout().await });
                }
            });

        let max_duration = self.config.max_duration();
        if max_duration > MAX_DURATION_WARNING_LEAD {
            let weak = Arc::downgrade(self);
            self.timeouts
                .set("max_duration_warning", max_duration - MAX_DURATION_WARNING_LEAD, move || {
                    if let Some(sess) = weak.upgrade() {
                        info!(call_id = %sess.call_id, "call approaching max duration");
                    }
                });
        }

        let weak = Arc::downgrade(self);
        self.timeouts.set("max_duration", max_duration, move || {
            if let Some(sess) = weak.upgrade() {
                tokio::spawn(async move { sess.handle_max_duration_exceeded().await });
            }
        });

        self.heartbeat.start();
        Ok(())
    }

    /// Feed one inbound wire frame from the switch's media socket (spec.md
    /// §4.5's inbound chain, steps 1-6).
    pub async fn handle_inbound_wire(self: &Arc<Self>, wire: &[u8]) {
        self.heartbeat.touch(MonitoredLink::InboundAudio);

        let unit = match self.config.audio_format {
            AudioFormat::G711 => 1,
            AudioFormat::Pcm16 => 2,
        };
        if !wire.is_empty() && wire.len() % unit != 0 {
            self.on_audio_format_error("misaligned wire frame").await;
            return;
        }
        self.format_error_streak.store(0, Ordering::SeqCst);

        let (events, resampled) = {
            let mut pipeline = self.pipeline.lock().await;
            pipeline.ingest_inbound(wire)
        };

        for event in events {
            self.handle_inbound_pipeline_event(event).await;
        }

        if resampled.is_empty() {
            return;
        }
        let wire_for_provider = {
            let pipeline = self.pipeline.lock().await;
            pipeline.encode_for_provider(&resampled)
        };
        if let Err(err) = self.provider.send_audio(&wire_for_provider).await {
            warn!(call_id = %self.call_id, %err, "failed to forward audio to provider");
        }
    }

    async fn handle_inbound_pipeline_event(self: &Arc<Self>, event: InboundEvent) {
        match event {
            InboundEvent::UserSpeechStart => {
                self.emit(VoiceEventKind::UserSpeechStart, EventPayload::Empty);
                *self.user_turn_started_ms.lock().unwrap() = Some(now_ms());
                let _ = self.state_machine.trigger(Trigger::UserSpeech);
            }
            InboundEvent::UserSpeechEnd => {
                self.emit(VoiceEventKind::UserSpeechEnd, EventPayload::Empty);
                if let Some(started_at_ms) = self.user_turn_started_ms.lock().unwrap().take() {
                    self.push_turn(Turn {
                        role: TurnRole::User,
                        text: "[caller audio]".to_string(),
                        started_at_ms,
                        ended_at_ms: now_ms(),
                    });
                }
                if self.state_machine.trigger(Trigger::UserDone).is_ok() {
                    if let Err(err) = self.provider.commit_user_turn().await {
                        warn!(call_id = %self.call_id, %err, "commit_user_turn failed");
                    }
                }
            }
            InboundEvent::BargeIn => {
                self.emit(VoiceEventKind::BargeIn, EventPayload::Empty);
                if let Err(err) = self.provider.interrupt().await {
                    warn!(call_id = %self.call_id, %err, "provider interrupt failed");
                }
                {
                    let mut pipeline = self.pipeline.lock().await;
                    pipeline.flush_outbound();
                    pipeline.note_playback_stop();
                }
                let _ = self.state_machine.trigger(Trigger::BargeIn);
            }
        }
    }

    /// Feed one DTMF digit from the switch's control channel. `*` + digits +
    /// `#` requests a transfer through the same alias surface a spoken
    /// destination uses.
    pub async fn handle_dtmf_digit(self: &Arc<Self>, digit: char) {
        self.emit(VoiceEventKind::Dtmf, EventPayload::Dtmf(digit));
        let completed = self.dtmf.lock().unwrap().push(digit);
        if let Some(destination) = completed {
            self.emit(
                VoiceEventKind::TransferRequested,
                EventPayload::TransferRequested(TransferRequestedPayload {
                    destination,
                    department: None,
                    message: None,
                }),
            );
        }
    }

    async fn run_provider_events(self: Arc<Self>, mut rx: tokio::sync::mpsc::Receiver<ProviderEvent>) {
        while let Some(event) = rx.recv().await {
            self.heartbeat.touch(MonitoredLink::Provider);
            match event {
                ProviderEvent::AssistantAudio(samples) => {
                    self.heartbeat.touch(MonitoredLink::ProviderAck);
                    self.timeouts.clear("provider_initial_response");
                    let mut pipeline = self.pipeline.lock().await;
                    pipeline.enqueue_outbound(&samples);
                }
                ProviderEvent::AssistantTextDelta(text) => {
                    self.timeouts.clear("provider_initial_response");
                    let mut buf = self.assistant_text.lock().unwrap();
                    if buf.is_empty() {
                        *self.assistant_turn_started_ms.lock().unwrap() = Some(now_ms());
                    }
                    buf.push_str(&text);
                }
                ProviderEvent::FunctionCall { name, arguments, call_ref } => {
                    self.timeouts.clear("provider_initial_response");
                    self.emit(
                        VoiceEventKind::FunctionCall,
                        EventPayload::FunctionCall(FunctionCallPayload { name, arguments, call_ref }),
                    );
                }
                ProviderEvent::AssistantDone => {
                    self.finish_assistant_turn();
                    if self.state_machine.trigger(Trigger::AgentDone).is_ok() {
                        self.emit(VoiceEventKind::AgentSpeechEnd, EventPayload::Empty);
                        self.pipeline.lock().await.note_playback_stop();
                    }
                }
                ProviderEvent::Error(detail) => {
                    warn!(call_id = %self.call_id, detail, "provider reported an error");
                }
            }
        }

        if !self.torn_down.load(Ordering::SeqCst) {
            warn!(call_id = %self.call_id, "provider event channel closed unexpectedly");
            let _ = self.state_machine.trigger(Trigger::Hangup);
            self.teardown("provider_disconnected").await;
        }
    }

    /// Paces the jitter buffer's output back to the switch at 20 ms per
    /// frame, matching the cadence `AudioPipeline` expects inbound frames at.
    async fn run_outbound_pump(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(Duration::from_millis(voicebridge_audio::FRAME_MS as u64));
        loop {
            ticker.tick().await;
            if self.torn_down.load(Ordering::SeqCst) {
                return;
            }
            let frame = {
                let mut pipeline = self.pipeline.lock().await;
                pipeline.pop_outbound_wire()
            };
            let Some(frame) = frame else { continue };
            if let Err(err) = self.audio_link.send_wire(frame).await {
                warn!(call_id = %self.call_id, %err, "failed to send outbound audio frame");
            }
        }
    }

    fn finish_assistant_turn(&self) {
        let mut buf = self.assistant_text.lock().unwrap();
        if buf.is_empty() {
            return;
        }
        let text = std::mem::take(&mut *buf);
        drop(buf);
        let started_at_ms = self.assistant_turn_started_ms.lock().unwrap().take().unwrap_or_else(now_ms);
        self.push_turn(Turn {
            role: TurnRole::Assistant,
            text,
            started_at_ms,
            ended_at_ms: now_ms(),
        });
    }

    async fn handle_function_call(self: Arc<Self>, payload: FunctionCallPayload) {
        // Resolved Open Question (spec.md §9): a function call arriving on
        // the transfer track is rejected, not queued.
        if self.state_machine.state().is_transfer_track() {
            warn!(call_id = %self.call_id, function = %payload.name, "function call rejected during transfer");
            return;
        }

        match self.functions.dispatch(&payload.name, payload.arguments.clone()).await {
            Ok(_) => {
                if payload.name == "transfer_call" {
                    self.request_transfer_from_arguments(&payload.arguments);
                }
            }
            Err(err) => {
                warn!(call_id = %self.call_id, function = %payload.name, %err, "function call failed");
            }
        }
    }

    fn request_transfer_from_arguments(&self, arguments: &Value) {
        let destination = arguments.get("destination").and_then(Value::as_str).unwrap_or_default();
        if destination.is_empty() {
            warn!(call_id = %self.call_id, "transfer_call invoked with no destination");
            return;
        }
        let department = arguments.get("department").and_then(Value::as_str).map(String::from);
        let message = arguments.get("message").and_then(Value::as_str).map(String::from);
        self.emit(
            VoiceEventKind::TransferRequested,
            EventPayload::TransferRequested(TransferRequestedPayload {
                destination: destination.to_string(),
                department,
                message,
            }),
        );
    }

    async fn handle_transfer_requested(self: Arc<Self>, payload: TransferRequestedPayload) {
        if self.state_machine.trigger(Trigger::RequestTransfer).is_err() {
            warn!(call_id = %self.call_id, "transfer requested from a state that cannot start one");
            return;
        }
        // Paused for the whole transfer track: the provider link is
        // intentionally quiescent while the call is handed to a human agent.
        self.heartbeat.pause();

        let turns = self.turns.lock().unwrap().clone();
        let elapsed_seconds = self.clock.now().saturating_duration_since(self.started_at).as_secs();
        let now = self.wall_clock.now_parts();
        let request = TransferRequest {
            destination: payload.destination,
            message: payload.message,
        };

        match self
            .transfer
            .execute(&self.call_id, &self.tenant_id, &self.config, &request, &turns, elapsed_seconds, now)
            .await
        {
            Ok(TransferOutcome::Bridged { b_leg_uuid }) => {
                info!(call_id = %self.call_id, %b_leg_uuid, "call bridged to human agent");
            }
            Ok(TransferOutcome::TicketCreated { ticket_id, reason }) => {
                info!(call_id = %self.call_id, ticket_id, ?reason, "transfer fell back to a ticket");
            }
            Err(err) => {
                error!(call_id = %self.call_id, %err, "transfer execution failed outright");
                self.heartbeat.resume();
                let _ = self.state_machine.trigger(Trigger::Hangup);
                self.teardown("transfer_error").await;
            }
        }
    }

    /// `TRANSFER_FAILED` also fires (via `TransferManager`) when the ticket
    /// fallback itself succeeds — "failed" describes the bridge attempt, not
    /// the overall handling of the call.
    async fn handle_transfer_failed(self: Arc<Self>) {
        match self.state_machine.trigger(Trigger::TransferFailed) {
            Ok(CallState::Listening) => {
                self.heartbeat.resume();
            }
            Ok(CallState::Ended) => {
                self.heartbeat.resume();
                self.teardown("transfer_retry_exhausted").await;
            }
            _ => {}
        }
    }

    async fn handle_heartbeat_timeout(self: Arc<Self>) {
        error!(call_id = %self.call_id, "provider heartbeat dead, ending call");
        let _ = self.state_machine.trigger(Trigger::Hangup);
        self.teardown("provider_dead").await;
    }

    async fn handle_provider_initial_timeout(self: Arc<Self>) {
        warn!(call_id = %self.call_id, "provider produced no response within the initial timeout");
        let _ = self.state_machine.trigger(Trigger::Hangup);
        self.teardown("provider_unresponsive").await;
    }

    async fn handle_max_duration_exceeded(self: Arc<Self>) {
        warn!(call_id = %self.call_id, "max call duration exceeded");
        let _ = self.state_machine.trigger(Trigger::Hangup);
        self.teardown("max_duration").await;
    }

    async fn on_audio_format_error(self: &Arc<Self>, detail: &str) {
        let streak = self.format_error_streak.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(call_id = %self.call_id, detail, streak, "inbound audio format error");
        if streak >= MAX_CONSECUTIVE_FORMAT_ERRORS {
            let _ = self.state_machine.trigger(Trigger::Hangup);
            self.teardown("audio_format_error").await;
        }
    }

    /// Caller hung up on the switch side; drives the same teardown path
    /// every other terminal condition uses.
    pub async fn handle_caller_hangup(self: &Arc<Self>) {
        let _ = self.state_machine.trigger(Trigger::Hangup);
        self.teardown("caller_hangup").await;
    }

    fn push_turn(&self, turn: Turn) {
        let mut turns = self.turns.lock().unwrap();
        turns.push(turn);
        if turns.len() > TRANSCRIPT_CAP {
            turns.remove(0);
        }
    }

    fn emit(&self, kind: VoiceEventKind, payload: EventPayload) {
        let event = VoiceEvent::new(kind, self.call_id.clone(), self.tenant_id.clone(), now_ms(), payload);
        if let Err(err) = self.bus.emit(event) {
            warn!(call_id = %self.call_id, %err, "failed to emit event");
        }
    }

    /// Releases every owned resource in reverse creation order: timers,
    /// heartbeat, background tasks, provider connection, transcript
    /// persistence, then the switch leg itself. Idempotent — the first
    /// caller wins, everyone else is a no-op.
    pub async fn teardown(self: &Arc<Self>, outcome: &str) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }

        self.emit(VoiceEventKind::CallEnded, EventPayload::Empty);

        self.timeouts.clear_all();
        self.heartbeat.stop();

        if let Some(handle) = self.provider_task.lock().unwrap().take() {
            handle.abort();
        }
        if let Some(handle) = self.outbound_task.lock().unwrap().take() {
            handle.abort();
        }

        if let Err(err) = self.provider.close("call ended").await {
            warn!(call_id = %self.call_id, %err, "provider close failed during teardown");
        }

        let turns = self.turns.lock().unwrap().clone();
        if let Err(err) = self.transcript_sink.persist(&self.call_id, &self.tenant_id, &turns, outcome).await {
            error!(call_id = %self.call_id, %err, "transcript persistence failed");
        }

        if let Err(err) = self.audio_link.hangup(hangup_cause(outcome)).await {
            warn!(call_id = %self.call_id, %err, "switch hangup failed during teardown");
        }

        self.bus.close();
    }
}

fn hangup_cause(outcome: &str) -> &'static str {
    match outcome {
        "provider_dead" | "provider_disconnected" | "provider_unresponsive" => "DESTINATION_OUT_OF_ORDER",
        "transfer_error" | "transfer_retry_exhausted" | "audio_format_error" => "NORMAL_UNSPECIFIED",
        _ => "NORMAL_CLEARING",
    }
}
