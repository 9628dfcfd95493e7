//! `VoiceEvent` and its closed set of kinds/payloads.

use voicebridge_core::{CallId, TenantId};

/// The closed set of event kinds the bus will ever carry. Adding a new kind
/// means adding a new [`EventPayload`] variant too — there is no "catch-all"
/// kind by design.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum VoiceEventKind {
    CallStarted,
    CallEnded,
    AudioIn,
    AudioOut,
    UserSpeechStart,
    UserSpeechEnd,
    AgentSpeechStart,
    AgentSpeechEnd,
    BargeIn,
    Dtmf,
    FunctionCall,
    TransferRequested,
    TransferDialing,
    TransferAnswered,
    TransferFailed,
    BridgeComplete,
    ProviderDegraded,
    HeartbeatTimeout,
    StateChanged,
}

/// Link health classification, used by [`EventPayload::Degraded`] and by
/// `voicebridge-switch`'s `HeartbeatMonitor`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LinkHealth {
    Healthy,
    Degraded,
    Dead,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MonitoredLink {
    Provider,
    SwitchControl,
    InboundAudio,
    ProviderAck,
}

/// A `FUNCTION_CALL` payload forwarded from a `ProviderAdapter`.
#[derive(Clone, Debug)]
pub struct FunctionCallPayload {
    pub name: String,
    pub arguments: serde_json::Value,
    pub call_ref: String,
}

#[derive(Clone, Debug)]
pub struct TransferRequestedPayload {
    pub destination: String,
    pub department: Option<String>,
    pub message: Option<String>,
}

/// Per-kind event payloads. Kinds that carry no interesting data use
/// [`EventPayload::Empty`].
#[derive(Clone, Debug)]
pub enum EventPayload {
    Empty,
    Audio(Vec<u8>),
    Dtmf(char),
    FunctionCall(FunctionCallPayload),
    TransferRequested(TransferRequestedPayload),
    TransferFailed { reason: String },
    StateChanged { from: String, to: String, trigger: String },
    Degraded { link: MonitoredLink, level: LinkHealth },
}

/// One dispatched event, always stamped with the owning session's
/// `(call_id, tenant_id)`.
#[derive(Clone, Debug)]
pub struct VoiceEvent {
    pub kind: VoiceEventKind,
    pub call_id: CallId,
    pub tenant_id: TenantId,
    pub timestamp_ms: u64,
    pub payload: EventPayload,
}

impl VoiceEvent {
    pub fn new(
        kind: VoiceEventKind,
        call_id: CallId,
        tenant_id: TenantId,
        timestamp_ms: u64,
        payload: EventPayload,
    ) -> Self {
        Self {
            kind,
            call_id,
            tenant_id,
            timestamp_ms,
            payload,
        }
    }
}
