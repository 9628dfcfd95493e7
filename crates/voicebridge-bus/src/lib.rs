//! Typed in-process publish/subscribe event bus scoped to one call's
//! lifetime. `RealtimeSession` owns one [`EventBus`] per call and every other
//! component (state machine, audio pipeline, provider adapter, transfer
//! manager) publishes and subscribes through it instead of holding direct
//! references to each other.

pub mod bus;
pub mod event;

pub use bus::{EventBus, SubscriptionHandle};
pub use event::{
    EventPayload, FunctionCallPayload, LinkHealth, MonitoredLink, TransferRequestedPayload,
    VoiceEvent, VoiceEventKind,
};
