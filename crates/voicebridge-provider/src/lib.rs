//! Uniform adapter contract over the three realtime voice providers a call
//! can be bridged to, per spec.md §4.6.

mod adapter;
mod elevenlabs;
mod event;
mod gemini;
mod openai;

pub use adapter::{
    base64_encode, connect_with_retry, event_channel, provider_name, ProviderAdapter,
    EVENT_CHANNEL_CAPACITY, RECONNECT_BACKOFF,
};
pub use elevenlabs::ElevenLabsAdapter;
pub use event::ProviderEvent;
pub use gemini::GeminiLiveAdapter;
pub use openai::OpenAiRealtimeAdapter;
