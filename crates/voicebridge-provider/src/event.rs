//! Events a [`crate::adapter::ProviderAdapter`] surfaces to its owner,
//! decoded from whichever vendor wire format the concrete adapter speaks.

use serde_json::Value;

/// Variant events delivered through the channel returned by
/// `ProviderAdapter::take_event_receiver`, per spec.md §4.6 `on_event`.
#[derive(Clone, Debug)]
pub enum ProviderEvent {
    /// Decoded linear-16 assistant audio, at the provider's native rate.
    AssistantAudio(Vec<i16>),
    /// Partial assistant transcript text, accumulated into the current
    /// `Turn` by `RealtimeSession`.
    AssistantTextDelta(String),
    /// The provider invoked a function/tool.
    FunctionCall {
        name: String,
        arguments: Value,
        call_ref: String,
    },
    /// The assistant's current response finished.
    AssistantDone,
    /// A provider-level error, not necessarily fatal to the connection.
    Error(String),
}
