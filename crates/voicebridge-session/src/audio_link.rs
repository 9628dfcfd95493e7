//! The outbound half of the switch's media socket (spec.md §4.8 step 3):
//! wire-ready frames leaving `AudioPipeline` are handed to this trait rather
//! than to a concrete transport, so `voicebridge-server`'s WebSocket or RTP
//! implementation never has to be linked into this crate's tests.

use async_trait::async_trait;

use voicebridge_core::VoiceError;

#[async_trait]
pub trait SwitchAudioLink: Send + Sync {
    /// Deliver one wire-ready outbound frame (already in the switch's
    /// negotiated codec) to the caller's leg.
    async fn send_wire(&self, frame: Vec<u8>) -> Result<(), VoiceError>;

    /// Ask the switch to clear the call with `cause` (e.g. `NORMAL_CLEARING`,
    /// `UNALLOCATED_NUMBER`), per spec.md §7's per-error hangup causes.
    async fn hangup(&self, cause: &str) -> Result<(), VoiceError>;
}
