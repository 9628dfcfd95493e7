//! The uniform `ProviderAdapter` contract (spec.md §4.6) that the three
//! vendor adapters implement, plus the shared connect-retry policy (spec.md
//! §4.6 "Failures": one retry at 500 ms backoff, then `ProviderDead`).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use voicebridge_core::{CallId, SecretaryConfig, VoiceError};

use crate::event::ProviderEvent;

/// Backoff between the initial connect attempt and its single retry.
pub const RECONNECT_BACKOFF: Duration = Duration::from_millis(500);

/// Default channel depth for the event stream an adapter exposes.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Uniform contract over vendor realtime-voice WebSocket protocols. Every
/// operation is asynchronous because every one of them is, or may be,
/// network I/O.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Establish the WebSocket connection and send the provider's initial
    /// session-configuration message. Subsequent calls re-establish the
    /// connection (used internally by the retry helper).
    async fn connect(&mut self, call_id: &CallId, config: &SecretaryConfig) -> Result<(), VoiceError>;

    /// Push one chunk of audio in the negotiated wire format.
    async fn send_audio(&self, frame: &[u8]) -> Result<(), VoiceError>;

    /// Signal end-of-utterance for adapters without server-side VAD.
    async fn commit_user_turn(&self) -> Result<(), VoiceError>;

    /// Cancel any in-flight assistant response (unconditionally, per
    /// spec.md §9's resolved Open Question on barge-in).
    async fn interrupt(&self) -> Result<(), VoiceError>;

    /// Take ownership of the event receiver. Returns `None` if already
    /// taken or not yet connected.
    fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<ProviderEvent>>;

    /// Graceful shutdown.
    async fn close(&self, reason: &str) -> Result<(), VoiceError>;
}

/// Shape shared by every concrete adapter's event channel setup.
pub fn event_channel() -> (mpsc::Sender<ProviderEvent>, mpsc::Receiver<ProviderEvent>) {
    mpsc::channel(EVENT_CHANNEL_CAPACITY)
}

/// Attempt `connect_once`, retrying exactly once after [`RECONNECT_BACKOFF`]
/// on failure. A second failure is surfaced as `VoiceError::ProviderUnavailable`;
/// callers that need `ProviderDead` semantics for a mid-call drop (rather
/// than an initial connect failure) construct that variant themselves.
pub async fn connect_with_retry<F, Fut>(
    call_id: &CallId,
    provider: &str,
    mut connect_once: F,
) -> Result<(), VoiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), String>>,
{
    match connect_once().await {
        Ok(()) => return Ok(()),
        Err(detail) => {
            warn!(call_id = %call_id, provider, %detail, "provider connect failed, retrying once");
        }
    }

    tokio::time::sleep(RECONNECT_BACKOFF).await;

    connect_once().await.map_err(|detail| VoiceError::ProviderUnavailable {
        call_id: call_id.to_string(),
        provider: provider.to_string(),
        detail,
    })
}

/// Shared outbound-audio framing helper: base64-encodes `frame` once so each
/// adapter's outbound loop only needs to wrap it in its own JSON envelope.
pub fn base64_encode(frame: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(frame)
}

/// The stable provider name used in logs and `VoiceError::ProviderUnavailable`.
pub fn provider_name(kind: voicebridge_core::ProviderKind) -> &'static str {
    match kind {
        voicebridge_core::ProviderKind::OpenAi => "openai",
        voicebridge_core::ProviderKind::ElevenLabs => "elevenlabs",
        voicebridge_core::ProviderKind::Gemini => "gemini",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_exactly_once_then_succeeds() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts2 = Arc::clone(&attempts);
        let call_id = CallId::new("c").unwrap();

        let handle = tokio::spawn(async move {
            connect_with_retry(&call_id, "openai", || {
                let attempts = Arc::clone(&attempts2);
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        Err("boom".to_string())
                    } else {
                        Ok(())
                    }
                }
            })
            .await
        });

        tokio::time::advance(RECONNECT_BACKOFF + Duration::from_millis(10)).await;
        let result = handle.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn second_failure_surfaces_provider_unavailable() {
        let call_id = CallId::new("c").unwrap();
        let handle = tokio::spawn(async move {
            connect_with_retry(&call_id, "gemini", || async { Err("down".to_string()) }).await
        });

        tokio::time::advance(RECONNECT_BACKOFF + Duration::from_millis(10)).await;
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(VoiceError::ProviderUnavailable { .. })));
    }
}
