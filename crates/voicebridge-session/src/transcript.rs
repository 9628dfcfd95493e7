//! Where a finished call's turns go (spec.md §4.8 step 6: "persist on
//! teardown"). The spec leaves the storage backend unspecified, so this is a
//! thin seam: `ServerShell` wires a real sink (backend API, database); tests
//! and anything without one get [`LoggingTranscriptSink`].

use async_trait::async_trait;
use tracing::info;

use voicebridge_core::{CallId, TenantId, Turn, VoiceError};

#[async_trait]
pub trait TranscriptSink: Send + Sync {
    async fn persist(
        &self,
        call_id: &CallId,
        tenant_id: &TenantId,
        turns: &[Turn],
        outcome: &str,
    ) -> Result<(), VoiceError>;
}

/// Default sink: logs a summary instead of failing a call that has nowhere
/// else to persist its transcript.
#[derive(Default)]
pub struct LoggingTranscriptSink;

#[async_trait]
impl TranscriptSink for LoggingTranscriptSink {
    async fn persist(
        &self,
        call_id: &CallId,
        tenant_id: &TenantId,
        turns: &[Turn],
        outcome: &str,
    ) -> Result<(), VoiceError> {
        info!(
            call_id = %call_id,
            tenant_id = %tenant_id,
            turns = turns.len(),
            outcome,
            "conversation persisted"
        );
        Ok(())
    }
}
