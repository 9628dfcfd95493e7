//! Crate-wide error domain.
//!
//! Every other `voicebridge-*` crate converts its local failures into
//! [`VoiceError`] at its public boundary: fine-grained variants carrying
//! `call_id`/`tenant_id` context, a stable `code()` in the
//! `voicebridge.<domain>.<reason>` namespace, and a `thiserror`-derived
//! `Display`. No error kind is ever surfaced to the caller as raw text;
//! turning a failure into a synthesized spoken utterance is a
//! `voicebridge-session` concern built on top of this enum.

use thiserror::Error;

/// Which telephony link degraded or died, for [`VoiceError::ProviderDead`]
/// and heartbeat-related diagnostics.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LinkKind {
    Provider,
    Switch,
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum VoiceError {
    /// No `SecretaryConfig` for `(tenant_id, extension)`.
    #[error("no secretary configured for tenant `{tenant_id}` extension `{extension}`")]
    ConfigMissing { tenant_id: String, extension: String },

    /// Provider connect failed after the single retry.
    #[error("provider `{provider}` unavailable for call `{call_id}`: {detail}")]
    ProviderUnavailable {
        call_id: String,
        provider: String,
        detail: String,
    },

    /// Heartbeat classified a link `DEAD` mid-call.
    #[error("{link:?} link dead for call `{call_id}`")]
    ProviderDead { call_id: String, link: LinkKind },

    /// Unexpected codec on the wire.
    #[error("unexpected audio format for call `{call_id}`: {detail}")]
    AudioFormatError { call_id: String, detail: String },

    /// State machine rejected a transition; never propagated through the
    /// event bus, always surfaced synchronously to the `trigger` caller.
    #[error("invalid transition for call `{call_id}`: trigger `{trigger}` from state `{from}`")]
    InvalidTransition {
        call_id: String,
        from: String,
        trigger: String,
    },

    /// Transfer attempt failed; always resolves to retry or ticket fallback
    /// inside `TransferManager`, never surfaced raw.
    #[error("transfer failed for call `{call_id}`: {reason}")]
    TransferFailed { call_id: String, reason: String },

    /// `max_duration_s` elapsed.
    #[error("call `{call_id}` exceeded max duration")]
    MaxDurationExceeded { call_id: String },

    /// Event bus rejected an operation after `close()`; only seen during
    /// teardown and swallowed by callers.
    #[error("event bus for call `{call_id}` is closed")]
    BusClosed { call_id: String },

    /// No session registered for the given call id.
    #[error("call session `{call_id}` is not registered")]
    SessionNotFound { call_id: String },

    /// A call id was registered twice.
    #[error("call session `{call_id}` already exists")]
    SessionAlreadyExists { call_id: String },

    /// Catch-all for failures that do not yet warrant their own variant.
    #[error("internal voice bridge failure: {detail}")]
    Internal { detail: String },
}

impl VoiceError {
    /// Stable, dashboard-friendly error code in the `voicebridge.*`
    /// namespace.
    pub fn code(&self) -> &'static str {
        match self {
            VoiceError::ConfigMissing { .. } => "voicebridge.config.missing",
            VoiceError::ProviderUnavailable { .. } => "voicebridge.provider.unavailable",
            VoiceError::ProviderDead { .. } => "voicebridge.provider.dead",
            VoiceError::AudioFormatError { .. } => "voicebridge.audio.format_error",
            VoiceError::InvalidTransition { .. } => "voicebridge.switch.invalid_transition",
            VoiceError::TransferFailed { .. } => "voicebridge.transfer.failed",
            VoiceError::MaxDurationExceeded { .. } => "voicebridge.session.max_duration",
            VoiceError::BusClosed { .. } => "voicebridge.bus.closed",
            VoiceError::SessionNotFound { .. } => "voicebridge.session.missing",
            VoiceError::SessionAlreadyExists { .. } => "voicebridge.session.exists",
            VoiceError::Internal { .. } => "voicebridge.internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_and_namespaced() {
        let err = VoiceError::SessionNotFound {
            call_id: "abc".into(),
        };
        assert_eq!(err.code(), "voicebridge.session.missing");
        assert!(err.to_string().contains("abc"));
    }
}
