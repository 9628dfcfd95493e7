//! Process configuration loaded once at startup, per spec.md §6's
//! environment variable list.

use std::env;

use voicebridge_core::VoiceError;

/// A-leg audio WebSocket port (`ws://host:8085/stream/{tenant_id}/{call_id}`).
pub const AUDIO_WS_PORT: u16 = 8085;
/// Announced-transfer B-leg audio WebSocket port.
pub const TRANSFER_WS_PORT: u16 = 8086;
/// Outbound variant: the switch dials into the bridge on this port.
pub const OUTBOUND_CONTROL_PORT: u16 = 8022;

/// Everything `main` needs before it can start accepting calls. Optional
/// fields (`redis_host`/`redis_port`) are for a future distributed presence
/// cache; today's `PresenceCache` is in-process only, so they are read and
/// logged but not otherwise consumed.
#[derive(Clone, Debug)]
pub struct RuntimeEnv {
    pub esl_host: String,
    pub esl_port: u16,
    pub esl_password: String,
    pub backend_api_url: String,
    pub backend_api_token: String,
    pub openai_api_key: String,
    pub elevenlabs_api_key: String,
    pub gemini_api_key: String,
    pub redis_host: Option<String>,
    pub redis_port: Option<u16>,
    /// Host the switch can dial back into for a whisper announcement's
    /// `uuid_audio_stream` WS URL. Not in spec.md's environment list; this
    /// deployment detail has to come from somewhere, so it defaults to
    /// loopback for single-box setups and is overridable for anything else.
    pub bridge_host: String,
}

impl RuntimeEnv {
    pub fn from_env() -> Result<Self, VoiceError> {
        Ok(Self {
            esl_host: required("ESL_HOST")?,
            esl_port: required("ESL_PORT")?.parse().map_err(|_| invalid("ESL_PORT"))?,
            esl_password: required("ESL_PASSWORD")?,
            backend_api_url: required("BACKEND_API_URL")?,
            backend_api_token: required("BACKEND_API_TOKEN")?,
            openai_api_key: required("OPENAI_API_KEY")?,
            elevenlabs_api_key: required("ELEVENLABS_API_KEY")?,
            gemini_api_key: required("GEMINI_API_KEY")?,
            redis_host: env::var("REDIS_HOST").ok(),
            redis_port: env::var("REDIS_PORT").ok().and_then(|v| v.parse().ok()),
            bridge_host: env::var("BRIDGE_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
        })
    }
}

fn required(name: &'static str) -> Result<String, VoiceError> {
    env::var(name).map_err(|_| VoiceError::Internal {
        detail: format!("missing required environment variable {name}"),
    })
}

fn invalid(name: &'static str) -> VoiceError {
    VoiceError::Internal {
        detail: format!("environment variable {name} is not a valid port number"),
    }
}
