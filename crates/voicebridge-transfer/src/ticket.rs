//! POSTs a ticket-creation request to the configured backend webhook when
//! an announced transfer cannot be completed (spec.md §4.7.1), grounded on
//! `Kimjaechol-MoA_new::integrations::supabase::SupabaseClient`'s
//! `reqwest::Client` + bearer-auth idiom.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use voicebridge_core::{ProviderKind, Turn, TurnRole, VoiceError};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const TICKET_PATH: &str = "/api/tickets/realtime-handoff";
const SUMMARY_TAIL_CHARS: usize = 100;

#[derive(Clone, Debug, Serialize)]
pub struct TranscriptLine {
    pub role: &'static str,
    pub text: String,
    pub timestamp_ms: u64,
}

impl From<&Turn> for TranscriptLine {
    fn from(turn: &Turn) -> Self {
        Self {
            role: match turn.role {
                TurnRole::User => "user",
                TurnRole::Assistant => "assistant",
            },
            text: turn.text.clone(),
            timestamp_ms: turn.started_at_ms,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct TicketRequest {
    pub call_uuid: String,
    pub caller_id: String,
    pub transcript: Vec<TranscriptLine>,
    pub summary: String,
    pub provider: &'static str,
    pub language: String,
    pub duration_seconds: u64,
    pub turns: usize,
    pub handoff_reason: String,
    pub secretary_uuid: String,
    pub domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording_url: Option<String>,
    pub attach_recording: bool,
}

#[derive(Debug, Deserialize)]
pub struct TicketResponse {
    pub ticket_id: String,
}

fn provider_label(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::OpenAi => "openai",
        ProviderKind::ElevenLabs => "elevenlabs",
        ProviderKind::Gemini => "gemini",
    }
}

/// Tail-truncates the last user turn to 100 chars, prefixed with the total
/// turn count. Falls back to a generic summary when no user turn exists.
pub fn summarize(turns: &[Turn]) -> String {
    let last_user = turns.iter().rev().find(|t| t.role == TurnRole::User);
    match last_user {
        Some(turn) => {
            let chars: Vec<char> = turn.text.chars().collect();
            let tail: String = if chars.len() > SUMMARY_TAIL_CHARS {
                chars[chars.len() - SUMMARY_TAIL_CHARS..].iter().collect()
            } else {
                turn.text.clone()
            };
            format!("[{} turns] {}", turns.len(), tail)
        }
        None => format!("[{} turns] (no user speech captured)", turns.len()),
    }
}

/// Builds the full ticket body from the pieces a `TransferManager` has on
/// hand at fallback time.
#[allow(clippy::too_many_arguments)]
pub fn build_request(
    call_uuid: String,
    caller_id: String,
    secretary_uuid: String,
    domain: String,
    provider: ProviderKind,
    turns: &[Turn],
    duration_seconds: u64,
    handoff_reason: String,
    recording_url: Option<String>,
) -> TicketRequest {
    TicketRequest {
        call_uuid,
        caller_id,
        transcript: turns.iter().map(TranscriptLine::from).collect(),
        summary: summarize(turns),
        provider: provider_label(provider),
        language: "en".to_string(),
        duration_seconds,
        turns: turns.len(),
        handoff_reason,
        secretary_uuid,
        domain,
        attach_recording: recording_url.is_some(),
        recording_url,
    }
}

pub struct TicketWebhookClient {
    http: reqwest::Client,
    backend_url: String,
    token: String,
}

impl TicketWebhookClient {
    pub fn new(backend_url: impl Into<String>, token: impl Into<String>) -> Result<Self, VoiceError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| VoiceError::Internal {
                detail: format!("failed to build ticket webhook client: {e}"),
            })?;
        Ok(Self {
            http,
            backend_url: backend_url.into(),
            token: token.into(),
        })
    }

    pub async fn create_ticket(
        &self,
        call_id: &str,
        request: &TicketRequest,
    ) -> Result<TicketResponse, VoiceError> {
        let url = format!("{}{TICKET_PATH}", self.backend_url);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await
            .map_err(|e| VoiceError::TransferFailed {
                call_id: call_id.to_string(),
                reason: format!("ticket webhook request failed: {e}"),
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(VoiceError::TransferFailed {
                call_id: call_id.to_string(),
                reason: format!("ticket webhook returned {status}"),
            });
        }

        resp.json::<TicketResponse>().await.map_err(|e| VoiceError::TransferFailed {
            call_id: call_id.to_string(),
            reason: format!("malformed ticket webhook response: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(role: TurnRole, text: &str) -> Turn {
        Turn {
            role,
            text: text.to_string(),
            started_at_ms: 0,
            ended_at_ms: 0,
        }
    }

    #[test]
    fn summarize_truncates_to_tail_100_chars() {
        let long_text: String = "x".repeat(150);
        let turns = vec![turn(TurnRole::User, &long_text)];
        let summary = summarize(&turns);
        assert!(summary.starts_with("[1 turns] "));
        assert_eq!(summary.len() - "[1 turns] ".len(), 100);
    }

    #[test]
    fn summarize_short_turn_not_truncated() {
        let turns = vec![
            turn(TurnRole::Assistant, "hi there"),
            turn(TurnRole::User, "I need billing help"),
        ];
        assert_eq!(summarize(&turns), "[2 turns] I need billing help");
    }

    #[test]
    fn summarize_without_user_turn_uses_fallback() {
        let turns = vec![turn(TurnRole::Assistant, "hello?")];
        assert_eq!(summarize(&turns), "[1 turns] (no user speech captured)");
    }

    #[test]
    fn build_request_sets_attach_recording_from_url_presence() {
        let turns = vec![turn(TurnRole::User, "please transfer me")];
        let req = build_request(
            "call-1".into(),
            "+15550001111".into(),
            "sec-1".into(),
            "acme.example".into(),
            ProviderKind::OpenAi,
            &turns,
            42,
            "offline".into(),
            None,
        );
        assert!(!req.attach_recording);
        assert_eq!(req.provider, "openai");
        assert_eq!(req.turns, 1);
    }
}
