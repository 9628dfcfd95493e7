//! The per-tenant, per-extension data model.
//!
//! `SecretaryConfig` is snapshotted once at call start and never mutated for
//! the duration of a call; everything here derives `Clone` cheaply so that
//! snapshot can be handed to every owned component without further
//! synchronization.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Wire/DSP audio format negotiated for a call.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    /// 8-bit, 8 kHz ITU-T G.711 μ-law.
    G711,
    /// 16-bit linear PCM, rate implied by the provider.
    Pcm16,
}

/// Which cloud conversational-AI provider backs a call.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenAi,
    ElevenLabs,
    Gemini,
}

/// A weekday + local time-of-day window, used by [`WorkingHours`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// `0` = Monday .. `6` = Sunday, matching `chrono`-free manual indexing
    /// so this crate does not need a date/time dependency of its own.
    pub weekday: u8,
    /// Minutes since local midnight, inclusive.
    pub start_minute: u16,
    /// Minutes since local midnight, exclusive.
    pub end_minute: u16,
}

/// Working-hours rule for a [`TransferRule`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WorkingHours {
    pub windows: Vec<TimeWindow>,
    pub holidays: HashSet<u32>,
}

impl WorkingHours {
    /// Evaluate whether `weekday`/`minute_of_day` falls inside an open
    /// window, and whether `day_ordinal` (e.g. days since an epoch) is
    /// flagged as a holiday. An empty window list means "always open" —
    /// the common case of a secretary with no restricted hours.
    pub fn is_open(&self, weekday: u8, minute_of_day: u16, day_ordinal: u32) -> bool {
        if self.holidays.contains(&day_ordinal) {
            return false;
        }
        if self.windows.is_empty() {
            return true;
        }
        self.windows.iter().any(|w| {
            w.weekday == weekday && minute_of_day >= w.start_minute && minute_of_day < w.end_minute
        })
    }
}

/// Fallback action when a transfer cannot be completed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackAction {
    OfferTicket,
    CreateTicket,
    Hangup,
}

/// One routing rule for `TRANSFER_REQUESTED` destinations.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferRule {
    pub destination: String,
    pub department: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub timeout_s: u64,
    pub fallback_action: FallbackAction,
    #[serde(default)]
    pub working_hours: WorkingHours,
    pub priority: i32,
    #[serde(default)]
    pub is_default: bool,
}

impl TransferRule {
    /// The dial timeout as a [`Duration`], for `TimeoutManager::set`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_s)
    }

    /// True if `needle` (a spoken destination/department or a DTMF-derived
    /// alias string) matches this rule's destination, department, or any
    /// configured alias — case-insensitively.
    pub fn matches(&self, needle: &str) -> bool {
        let needle = needle.to_ascii_lowercase();
        self.destination.to_ascii_lowercase() == needle
            || self.department.to_ascii_lowercase() == needle
            || self
                .aliases
                .iter()
                .any(|a| a.to_ascii_lowercase() == needle)
    }
}

/// Per-tenant, per-extension configuration, immutable for a call's duration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecretaryConfig {
    pub tenant_id: String,
    pub extension: String,
    pub greeting_text: String,
    pub farewell_text: String,
    pub system_prompt: String,
    pub voice: String,
    pub provider: ProviderKind,
    pub audio_format: AudioFormat,
    /// `0.0..=1.0`.
    pub vad_threshold: f32,
    pub silence_duration_ms: u64,
    pub max_turns: u32,
    pub max_duration_s: u64,
    pub transfer_rules: Vec<TransferRule>,
    pub webhook_url: String,
}

impl SecretaryConfig {
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_s)
    }

    pub fn silence_duration(&self) -> Duration {
        Duration::from_millis(self.silence_duration_ms)
    }

    /// Find the highest-priority transfer rule matching `needle`, falling
    /// back to the rule marked `is_default` if nothing matches.
    pub fn find_transfer_rule(&self, needle: &str) -> Option<&TransferRule> {
        self.transfer_rules
            .iter()
            .filter(|r| r.matches(needle))
            .max_by_key(|r| r.priority)
            .or_else(|| self.transfer_rules.iter().find(|r| r.is_default))
    }
}

/// One turn of conversation, accumulated by `RealtimeSession` and persisted
/// at teardown.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
    pub started_at_ms: u64,
    pub ended_at_ms: u64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(destination: &str, aliases: &[&str], priority: i32, is_default: bool) -> TransferRule {
        TransferRule {
            destination: destination.into(),
            department: "finance".into(),
            aliases: aliases.iter().map(|s| s.to_string()).collect(),
            timeout_s: 25,
            fallback_action: FallbackAction::CreateTicket,
            working_hours: WorkingHours::default(),
            priority,
            is_default,
        }
    }

    #[test]
    fn matches_destination_department_or_alias() {
        let r = rule("1004", &["financeiro", "billing"], 0, false);
        assert!(r.matches("1004"));
        assert!(r.matches("FINANCE"));
        assert!(r.matches("Financeiro"));
        assert!(!r.matches("sales"));
    }

    #[test]
    fn find_transfer_rule_prefers_higher_priority_match() {
        let cfg = SecretaryConfig {
            tenant_id: "t".into(),
            extension: "1000".into(),
            greeting_text: String::new(),
            farewell_text: String::new(),
            system_prompt: String::new(),
            voice: "alloy".into(),
            provider: ProviderKind::OpenAi,
            audio_format: AudioFormat::Pcm16,
            vad_threshold: 0.3,
            silence_duration_ms: 700,
            max_turns: 50,
            max_duration_s: 600,
            transfer_rules: vec![rule("1004", &["financeiro"], 1, false), rule("1005", &[], 5, true)],
            webhook_url: "https://backend.example/api/tickets/realtime-handoff".into(),
        };
        assert_eq!(
            cfg.find_transfer_rule("financeiro").unwrap().destination,
            "1004"
        );
        assert_eq!(cfg.find_transfer_rule("nonexistent").unwrap().destination, "1005");
    }

    #[test]
    fn working_hours_empty_is_always_open() {
        let wh = WorkingHours::default();
        assert!(wh.is_open(2, 600, 100));
    }

    #[test]
    fn working_hours_respects_windows_and_holidays() {
        let wh = WorkingHours {
            windows: vec![TimeWindow {
                weekday: 1,
                start_minute: 540,
                end_minute: 1020,
            }],
            holidays: [100].into_iter().collect(),
        };
        assert!(wh.is_open(1, 600, 50));
        assert!(!wh.is_open(1, 600, 100));
        assert!(!wh.is_open(2, 600, 50));
        assert!(!wh.is_open(1, 100, 50));
    }
}
