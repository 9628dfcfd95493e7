//! The barge-in arbitration gate, isolated as a pure function so its
//! ordering (spec.md §4.5 "Numeric contracts", normative) is unit-testable
//! without a running pipeline.
//!
//! `BARGE_IN` fires only when all three hold: the agent is speaking, at
//! least 300 ms has elapsed since playback started (prevents a greeting
//! self-trigger through residual echo), and VAD onset was detected on the
//! echo-cancelled inbound signal.

use std::time::Duration;

/// Minimum time into playback before a barge-in can fire.
pub const MIN_PLAYBACK_ELAPSED: Duration = Duration::from_millis(300);

/// Evaluate the gate. `ms_since_playback_start` is `None` when the agent is
/// not currently speaking (the gate is then unconditionally closed).
pub fn should_barge_in(
    agent_speaking: bool,
    ms_since_playback_start: Option<Duration>,
    vad_onset_on_cleaned_signal: bool,
) -> bool {
    agent_speaking
        && vad_onset_on_cleaned_signal
        && ms_since_playback_start.is_some_and(|elapsed| elapsed >= MIN_PLAYBACK_ELAPSED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_speaking() {
        assert!(!should_barge_in(false, Some(Duration::from_secs(1)), true));
    }

    #[test]
    fn requires_vad_onset() {
        assert!(!should_barge_in(true, Some(Duration::from_secs(1)), false));
    }

    #[test]
    fn suppressed_before_300ms_guards_greeting_self_trigger() {
        assert!(!should_barge_in(true, Some(Duration::from_millis(299)), true));
    }

    #[test]
    fn fires_once_all_three_conditions_hold() {
        assert!(should_barge_in(true, Some(Duration::from_millis(300)), true));
        assert!(should_barge_in(true, Some(Duration::from_secs(4)), true));
    }

    #[test]
    fn no_playback_start_closes_gate() {
        assert!(!should_barge_in(true, None, true));
    }
}
