//! Supplies [`WallClockParts`] to `TransferManager::execute` at call time.
//! `voicebridge-transfer` deliberately carries no date/time dependency of its
//! own (see its `WallClockParts` doc comment), matching
//! `voicebridge-core::config::WorkingHours`'s chrono-free manual indexing —
//! so the civil-calendar math lives here instead, the one place that needs
//! to turn a `SystemTime` into a weekday.

use std::time::{SystemTime, UNIX_EPOCH};

use voicebridge_transfer::WallClockParts;

/// Anything that can report the current moment, decomposed for
/// `WorkingHours::is_open`. Distinct from `voicebridge_core::Clock`, which
/// reports a monotonic `Instant` for timers and has no notion of weekday.
pub trait WallClockSource: Send + Sync {
    fn now_parts(&self) -> WallClockParts;
}

/// The real wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemWallClock;

impl WallClockSource for SystemWallClock {
    fn now_parts(&self) -> WallClockParts {
        let epoch_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        parts_from_unix_secs(epoch_secs)
    }
}

/// 1970-01-01 (Unix day 0) was a Thursday, index 3 in a Monday=0 week.
fn parts_from_unix_secs(epoch_secs: i64) -> WallClockParts {
    let days = epoch_secs.div_euclid(86_400);
    let secs_of_day = epoch_secs.rem_euclid(86_400);
    WallClockParts {
        weekday: (days + 3).rem_euclid(7) as u8,
        minute_of_day: (secs_of_day / 60) as u16,
        day_ordinal: days as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_day_zero_is_thursday() {
        let parts = parts_from_unix_secs(0);
        assert_eq!(parts.weekday, 3);
        assert_eq!(parts.minute_of_day, 0);
        assert_eq!(parts.day_ordinal, 0);
    }

    #[test]
    fn known_monday_resolves_correctly() {
        // 2024-01-01T00:00:00Z was a Monday.
        let parts = parts_from_unix_secs(1_704_067_200);
        assert_eq!(parts.weekday, 0);
    }

    #[test]
    fn minute_of_day_wraps_within_a_day() {
        // 13:30:00 UTC on an arbitrary day.
        let parts = parts_from_unix_secs(1_704_067_200 + 13 * 3600 + 30 * 60);
        assert_eq!(parts.minute_of_day, 13 * 60 + 30);
    }
}
