//! RMS-threshold voice activity detection with asymmetric onset/offset
//! hysteresis.
//!
//! Onset requires `onset_frames` consecutive above-threshold frames before
//! declaring speech (default 3, i.e. 60 ms at 20 ms framing) so a single
//! noise spike never flips the detector. Offset instead uses a duration
//! (`silence_duration_ms`) rather than a frame count, matching
//! `SecretaryConfig::silence_duration_ms` directly.

use std::time::Duration;

/// A state transition the detector reports to its caller. `None` from
/// [`VoiceActivityDetector::push`] means "no change this frame".
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VadEdge {
    SpeechStart,
    SpeechEnd,
}

/// Hysteresis-gated RMS detector. One instance per call direction.
pub struct VoiceActivityDetector {
    /// `0.0..=1.0`, compared against `rms * peak_scale`.
    threshold: f32,
    peak_scale: f32,
    onset_frames: u32,
    silence_duration: Duration,
    frame_duration: Duration,
    consecutive_above: u32,
    silence_accum: Duration,
    speaking: bool,
}

impl VoiceActivityDetector {
    /// `vad_threshold` and `frame_duration` come straight off
    /// `SecretaryConfig`; `onset_frames` defaults to 3 (60 ms at 20 ms
    /// framing) per spec.md §4.5 step 4.
    pub fn new(vad_threshold: f32, silence_duration: Duration, frame_duration: Duration) -> Self {
        Self {
            threshold: vad_threshold.clamp(0.0, 1.0),
            peak_scale: 1.0,
            onset_frames: 3,
            silence_duration,
            frame_duration,
            consecutive_above: 0,
            silence_accum: Duration::ZERO,
            speaking: false,
        }
    }

    pub fn with_onset_frames(mut self, onset_frames: u32) -> Self {
        self.onset_frames = onset_frames.max(1);
        self
    }

    pub fn with_peak_scale(mut self, peak_scale: f32) -> Self {
        self.peak_scale = peak_scale;
        self
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Root-mean-square of one cleaned (echo-cancelled) linear-16 frame,
    /// normalized to `0.0..=1.0`.
    pub fn rms(frame: &[i16]) -> f32 {
        if frame.is_empty() {
            return 0.0;
        }
        let sum_sq: f64 = frame.iter().map(|&s| (s as f64) * (s as f64)).sum();
        let mean = sum_sq / frame.len() as f64;
        (mean.sqrt() / i16::MAX as f64) as f32
    }

    /// Feed one frame's RMS, advancing the onset/offset hysteresis by one
    /// `frame_duration` tick. Returns an edge when the declared state flips.
    pub fn push(&mut self, rms: f32) -> Option<VadEdge> {
        let above = rms >= self.threshold * self.peak_scale;

        if above {
            self.silence_accum = Duration::ZERO;
            if !self.speaking {
                self.consecutive_above += 1;
                if self.consecutive_above >= self.onset_frames {
                    self.speaking = true;
                    self.consecutive_above = 0;
                    return Some(VadEdge::SpeechStart);
                }
            }
            None
        } else {
            self.consecutive_above = 0;
            if self.speaking {
                self.silence_accum += self.frame_duration;
                if self.silence_accum >= self.silence_duration {
                    self.speaking = false;
                    self.silence_accum = Duration::ZERO;
                    return Some(VadEdge::SpeechEnd);
                }
            }
            None
        }
    }

    pub fn reset(&mut self) {
        self.consecutive_above = 0;
        self.silence_accum = Duration::ZERO;
        self.speaking = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vad() -> VoiceActivityDetector {
        VoiceActivityDetector::new(0.1, Duration::from_millis(200), Duration::from_millis(20))
    }

    #[test]
    fn silence_never_triggers() {
        let mut v = vad();
        for _ in 0..10 {
            assert_eq!(v.push(0.0), None);
        }
        assert!(!v.is_speaking());
    }

    #[test]
    fn onset_requires_consecutive_frames() {
        let mut v = vad();
        assert_eq!(v.push(0.5), None);
        assert_eq!(v.push(0.5), None);
        assert_eq!(v.push(0.5), Some(VadEdge::SpeechStart));
        assert!(v.is_speaking());
    }

    #[test]
    fn single_spike_does_not_trigger_onset() {
        let mut v = vad();
        assert_eq!(v.push(0.5), None);
        assert_eq!(v.push(0.0), None);
        assert_eq!(v.push(0.5), None);
        assert_eq!(v.push(0.5), None);
        assert!(!v.is_speaking());
    }

    #[test]
    fn offset_requires_full_silence_duration() {
        let mut v = vad();
        v.push(0.5);
        v.push(0.5);
        v.push(0.5);
        assert!(v.is_speaking());

        // silence_duration_ms=200, frame=20ms -> 10 frames to clear.
        for _ in 0..9 {
            assert_eq!(v.push(0.0), None);
        }
        assert_eq!(v.push(0.0), Some(VadEdge::SpeechEnd));
        assert!(!v.is_speaking());
    }

    #[test]
    fn rms_of_full_scale_square_wave_is_near_one() {
        let frame = vec![i16::MAX, i16::MIN, i16::MAX, i16::MIN];
        let rms = VoiceActivityDetector::rms(&frame);
        assert!((rms - 1.0).abs() < 0.01, "rms={rms}");
    }

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(VoiceActivityDetector::rms(&[0; 160]), 0.0);
    }
}
