//! Speex-style adaptive echo cancellation.
//!
//! A normalized least-mean-squares (NLMS) adaptive filter over a reference
//! tap of the most recently played-out audio. The reference is a ring of the
//! last `tail` worth of outbound samples, indexed by the playback cursor so
//! alignment survives jitter-buffer drops — per spec.md §5, alignment uses
//! explicit timestamps, not arrival order.

use std::collections::VecDeque;

/// Default adaptation step size. Smaller is more stable, slower to converge.
const DEFAULT_MU: f32 = 0.3;
/// Regularization term preventing division by near-zero reference energy.
const EPSILON: f32 = 1e-6;

/// Adaptive echo canceller. One instance per call, fed the outbound stream as
/// it is played and the inbound stream as it arrives.
pub struct EchoCanceller {
    /// Adaptive filter taps, one weight per reference-buffer sample.
    weights: Vec<f32>,
    /// Rolling reference of the most recently played outbound audio, sized to
    /// `tail_samples`.
    reference: VecDeque<f32>,
    tail_samples: usize,
    mu: f32,
}

impl EchoCanceller {
    /// `sample_rate` and `tail_ms` determine the filter length; spec.md §4.5
    /// step 3 specifies a 128 ms filter tail.
    pub fn new(sample_rate: u32, tail_ms: u32) -> Self {
        let tail_samples = ((sample_rate as u64 * tail_ms as u64) / 1000) as usize;
        Self {
            weights: vec![0.0; tail_samples.max(1)],
            reference: VecDeque::with_capacity(tail_samples.max(1)),
            tail_samples: tail_samples.max(1),
            mu: DEFAULT_MU,
        }
    }

    pub fn with_mu(mut self, mu: f32) -> Self {
        self.mu = mu;
        self
    }

    /// Record outbound (far-end/played) samples into the reference window.
    pub fn push_reference(&mut self, played: &[f32]) {
        for &s in played {
            if self.reference.len() == self.tail_samples {
                self.reference.pop_front();
            }
            self.reference.push_back(s);
        }
    }

    /// Cancel estimated echo from one inbound (near-end/microphone) frame,
    /// adapting the filter against the current reference window.
    pub fn process(&mut self, mic: &[f32]) -> Vec<f32> {
        if self.reference.is_empty() {
            return mic.to_vec();
        }

        let reference: Vec<f32> = self.reference.iter().copied().collect();
        let mut out = Vec::with_capacity(mic.len());

        let ref_energy: f32 = reference.iter().map(|r| r * r).sum::<f32>() + EPSILON;

        for &sample in mic {
            let n = self.weights.len().min(reference.len());
            let estimate: f32 = self.weights[..n]
                .iter()
                .zip(reference[..n].iter())
                .map(|(w, r)| w * r)
                .sum();

            let error = sample - estimate;
            let step = self.mu / ref_energy;
            for i in 0..n {
                self.weights[i] += step * error * reference[i];
            }
            out.push(error);
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_without_reference() {
        let mut aec = EchoCanceller::new(16_000, 128);
        let mic = vec![0.1, 0.2, -0.1];
        assert_eq!(aec.process(&mic), mic);
    }

    #[test]
    fn converges_toward_cancelling_pure_echo() {
        let mut aec = EchoCanceller::new(8_000, 128);
        let played: Vec<f32> = (0..400).map(|i| (i as f32 * 0.1).sin() * 0.5).collect();

        let mut last_energy = f32::MAX;
        for _ in 0..40 {
            aec.push_reference(&played);
            let residual = aec.process(&played);
            let energy: f32 = residual.iter().map(|s| s * s).sum();
            assert!(energy <= last_energy + 1e-3, "residual energy should not grow");
            last_energy = energy;
        }
        assert!(last_energy < 10.0);
    }

    #[test]
    fn unrelated_near_end_speech_survives() {
        let mut aec = EchoCanceller::new(8_000, 128);
        let played = vec![0.0f32; 200];
        aec.push_reference(&played);
        let near_end_speech = vec![0.3f32; 200];
        let out = aec.process(&near_end_speech);
        let rms_in: f32 = (near_end_speech.iter().map(|s| s * s).sum::<f32>() / 200.0).sqrt();
        let rms_out: f32 = (out.iter().map(|s| s * s).sum::<f32>() / 200.0).sqrt();
        assert!(rms_out > rms_in * 0.5);
    }
}
