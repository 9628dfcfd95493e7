//! Band-limited sample-rate conversion between the switch's operating rate
//! and whatever rate a provider requires. Nearest-sample resampling is
//! deliberately never an option here — it introduces aliasing that a polyphase
//! filter avoids.

use rubato::{FastFixedIn, PolynomialDegree, Resampler as _};
use tracing::error;

/// Converts f32 mono audio from one fixed sample rate to another, buffering
/// partial chunks between calls so callers can feed arbitrarily sized frames.
pub struct Resampler {
    /// `None` when the input and output rates match (zero-copy passthrough).
    inner: Option<FastFixedIn<f32>>,
    input_buf: Vec<f32>,
    chunk_size: usize,
    output_buf: Vec<Vec<f32>>,
}

impl Resampler {
    /// `chunk_size` is the input frame count rubato processes per call; 20 ms
    /// at the source rate is a reasonable default (matches the wire framing
    /// used everywhere else in the pipeline).
    pub fn new(source_rate: u32, target_rate: u32, chunk_size: usize) -> Self {
        if source_rate == target_rate {
            return Self {
                inner: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            };
        }

        let ratio = target_rate as f64 / source_rate as f64;
        let resampler = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, chunk_size, 1)
            .expect("rubato resampler parameters are always valid for mono 1:1 sessions");
        let max_out = resampler.output_frames_max();

        Self {
            inner: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf: vec![vec![0f32; max_out]; 1],
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Feed `samples`, returning whatever complete output is available. Any
    /// remainder below `chunk_size` is held for the next call.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(resampler) = self.inner.as_mut() else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);
        let mut out = Vec::new();

        while self.input_buf.len() >= self.chunk_size {
            let chunk = &self.input_buf[..self.chunk_size];
            match resampler.process_into_buffer(&[chunk], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => out.extend_from_slice(&self.output_buf[0][..produced]),
                Err(err) => error!(%err, "resampler failed to process chunk"),
            }
            self.input_buf.drain(..self.chunk_size);
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_identity() {
        let mut r = Resampler::new(16_000, 16_000, 320);
        assert!(r.is_passthrough());
        let samples: Vec<f32> = (0..320).map(|i| i as f32 * 0.001).collect();
        assert_eq!(r.process(&samples), samples);
    }

    #[test]
    fn upsamples_8k_to_16k_roughly_doubles_length() {
        let mut r = Resampler::new(8_000, 16_000, 160);
        assert!(!r.is_passthrough());
        let out = r.process(&vec![0.0f32; 160]);
        assert!(!out.is_empty());
        let expected = 320usize;
        assert!((out.len() as isize - expected as isize).unsigned_abs() <= 8);
    }

    #[test]
    fn partial_chunk_yields_no_output_yet() {
        let mut r = Resampler::new(48_000, 16_000, 960);
        assert!(r.process(&vec![0.0f32; 400]).is_empty());
    }

    #[test]
    fn round_trip_preserves_energy_within_tolerance() {
        let sine: Vec<f32> = (0..1600)
            .map(|i| (i as f32 * 0.05).sin() * 0.5)
            .collect();

        let mut down = Resampler::new(16_000, 8_000, 320);
        let mut up = Resampler::new(8_000, 16_000, 160);

        let narrowed = down.process(&sine);
        let restored = up.process(&narrowed);

        let n = restored.len().min(sine.len());
        let rms_in = rms(&sine[..n]);
        let rms_out = rms(&restored[..n]);
        // Loose tolerance: a down/up round trip through a polyphase filter
        // attenuates high-frequency energy but should not collapse amplitude.
        assert!(rms_out > rms_in * 0.5, "rms_in={rms_in} rms_out={rms_out}");
    }

    fn rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }
}
