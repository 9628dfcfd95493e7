//! `AudioPipeline`: per-call, per-direction audio coordination wiring the
//! codec, resampler, echo canceller, VAD, jitter buffer and barge-in gate
//! together exactly per spec.md §4.5's two numbered chains.

use std::sync::Arc;
use std::time::{Duration, Instant};

use voicebridge_core::{AudioFormat, Clock, ProviderKind};

use crate::barge_in::should_barge_in;
use crate::echo_cancel::EchoCanceller;
use crate::jitter::JitterBuffer;
use crate::resample::Resampler;
use crate::ulaw;
use crate::vad::{VadEdge, VoiceActivityDetector};

/// Switch-side audio frames are 20 ms per spec.md §4.5 step 1.
pub const FRAME_MS: u32 = 20;
const ECHO_TAIL_MS: u32 = 128;
const JITTER_TARGET_MS: u64 = 60;
const JITTER_MAX_MS: u64 = 240;

/// The switch's operating sample rate implied by the negotiated wire format.
pub fn switch_rate(format: AudioFormat) -> u32 {
    match format {
        AudioFormat::G711 => 8_000,
        AudioFormat::Pcm16 => 16_000,
    }
}

/// The rate a provider expects audio at, per spec.md §4.5 step 5 and §6's
/// wire-format fragments. G.711/PCMU providers keep the switch's own rate —
/// no resampling, only codec (μ-law) conversion.
pub fn provider_rate(provider: ProviderKind, switch_format: AudioFormat) -> u32 {
    match (provider, switch_format) {
        (_, AudioFormat::G711) => 8_000,
        (ProviderKind::OpenAi, AudioFormat::Pcm16) => 24_000,
        (ProviderKind::ElevenLabs, AudioFormat::Pcm16) => 16_000,
        (ProviderKind::Gemini, AudioFormat::Pcm16) => 16_000,
    }
}

fn i16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / i16::MAX as f32).collect()
}

fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect()
}

/// Events surfaced while feeding caller audio through [`AudioPipeline::ingest_inbound`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InboundEvent {
    UserSpeechStart,
    UserSpeechEnd,
    BargeIn,
}

/// One call's audio coordination: caller → provider (inbound) and
/// provider → caller (outbound), independent directions sharing only the
/// echo canceller's reference tap.
pub struct AudioPipeline {
    clock: Arc<dyn Clock>,
    switch_format: AudioFormat,
    switch_rate_hz: u32,
    provider_rate_hz: u32,

    echo: EchoCanceller,
    vad: VoiceActivityDetector,
    inbound_resampler: Resampler,
    outbound_resampler: Resampler,
    jitter: JitterBuffer,

    agent_speaking: bool,
    playback_started_at: Option<Instant>,
}

impl AudioPipeline {
    pub fn new(
        clock: Arc<dyn Clock>,
        switch_format: AudioFormat,
        provider: ProviderKind,
        vad_threshold: f32,
        silence_duration: Duration,
    ) -> Self {
        let switch_rate_hz = switch_rate(switch_format);
        let provider_rate_hz = provider_rate(provider, switch_format);
        let frame_samples = (switch_rate_hz as u64 * FRAME_MS as u64 / 1000) as usize;

        Self {
            clock,
            switch_format,
            switch_rate_hz,
            provider_rate_hz,
            echo: EchoCanceller::new(switch_rate_hz, ECHO_TAIL_MS),
            vad: VoiceActivityDetector::new(
                vad_threshold,
                silence_duration,
                Duration::from_millis(FRAME_MS as u64),
            ),
            inbound_resampler: Resampler::new(switch_rate_hz, provider_rate_hz, frame_samples.max(1)),
            outbound_resampler: Resampler::new(
                provider_rate_hz,
                switch_rate_hz,
                (provider_rate_hz as u64 * FRAME_MS as u64 / 1000).max(1) as usize,
            ),
            jitter: JitterBuffer::new(Duration::from_millis(FRAME_MS as u64), JITTER_TARGET_MS, JITTER_MAX_MS),
            agent_speaking: false,
            playback_started_at: None,
        }
    }

    /// Decode one wire frame from the switch to linear-16 per spec.md §4.5
    /// step 2.
    fn decode_wire(&self, wire: &[u8]) -> Vec<i16> {
        match self.switch_format {
            AudioFormat::G711 => ulaw::decode(wire),
            AudioFormat::Pcm16 => wire
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]))
                .collect(),
        }
    }

    /// Encode linear-16 back to the switch's negotiated wire format.
    fn encode_wire(&self, pcm: &[i16]) -> Vec<u8> {
        match self.switch_format {
            AudioFormat::G711 => ulaw::encode(pcm),
            AudioFormat::Pcm16 => pcm.iter().flat_map(|s| s.to_le_bytes()).collect(),
        }
    }

    /// Called when the state machine enters `SPEAKING`, starting the 300 ms
    /// barge-in guard window.
    pub fn note_playback_start(&mut self) {
        self.agent_speaking = true;
        self.playback_started_at = Some(self.clock.now());
    }

    /// Called on leaving `SPEAKING` (agent done or barge-in accepted).
    pub fn note_playback_stop(&mut self) {
        self.agent_speaking = false;
        self.playback_started_at = None;
    }

    fn ms_since_playback_start(&self) -> Option<Duration> {
        self.playback_started_at
            .map(|started| self.clock.now().saturating_duration_since(started))
    }

    /// Feed one inbound wire frame (steps 1-4 of spec.md §4.5's inbound
    /// chain). Returns any VAD/barge-in edges and the resampled,
    /// provider-ready float samples (still awaiting provider-specific wire
    /// encoding in `voicebridge-provider`).
    pub fn ingest_inbound(&mut self, wire: &[u8]) -> (Vec<InboundEvent>, Vec<f32>) {
        let linear = self.decode_wire(wire);
        let mic_f32 = i16_to_f32(&linear);
        let cleaned_f32 = self.echo.process(&mic_f32);
        let cleaned_i16 = f32_to_i16(&cleaned_f32);

        let mut events = Vec::new();
        let rms = VoiceActivityDetector::rms(&cleaned_i16);
        if let Some(edge) = self.vad.push(rms) {
            match edge {
                VadEdge::SpeechStart => {
                    if should_barge_in(self.agent_speaking, self.ms_since_playback_start(), true) {
                        events.push(InboundEvent::BargeIn);
                    } else if !self.agent_speaking {
                        events.push(InboundEvent::UserSpeechStart);
                    }
                    // Onset while speaking but inside the 300ms guard window
                    // is a suppressed self-trigger: no event at all.
                }
                VadEdge::SpeechEnd => {
                    if !self.agent_speaking {
                        events.push(InboundEvent::UserSpeechEnd);
                    }
                }
            }
        }

        let resampled = if self.inbound_resampler.is_passthrough() {
            cleaned_f32
        } else {
            self.inbound_resampler.process(&cleaned_f32)
        };

        (events, resampled)
    }

    /// Encode resampled, echo-cancelled inbound samples into the wire bytes
    /// `ProviderAdapter::send_audio` expects. The provider mirrors the
    /// switch's codec 1:1 (spec.md §4.5 step 6 / §6's `audio/pcmu` vs
    /// `audio/pcm` split), so this is the same codec [`Self::encode_wire`]
    /// already applies to outbound switch frames.
    pub fn encode_for_provider(&self, samples: &[f32]) -> Vec<u8> {
        let pcm = f32_to_i16(samples);
        self.encode_wire(&pcm)
    }

    /// Enqueue a decoded provider audio frame (already linear-16 at the
    /// provider's native rate) for outbound playback.
    pub fn enqueue_outbound(&mut self, provider_pcm: &[i16]) {
        let provider_f32 = i16_to_f32(provider_pcm);
        let switch_f32 = if self.outbound_resampler.is_passthrough() {
            provider_f32
        } else {
            self.outbound_resampler.process(&provider_f32)
        };
        if switch_f32.is_empty() {
            return;
        }
        let switch_i16 = f32_to_i16(&switch_f32);
        self.echo.push_reference(&switch_f32);
        self.jitter.push(switch_i16);
    }

    /// Pop the next 20 ms wire frame for the switch, if the jitter buffer is
    /// primed (or has anything at all, once started).
    pub fn pop_outbound_wire(&mut self) -> Option<Vec<u8>> {
        let frame = self.jitter.pop()?;
        Some(self.encode_wire(&frame.samples))
    }

    pub fn jitter_is_primed(&self) -> bool {
        self.jitter.is_primed()
    }

    pub fn jitter_dropped_count(&self) -> u64 {
        self.jitter.dropped_count()
    }

    /// Flush the outbound jitter buffer, per spec.md §4.5 step 6's
    /// `BARGE_IN` handling.
    pub fn flush_outbound(&mut self) {
        self.jitter.flush();
    }

    pub fn switch_rate_hz(&self) -> u32 {
        self.switch_rate_hz
    }

    pub fn provider_rate_hz(&self) -> u32 {
        self.provider_rate_hz
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voicebridge_core::FakeClock;

    fn pipeline(format: AudioFormat, provider: ProviderKind) -> AudioPipeline {
        AudioPipeline::new(
            Arc::new(FakeClock::new()),
            format,
            provider,
            0.1,
            Duration::from_millis(200),
        )
    }

    #[test]
    fn provider_rates_match_spec_table() {
        assert_eq!(provider_rate(ProviderKind::OpenAi, AudioFormat::Pcm16), 24_000);
        assert_eq!(provider_rate(ProviderKind::ElevenLabs, AudioFormat::Pcm16), 16_000);
        assert_eq!(provider_rate(ProviderKind::Gemini, AudioFormat::Pcm16), 16_000);
        assert_eq!(provider_rate(ProviderKind::OpenAi, AudioFormat::G711), 8_000);
    }

    #[test]
    fn silent_inbound_frame_emits_nothing() {
        let mut p = pipeline(AudioFormat::Pcm16, ProviderKind::OpenAi);
        let wire = vec![0u8; 640]; // 320 samples * 2 bytes
        let (events, _) = p.ingest_inbound(&wire);
        assert!(events.is_empty());
    }

    #[test]
    fn barge_in_suppressed_before_300ms() {
        let clock = Arc::new(FakeClock::new());
        let mut p = AudioPipeline::new(
            Arc::clone(&clock) as Arc<dyn Clock>,
            AudioFormat::Pcm16,
            ProviderKind::OpenAi,
            0.1,
            Duration::from_millis(200),
        );
        p.note_playback_start();
        clock.advance(Duration::from_millis(100));

        let loud: Vec<u8> = vec![i16::MAX.to_le_bytes(); 320].concat();
        let mut saw_barge_in = false;
        for _ in 0..4 {
            let (events, _) = p.ingest_inbound(&loud);
            if events.contains(&InboundEvent::BargeIn) {
                saw_barge_in = true;
            }
        }
        assert!(!saw_barge_in);
    }

    #[test]
    fn barge_in_fires_after_300ms_of_speaking() {
        let clock = Arc::new(FakeClock::new());
        let mut p = AudioPipeline::new(
            Arc::clone(&clock) as Arc<dyn Clock>,
            AudioFormat::Pcm16,
            ProviderKind::OpenAi,
            0.1,
            Duration::from_millis(200),
        );
        p.note_playback_start();
        clock.advance(Duration::from_millis(400));

        let loud: Vec<u8> = vec![i16::MAX.to_le_bytes(); 320].concat();
        let mut saw_barge_in = false;
        for _ in 0..4 {
            let (events, _) = p.ingest_inbound(&loud);
            if events.contains(&InboundEvent::BargeIn) {
                saw_barge_in = true;
            }
        }
        assert!(saw_barge_in);
    }

    #[test]
    fn outbound_flush_empties_jitter_buffer() {
        let mut p = pipeline(AudioFormat::Pcm16, ProviderKind::ElevenLabs);
        p.enqueue_outbound(&vec![100i16; 320]);
        p.flush_outbound();
        assert!(p.pop_outbound_wire().is_none());
    }
}
