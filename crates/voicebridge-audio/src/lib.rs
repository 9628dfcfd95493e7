//! Per-call audio coordination: codec, resampling, echo cancellation,
//! VAD with barge-in arbitration, and outbound jitter buffering.
//!
//! `AudioPipeline` (in [`pipeline`]) is the component `RealtimeSession` owns;
//! the other modules are its building blocks, each independently testable.

pub mod barge_in;
pub mod echo_cancel;
pub mod jitter;
pub mod pipeline;
pub mod resample;
pub mod ulaw;
pub mod vad;

pub use barge_in::should_barge_in;
pub use echo_cancel::EchoCanceller;
pub use jitter::{Frame, JitterBuffer};
pub use pipeline::{provider_rate, switch_rate, AudioPipeline, InboundEvent, FRAME_MS};
pub use resample::Resampler;
pub use vad::{VadEdge, VoiceActivityDetector};
