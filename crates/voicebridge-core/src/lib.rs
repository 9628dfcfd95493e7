//! Shared identifiers, data model, clock seam and error domain for the
//! realtime voice bridge core.
//!
//! This crate has no async runtime dependency and no I/O — every other
//! `voicebridge-*` crate depends on it for the vocabulary they share:
//! [`CallId`]/[`TenantId`], [`SecretaryConfig`] and friends, [`VoiceError`],
//! and the [`Clock`] seam used to make timers and heartbeats testable without
//! real sleeps.

pub mod clock;
pub mod config;
pub mod error;
pub mod ids;

pub use clock::{Clock, FakeClock, SystemClock};
pub use config::{
    AudioFormat, FallbackAction, ProviderKind, SecretaryConfig, TimeWindow, TransferRule, Turn,
    TurnRole, WorkingHours,
};
pub use error::{LinkKind, VoiceError};
pub use ids::{CallId, TenantId};

pub type Result<T> = std::result::Result<T, VoiceError>;
