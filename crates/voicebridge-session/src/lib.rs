//! Per-call orchestration: wires the event bus, state machine, timers,
//! heartbeat monitor, audio pipeline, provider adapter, and transfer manager
//! (spec.md §4.8) into one `RealtimeSession`, plus the supporting seams
//! `ServerShell` plugs concrete switch/config/transcript backends into.

pub mod audio_link;
pub mod config_provider;
pub mod dtmf;
pub mod functions;
pub mod lookup;
pub mod registry;
pub mod session;
pub mod transcript;
pub mod wall_clock;

pub use audio_link::SwitchAudioLink;
pub use config_provider::{ConfigProvider, InMemoryConfigProvider, UnimplementedSqlConfigProvider};
pub use dtmf::DtmfAccumulator;
pub use functions::{FunctionRegistry, HandlerFn};
pub use lookup::CustomerLookupClient;
pub use registry::SessionRegistry;
pub use session::{RealtimeSession, RealtimeSessionDeps};
pub use transcript::{LoggingTranscriptSink, TranscriptSink};
pub use wall_clock::{SystemWallClock, WallClockSource};
