//! `ServerShell` (spec.md §2, §4.8's final collaborator): the process that
//! accepts inbound audio WebSockets from the switch and control-socket
//! callbacks, and instantiates one `RealtimeSession` per call. Everything
//! that is specific to "being a running process" — environment variables,
//! socket binding, the control-socket client, the wire protocol's text-frame
//! shapes — lives here; `voicebridge-session` knows nothing about TCP or
//! WebSockets.

pub mod audio_socket;
pub mod config;
pub mod control;
pub mod wire;

pub use audio_socket::AudioSocketServer;
pub use config::RuntimeEnv;
pub use control::EslControlClient;
