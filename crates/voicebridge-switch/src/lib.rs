//! The guarded control plane shared by every call: the state machine, its
//! named timers, and the heartbeat monitor that watches link liveness.

pub mod heartbeat;
pub mod state;
pub mod state_machine;
pub mod timeout;

pub use heartbeat::HeartbeatMonitor;
pub use state::{CallState, Trigger};
pub use state_machine::StateMachine;
pub use timeout::TimeoutManager;
