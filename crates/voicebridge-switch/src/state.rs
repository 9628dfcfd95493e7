//! Call states and the named inputs that drive transitions between them.

/// Lifecycle of one call, from the first switch event to final teardown.
///
/// `LISTENING` means the caller is expected to speak; `SPEAKING` means the
/// agent is producing audio; `PROCESSING` covers the gap waiting on the
/// provider between turns. The `Transfer*` states form a one-way track:
/// once a call passes `TransferValidating` it can only advance to the next
/// transfer state, fall back to `Listening` through a single `transfer_failed`
/// retry, or land in `Ended`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum CallState {
    Idle,
    Connecting,
    Connected,
    Listening,
    Speaking,
    Processing,
    TransferValidating,
    TransferDialing,
    TransferAnnouncing,
    TransferWaiting,
    TransferBridging,
    Bridged,
    Ended,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Ended)
    }

    pub fn is_transfer_track(self) -> bool {
        matches!(
            self,
            CallState::TransferValidating
                | CallState::TransferDialing
                | CallState::TransferAnnouncing
                | CallState::TransferWaiting
                | CallState::TransferBridging
        )
    }
}

/// Named inputs accepted by [`crate::state_machine::StateMachine::trigger`].
///
/// Kept as an enum rather than free-form strings so an unrecognized trigger
/// is a compile error, not a runtime `InvalidTransition`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Trigger {
    Start,
    Connected,
    Greet,
    AgentDone,
    UserSpeech,
    UserDone,
    AgentSpeech,
    BargeIn,
    RequestTransfer,
    DestinationValidated,
    BLegAnswered,
    AnnounceComplete,
    CallerOk,
    BridgeComplete,
    TransferFailed,
    Hangup,
}

/// Resolve the transition table for `(from, trigger)`, given the number of
/// transfer retries already spent on this call. Returns `None` when the
/// trigger is not legal from `from` in its current form.
///
/// `hangup` is accepted from every state, including `Ended` itself (it is
/// absorbing, so the "transition" is a no-op that stays put).
pub(crate) fn resolve(from: CallState, trigger: Trigger, transfer_retries: u32) -> Option<CallState> {
    use CallState::*;

    if trigger == Trigger::Hangup {
        return Some(Ended);
    }

    match (from, trigger) {
        (Idle, Trigger::Start) => Some(Connecting),
        (Connecting, Trigger::Connected) => Some(Connected),
        (Connected, Trigger::Greet) => Some(Speaking),
        (Speaking, Trigger::AgentDone) => Some(Listening),
        (Listening, Trigger::UserSpeech) => Some(Listening),
        (Listening, Trigger::UserDone) => Some(Processing),
        (Processing, Trigger::AgentSpeech) => Some(Speaking),
        (Speaking, Trigger::BargeIn) => Some(Listening),
        (Listening, Trigger::RequestTransfer)
        | (Speaking, Trigger::RequestTransfer)
        | (Processing, Trigger::RequestTransfer) => Some(TransferValidating),
        (TransferValidating, Trigger::DestinationValidated) => Some(TransferDialing),
        (TransferDialing, Trigger::BLegAnswered) => Some(TransferAnnouncing),
        (TransferAnnouncing, Trigger::AnnounceComplete) => Some(TransferWaiting),
        (TransferWaiting, Trigger::CallerOk) => Some(TransferBridging),
        (TransferBridging, Trigger::BridgeComplete) => Some(Bridged),
        (f, Trigger::TransferFailed) if f.is_transfer_track() => {
            if transfer_retries < 1 {
                Some(Listening)
            } else {
                Some(Ended)
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_chain_resolves() {
        assert_eq!(resolve(CallState::Idle, Trigger::Start, 0), Some(CallState::Connecting));
        assert_eq!(
            resolve(CallState::Connecting, Trigger::Connected, 0),
            Some(CallState::Connected)
        );
        assert_eq!(resolve(CallState::Connected, Trigger::Greet, 0), Some(CallState::Speaking));
        assert_eq!(resolve(CallState::Speaking, Trigger::AgentDone, 0), Some(CallState::Listening));
    }

    #[test]
    fn transfer_failed_retries_once_then_ends() {
        assert_eq!(
            resolve(CallState::TransferDialing, Trigger::TransferFailed, 0),
            Some(CallState::Listening)
        );
        assert_eq!(
            resolve(CallState::TransferDialing, Trigger::TransferFailed, 1),
            Some(CallState::Ended)
        );
    }

    #[test]
    fn hangup_always_legal() {
        assert_eq!(resolve(CallState::TransferBridging, Trigger::Hangup, 0), Some(CallState::Ended));
        assert_eq!(resolve(CallState::Ended, Trigger::Hangup, 0), Some(CallState::Ended));
    }

    #[test]
    fn illegal_trigger_rejected() {
        assert_eq!(resolve(CallState::Idle, Trigger::Greet, 0), None);
    }
}
