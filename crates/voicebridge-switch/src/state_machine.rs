//! The guarded, table-driven state machine owned by each call's session.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use voicebridge_bus::{EventBus, EventPayload, VoiceEvent, VoiceEventKind};
use voicebridge_core::{CallId, TenantId, VoiceError};

use crate::state::{resolve, CallState, Trigger};

struct Inner {
    state: CallState,
    transfer_retries: u32,
}

/// Serializes every `trigger` call for one call behind a single mutex, as
/// required to linearize transitions onto one logical thread. Successful
/// transitions emit `STATE_CHANGED`; rejected ones return
/// [`VoiceError::InvalidTransition`] synchronously and never touch the bus.
pub struct StateMachine {
    call_id: CallId,
    tenant_id: TenantId,
    bus: std::sync::Arc<EventBus>,
    inner: Mutex<Inner>,
}

impl StateMachine {
    pub fn new(call_id: CallId, tenant_id: TenantId, bus: std::sync::Arc<EventBus>) -> Self {
        Self {
            call_id,
            tenant_id,
            bus,
            inner: Mutex::new(Inner {
                state: CallState::Idle,
                transfer_retries: 0,
            }),
        }
    }

    pub fn state(&self) -> CallState {
        self.inner.lock().unwrap().state
    }

    /// Predicate form of [`trigger`](Self::trigger): true if `trigger` would
    /// succeed from the current state, without mutating anything.
    pub fn can(&self, trigger: Trigger) -> bool {
        let inner = self.inner.lock().unwrap();
        resolve(inner.state, trigger, inner.transfer_retries).is_some()
    }

    pub fn trigger(&self, trigger: Trigger) -> Result<CallState, VoiceError> {
        let (from, to) = {
            let mut inner = self.inner.lock().unwrap();
            let from = inner.state;
            let to = resolve(from, trigger, inner.transfer_retries).ok_or_else(|| {
                VoiceError::InvalidTransition {
                    call_id: self.call_id.to_string(),
                    from: format!("{from:?}"),
                    trigger: format!("{trigger:?}"),
                }
            })?;
            if trigger == Trigger::TransferFailed && to == CallState::Listening {
                inner.transfer_retries += 1;
            }
            inner.state = to;
            (from, to)
        };

        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        // A closed bus only happens mid-teardown, after the transition to
        // `Ended` has already been applied; there is nobody left to notify.
        let _ = self.bus.emit(VoiceEvent::new(
            VoiceEventKind::StateChanged,
            self.call_id.clone(),
            self.tenant_id.clone(),
            timestamp_ms,
            EventPayload::StateChanged {
                from: format!("{from:?}"),
                to: format!("{to:?}"),
                trigger: format!("{trigger:?}"),
            },
        ));

        Ok(to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn machine() -> StateMachine {
        StateMachine::new(
            CallId::new("call-1").unwrap(),
            TenantId::new("tenant-1").unwrap(),
            Arc::new(EventBus::new()),
        )
    }

    #[test]
    fn trigger_rejects_illegal_transition() {
        let sm = machine();
        let err = sm.trigger(Trigger::Greet).unwrap_err();
        assert!(matches!(err, VoiceError::InvalidTransition { .. }));
        assert_eq!(sm.state(), CallState::Idle);
    }

    #[test]
    fn trigger_advances_and_emits_state_changed() {
        let bus = Arc::new(EventBus::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        let _sub = bus
            .subscribe(VoiceEventKind::StateChanged, move |_| {
                hits2.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        let sm = StateMachine::new(CallId::new("c").unwrap(), TenantId::new("t").unwrap(), bus);

        assert_eq!(sm.trigger(Trigger::Start).unwrap(), CallState::Connecting);
        assert_eq!(sm.state(), CallState::Connecting);
    }

    #[test]
    fn transfer_retry_budget_is_one() {
        let sm = machine();
        sm.trigger(Trigger::Start).unwrap();
        sm.trigger(Trigger::Connected).unwrap();
        sm.trigger(Trigger::Greet).unwrap();
        sm.trigger(Trigger::AgentDone).unwrap();
        sm.trigger(Trigger::RequestTransfer).unwrap();
        assert_eq!(sm.trigger(Trigger::TransferFailed).unwrap(), CallState::Listening);
        sm.trigger(Trigger::RequestTransfer).unwrap();
        assert_eq!(sm.trigger(Trigger::TransferFailed).unwrap(), CallState::Ended);
    }

    #[test]
    fn hangup_is_absorbing() {
        let sm = machine();
        assert_eq!(sm.trigger(Trigger::Hangup).unwrap(), CallState::Ended);
        assert_eq!(sm.trigger(Trigger::Hangup).unwrap(), CallState::Ended);
    }
}
