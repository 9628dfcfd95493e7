//! Process-wide lookup from `CallId` to its live `RealtimeSession`, grounded
//! on `spark-switch::core::session_manager::SessionManager`'s `DashMap`-backed
//! registry. Unlike the presence cache this holds no cross-session *state* —
//! it is purely an addressing table so `ServerShell` can route a switch event
//! for an already-known call to its session without threading a handle
//! through every layer.

use std::sync::Arc;

use dashmap::mapref::one::Ref;
use dashmap::DashMap;

use voicebridge_core::{CallId, VoiceError};

/// Generic over the session type so it can be exercised without spinning up
/// a full `RealtimeSession` (which requires a live provider connection).
#[derive(Default)]
pub struct SessionRegistry<T> {
    sessions: DashMap<CallId, Arc<T>>,
}

impl<T> SessionRegistry<T> {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn insert(&self, call_id: CallId, session: Arc<T>) -> Result<(), VoiceError> {
        if self.sessions.contains_key(&call_id) {
            return Err(VoiceError::SessionAlreadyExists {
                call_id: call_id.to_string(),
            });
        }
        self.sessions.insert(call_id, session);
        Ok(())
    }

    pub fn get(&self, call_id: &CallId) -> Option<Ref<'_, CallId, Arc<T>>> {
        self.sessions.get(call_id)
    }

    pub fn remove(&self, call_id: &CallId) -> Result<Arc<T>, VoiceError> {
        self.sessions
            .remove(call_id)
            .map(|(_, session)| session)
            .ok_or_else(|| VoiceError::SessionNotFound {
                call_id: call_id.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_insert_is_rejected() {
        let registry: SessionRegistry<u32> = SessionRegistry::new();
        let call_id = CallId::new("call-1").unwrap();

        registry.insert(call_id.clone(), Arc::new(1)).unwrap();
        let err = registry.insert(call_id, Arc::new(2)).unwrap_err();
        assert!(matches!(err, VoiceError::SessionAlreadyExists { .. }));
    }

    #[test]
    fn remove_missing_session_is_not_found() {
        let registry: SessionRegistry<u32> = SessionRegistry::new();
        let err = registry.remove(&CallId::new("ghost").unwrap()).unwrap_err();
        assert!(matches!(err, VoiceError::SessionNotFound { .. }));
    }

    #[test]
    fn insert_then_get_then_remove_round_trips() {
        let registry: SessionRegistry<u32> = SessionRegistry::new();
        let call_id = CallId::new("call-1").unwrap();
        registry.insert(call_id.clone(), Arc::new(42)).unwrap();

        assert_eq!(**registry.get(&call_id).unwrap(), 42);
        assert_eq!(registry.len(), 1);

        let removed = registry.remove(&call_id).unwrap();
        assert_eq!(*removed, 42);
        assert!(registry.is_empty());
    }
}
