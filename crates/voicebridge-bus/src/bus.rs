//! The `EventBus` itself.
//!
//! Each subscriber gets its own bounded queue rather than sharing one
//! `tokio::broadcast` channel, so a slow handler for one subscriber can never
//! starve another, and overflow is a per-subscriber drop-oldest policy with
//! its own counter rather than a single global lag counter.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::Mutex;

use tokio::sync::Notify;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{error, warn};

use voicebridge_core::VoiceError;

use crate::event::{VoiceEvent, VoiceEventKind};

/// Default per-subscriber queue depth before oldest-drop kicks in.
const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

type Handler = Box<dyn Fn(VoiceEvent) + Send + Sync + 'static>;

struct Subscriber {
    kind: VoiceEventKind,
    queue: Arc<Mutex<VecDeque<VoiceEvent>>>,
    notify: Arc<Notify>,
    capacity: usize,
    dropped: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// A handle returned by [`EventBus::subscribe`]; calling
/// [`unsubscribe`](SubscriptionHandle::unsubscribe) stops delivery and aborts
/// the subscriber's drain task. Dropping the handle leaves the subscription
/// running — the bus itself, not this handle, owns the task's lifetime.
pub struct SubscriptionHandle {
    closed: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    abort: AbortHandle,
}

impl SubscriptionHandle {
    pub fn unsubscribe(self) {
        self.closed.store(true, Ordering::SeqCst);
        self.abort.abort();
    }

    /// Count of events dropped for this subscriber due to queue overflow.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }
}

/// Typed publish/subscribe dispatcher scoped to one call's `RealtimeSession`.
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
    closed: AtomicBool,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Register a handler for `kind`. Handlers run on a dedicated drain task
    /// so a slow or panicking handler never blocks [`emit`](Self::emit).
    pub fn subscribe<F>(
        &self,
        kind: VoiceEventKind,
        handler: F,
    ) -> Result<SubscriptionHandle, VoiceError>
    where
        F: Fn(VoiceEvent) + Send + Sync + 'static,
    {
        self.subscribe_with_capacity(kind, DEFAULT_SUBSCRIBER_CAPACITY, handler)
    }

    pub fn subscribe_with_capacity<F>(
        &self,
        kind: VoiceEventKind,
        capacity: usize,
        handler: F,
    ) -> Result<SubscriptionHandle, VoiceError>
    where
        F: Fn(VoiceEvent) + Send + Sync + 'static,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(VoiceError::BusClosed {
                call_id: "<bus>".into(),
            });
        }

        let queue = Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(64))));
        let notify = Arc::new(Notify::new());
        let dropped = Arc::new(AtomicU64::new(0));
        let closed = Arc::new(AtomicBool::new(false));
        let handler: Handler = Box::new(handler);

        let task = spawn_drain_task(
            Arc::clone(&queue),
            Arc::clone(&notify),
            Arc::clone(&closed),
            handler,
        );
        let abort = task.abort_handle();

        self.subscribers.lock().unwrap().push(Subscriber {
            kind,
            queue,
            notify,
            capacity,
            dropped: Arc::clone(&dropped),
            closed: Arc::clone(&closed),
            task,
        });

        Ok(SubscriptionHandle {
            closed,
            dropped,
            abort,
        })
    }

    /// Deliver `event` to every current subscriber of `event.kind`, in
    /// registration order, without blocking the caller. Full subscriber
    /// queues drop their oldest entry and bump a per-subscriber counter.
    pub fn emit(&self, event: VoiceEvent) -> Result<(), VoiceError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(VoiceError::BusClosed {
                call_id: event.call_id.to_string(),
            });
        }

        let subscribers = self.subscribers.lock().unwrap();
        for sub in subscribers.iter().filter(|s| s.kind == event.kind) {
            let mut queue = sub.queue.lock().unwrap();
            if queue.len() >= sub.capacity {
                queue.pop_front();
                let total = sub.dropped.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(
                    kind = ?sub.kind,
                    dropped_total = total,
                    "event bus subscriber queue full, dropped oldest event"
                );
            }
            queue.push_back(event.clone());
            drop(queue);
            sub.notify.notify_one();
        }
        Ok(())
    }

    /// Reject further `emit`/`subscribe` calls; already-enqueued deliveries
    /// are left to drain on their own tasks.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        for sub in self.subscribers.get_mut().unwrap().drain(..) {
            sub.closed.store(true, Ordering::SeqCst);
            sub.task.abort();
        }
    }
}

fn spawn_drain_task(
    queue: Arc<Mutex<VecDeque<VoiceEvent>>>,
    notify: Arc<Notify>,
    closed: Arc<AtomicBool>,
    handler: Handler,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if closed.load(Ordering::SeqCst) {
                break;
            }
            notify.notified().await;
            loop {
                let next = queue.lock().unwrap().pop_front();
                let Some(event) = next else { break };
                let result = std::panic::catch_unwind(AssertUnwindSafe(|| handler(event)));
                if let Err(panic) = result {
                    error!(?panic, "event bus handler panicked; continuing delivery");
                }
            }
            if closed.load(Ordering::SeqCst) {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventPayload;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use voicebridge_core::{CallId, TenantId};

    fn event(kind: VoiceEventKind) -> VoiceEvent {
        VoiceEvent::new(
            kind,
            CallId::new("call-1").unwrap(),
            TenantId::new("tenant-1").unwrap(),
            0,
            EventPayload::Empty,
        )
    }

    #[tokio::test]
    async fn delivers_to_matching_subscriber_only() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        let _sub = bus
            .subscribe(VoiceEventKind::CallStarted, move |_| {
                hits2.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        bus.emit(event(VoiceEventKind::CallStarted)).unwrap();
        bus.emit(event(VoiceEventKind::CallEnded)).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_rejects_further_operations() {
        let bus = EventBus::new();
        bus.close();
        assert!(bus.is_closed());
        assert!(matches!(
            bus.emit(event(VoiceEventKind::CallStarted)),
            Err(VoiceError::BusClosed { .. })
        ));
        assert!(bus.subscribe(VoiceEventKind::CallStarted, |_| {}).is_err());
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_counts() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        // Capacity 1 forces every subsequent emit to evict the previous one
        // before the slow-starting drain task gets a chance to run.
        let sub = bus
            .subscribe_with_capacity(VoiceEventKind::Dtmf, 1, move |ev| {
                if let EventPayload::Dtmf(d) = ev.payload {
                    seen2.lock().unwrap().push(d);
                }
            })
            .unwrap();

        for d in ['1', '2', '3'] {
            let mut ev = event(VoiceEventKind::Dtmf);
            ev.payload = EventPayload::Dtmf(d);
            bus.emit(ev).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        // At least one overflow must have been recorded across three emits
        // into a capacity-1 queue, regardless of scheduler timing.
        assert!(sub.dropped_count() >= 1);
    }
}
