//! Periodic liveness probe over the links a call depends on.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::task::JoinHandle;
use tracing::warn;

use voicebridge_bus::{EventBus, EventPayload, LinkHealth, MonitoredLink, VoiceEvent, VoiceEventKind};
use voicebridge_core::{CallId, Clock, TenantId};

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEGRADED_AFTER: Duration = Duration::from_secs(5);
const DEAD_AFTER: Duration = Duration::from_secs(15);
const LINKS: [MonitoredLink; 4] = [
    MonitoredLink::Provider,
    MonitoredLink::SwitchControl,
    MonitoredLink::InboundAudio,
    MonitoredLink::ProviderAck,
];

fn link_index(link: MonitoredLink) -> usize {
    match link {
        MonitoredLink::Provider => 0,
        MonitoredLink::SwitchControl => 1,
        MonitoredLink::InboundAudio => 2,
        MonitoredLink::ProviderAck => 3,
    }
}

fn classify(elapsed: Duration) -> LinkHealth {
    if elapsed < DEGRADED_AFTER {
        LinkHealth::Healthy
    } else if elapsed <= DEAD_AFTER {
        LinkHealth::Degraded
    } else {
        LinkHealth::Dead
    }
}

struct Shared {
    last_activity: Mutex<[std::time::Instant; 4]>,
    previous_health: Mutex<[LinkHealth; 4]>,
    pause_refs: AtomicU32,
}

/// Classifies the provider link, switch control socket and audio links as
/// `Healthy`/`Degraded`/`Dead` every [`POLL_INTERVAL`], and emits
/// `PROVIDER_DEGRADED`/`HEARTBEAT_TIMEOUT` on transitions. Paused for the
/// whole duration of a transfer, since the provider link is intentionally
/// quiescent while the call is being handed to a human agent.
pub struct HeartbeatMonitor {
    call_id: CallId,
    tenant_id: TenantId,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatMonitor {
    pub fn new(call_id: CallId, tenant_id: TenantId, bus: Arc<EventBus>, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            call_id,
            tenant_id,
            bus,
            clock,
            shared: Arc::new(Shared {
                last_activity: Mutex::new([now; 4]),
                previous_health: Mutex::new([LinkHealth::Healthy; 4]),
                pause_refs: AtomicU32::new(0),
            }),
            task: Mutex::new(None),
        }
    }

    /// Record that `link` just showed activity.
    pub fn touch(&self, link: MonitoredLink) {
        self.shared.last_activity.lock().unwrap()[link_index(link)] = self.clock.now();
    }

    pub fn pause(&self) {
        self.shared.pause_refs.fetch_add(1, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        let _ = self.shared.pause_refs.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
            Some(v.saturating_sub(1))
        });
    }

    fn is_paused(&self) -> bool {
        self.shared.pause_refs.load(Ordering::SeqCst) > 0
    }

    /// Start the background classification loop. No-op if already started.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().unwrap();
        if task.is_some() {
            return;
        }
        let this = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(POLL_INTERVAL).await;
                if this.is_paused() {
                    continue;
                }
                this.tick();
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
    }

    fn tick(&self) {
        let now = self.clock.now();
        let activity = *self.shared.last_activity.lock().unwrap();
        let mut previous = self.shared.previous_health.lock().unwrap();

        for &link in &LINKS {
            let idx = link_index(link);
            let elapsed = now.saturating_duration_since(activity[idx]);
            let health = classify(elapsed);
            let transitioned_worse = health_rank(health) > health_rank(previous[idx]);

            if transitioned_worse && health_rank(health) >= health_rank(LinkHealth::Degraded) {
                warn!(?link, ?health, call_id = %self.call_id, "link health degraded");
                self.emit(VoiceEventKind::ProviderDegraded, EventPayload::Degraded { link, level: health });
            }

            if link == MonitoredLink::Provider && health == LinkHealth::Dead && previous[idx] != LinkHealth::Dead {
                self.emit(VoiceEventKind::HeartbeatTimeout, EventPayload::Empty);
            }

            previous[idx] = health;
        }
    }

    fn emit(&self, kind: VoiceEventKind, payload: EventPayload) {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let _ = self.bus.emit(VoiceEvent::new(
            kind,
            self.call_id.clone(),
            self.tenant_id.clone(),
            timestamp_ms,
            payload,
        ));
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Higher means worse, so transitions into a worse state are detectable with
/// a plain `>` comparison.
fn health_rank(h: LinkHealth) -> u8 {
    match h {
        LinkHealth::Healthy => 0,
        LinkHealth::Degraded => 1,
        LinkHealth::Dead => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voicebridge_core::FakeClock;

    #[test]
    fn classify_matches_thresholds() {
        assert_eq!(classify(Duration::from_secs(1)), LinkHealth::Healthy);
        assert_eq!(classify(Duration::from_secs(10)), LinkHealth::Degraded);
        assert_eq!(classify(Duration::from_secs(20)), LinkHealth::Dead);
    }

    #[tokio::test]
    async fn dead_provider_emits_heartbeat_timeout() {
        let bus = Arc::new(EventBus::new());
        let clock = Arc::new(FakeClock::new());
        let seen = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let seen2 = Arc::clone(&seen);
        let _sub = bus
            .subscribe(VoiceEventKind::HeartbeatTimeout, move |_| {
                seen2.store(true, std::sync::atomic::Ordering::SeqCst);
            })
            .unwrap();

        let monitor = HeartbeatMonitor::new(
            CallId::new("c").unwrap(),
            TenantId::new("t").unwrap(),
            bus,
            clock.clone(),
        );
        clock.advance(Duration::from_secs(16));
        monitor.tick();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(seen.load(std::sync::atomic::Ordering::SeqCst));
    }
}
