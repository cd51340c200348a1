//! Event bus for external observers.
//!
//! UI and log sinks are outside this workspace; they subscribe here.
//! Publishing never blocks and never fails - a bus with no subscribers
//! simply drops events, and slow subscribers lose the oldest entries
//! (broadcast semantics).

use mirror_types::{FileEvent, ProviderId, SyncSignal};
use tokio::sync::broadcast;

/// A provider lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderEvent {
    /// The provider that changed.
    pub provider: ProviderId,
    /// Whether the provider is now active.
    pub active: bool,
}

/// Everything the engine tells the outside world.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A file-level change was applied at a replica.
    File(FileEvent),
    /// A reconciliation run began or finished.
    Sync(SyncSignal),
    /// A provider was activated or deactivated.
    Provider(ProviderEvent),
}

/// Broadcast channel of [`EngineEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Create a bus retaining up to `capacity` undelivered events per
    /// subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Never blocks; without subscribers the event is
    /// dropped.
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_types::{FileEventKind, FileId, Location, RelativePath};

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(EngineEvent::Sync(SyncSignal::Begun));

        match rx.recv().await.unwrap() {
            EngineEvent::Sync(SyncSignal::Begun) => {}
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let bus = EventBus::default();
        bus.publish(EngineEvent::File(FileEvent {
            file_id: FileId::new(),
            path: RelativePath::new("a.txt"),
            kind: FileEventKind::Created,
            location: Location::Local,
        }));
    }

    #[tokio::test]
    async fn late_subscribers_miss_earlier_events() {
        let bus = EventBus::default();
        bus.publish(EngineEvent::Sync(SyncSignal::Begun));

        let mut rx = bus.subscribe();
        bus.publish(EngineEvent::Sync(SyncSignal::Done));

        match rx.recv().await.unwrap() {
            EngineEvent::Sync(SyncSignal::Done) => {}
            other => panic!("unexpected event {:?}", other),
        }
    }
}
