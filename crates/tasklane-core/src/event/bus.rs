//! In-process notifications about instance runs.
//!
//! The service publishes an `EngineEvent` when a run starts or finishes, a
//! task completes or fails, a human task is created and an instance is reset.
//! Observers take either the whole stream or the events of one instance. An
//! observer that falls behind loses the oldest events; the engine never waits.

use tasklane_types::event::EngineEvent;
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// `capacity` is how many events a slow observer may trail by; at least one.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Events of `instance_id` published from now on.
    pub fn follow(&self, instance_id: Uuid) -> InstanceEvents {
        InstanceEvents {
            instance_id,
            receiver: self.sender.subscribe(),
        }
    }

    pub(crate) fn publish(&self, event: EngineEvent) {
        if let Err(unobserved) = self.sender.send(event) {
            tracing::trace!(instance_id = %unobserved.0.instance_id(), "no event observers");
        }
    }
}

/// Event stream narrowed to one instance.
pub struct InstanceEvents {
    instance_id: Uuid,
    receiver: broadcast::Receiver<EngineEvent>,
}

impl InstanceEvents {
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Wait for the next event of the instance. `None` once the bus is gone.
    pub async fn next(&mut self) -> Option<EngineEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.instance_id() == self.instance_id => return Some(event),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(instance_id = %self.instance_id, skipped, "event observer fell behind");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasklane_types::instance::{ProcessInstanceStatus, StrategyKind};

    fn started(instance_id: Uuid) -> EngineEvent {
        EngineEvent::RunStarted {
            instance_id,
            strategy: StrategyKind::Default,
        }
    }

    fn finished(instance_id: Uuid, tasks_executed: usize) -> EngineEvent {
        EngineEvent::RunFinished {
            instance_id,
            status: ProcessInstanceStatus::Waiting,
            tasks_executed,
        }
    }

    #[tokio::test]
    async fn follow_skips_other_instances() {
        let bus = EventBus::new(16);
        let (mine, other) = (Uuid::now_v7(), Uuid::now_v7());
        let mut events = bus.follow(mine);
        let mut everything = bus.subscribe();

        bus.publish(started(other));
        bus.publish(started(mine));
        bus.publish(finished(other, 3));
        bus.publish(finished(mine, 1));

        assert!(matches!(events.next().await, Some(EngineEvent::RunStarted { .. })));
        assert!(matches!(
            events.next().await,
            Some(EngineEvent::RunFinished { tasks_executed: 1, .. })
        ));
        assert_eq!(everything.len(), 4);
        assert_eq!(everything.recv().await.unwrap().instance_id(), other);
    }

    #[tokio::test]
    async fn lagging_observer_resumes_with_newest_events() {
        let bus = EventBus::new(2);
        let id = Uuid::now_v7();
        let mut events = bus.follow(id);

        for executed in 0..5 {
            bus.publish(finished(id, executed));
        }

        assert!(matches!(
            events.next().await,
            Some(EngineEvent::RunFinished { tasks_executed: 3, .. })
        ));
        assert!(matches!(
            events.next().await,
            Some(EngineEvent::RunFinished { tasks_executed: 4, .. })
        ));
    }

    #[tokio::test]
    async fn stream_ends_with_the_bus() {
        let bus = EventBus::new(4);
        let id = Uuid::now_v7();
        let mut events = bus.follow(id);
        bus.publish(started(id));
        drop(bus);

        assert!(events.next().await.is_some());
        assert!(events.next().await.is_none());
    }

    #[test]
    fn zero_capacity_and_no_observers_are_fine() {
        let bus = EventBus::new(0);
        bus.publish(started(Uuid::now_v7()));
        assert_eq!(bus.follow(Uuid::now_v7()).receiver.len(), 0);
    }
}
