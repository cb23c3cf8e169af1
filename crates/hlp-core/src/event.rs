//! Executor event bus.
//!
//! Events go out on a `tokio::sync::broadcast` channel after the state they
//! describe is durable. Observers either take the raw stream or a
//! [`PlanSubscription`] scoped to one plan, which ends after that plan's
//! `PlanFinished` event.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use hlp_types::event::ExecutorEvent;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

/// Multi-producer, multi-consumer bus for executor events. Clones share the
/// channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ExecutorEvent>,
    published: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            published: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Every event published from now on, for all plans.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutorEvent> {
        self.sender.subscribe()
    }

    /// Events of a single plan, ending with its `PlanFinished`.
    pub fn subscribe_plan(&self, plan_id: Uuid) -> PlanSubscription {
        PlanSubscription {
            plan_id,
            rx: self.sender.subscribe(),
            finished: false,
            missed: 0,
        }
    }

    /// Dropped silently when nobody is listening.
    pub fn publish(&self, event: ExecutorEvent) {
        self.published.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            kind = event.kind(),
            plan_id = ?event.plan_id(),
            "executor event"
        );
        let _ = self.sender.send(event);
    }

    /// Total events published over the bus's lifetime.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .field("published", &self.published())
            .finish()
    }
}

/// A receiver filtered to one plan.
///
/// A subscriber that falls behind skips the overwritten events instead of
/// failing; [`missed`](Self::missed) reports how many were lost.
pub struct PlanSubscription {
    plan_id: Uuid,
    rx: broadcast::Receiver<ExecutorEvent>,
    finished: bool,
    missed: u64,
}

impl PlanSubscription {
    pub fn plan_id(&self) -> Uuid {
        self.plan_id
    }

    /// Next event for this plan, or `None` once the plan has finished or the
    /// bus is gone.
    pub async fn next(&mut self) -> Option<ExecutorEvent> {
        if self.finished {
            return None;
        }
        loop {
            match self.rx.recv().await {
                Ok(event) if event.plan_id() == Some(self.plan_id) => {
                    if matches!(event, ExecutorEvent::PlanFinished { .. }) {
                        self.finished = true;
                    }
                    return Some(event);
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(n)) => {
                    tracing::debug!(plan_id = %self.plan_id, skipped = n, "event subscriber lagged");
                    self.missed += n;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn missed(&self) -> u64 {
        self.missed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hlp_types::state::{PlanStatus, UnitState};

    fn transitioned(plan_id: Uuid, unit: &str) -> ExecutorEvent {
        ExecutorEvent::UnitTransitioned {
            plan_id,
            unit_id: unit.to_string(),
            from: UnitState::Queued,
            to: UnitState::Running,
            attempt: 1,
        }
    }

    fn finished(plan_id: Uuid) -> ExecutorEvent {
        ExecutorEvent::PlanFinished {
            plan_id,
            status: PlanStatus::Completed,
        }
    }

    #[tokio::test]
    async fn plan_subscription_filters_and_ends_on_finish() {
        let bus = EventBus::new(16);
        let mine = Uuid::now_v7();
        let other = Uuid::now_v7();
        let mut sub = bus.subscribe_plan(mine);

        bus.publish(transitioned(other, "x"));
        bus.publish(ExecutorEvent::CircuitOpened {
            resource: "db".to_string(),
        });
        bus.publish(transitioned(mine, "a"));
        bus.publish(finished(mine));
        bus.publish(transitioned(mine, "late"));

        assert!(matches!(
            sub.next().await,
            Some(ExecutorEvent::UnitTransitioned { unit_id, .. }) if unit_id == "a"
        ));
        assert!(matches!(sub.next().await, Some(ExecutorEvent::PlanFinished { .. })));
        assert!(sub.next().await.is_none());
        assert_eq!(sub.missed(), 0);
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_ahead() {
        let bus = EventBus::new(2);
        let plan_id = Uuid::now_v7();
        let mut sub = bus.subscribe_plan(plan_id);

        for i in 0..5 {
            bus.publish(transitioned(plan_id, &format!("u{i}")));
        }
        bus.publish(finished(plan_id));

        let mut seen = Vec::new();
        while let Some(event) = sub.next().await {
            seen.push(event);
        }
        assert!(sub.missed() > 0);
        assert!(matches!(seen.last(), Some(ExecutorEvent::PlanFinished { .. })));
    }

    #[tokio::test]
    async fn closed_bus_ends_subscription() {
        let bus = EventBus::new(4);
        let mut sub = bus.subscribe_plan(Uuid::now_v7());
        drop(bus);
        assert!(sub.next().await.is_none());
    }

    #[test]
    fn publish_without_subscribers_is_counted() {
        let bus = EventBus::new(4);
        let clone = bus.clone();
        clone.publish(finished(Uuid::now_v7()));
        assert_eq!(bus.published(), 1);
        assert!(format!("{bus:?}").contains("published"));
    }
}
