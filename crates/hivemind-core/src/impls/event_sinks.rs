//! EventSink implementations.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::domain::events::EngineEvent;
use crate::ports::EventSink;

/// Writes every event as a structured `tracing` record.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: EngineEvent) {
        let fields = serde_json::Value::Object(event.fields);
        match event.task_id {
            Some(task_id) => tracing::info!(
                target: "hivemind::events",
                event_type = event.event_type.as_str(),
                owner = %event.owner_id,
                task = %task_id,
                at = %event.timestamp,
                %fields,
            ),
            None => tracing::info!(
                target: "hivemind::events",
                event_type = event.event_type.as_str(),
                owner = %event.owner_id,
                at = %event.timestamp,
                %fields,
            ),
        }
    }
}

/// Fans events out to any number of subscribers. Events sent while nobody
/// is subscribed, or to a lagging subscriber, are dropped.
#[derive(Clone)]
pub struct BroadcastEventSink {
    sender: Arc<broadcast::Sender<EngineEvent>>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventSink for BroadcastEventSink {
    fn emit(&self, event: EngineEvent) {
        // no subscribers is not an error
        let _ = self.sender.send(event);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: EngineEvent) {}
}

/// Sends each event to every inner sink.
#[derive(Clone, Default)]
pub struct FanoutEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutEventSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for FanoutEventSink {
    fn emit(&self, event: EngineEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.emit(event.clone());
            }
            last.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::EventType;
    use crate::domain::ids::OwnerId;
    use chrono::Utc;

    fn event() -> EngineEvent {
        EngineEvent::new(Utc::now(), OwnerId::new("o"), EventType::BudgetRefused)
            .with("requested", 4.0)
    }

    #[tokio::test]
    async fn broadcast_reaches_subscribers_and_tolerates_none() {
        let sink = BroadcastEventSink::new(8);
        sink.emit(event());

        let mut rx = sink.subscribe();
        sink.emit(event());
        let got = rx.recv().await.unwrap();
        assert_eq!(got.event_type, EventType::BudgetRefused);
        assert_eq!(got.fields["requested"], 4.0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn fanout_delivers_to_every_sink() {
        let a = BroadcastEventSink::new(8);
        let b = BroadcastEventSink::new(8);
        let mut ra = a.subscribe();
        let mut rb = b.subscribe();
        let fanout = FanoutEventSink::new(vec![
            Arc::new(a),
            Arc::new(b),
            Arc::new(NoopEventSink),
            Arc::new(TracingEventSink),
        ]);

        fanout.emit(event());
        assert!(ra.try_recv().is_ok());
        assert!(rb.try_recv().is_ok());
    }
}
