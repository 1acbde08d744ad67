//! Per-entity deduplication of model events within a short time window.

use crate::broadcast::Broadcaster;
use crate::models::ModelEvent;
use async_runtime_compat::{runtime_utils::sleep, Spawner};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Keeps only the latest pending event per entity key, flushing the
/// survivors to a public [`Broadcaster`] once per tick.
///
/// Two tasks cooperate over a shared map: one appends incoming events
/// (last write per key wins), the other wakes every `window` and drains
/// the map in deterministic (sorted-key) order. If the process dies,
/// pending events are lost — acceptable, because the registry is the
/// durable source of truth and the next reconnect replays the state.
pub struct Coalescer {
    ingress: async_channel::Sender<ModelEvent>,
}

impl Coalescer {
    /// Start the coalescer, spawning its ingestion and ticker tasks on
    /// `spawner`. Surviving events are written to `broadcaster` every
    /// `window`.
    pub fn new(
        spawner: &dyn Spawner,
        window: Duration,
        broadcaster: Arc<Broadcaster<ModelEvent>>,
    ) -> Arc<Self> {
        let (ingress_tx, ingress_rx) = async_channel::unbounded();
        let pending: Arc<Mutex<HashMap<String, ModelEvent>>> = Arc::new(Mutex::new(HashMap::new()));

        let ingest_pending = pending.clone();
        spawner.spawn(Box::pin(async move {
            while let Ok(event) = ingress_rx.recv().await {
                let key = event.coalesce_key();
                ingest_pending.lock().expect("coalescer lock poisoned").insert(key, event);
            }
        }));

        let tick_pending = pending;
        spawner.spawn(Box::pin(async move {
            loop {
                sleep(window).await;
                let drained = {
                    let mut map = tick_pending.lock().expect("coalescer lock poisoned");
                    std::mem::take(&mut *map)
                };
                if drained.is_empty() {
                    continue;
                }
                let mut keys: Vec<_> = drained.keys().cloned().collect();
                keys.sort();
                debug!(count = keys.len(), "coalescer: flushing tick");
                for key in keys {
                    if let Some(event) = drained.get(&key) {
                        broadcaster.write(event.clone()).await;
                    }
                }
            }
        }));

        Arc::new(Self { ingress: ingress_tx })
    }

    /// Submit `event`, overwriting any pending event already queued under
    /// the same entity key.
    pub async fn submit(&self, event: ModelEvent) {
        let _ = self.ingress.send(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Domain, EventType, ModelEventPayload};
    use async_runtime_compat::smol::SmolSpawner;

    fn domain_event(value: &str) -> ModelEvent {
        ModelEvent {
            event_type: EventType::Update,
            model: ModelEventPayload::Domain(Domain {
                node_key: "/domains/example.com".into(),
                name: "example.com".into(),
                typ: "service".into(),
                value: value.into(),
            }),
        }
    }

    #[smol_potat::test]
    async fn burst_on_same_key_collapses_to_last() {
        let broadcaster = Broadcaster::<ModelEvent>::new(&SmolSpawner, 16);
        let listener = broadcaster.listen();
        let coalescer = Coalescer::new(&SmolSpawner, Duration::from_millis(50), broadcaster);

        for i in 0..10 {
            coalescer.submit(domain_event(&format!("web-{i}"))).await;
        }

        async_runtime_compat::runtime_utils::sleep(Duration::from_millis(150)).await;

        let mut received = Vec::new();
        while let Ok(event) = listener.try_recv() {
            received.push(event);
        }

        assert_eq!(received.len(), 1);
        match &received[0].model {
            ModelEventPayload::Domain(d) => assert_eq!(d.value, "web-9"),
            other => panic!("expected domain payload, got {other:?}"),
        }
    }
}
