//! One-to-many event fan-out with a slow-subscriber backpressure policy.

use async_runtime_compat::Spawner;
use std::sync::RwLock;
use tracing::debug;

/// Registers new subscribers and fans incoming events out to all of them.
///
/// A single writer task reads from an internal ingress channel and, for
/// each event, attempts delivery to every registered subscriber.
/// `write` is non-blocking from the producer's perspective: the ingress
/// channel is unbounded, so producers never wait on a slow subscriber.
/// Per-subscriber delivery is "best-effort buffered with a small queue,
/// oldest-dropped on overflow" — if a subscriber's queue is full, the
/// oldest pending item for that subscriber is discarded to make room for
/// the new one. Subscribers live for the process lifetime; closing is not
/// supported.
pub struct Broadcaster<T> {
    ingress: async_channel::Sender<T>,
    subscribers: RwLock<Vec<async_channel::Sender<T>>>,
    queue_capacity: usize,
}

impl<T: Clone + Send + 'static> Broadcaster<T> {
    /// Create a broadcaster, spawning its writer task on `spawner`.
    /// `queue_capacity` bounds each subscriber's per-listener queue.
    pub fn new(spawner: &dyn Spawner, queue_capacity: usize) -> std::sync::Arc<Self> {
        let (ingress_tx, ingress_rx) = async_channel::unbounded();
        let broadcaster = std::sync::Arc::new(Self {
            ingress: ingress_tx,
            subscribers: RwLock::new(Vec::new()),
            queue_capacity,
        });

        let writer = broadcaster.clone();
        spawner.spawn(Box::pin(async move {
            while let Ok(event) = ingress_rx.recv().await {
                writer.deliver(event);
            }
        }));

        broadcaster
    }

    /// Register a new subscriber, returning its delivery endpoint.
    pub fn listen(&self) -> async_channel::Receiver<T> {
        let (tx, rx) = async_channel::bounded(self.queue_capacity.max(1));
        self.subscribers.write().expect("broadcaster lock poisoned").push(tx);
        rx
    }

    /// Submit `event` for delivery to every current subscriber.
    pub async fn write(&self, event: T) {
        // The ingress channel is unbounded; `send` never actually waits.
        let _ = self.ingress.send(event).await;
    }

    /// Number of currently registered subscribers (including any that
    /// have since been dropped and not yet pruned).
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().expect("broadcaster lock poisoned").len()
    }

    fn deliver(&self, event: T) {
        let subscribers = self.subscribers.read().expect("broadcaster lock poisoned");
        for subscriber in subscribers.iter() {
            if subscriber.try_send(event.clone()).is_err() {
                // Queue full (or closed): drop the oldest pending item and
                // retry once. A closed receiver simply drops the retry too.
                let _ = subscriber.try_recv();
                if subscriber.try_send(event.clone()).is_err() {
                    debug!("broadcaster: dropped event for a saturated subscriber");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_runtime_compat::smol::SmolSpawner;

    #[smol_potat::test]
    async fn listen_then_write_is_delivered() {
        let broadcaster = Broadcaster::<u32>::new(&SmolSpawner, 8);
        let rx = broadcaster.listen();

        broadcaster.write(42).await;
        async_runtime_compat::runtime_utils::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(rx.recv().await.unwrap(), 42);
    }

    #[smol_potat::test]
    async fn slow_subscriber_does_not_block_others() {
        let broadcaster = Broadcaster::<u32>::new(&SmolSpawner, 1);
        let slow = broadcaster.listen();
        let fast = broadcaster.listen();

        for n in 0..5 {
            broadcaster.write(n).await;
        }
        async_runtime_compat::runtime_utils::sleep(std::time::Duration::from_millis(20)).await;

        // The fast subscriber's queue also holds at most `queue_capacity`,
        // but the important property is that writes completed without
        // waiting on `slow` at all.
        assert!(fast.try_recv().is_ok());
        assert!(slow.try_recv().is_ok());
    }
}
