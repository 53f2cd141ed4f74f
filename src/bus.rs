//! Topic-matching message bus.
//!
//! The bus routes packets to live subscriber callbacks and doubles as the
//! cluster transport: the broker registers its `$SYS` self-subscriptions
//! here, and several brokers sharing one bus instance (or a bus backed by
//! an external transport) see each other's system publishes.
//!
//! Guarantees required of every implementation:
//!
//! - MQTT wildcards (`+`, `#`) are honored when matching filters.
//! - `emit` invokes each distinct subscriber callback at most once per
//!   packet, no matter how many of its filters match.
//! - `emit` completes only after every invoked callback has completed,
//!   and propagates the first callback error.

use crate::packet::Packet;
use crate::pool::ObjectPool;
use crate::topic;
use crate::{Result, VeloxmqError};
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A live subscriber callback. Invoked once per matching packet; the
/// returned future is awaited before `emit` completes.
pub type BusSubscriber = Arc<dyn Fn(Packet) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Handle identifying one bus registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Message bus contract consumed by the dispatcher.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Register `subscriber` for every topic matching `filter`.
    async fn subscribe(&self, filter: &str, subscriber: BusSubscriber) -> Result<SubscriberId>;

    /// Remove a prior registration. Unknown ids are a no-op.
    async fn unsubscribe(&self, id: SubscriberId) -> Result<()>;

    /// Dispatch `packet` to every matching live subscriber.
    async fn emit(&self, packet: Packet) -> Result<()>;
}

struct Registration {
    id: SubscriberId,
    filter: String,
    subscriber: BusSubscriber,
}

/// Default single-process bus.
///
/// Share one instance between brokers to form an in-process cluster; the
/// integration tests drive cross-broker takeover exactly this way.
pub struct InProcessBus {
    registrations: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
    dispatch_buffers: ObjectPool<Vec<(SubscriberId, BusSubscriber)>>,
}

impl InProcessBus {
    pub fn new() -> Self {
        Self {
            registrations: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
            dispatch_buffers: ObjectPool::new(64, Vec::new),
        }
    }

    /// Number of live registrations.
    pub fn subscriber_count(&self) -> usize {
        self.registrations.read().len()
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for InProcessBus {
    async fn subscribe(&self, filter: &str, subscriber: BusSubscriber) -> Result<SubscriberId> {
        if !topic::valid_filter(filter) {
            return Err(VeloxmqError::Bus(format!("invalid topic filter: {filter:?}")));
        }
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.registrations.write().push(Registration {
            id,
            filter: filter.to_string(),
            subscriber,
        });
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriberId) -> Result<()> {
        self.registrations.write().retain(|reg| reg.id != id);
        Ok(())
    }

    async fn emit(&self, packet: Packet) -> Result<()> {
        let mut targets = self.dispatch_buffers.get();
        targets.clear();
        {
            let registrations = self.registrations.read();
            for reg in registrations.iter() {
                if topic::matches(&reg.filter, &packet.topic)
                    // The same callback registered under overlapping
                    // filters still fires once per packet.
                    && !targets
                        .iter()
                        .any(|(_, existing)| Arc::ptr_eq(existing, &reg.subscriber))
                {
                    targets.push((reg.id, Arc::clone(&reg.subscriber)));
                }
            }
        }

        // Lock released; run all callbacks to completion before judging
        // the outcome, so a failing subscriber cannot starve the rest.
        let callbacks = targets.iter().map(|(_, subscriber)| subscriber(packet.clone()));
        let results = futures::future::join_all(callbacks).await;
        drop(targets);

        for result in results {
            result?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PublishMessage;
    use std::sync::atomic::AtomicUsize;

    fn test_packet(topic: &str) -> Packet {
        Packet::seal(PublishMessage::new(topic, "x"), "b1", 1)
    }

    fn counting_subscriber(counter: Arc<AtomicUsize>) -> BusSubscriber {
        Arc::new(move |_packet| {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn test_emit_reaches_matching_subscribers() {
        let bus = InProcessBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.subscribe("a/+", counting_subscriber(Arc::clone(&hits)))
            .await
            .unwrap();

        bus.emit(test_packet("a/b")).await.unwrap();
        bus.emit(test_packet("c/d")).await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_emit_deduplicates_overlapping_filters() {
        let bus = InProcessBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let subscriber = counting_subscriber(Arc::clone(&hits));

        bus.subscribe("a/#", Arc::clone(&subscriber)).await.unwrap();
        bus.subscribe("a/+", subscriber).await.unwrap();

        bus.emit(test_packet("a/b")).await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = InProcessBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let id = bus
            .subscribe("a/b", counting_subscriber(Arc::clone(&hits)))
            .await
            .unwrap();

        bus.unsubscribe(id).await.unwrap();
        bus.emit(test_packet("a/b")).await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_rejects_invalid_filter() {
        let bus = InProcessBus::new();
        let subscriber: BusSubscriber = Arc::new(|_| Box::pin(async { Ok(()) }));
        assert!(bus.subscribe("a/#/b", subscriber).await.is_err());
    }

    #[tokio::test]
    async fn test_emit_runs_all_callbacks_and_propagates_error() {
        let bus = InProcessBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let failing: BusSubscriber = Arc::new(|_| {
            Box::pin(async { Err(VeloxmqError::Bus("subscriber exploded".to_string())) })
        });
        bus.subscribe("a/b", failing).await.unwrap();
        bus.subscribe("a/b", counting_subscriber(Arc::clone(&hits)))
            .await
            .unwrap();

        let result = bus.emit(test_packet("a/b")).await;

        assert!(result.is_err());
        // The healthy subscriber still ran.
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
