//! In-memory persistence backend.

use super::{Persistence, QueuedPacket, Subscription, Will};
use crate::packet::Packet;
use crate::topic;
use crate::{Result, VeloxmqError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use tokio::sync::mpsc;

/// Buffer size for the lazy stream channels.
const STREAM_BUFFER: usize = 64;

/// Default persistence: everything lives in concurrent maps and is lost
/// on restart. Suitable for QoS 0 workloads, tests and single-node
/// deployments that accept losing queued state on crash.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    retained: DashMap<String, Packet>,
    subscriptions: DashMap<String, Vec<Subscription>>,
    queues: DashMap<String, Vec<QueuedPacket>>,
    wills: DashMap<String, Will>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    fn spawn_stream<T: Send + 'static>(items: Vec<T>) -> mpsc::Receiver<T> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(async move {
            for item in items {
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        });
        rx
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn store_retained(&self, packet: Packet) -> Result<()> {
        if packet.payload.is_empty() {
            self.retained.remove(&packet.topic);
        } else {
            self.retained.insert(packet.topic.clone(), packet);
        }
        Ok(())
    }

    async fn retained_stream(&self, pattern: &str) -> Result<mpsc::Receiver<Packet>> {
        let matching: Vec<Packet> = self
            .retained
            .iter()
            .filter(|entry| topic::matches(pattern, entry.key()))
            .map(|entry| entry.value().clone())
            .collect();
        Ok(Self::spawn_stream(matching))
    }

    async fn add_subscriptions(&self, client_id: &str, subs: Vec<Subscription>) -> Result<()> {
        let mut entry = self.subscriptions.entry(client_id.to_string()).or_default();
        for sub in subs {
            if let Some(existing) = entry.iter_mut().find(|s| s.topic == sub.topic) {
                *existing = sub;
            } else {
                entry.push(sub);
            }
        }
        Ok(())
    }

    async fn remove_subscriptions(&self, client_id: &str, filters: Vec<String>) -> Result<()> {
        if let Some(mut entry) = self.subscriptions.get_mut(client_id) {
            entry.retain(|sub| !filters.contains(&sub.topic));
        }
        self.subscriptions
            .remove_if(client_id, |_, subs| subs.is_empty());
        Ok(())
    }

    async fn subscriptions_by_client(&self, client_id: &str) -> Result<Vec<Subscription>> {
        Ok(self
            .subscriptions
            .get(client_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn subscriptions_by_topic(&self, topic_name: &str) -> Result<Vec<Subscription>> {
        let mut matching = Vec::new();
        for entry in self.subscriptions.iter() {
            for sub in entry.value() {
                if topic::matches(&sub.topic, topic_name) {
                    matching.push(sub.clone());
                }
            }
        }
        Ok(matching)
    }

    async fn outgoing_enqueue(&self, sub: &Subscription, packet: Packet) -> Result<()> {
        self.queues
            .entry(sub.client_id.clone())
            .or_default()
            .push(QueuedPacket {
                message_id: None,
                packet,
            });
        Ok(())
    }

    async fn outgoing_update(
        &self,
        client_id: &str,
        message_id: u16,
        packet: Packet,
    ) -> Result<()> {
        if let Some(mut queue) = self.queues.get_mut(client_id) {
            if let Some(slot) = queue.iter_mut().find(|q| {
                q.packet.broker_id == packet.broker_id
                    && q.packet.broker_counter == packet.broker_counter
            }) {
                slot.message_id = Some(message_id);
                slot.packet = packet;
                return Ok(());
            }
        }
        Err(VeloxmqError::Persistence(format!(
            "no queued packet {} for client {}",
            packet.sequence_id(),
            client_id
        )))
    }

    async fn outgoing_clear_message_id(
        &self,
        client_id: &str,
        message_id: u16,
    ) -> Result<Option<Packet>> {
        if let Some(mut queue) = self.queues.get_mut(client_id) {
            if let Some(position) = queue.iter().position(|q| q.message_id == Some(message_id)) {
                return Ok(Some(queue.remove(position).packet));
            }
        }
        Ok(None)
    }

    async fn outgoing_stream(&self, client_id: &str) -> Result<mpsc::Receiver<QueuedPacket>> {
        let queued = self
            .queues
            .get(client_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        Ok(Self::spawn_stream(queued))
    }

    async fn put_will(&self, will: Will) -> Result<()> {
        self.wills.insert(will.client_id.clone(), will);
        Ok(())
    }

    async fn del_will(&self, client_id: &str) -> Result<Option<Will>> {
        Ok(self.wills.remove(client_id).map(|(_, will)| will))
    }

    async fn will_stream(&self, live_brokers: HashSet<String>) -> Result<mpsc::Receiver<Will>> {
        let orphaned: Vec<Will> = self
            .wills
            .iter()
            .filter(|entry| !live_brokers.contains(&entry.value().broker_id))
            .map(|entry| entry.value().clone())
            .collect();
        Ok(Self::spawn_stream(orphaned))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{PublishMessage, QoS};

    fn packet(topic: &str, payload: &str, counter: u64) -> Packet {
        Packet::seal(PublishMessage::new(topic, payload.to_string()), "b1", counter)
    }

    async fn drain<T>(mut rx: mpsc::Receiver<T>) -> Vec<T> {
        let mut items = Vec::new();
        while let Some(item) = rx.recv().await {
            items.push(item);
        }
        items
    }

    #[tokio::test]
    async fn test_retained_upsert_and_delete() {
        let store = MemoryPersistence::new();
        store.store_retained(packet("a/b", "v1", 1)).await.unwrap();
        store.store_retained(packet("a/b", "v2", 2)).await.unwrap();

        let retained = drain(store.retained_stream("a/#").await.unwrap()).await;
        assert_eq!(retained.len(), 1);
        assert_eq!(retained[0].payload, "v2");

        // Empty payload clears the slot.
        store.store_retained(packet("a/b", "", 3)).await.unwrap();
        let retained = drain(store.retained_stream("a/#").await.unwrap()).await;
        assert!(retained.is_empty());
    }

    #[tokio::test]
    async fn test_subscriptions_by_topic_honors_wildcards() {
        let store = MemoryPersistence::new();
        store
            .add_subscriptions(
                "c1",
                vec![Subscription::new("c1", "t/+", QoS::AtLeastOnce)],
            )
            .await
            .unwrap();
        store
            .add_subscriptions(
                "c2",
                vec![Subscription::new("c2", "other/#", QoS::AtLeastOnce)],
            )
            .await
            .unwrap();

        let matching = store.subscriptions_by_topic("t/x").await.unwrap();
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].client_id, "c1");
    }

    #[tokio::test]
    async fn test_resubscribe_replaces_qos() {
        let store = MemoryPersistence::new();
        store
            .add_subscriptions("c1", vec![Subscription::new("c1", "t/#", QoS::AtMostOnce)])
            .await
            .unwrap();
        store
            .add_subscriptions("c1", vec![Subscription::new("c1", "t/#", QoS::ExactlyOnce)])
            .await
            .unwrap();

        let subs = store.subscriptions_by_client("c1").await.unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].qos, QoS::ExactlyOnce);
    }

    #[tokio::test]
    async fn test_remove_subscriptions() {
        let store = MemoryPersistence::new();
        store
            .add_subscriptions(
                "c1",
                vec![
                    Subscription::new("c1", "a/#", QoS::AtLeastOnce),
                    Subscription::new("c1", "b/#", QoS::AtLeastOnce),
                ],
            )
            .await
            .unwrap();

        store
            .remove_subscriptions("c1", vec!["a/#".to_string()])
            .await
            .unwrap();

        let subs = store.subscriptions_by_client("c1").await.unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].topic, "b/#");
    }

    #[tokio::test]
    async fn test_outgoing_queue_bookkeeping() {
        let store = MemoryPersistence::new();
        let sub = Subscription::new("c1", "t/#", QoS::AtLeastOnce);
        let queued = packet("t/x", "hello", 7);

        store.outgoing_enqueue(&sub, queued.clone()).await.unwrap();
        store.outgoing_update("c1", 11, queued.clone()).await.unwrap();

        let cleared = store.outgoing_clear_message_id("c1", 11).await.unwrap();
        assert_eq!(cleared.map(|p| p.sequence_id()), Some("b1-7".to_string()));

        // Clearing again is a no-op.
        assert!(store
            .outgoing_clear_message_id("c1", 11)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_outgoing_update_unknown_packet_errors() {
        let store = MemoryPersistence::new();
        let result = store.outgoing_update("c1", 1, packet("t/x", "p", 1)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_outgoing_stream_preserves_order() {
        let store = MemoryPersistence::new();
        let sub = Subscription::new("c1", "t/#", QoS::AtLeastOnce);
        store.outgoing_enqueue(&sub, packet("t/1", "a", 1)).await.unwrap();
        store.outgoing_enqueue(&sub, packet("t/2", "b", 2)).await.unwrap();

        let queued = drain(store.outgoing_stream("c1").await.unwrap()).await;
        let counters: Vec<u64> = queued.iter().map(|q| q.packet.broker_counter).collect();
        assert_eq!(counters, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_will_stream_filters_live_brokers() {
        let store = MemoryPersistence::new();
        store
            .put_will(Will {
                client_id: "c1".to_string(),
                broker_id: "alive".to_string(),
                message: PublishMessage::new("wills/c1", "gone"),
            })
            .await
            .unwrap();
        store
            .put_will(Will {
                client_id: "c2".to_string(),
                broker_id: "dead".to_string(),
                message: PublishMessage::new("wills/c2", "gone"),
            })
            .await
            .unwrap();

        let live: HashSet<String> = ["alive".to_string()].into_iter().collect();
        let orphaned = drain(store.will_stream(live).await.unwrap()).await;
        assert_eq!(orphaned.len(), 1);
        assert_eq!(orphaned[0].client_id, "c2");

        // del_will is idempotent.
        assert!(store.del_will("c2").await.unwrap().is_some());
        assert!(store.del_will("c2").await.unwrap().is_none());
    }
}
