//! The publish pipeline.
//!
//! Every publication runs the same ordered stages:
//!
//! - QoS 0: retained store, bus fan-out, published hook.
//! - QoS 1/2: retained store, offline enqueue, bus fan-out, published
//!   hook.
//!
//! Stages are strictly sequential for one packet; distinct publishes run
//! concurrently. The future returned by [`Broker::publish`] resolves
//! exactly once, with the sealed packet or the first stage error.

use super::{Broker, BrokerEvent};
use crate::packet::{Packet, PublishMessage, QoS};
use crate::session::ClientSession;
use crate::topic;
use crate::{Result, VeloxmqError};
use std::sync::Arc;
use tracing::{debug, error};

impl Broker {
    /// Run one publication through the dispatch pipeline.
    ///
    /// `client` is the originating session, or `None` for
    /// broker-generated system publishes (heartbeats, client
    /// announcements, recovered wills).
    pub async fn publish(
        &self,
        message: PublishMessage,
        client: Option<Arc<dyn ClientSession>>,
    ) -> Result<Packet> {
        if self.is_closed() {
            return Err(VeloxmqError::Closed);
        }
        message.validate()?;

        // The counter is taken synchronously at entry: packet identity
        // is total-ordered per broker regardless of stage interleaving.
        let packet = Packet::seal(message, self.id(), self.next_counter());
        self.metrics().record_publish_received();
        debug!(
            "publishing {} on {} (qos {})",
            packet.sequence_id(),
            packet.topic,
            packet.qos.as_u8()
        );

        self.store_retained(&packet).await?;
        if packet.qos > QoS::AtMostOnce {
            self.enqueue_offline(&packet).await?;
        }
        self.bus.emit(packet.clone()).await?;
        self.metrics().record_packet_emitted();
        self.call_published(&packet, client.as_deref()).await?;

        Ok(packet)
    }

    async fn store_retained(&self, packet: &Packet) -> Result<()> {
        if !packet.retain {
            return Ok(());
        }
        self.persistence.store_retained(packet.clone()).await?;
        self.metrics().record_retained_stored();
        Ok(())
    }

    /// Enqueue the packet for every persisted subscriber whose filter
    /// matches. The lookup itself failing is fatal: a dispatcher that
    /// silently skipped durable deliveries would break the QoS contract,
    /// so the failure is raised on the event stream as well as returned.
    async fn enqueue_offline(&self, packet: &Packet) -> Result<()> {
        let subscribers = match self.persistence.subscriptions_by_topic(&packet.topic).await {
            Ok(subscribers) => subscribers,
            Err(err) => {
                error!(
                    "durable subscriber lookup failed for {}: {}",
                    packet.topic, err
                );
                self.emit_event(BrokerEvent::Error {
                    message: err.to_string(),
                });
                return Err(err);
            }
        };

        // A bare `#` must not receive $SYS traffic even when a backend
        // skips the wildcard guard.
        let system = topic::is_system(&packet.topic);
        let enqueues: Vec<_> = subscribers
            .iter()
            .filter(|sub| !(system && sub.topic == "#"))
            .map(|sub| self.persistence.outgoing_enqueue(sub, packet.clone()))
            .collect();
        let enqueued = enqueues.len() as u64;

        let results = futures::future::join_all(enqueues).await;
        for result in results {
            result?;
        }
        self.metrics().record_offline_enqueues(enqueued);
        Ok(())
    }

    async fn call_published(
        &self,
        packet: &Packet,
        client: Option<&dyn ClientSession>,
    ) -> Result<()> {
        let client_id = client.map(|session| session.id().to_string());
        // Observers see the packet synchronously with the hook
        // invocation, before the hook resolves.
        self.emit_event(BrokerEvent::Publish {
            packet: packet.clone(),
            client_id: client_id.clone(),
        });
        self.published_hook()
            .published(packet, client_id.as_deref())
            .await
    }
}
