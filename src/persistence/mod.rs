//! Persistence contract for retained messages, durable subscriptions,
//! offline queues and wills.
//!
//! The dispatcher depends only on this trait; concrete backends (the
//! in-memory default here, disk or distributed stores elsewhere) plug in
//! through [`crate::BrokerOptions::with_persistence`].
//!
//! Streams are lazy `mpsc` receivers fed by a backend task: finite,
//! non-restartable, consumed at the caller's pace.

pub mod memory;

pub use memory::MemoryPersistence;

use crate::packet::{Packet, PublishMessage, QoS};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::sync::mpsc;

/// A durable subscription persisted on behalf of a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub client_id: String,
    pub topic: String,
    pub qos: QoS,
}

impl Subscription {
    pub fn new(client_id: impl Into<String>, topic: impl Into<String>, qos: QoS) -> Self {
        Self {
            client_id: client_id.into(),
            topic: topic.into(),
            qos,
        }
    }
}

/// A last-will publication, owned by the broker that accepted the
/// client's connection.
///
/// Written at connect time, deleted on clean disconnect, and republished
/// once by whichever broker first observes the owner dead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Will {
    pub client_id: String,
    pub broker_id: String,
    pub message: PublishMessage,
}

/// An entry in a client's durable outbound queue.
///
/// `message_id` is bound by the protocol layer once the packet goes
/// in-flight; the dispatcher treats it as opaque retransmission state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedPacket {
    pub message_id: Option<u16>,
    pub packet: Packet,
}

/// Durable-state contract consumed by the dispatcher and the protocol
/// layer.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Upsert the retained message for `packet.topic`. An empty payload
    /// deletes the entry.
    async fn store_retained(&self, packet: Packet) -> Result<()>;

    /// Stream every retained packet whose topic matches the MQTT filter
    /// `pattern`.
    async fn retained_stream(&self, pattern: &str) -> Result<mpsc::Receiver<Packet>>;

    /// Persist durable subscriptions for a client. Re-adding a filter
    /// replaces its QoS.
    async fn add_subscriptions(&self, client_id: &str, subs: Vec<Subscription>) -> Result<()>;

    /// Remove the named filters from a client's durable subscriptions.
    async fn remove_subscriptions(&self, client_id: &str, filters: Vec<String>) -> Result<()>;

    async fn subscriptions_by_client(&self, client_id: &str) -> Result<Vec<Subscription>>;

    /// All durable subscriptions whose filter matches the concrete topic
    /// `topic`, across every client. Must honor MQTT wildcard matching.
    async fn subscriptions_by_topic(&self, topic: &str) -> Result<Vec<Subscription>>;

    /// Append `packet` to the named subscription's durable outbound
    /// queue.
    async fn outgoing_enqueue(&self, sub: &Subscription, packet: Packet) -> Result<()>;

    /// Bind an in-flight message id to a queued packet, keyed by the
    /// packet's `(broker_id, broker_counter)` identity.
    async fn outgoing_update(&self, client_id: &str, message_id: u16, packet: Packet)
        -> Result<()>;

    /// Acknowledge the queued packet bound to `message_id`, removing and
    /// returning it. Unknown ids return `Ok(None)`.
    async fn outgoing_clear_message_id(
        &self,
        client_id: &str,
        message_id: u16,
    ) -> Result<Option<Packet>>;

    /// Stream a client's queued packets in enqueue order.
    async fn outgoing_stream(&self, client_id: &str) -> Result<mpsc::Receiver<QueuedPacket>>;

    /// Store a client's will, replacing any previous one.
    async fn put_will(&self, will: Will) -> Result<()>;

    /// Delete and return a client's will. Idempotent: deleting an absent
    /// will returns `Ok(None)`.
    async fn del_will(&self, client_id: &str) -> Result<Option<Will>>;

    /// Stream every will whose owning broker is NOT in `live_brokers`.
    async fn will_stream(&self, live_brokers: HashSet<String>) -> Result<mpsc::Receiver<Will>>;
}
