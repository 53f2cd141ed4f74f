//! Publication value types and the broker envelope.

use crate::{Result, VeloxmqError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// MQTT delivery guarantee level.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum QoS {
    /// QoS 0: fire and forget.
    #[default]
    AtMostOnce,
    /// QoS 1: acknowledged delivery, may duplicate.
    AtLeastOnce,
    /// QoS 2: assured single delivery.
    ExactlyOnce,
}

impl QoS {
    /// Decode the wire-level QoS byte. Values above 2 are rejected by the
    /// protocol layer before reaching the dispatcher.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

/// A decoded PUBLISH as handed over by the protocol layer.
///
/// The topic must be a concrete topic name: wildcard characters are only
/// legal in subscription filters, never in a publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

impl PublishMessage {
    /// Create a QoS 0, non-retained publication.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }

    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    pub fn retained(mut self) -> Self {
        self.retain = true;
        self
    }

    /// Reject publications the pipeline must never see: empty topics and
    /// topics containing wildcard characters.
    pub fn validate(&self) -> Result<()> {
        if !crate::topic::valid_publish_topic(&self.topic) {
            return Err(VeloxmqError::Protocol(format!(
                "invalid publish topic: {:?}",
                self.topic
            )));
        }
        Ok(())
    }
}

/// A publication wrapped with its broker-assigned sequence identity.
///
/// `(broker_id, broker_counter)` uniquely identifies a packet within the
/// cluster; persisted outgoing queues key retransmission state on it.
/// Packets are sealed once at pipeline entry and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub broker_id: String,
    pub broker_counter: u64,
}

impl Packet {
    pub(crate) fn seal(message: PublishMessage, broker_id: &str, broker_counter: u64) -> Self {
        Self {
            topic: message.topic,
            payload: message.payload,
            qos: message.qos,
            retain: message.retain,
            broker_id: broker_id.to_string(),
            broker_counter,
        }
    }

    /// Cluster-unique identity usable as a persistence key.
    pub fn sequence_id(&self) -> String {
        format!("{}-{}", self.broker_id, self.broker_counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_roundtrip() {
        for raw in 0..=2u8 {
            let qos = QoS::from_u8(raw).unwrap();
            assert_eq!(qos.as_u8(), raw);
        }
        assert_eq!(QoS::from_u8(3), None);
    }

    #[test]
    fn test_qos_ordering() {
        assert!(QoS::AtMostOnce < QoS::AtLeastOnce);
        assert!(QoS::AtLeastOnce < QoS::ExactlyOnce);
    }

    #[test]
    fn test_publish_message_builders() {
        let message = PublishMessage::new("a/b", "hi")
            .with_qos(QoS::AtLeastOnce)
            .retained();
        assert_eq!(message.topic, "a/b");
        assert_eq!(message.payload, Bytes::from("hi"));
        assert_eq!(message.qos, QoS::AtLeastOnce);
        assert!(message.retain);
    }

    #[test]
    fn test_validate_rejects_wildcards_and_empty() {
        assert!(PublishMessage::new("a/+/b", "x").validate().is_err());
        assert!(PublishMessage::new("a/#", "x").validate().is_err());
        assert!(PublishMessage::new("", "x").validate().is_err());
        assert!(PublishMessage::new("a/b", "x").validate().is_ok());
    }

    #[test]
    fn test_packet_sequence_id() {
        let packet = Packet::seal(PublishMessage::new("t", "p"), "b1", 42);
        assert_eq!(packet.sequence_id(), "b1-42");
        assert_eq!(packet.broker_counter, 42);
        assert_eq!(packet.topic, "t");
    }
}
