//! Application-level hooks gating connects, publishes and subscribes.
//!
//! All hooks default to permit-all. The protocol layer invokes
//! [`Authenticator`] and [`Authorizer`]; the publish pipeline invokes
//! [`PublishedHook`] as its final stage.

use crate::packet::{Packet, PublishMessage};
use crate::persistence::Subscription;
use crate::Result;
use async_trait::async_trait;

/// Gates the CONNECT handshake.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Return `Ok(true)` to accept the connection, `Ok(false)` to refuse
    /// it with a bad-credentials reason code.
    async fn authenticate(
        &self,
        client_id: &str,
        username: Option<&str>,
        password: Option<&[u8]>,
    ) -> Result<bool>;
}

/// Gates publishes, subscribes and outbound forwarding for a session.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Called before an incoming PUBLISH enters the pipeline. An error
    /// rejects the publication; the pipeline never sees it.
    async fn authorize_publish(&self, client_id: &str, message: &PublishMessage) -> Result<()>;

    /// Called for each requested subscription. May downgrade or rewrite
    /// the subscription; returning `Ok(None)` denies it.
    async fn authorize_subscribe(
        &self,
        client_id: &str,
        subscription: Subscription,
    ) -> Result<Option<Subscription>>;

    /// Called synchronously immediately before an outbound PUBLISH is
    /// written to a session. May rewrite the packet; returning `None`
    /// drops the delivery for this session only.
    fn authorize_forward(&self, client_id: &str, packet: Packet) -> Option<Packet>;
}

/// Application callback invoked after the bus fan-out of every publish.
#[async_trait]
pub trait PublishedHook: Send + Sync {
    async fn published(&self, packet: &Packet, client_id: Option<&str>) -> Result<()>;
}

/// Permit-all policy used when no authenticator or authorizer is
/// configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl Authenticator for AllowAll {
    async fn authenticate(
        &self,
        _client_id: &str,
        _username: Option<&str>,
        _password: Option<&[u8]>,
    ) -> Result<bool> {
        Ok(true)
    }
}

#[async_trait]
impl Authorizer for AllowAll {
    async fn authorize_publish(&self, _client_id: &str, _message: &PublishMessage) -> Result<()> {
        Ok(())
    }

    async fn authorize_subscribe(
        &self,
        _client_id: &str,
        subscription: Subscription,
    ) -> Result<Option<Subscription>> {
        Ok(Some(subscription))
    }

    fn authorize_forward(&self, _client_id: &str, packet: Packet) -> Option<Packet> {
        Some(packet)
    }
}

/// Default no-op published hook.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublished;

#[async_trait]
impl PublishedHook for NoopPublished {
    async fn published(&self, _packet: &Packet, _client_id: Option<&str>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::QoS;

    #[tokio::test]
    async fn test_allow_all_permits_everything() {
        let policy = AllowAll;
        assert!(policy.authenticate("c1", None, None).await.unwrap());

        let message = PublishMessage::new("a/b", "x");
        policy.authorize_publish("c1", &message).await.unwrap();

        let sub = Subscription::new("c1", "a/#", QoS::AtLeastOnce);
        let granted = policy.authorize_subscribe("c1", sub.clone()).await.unwrap();
        assert_eq!(granted, Some(sub));

        let packet = Packet::seal(message, "b1", 1);
        assert!(policy.authorize_forward("c1", packet).is_some());
    }

    #[tokio::test]
    async fn test_noop_published_hook() {
        let hook = NoopPublished;
        let packet = Packet::seal(PublishMessage::new("a", "x"), "b1", 1);
        hook.published(&packet, Some("c1")).await.unwrap();
    }
}
