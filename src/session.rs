//! Client session trait implemented by the protocol layer.

use crate::Result;
use async_trait::async_trait;

/// A live client session, owned by the external protocol layer and
/// shared by reference with the broker while registered.
///
/// The dispatcher needs only the stable client id and the ability to
/// close the session. Everything else about a session (its socket, its
/// in-flight windows, its keep-alive state) is opaque to the core.
#[async_trait]
pub trait ClientSession: Send + Sync {
    /// The stable MQTT client identifier.
    fn id(&self) -> &str;

    /// Close the session. Resolves only after the session has drained
    /// its outbound queue and released its resources. The protocol layer
    /// is expected to follow up with `Broker::unregister_client`.
    async fn close(&self) -> Result<()>;
}
