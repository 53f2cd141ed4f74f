pub mod settings;

use crate::bus::MessageBus;
use crate::hooks::{Authenticator, Authorizer, PublishedHook};
use crate::persistence::Persistence;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Hint for the maximum number of parallel per-connection operations;
    /// surfaced to the protocol layer, not enforced by the dispatcher.
    pub concurrency: usize,
    /// Cluster heartbeat period in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// CONNECT handshake deadline in milliseconds, enforced by the
    /// protocol layer.
    pub connect_timeout_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            concurrency: 100,
            heartbeat_interval_ms: 60_000, // 1 minute
            connect_timeout_ms: 30_000,    // 30 seconds
        }
    }
}

impl BrokerConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Set the heartbeat period
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the CONNECT handshake deadline
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Validate configuration bounds before constructing a broker
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.concurrency == 0 {
            return Err("concurrency must be > 0".to_string());
        }
        if self.heartbeat_interval_ms == 0 {
            return Err("heartbeat_interval_ms must be > 0".to_string());
        }
        if self.connect_timeout_ms == 0 {
            return Err("connect_timeout_ms must be > 0".to_string());
        }
        Ok(())
    }
}

/// Constructor-side bundle: the plain-data config plus the injected
/// collaborators that cannot live in a serializable struct.
///
/// Omitted collaborators fall back to the crate defaults: an
/// [`crate::InProcessBus`], a [`crate::MemoryPersistence`] and
/// permit-all hooks.
pub struct BrokerOptions {
    pub config: BrokerConfig,
    pub(crate) bus: Option<Arc<dyn MessageBus>>,
    pub(crate) persistence: Option<Arc<dyn Persistence>>,
    pub(crate) authenticator: Option<Arc<dyn Authenticator>>,
    pub(crate) authorizer: Option<Arc<dyn Authorizer>>,
    pub(crate) published: Option<Arc<dyn PublishedHook>>,
}

impl BrokerOptions {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            bus: None,
            persistence: None,
            authenticator: None,
            authorizer: None,
            published: None,
        }
    }

    /// Use a preconstructed bus; share one instance between brokers to
    /// form an in-process cluster.
    pub fn with_bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Use a preconstructed persistence backend.
    pub fn with_persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    pub fn with_published_hook(mut self, hook: Arc<dyn PublishedHook>) -> Self {
        self.published = Some(hook);
        self
    }
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

impl From<BrokerConfig> for BrokerOptions {
    fn from(config: BrokerConfig) -> Self {
        Self::new(config)
    }
}
