//! # Broker dispatcher
//!
//! The [`Broker`] ties the crate together: it seals incoming
//! publications into [`Packet`]s, runs them through the publish pipeline
//! ([`pipeline`]), keeps the authoritative client registry, and
//! participates in the cluster through heartbeats and will recovery
//! ([`cluster`]).
//!
//! ## Lifecycle
//!
//! ```rust,no_run
//! use veloxmq::{Broker, BrokerOptions};
//!
//! #[tokio::main]
//! async fn main() -> veloxmq::Result<()> {
//!     let broker = Broker::new(BrokerOptions::default())?;
//!     broker.start().await?; // registers $SYS subscriptions, spawns timers
//!     // ... protocol layer registers sessions, publishes packets ...
//!     broker.close().await?; // stops timers, closes every session
//!     Ok(())
//! }
//! ```
//!
//! ## Single session per client id
//!
//! Within one broker the registry closes any prior session before
//! installing a new one under the same id. Across a cluster the
//! `$SYS/<brokerId>/new/clients` notification published on every
//! registration lets peers close their stale copy, so after one
//! propagation round exactly one broker holds the session.

pub mod cluster;
pub mod pipeline;

use crate::bus::MessageBus;
use crate::config::BrokerOptions;
use crate::hooks::{AllowAll, Authenticator, Authorizer, NoopPublished, PublishedHook};
use crate::metrics::BrokerMetrics;
use crate::packet::{Packet, PublishMessage};
use crate::persistence::Persistence;
use crate::session::ClientSession;
use crate::{BrokerConfig, InProcessBus, MemoryPersistence, Result, VeloxmqError};
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Capacity of the broker event channel; lagging observers drop old
/// events rather than blocking the dispatcher.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Length of the generated broker id, in hex characters.
const BROKER_ID_LEN: usize = 12;

/// Events observable on the broker.
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    /// A session finished registration.
    ClientConnected { client_id: String },
    /// A session was removed from the registry.
    ClientDisconnected { client_id: String },
    /// A packet passed the bus fan-out stage. Emitted before the
    /// `published` hook resolves, so observers must not assume the
    /// publish has been user-acknowledged.
    Publish {
        packet: Packet,
        client_id: Option<String>,
    },
    /// A fatal dispatcher error (for example a failed durable-subscriber
    /// lookup, which would otherwise silently drop QoS > 0 deliveries).
    Error { message: String },
}

/// The broker dispatcher.
pub struct Broker {
    id: String,
    config: BrokerConfig,
    counter: AtomicU64,
    clients: DashMap<String, Arc<dyn ClientSession>>,
    brokers: DashMap<String, Instant>,
    connected_clients: AtomicUsize,
    pub(crate) bus: Arc<dyn MessageBus>,
    pub(crate) persistence: Arc<dyn Persistence>,
    authenticator: Arc<dyn Authenticator>,
    authorizer: Arc<dyn Authorizer>,
    published: Arc<dyn PublishedHook>,
    events: broadcast::Sender<BrokerEvent>,
    metrics: BrokerMetrics,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Broker {
    /// Construct a broker from options, wiring in the default bus,
    /// persistence and hooks for anything not provided. Timers are not
    /// started until [`Broker::start`].
    pub fn new(options: BrokerOptions) -> Result<Arc<Self>> {
        options.config.validate().map_err(VeloxmqError::Config)?;

        let id = Uuid::new_v4().simple().to_string()[..BROKER_ID_LEN].to_string();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let broker = Arc::new(Self {
            id: id.clone(),
            config: options.config,
            counter: AtomicU64::new(0),
            clients: DashMap::new(),
            brokers: DashMap::new(),
            connected_clients: AtomicUsize::new(0),
            bus: options
                .bus
                .unwrap_or_else(|| Arc::new(InProcessBus::new())),
            persistence: options
                .persistence
                .unwrap_or_else(|| Arc::new(MemoryPersistence::new())),
            authenticator: options
                .authenticator
                .unwrap_or_else(|| Arc::new(AllowAll)),
            authorizer: options.authorizer.unwrap_or_else(|| Arc::new(AllowAll)),
            published: options
                .published
                .unwrap_or_else(|| Arc::new(NoopPublished)),
            events,
            metrics: BrokerMetrics::new(),
            tasks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });

        info!("broker {} constructed", id);
        Ok(broker)
    }

    /// Construct and start in one step.
    pub async fn launch(options: BrokerOptions) -> Result<Arc<Self>> {
        let broker = Self::new(options)?;
        broker.start().await?;
        Ok(broker)
    }

    /// This broker's cluster-unique id.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn metrics(&self) -> &BrokerMetrics {
        &self.metrics
    }

    /// The authenticator gating CONNECT; invoked by the protocol layer.
    pub fn authenticator(&self) -> &Arc<dyn Authenticator> {
        &self.authenticator
    }

    /// The authorizer gating publishes, subscribes and forwards; invoked
    /// by the protocol layer.
    pub fn authorizer(&self) -> &Arc<dyn Authorizer> {
        &self.authorizer
    }

    pub(crate) fn published_hook(&self) -> &Arc<dyn PublishedHook> {
        &self.published
    }

    /// Subscribe to broker events. Each call returns an independent
    /// receiver positioned at the next event.
    pub fn events(&self) -> broadcast::Receiver<BrokerEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit_event(&self, event: BrokerEvent) {
        // send only fails when no receiver is subscribed.
        let _ = self.events.send(event);
    }

    /// Number of currently registered sessions.
    pub fn connected_clients(&self) -> usize {
        self.connected_clients.load(Ordering::Acquire)
    }

    /// Ids of brokers with a recorded heartbeat, this broker's own
    /// heartbeats included.
    pub fn known_brokers(&self) -> HashSet<String> {
        self.brokers.iter().map(|entry| entry.key().clone()).collect()
    }

    /// When the given peer's last heartbeat was observed.
    pub fn peer_last_seen(&self, broker_id: &str) -> Option<Instant> {
        self.brokers.get(broker_id).map(|entry| *entry.value())
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn record_peer(&self, broker_id: String) {
        self.brokers.insert(broker_id, Instant::now());
        self.metrics.record_heartbeat_seen();
    }

    pub(crate) fn next_counter(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn keep_task(&self, task: JoinHandle<()>) {
        self.tasks.lock().push(task);
    }

    /// Install a session under its client id.
    ///
    /// Called by the protocol layer after CONNECT + authenticate. Any
    /// prior session with the same id is closed before the new one is
    /// installed; close errors are logged and dropped since the outgoing
    /// session is already doomed. Registration also announces the client
    /// on `$SYS/<brokerId>/new/clients` so peer brokers release their
    /// stale copy.
    pub async fn register_client(&self, session: Arc<dyn ClientSession>) -> Result<()> {
        if self.is_closed() {
            return Err(VeloxmqError::Closed);
        }
        let client_id = session.id().to_string();

        let previous = self
            .clients
            .get(&client_id)
            .map(|entry| Arc::clone(entry.value()));
        if let Some(previous) = previous {
            debug!("closing previous session for client {}", client_id);
            self.metrics.record_takeover();
            if let Err(err) = previous.close().await {
                warn!(
                    "error closing superseded session for {}: {}",
                    client_id, err
                );
            }
        }

        let replaced = self.clients.insert(client_id.clone(), Arc::clone(&session));
        if replaced.is_none() {
            self.connected_clients.fetch_add(1, Ordering::AcqRel);
        }
        self.emit_event(BrokerEvent::ClientConnected {
            client_id: client_id.clone(),
        });
        info!("client {} connected to broker {}", client_id, self.id);

        let announce = PublishMessage::new(
            format!("$SYS/{}/new/clients", self.id),
            Bytes::from(client_id.into_bytes()),
        );
        self.publish(announce, None).await?;
        Ok(())
    }

    /// Remove a session from the registry.
    ///
    /// Idempotent, and a no-op when the registry already holds a
    /// replacement session for the same id (the doomed half of a
    /// takeover must not evict its successor).
    pub async fn unregister_client(&self, session: &Arc<dyn ClientSession>) -> Result<()> {
        let client_id = session.id().to_string();
        let removed = self
            .clients
            .remove_if(&client_id, |_, current| Arc::ptr_eq(current, session));
        if removed.is_some() {
            self.connected_clients.fetch_sub(1, Ordering::AcqRel);
            self.emit_event(BrokerEvent::ClientDisconnected {
                client_id: client_id.clone(),
            });
            info!("client {} disconnected from broker {}", client_id, self.id);
        }
        Ok(())
    }

    /// Shut the broker down: stop both presence timers, then close every
    /// registered session in parallel. Idempotent; afterwards the broker
    /// is terminal and `publish` / `register_client` return
    /// [`VeloxmqError::Closed`].
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }

        let sessions: Vec<Arc<dyn ClientSession>> = self
            .clients
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.clients.clear();

        let closes = sessions.iter().map(|session| session.close());
        let results = futures::future::join_all(closes).await;
        for (session, result) in sessions.iter().zip(results) {
            if let Err(err) = result {
                warn!(
                    "error closing session {} during shutdown: {}",
                    session.id(),
                    err
                );
            }
        }
        self.connected_clients.store(0, Ordering::Release);

        info!("broker {} closed", self.id);
        Ok(())
    }
}
