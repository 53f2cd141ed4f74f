//! Cluster presence: heartbeats, peer liveness and will recovery.
//!
//! Presence rides on normal topic routing. Each broker publishes its id
//! on `$SYS/<id>/heartbeat` and subscribes itself to `$SYS/+/heartbeat`
//! and `$SYS/+/new/clients`, so a bus implementation that spans
//! processes transparently turns a set of brokers into a cluster.

use super::Broker;
use crate::bus::BusSubscriber;
use crate::packet::PublishMessage;
use crate::Result;
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// A peer with no heartbeat for this many intervals is considered dead.
const DEAD_AFTER_INTERVALS: u32 = 3;

/// Will sweep period, as a multiple of the heartbeat interval.
const SWEEP_INTERVAL_FACTOR: u32 = 4;

/// Batch size for draining the will stream.
const WILL_BATCH: usize = 64;

impl Broker {
    /// Register the `$SYS` self-subscriptions and spawn the heartbeat
    /// and will-sweep loops.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.subscribe_heartbeats().await?;
        self.subscribe_new_clients().await?;

        let heartbeat_broker = Arc::clone(self);
        self.keep_task(tokio::spawn(async move {
            heartbeat_broker.heartbeat_loop().await;
        }));

        let sweep_broker = Arc::clone(self);
        self.keep_task(tokio::spawn(async move {
            sweep_broker.will_sweep_loop().await;
        }));

        info!(
            "broker {} started (heartbeat every {:?})",
            self.id(),
            self.config().heartbeat_interval()
        );
        Ok(())
    }

    /// Record every observed heartbeat, this broker's own included.
    async fn subscribe_heartbeats(self: &Arc<Self>) -> Result<()> {
        // Weak reference: the bus outliving the broker must not keep it
        // alive through its own subscriber.
        let broker = Arc::downgrade(self);
        let subscriber: BusSubscriber = Arc::new(move |packet| {
            let broker = broker.clone();
            Box::pin(async move {
                if let Some(broker) = broker.upgrade() {
                    let peer = String::from_utf8_lossy(&packet.payload).into_owned();
                    broker.record_peer(peer);
                }
                Ok(())
            })
        });
        self.bus.subscribe("$SYS/+/heartbeat", subscriber).await?;
        Ok(())
    }

    /// Enforce the single-session-per-client invariant across brokers:
    /// when a peer announces a client this broker also holds, the local
    /// copy is stale and gets closed.
    async fn subscribe_new_clients(self: &Arc<Self>) -> Result<()> {
        let broker = Arc::downgrade(self);
        let subscriber: BusSubscriber = Arc::new(move |packet| {
            let broker = broker.clone();
            Box::pin(async move {
                let Some(broker) = broker.upgrade() else {
                    return Ok(());
                };
                let origin = packet.topic.split('/').nth(1).unwrap_or_default();
                if origin == broker.id() {
                    return Ok(());
                }
                let client_id = String::from_utf8_lossy(&packet.payload).into_owned();
                let session = broker.clients.get(&client_id).map(|e| Arc::clone(e.value()));
                if let Some(session) = session {
                    debug!(
                        "client {} reconnected via broker {}, closing local session",
                        client_id, origin
                    );
                    broker.metrics().record_takeover();
                    if let Err(err) = session.close().await {
                        warn!("error closing taken-over session {}: {}", client_id, err);
                    }
                    broker.unregister_client(&session).await?;
                }
                Ok(())
            })
        });
        self.bus.subscribe("$SYS/+/new/clients", subscriber).await?;
        Ok(())
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut ticker = interval(self.config().heartbeat_interval());
        // Skip the immediate tick; the first beat goes out one full
        // interval after start.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let beat = PublishMessage::new(
                format!("$SYS/{}/heartbeat", self.id()),
                Bytes::copy_from_slice(self.id().as_bytes()),
            );
            if let Err(err) = self.publish(beat, None).await {
                warn!("heartbeat publish failed: {}", err);
            }
        }
    }

    async fn will_sweep_loop(self: Arc<Self>) {
        let period = self.config().heartbeat_interval() * SWEEP_INTERVAL_FACTOR;
        let mut ticker = interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(err) = self.sweep_wills().await {
                warn!("will sweep failed: {}", err);
            }
        }
    }

    /// One will-recovery pass: drop peers that stopped heartbeating,
    /// then republish and delete wills owned by brokers no longer alive.
    ///
    /// Concurrent sweeps on several brokers need no coordination:
    /// `del_will` is idempotent and a duplicate will publish is
    /// observable but harmless.
    async fn sweep_wills(&self) -> Result<()> {
        let dead_after = self.dead_after();
        self.brokers
            .retain(|_, last_seen| last_seen.elapsed() <= dead_after);

        let live: HashSet<String> = self.known_brokers();
        let mut stream = self.persistence.will_stream(live).await?;

        let mut batch = Vec::with_capacity(WILL_BATCH);
        while stream.recv_many(&mut batch, WILL_BATCH).await > 0 {
            for will in batch.drain(..) {
                // The owner may have resumed heartbeating mid-stream.
                let owner_alive = self
                    .peer_last_seen(&will.broker_id)
                    .is_some_and(|seen| seen.elapsed() <= dead_after);
                if owner_alive {
                    continue;
                }

                info!(
                    "recovering will of client {} (broker {} gone)",
                    will.client_id, will.broker_id
                );
                match self.publish(will.message.clone(), None).await {
                    Ok(_) => {
                        self.persistence.del_will(&will.client_id).await?;
                        self.metrics().record_will_recovered();
                    }
                    Err(err) => {
                        // The will stays persisted; the next sweep
                        // retries it.
                        warn!("failed to republish will of {}: {}", will.client_id, err);
                    }
                }
            }
        }
        Ok(())
    }

    fn dead_after(&self) -> Duration {
        self.config().heartbeat_interval() * DEAD_AFTER_INTERVALS
    }
}
