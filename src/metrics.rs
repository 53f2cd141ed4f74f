//! Dispatcher counters.
//!
//! Lock-free atomic counters updated on the hot path with relaxed
//! ordering; read out as a consistent-enough snapshot for logs and
//! health endpoints hosted outside this crate.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Broker-wide metrics registry.
#[derive(Debug, Default)]
pub struct BrokerMetrics {
    publishes_received: AtomicU64,
    packets_emitted: AtomicU64,
    retained_stored: AtomicU64,
    offline_enqueues: AtomicU64,
    heartbeats_seen: AtomicU64,
    wills_recovered: AtomicU64,
    takeovers: AtomicU64,
}

impl BrokerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_publish_received(&self) {
        self.publishes_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_packet_emitted(&self) {
        self.packets_emitted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_retained_stored(&self) {
        self.retained_stored.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_offline_enqueues(&self, n: u64) {
        self.offline_enqueues.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_heartbeat_seen(&self) {
        self.heartbeats_seen.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_will_recovered(&self) {
        self.wills_recovered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_takeover(&self) {
        self.takeovers.fetch_add(1, Ordering::Relaxed);
    }

    /// Capture the current counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            publishes_received: self.publishes_received.load(Ordering::Relaxed),
            packets_emitted: self.packets_emitted.load(Ordering::Relaxed),
            retained_stored: self.retained_stored.load(Ordering::Relaxed),
            offline_enqueues: self.offline_enqueues.load(Ordering::Relaxed),
            heartbeats_seen: self.heartbeats_seen.load(Ordering::Relaxed),
            wills_recovered: self.wills_recovered.load(Ordering::Relaxed),
            takeovers: self.takeovers.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the broker counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub publishes_received: u64,
    pub packets_emitted: u64,
    pub retained_stored: u64,
    pub offline_enqueues: u64,
    pub heartbeats_seen: u64,
    pub wills_recovered: u64,
    pub takeovers: u64,
}
