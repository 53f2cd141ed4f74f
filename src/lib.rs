//! # VeloxMQ Core Library
//!
//! VeloxMQ is an embeddable MQTT broker dispatcher written in Rust. This
//! crate provides the publish pipeline, client registry and cluster
//! presence machinery of a broker, behind pluggable persistence and
//! message-bus contracts.
//!
//! ## Architecture Overview
//!
//! The crate is organized around a small set of components:
//!
//! - [`broker`] - the dispatcher: publish pipeline, client registry,
//!   cluster heartbeat and will recovery
//! - [`bus`] - the topic-matching message bus contract and the default
//!   in-process implementation
//! - [`persistence`] - the durable-state contract (retained messages,
//!   subscriptions, offline queues, wills) and the in-memory default
//! - [`hooks`] - authentication / authorization / published hooks with
//!   permit-all defaults
//! - [`packet`] - publication value types and the broker envelope
//! - [`topic`] - MQTT topic-filter matching
//! - [`config`] - broker options, defaults and environment loading
//!
//! The MQTT wire codec, the per-connection protocol state machine and
//! listener setup are external collaborators: the dispatcher consumes
//! decoded publications and hands packets back through the bus and the
//! session trait.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use veloxmq::{Broker, BrokerConfig, BrokerOptions, PublishMessage};
//!
//! #[tokio::main]
//! async fn main() -> veloxmq::Result<()> {
//!     let broker = Broker::new(BrokerOptions::new(BrokerConfig::default()))?;
//!     broker.start().await?;
//!
//!     broker
//!         .publish(PublishMessage::new("sensors/kitchen", "21.5"), None)
//!         .await?;
//!
//!     broker.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Clustering
//!
//! Several brokers sharing one bus and one persistence form a cluster:
//! each broker announces itself on `$SYS/<id>/heartbeat`, enforces a
//! single session per client id via `$SYS/<id>/new/clients`, and sweeps
//! the persisted wills of peers that stopped heartbeating.

pub mod broker;
pub mod bus;
pub mod config;
pub mod hooks;
pub mod metrics;
pub mod packet;
pub mod persistence;
pub mod pool;
pub mod session;
pub mod topic;

pub use broker::{Broker, BrokerEvent};
pub use bus::{BusSubscriber, InProcessBus, MessageBus, SubscriberId};
pub use config::{BrokerConfig, BrokerOptions};
pub use hooks::{AllowAll, Authenticator, Authorizer, NoopPublished, PublishedHook};
pub use metrics::{BrokerMetrics, MetricsSnapshot};
pub use packet::{Packet, PublishMessage, QoS};
pub use persistence::{MemoryPersistence, Persistence, QueuedPacket, Subscription, Will};
pub use session::ClientSession;

use thiserror::Error;

/// VeloxMQ error types
///
/// This enum represents all error conditions surfaced by the dispatcher
/// and its default contract implementations.
///
/// # Error Categories
///
/// - **Persistence**: retained store, subscription lookup, queue and will
///   operations reported by the persistence backend
/// - **Bus**: subscription registration and fan-out failures
/// - **Protocol**: malformed publications handed in by the protocol layer
/// - **Configuration**: invalid option values or environment parsing
/// - **Session**: failures reported by a session's close path
#[derive(Debug, Error)]
pub enum VeloxmqError {
    /// Configuration validation and environment parsing errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed publications and topic filters
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Errors reported by the persistence backend
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Errors reported by the message bus or a subscriber callback
    #[error("Bus error: {0}")]
    Bus(String),

    /// Errors reported by a client session
    #[error("Session error: {0}")]
    Session(String),

    /// An authentication or authorization hook denied the operation
    #[error("Authorization denied: {0}")]
    Unauthorized(String),

    /// The application-level published hook failed
    #[error("Hook error: {0}")]
    Hook(String),

    /// The broker has been closed and no longer accepts operations
    #[error("Broker is closed")]
    Closed,
}

/// Result type alias for VeloxMQ operations
pub type Result<T> = std::result::Result<T, VeloxmqError>;
