//! Capabilities the bridge expects from an MQTT transport.
//!
//! A transport may offer any subset; the bridge holds each one as an
//! `Option<Arc<dyn ...>>` and skips work whose capability is missing.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOptions {
    pub retain: bool,
    /// Hold the message until the broker connection is back instead of
    /// dropping it.
    pub queue_if_disconnected: bool,
}

impl PublishOptions {
    pub const fn queued() -> Self {
        Self { retain: true, queue_if_disconnected: true }
    }
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self::queued()
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("publish queue is full")]
    QueueFull,
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("client error: {0}")]
    Client(String),
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>, opts: PublishOptions) -> Result<(), TransportError>;
}

/// Publishing of JSON documents stamped with the transport's clock.
#[async_trait]
pub trait TimestampedPublisher: Send + Sync {
    async fn publish_with_timestamp(&self, topic: &str, payload: Value, opts: PublishOptions) -> Result<(), TransportError>;
}

#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;
}
