use std::sync::Arc;

use hassprint_core::{PrinterControl, PublishOptions, Publisher, Subscriber, TimestampedPublisher};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::metrics::Metrics;
use crate::settings::BridgeSettings;

/// Optional MQTT capabilities. A missing capability turns the work that
/// needs it into a logged no-op.
#[derive(Clone, Default)]
pub struct Transport {
    pub publisher: Option<Arc<dyn Publisher>>,
    pub timestamped: Option<Arc<dyn TimestampedPublisher>>,
    pub subscriber: Option<Arc<dyn Subscriber>>,
}

impl Transport {
    /// A transport offering every capability.
    pub fn full<T>(service: Arc<T>) -> Self
    where
        T: Publisher + TimestampedPublisher + Subscriber + 'static,
    {
        Self {
            publisher: Some(service.clone()),
            timestamped: Some(service.clone()),
            subscriber: Some(service),
        }
    }
}

/// Dependencies shared by every engine component.
pub struct Context {
    pub transport: Transport,
    pub printer: Arc<dyn PrinterControl>,
    pub settings: RwLock<BridgeSettings>,
    pub metrics: Arc<Metrics>,
}

impl Context {
    pub fn new(
        transport: Transport,
        printer: Arc<dyn PrinterControl>,
        settings: BridgeSettings,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        Arc::new(Self { transport, printer, settings: RwLock::new(settings), metrics })
    }

    pub async fn settings(&self) -> BridgeSettings {
        self.settings.read().await.clone()
    }

    /// Publishes through the plain publisher. Returns whether the message was
    /// handed to the transport.
    pub async fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>, opts: PublishOptions) -> bool {
        let Some(publisher) = &self.transport.publisher else {
            debug!(topic, "No MQTT publisher; skipping");
            return false;
        };
        match publisher.publish(topic, payload.into(), opts).await {
            Ok(()) => {
                self.metrics.mqtt_tx_total.inc();
                true
            }
            Err(err) => {
                warn!(topic, %err, "MQTT publish failed");
                false
            }
        }
    }

    pub async fn publish_json(&self, topic: &str, payload: &Value, opts: PublishOptions) -> bool {
        match serde_json::to_vec(payload) {
            Ok(bytes) => self.publish(topic, bytes, opts).await,
            Err(err) => {
                warn!(topic, ?err, "Failed to encode payload");
                false
            }
        }
    }
}
