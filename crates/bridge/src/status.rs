use std::sync::Arc;

use hassprint_core::status::augment_snapshot;
use hassprint_core::{PublishOptions, TopicTemplate};
use serde_json::Value;
use tracing::{debug, warn};

use crate::context::Context;

pub const STATUS_SUFFIX: &str = "printing";

/// Publishes the augmented printer status snapshot on `hassTopic/printing`.
#[derive(Clone)]
pub struct StatusTranslator {
    ctx: Arc<Context>,
}

impl StatusTranslator {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Returns whether a snapshot was handed to the transport.
    pub async fn publish_status(&self) -> bool {
        let snapshot = match self.ctx.printer.get_current_data().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(%err, "Could not fetch printer status");
                return false;
            }
        };
        let Value::Object(mut data) = snapshot else {
            warn!("Printer status is not a JSON object; skipping");
            return false;
        };
        augment_snapshot(&mut data);

        let topic = self.ctx.settings().await.topics.full(TopicTemplate::Hass, STATUS_SUFFIX);
        let payload = Value::Object(data);
        let sent = match &self.ctx.transport.timestamped {
            Some(publisher) => match publisher
                .publish_with_timestamp(&topic, payload, PublishOptions::queued())
                .await
            {
                Ok(()) => {
                    self.ctx.metrics.mqtt_tx_total.inc();
                    true
                }
                Err(err) => {
                    warn!(%topic, %err, "Status publish failed");
                    false
                }
            },
            None => self.ctx.publish_json(&topic, &payload, PublishOptions::queued()).await,
        };
        if sent {
            debug!(%topic, "Published printer status");
            self.ctx.metrics.status_publish_total.inc();
        }
        sent
    }
}
