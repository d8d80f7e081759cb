use std::sync::Arc;

use hassprint_core::discovery::{control_catalog, sensor_catalog};
use hassprint_core::{CatalogContext, ControlKind, DeviceDescriptor, DiscoveryDocument, PublishOptions, TopicTemplate};
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::settings::BridgeSettings;

// Used when the host cannot report its printer profile.
const FALLBACK_TOOL_COUNT: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRoute {
    pub topic: String,
    pub kind: ControlKind,
}

/// Publishes the retained discovery documents for sensors and controls.
#[derive(Clone)]
pub struct DiscoveryRegistrar {
    ctx: Arc<Context>,
}

impl DiscoveryRegistrar {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Returns the number of documents handed to the transport.
    pub async fn register_sensors(&self) -> usize {
        if self.ctx.transport.publisher.is_none() {
            info!("MQTT publisher unavailable; skipping sensor registration");
            return 0;
        }
        let settings = self.ctx.settings().await;
        let tool_count = match self.ctx.printer.extruder_count().await {
            Ok(n) => n,
            Err(err) => {
                warn!(%err, "Could not read extruder count; assuming {}", FALLBACK_TOOL_COUNT);
                FALLBACK_TOOL_COUNT
            }
        };
        let device = DeviceDescriptor::build(&settings.identity.node_id, &settings.node_name);
        let documents = sensor_catalog(&catalog_context(&settings, &device, tool_count));
        self.publish_documents(documents).await
    }

    /// Publishes the switch documents. With `subscribe`, every control topic
    /// is subscribed and the resulting routes are returned; otherwise the
    /// returned list is empty.
    pub async fn register_controls(&self, subscribe: bool) -> Vec<ControlRoute> {
        if self.ctx.transport.publisher.is_none() {
            info!("MQTT publisher unavailable; skipping control registration");
        } else {
            let settings = self.ctx.settings().await;
            let device = DeviceDescriptor::build(&settings.identity.node_id, &settings.node_name);
            let documents = control_catalog(&catalog_context(&settings, &device, 0));
            self.publish_documents(documents).await;
        }

        if !subscribe {
            return Vec::new();
        }
        let Some(subscriber) = &self.ctx.transport.subscriber else {
            info!("MQTT subscriber unavailable; control topics not subscribed");
            return Vec::new();
        };

        let routes = control_routes(&self.ctx.settings().await);
        for route in &routes {
            match subscriber.subscribe(&route.topic).await {
                Ok(()) => debug!(topic = %route.topic, "Subscribed to control topic"),
                Err(err) => warn!(topic = %route.topic, %err, "Failed to subscribe to control topic"),
            }
        }
        routes
    }

    async fn publish_documents(&self, documents: Vec<DiscoveryDocument>) -> usize {
        let mut published = 0;
        for doc in documents {
            let json = match doc.to_json() {
                Ok(json) => json,
                Err(err) => {
                    warn!(topic = %doc.topic, ?err, "Failed to encode discovery document");
                    continue;
                }
            };
            if self.ctx.publish(&doc.topic, json, PublishOptions::queued()).await {
                self.ctx.metrics.discovery_publish_total.inc();
                published += 1;
            }
        }
        published
    }
}

fn catalog_context<'a>(
    settings: &'a BridgeSettings,
    device: &'a DeviceDescriptor,
    tool_count: usize,
) -> CatalogContext<'a> {
    CatalogContext {
        node_id: &settings.identity.node_id,
        node_name: &settings.node_name,
        discovery_topic: &settings.identity.discovery_topic,
        topics: &settings.topics,
        device,
        tool_count,
    }
}

pub fn control_routes(settings: &BridgeSettings) -> Vec<ControlRoute> {
    ControlKind::ALL
        .into_iter()
        .map(|kind| ControlRoute {
            topic: settings.topics.full(TopicTemplate::Control, kind.topic_suffix()),
            kind,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hassprint_core::NodeIdentity;

    #[test]
    fn routes_cover_every_control_topic() {
        let identity = NodeIdentity {
            unique_id: "u".into(),
            node_id: "N".into(),
            discovery_topic: "homeassistant".into(),
        };
        let routes = control_routes(&BridgeSettings::new(identity));
        let topics: Vec<_> = routes.iter().map(|r| r.topic.as_str()).collect();
        assert_eq!(
            topics,
            [
                "octoPrint/hassControl/stop",
                "octoPrint/hassControl/cancel",
                "octoPrint/hassControl/pause",
                "octoPrint/hassControl/shutdown",
                "octoPrint/hassControl/jog",
                "octoPrint/hassControl/home",
                "octoPrint/hassControl/commands",
            ]
        );
    }
}
