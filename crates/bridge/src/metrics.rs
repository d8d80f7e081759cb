use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    pub mqtt_connected: IntGauge,
    pub mqtt_tx_total: IntCounter,
    pub control_rx_total: IntCounterVec, // label: control
    pub status_publish_total: IntCounter,
    pub discovery_publish_total: IntCounter,
    pub host_events_total: IntCounterVec, // label: event
}

impl Metrics {
    pub fn new() -> prometheus::Result<Arc<Self>> {
        let mqtt_connected = IntGauge::new("hassprint_mqtt_connected", "MQTT connection status (1 connected, 0 otherwise)")?;
        let mqtt_tx_total = IntCounter::new("hassprint_mqtt_messages_published_total", "Total MQTT messages published")?;
        let control_rx_total = IntCounterVec::new(
            Opts::new("hassprint_control_messages_total", "Inbound control messages by control topic"),
            &["control"],
        )?;
        let status_publish_total = IntCounter::new("hassprint_status_publishes_total", "Printer status snapshots published")?;
        let discovery_publish_total = IntCounter::new("hassprint_discovery_documents_total", "Discovery documents published")?;
        let host_events_total = IntCounterVec::new(
            Opts::new("hassprint_host_events_total", "Host lifecycle events handled"),
            &["event"],
        )?;

        let registry = Registry::new();
        registry.register(Box::new(mqtt_connected.clone()))?;
        registry.register(Box::new(mqtt_tx_total.clone()))?;
        registry.register(Box::new(control_rx_total.clone()))?;
        registry.register(Box::new(status_publish_total.clone()))?;
        registry.register(Box::new(discovery_publish_total.clone()))?;
        registry.register(Box::new(host_events_total.clone()))?;

        Ok(Arc::new(Self {
            registry,
            mqtt_connected,
            mqtt_tx_total,
            control_rx_total,
            status_publish_total,
            discovery_publish_total,
            host_events_total,
        }))
    }

    /// Prometheus text exposition of every registered metric.
    pub fn render(&self) -> prometheus::Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buf)?;
        Ok((encoder.format_type().to_string(), buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_registered_metrics() {
        let metrics = Metrics::new().unwrap();
        metrics.control_rx_total.with_label_values(&["stop"]).inc();
        metrics.mqtt_connected.set(1);
        let (content_type, body) = metrics.render().unwrap();
        let text = String::from_utf8(body).unwrap();
        assert!(content_type.starts_with("text/plain"));
        assert!(text.contains("hassprint_control_messages_total{control=\"stop\"} 1"));
        assert!(text.contains("hassprint_mqtt_connected 1"));
    }

    #[test]
    fn instances_do_not_collide() {
        assert!(Metrics::new().is_ok());
        assert!(Metrics::new().is_ok());
    }
}
