//! Publishes host updates on the event, progress and temperature topics the
//! discovery documents point at.

use std::sync::Arc;

use hassprint_core::{PublishOptions, TopicTemplate};
use hassprint_octoprint::HostUpdate;
use serde_json::{json, Map, Value};

use crate::context::Context;

const PROGRESS_SUFFIX: &str = "printing";

#[derive(Clone)]
pub struct HostMirror {
    ctx: Arc<Context>,
}

/// `{"_event": name, ...payload}`. Payload fields never override `_event`.
pub fn event_payload(name: &str, payload: &Value) -> Value {
    let mut out = Map::new();
    if let Value::Object(fields) = payload {
        out.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    out.insert("_event".to_string(), Value::String(name.to_string()));
    Value::Object(out)
}

impl HostMirror {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    pub async fn publish(&self, update: &HostUpdate) -> bool {
        let topics = self.ctx.settings().await.topics;
        let (topic, payload) = match update {
            HostUpdate::Event { name, payload } => {
                (topics.full(TopicTemplate::Event, name), event_payload(name, payload))
            }
            HostUpdate::Progress { .. } => (
                topics.full(TopicTemplate::Progress, PROGRESS_SUFFIX),
                update.progress_payload().unwrap_or(Value::Null),
            ),
            HostUpdate::Temperature { sensor, actual, target } => (
                topics.full(TopicTemplate::Temperature, sensor),
                json!({ "actual": actual, "target": target }),
            ),
        };
        let opts = PublishOptions { retain: true, queue_if_disconnected: false };
        self.ctx.publish_json(&topic, &payload, opts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_name_wins_over_payload() {
        let v = event_payload("PrintStarted", &json!({"name": "a.gcode", "_event": "x"}));
        assert_eq!(v, json!({"name": "a.gcode", "_event": "PrintStarted"}));
        assert_eq!(event_payload("Connected", &Value::Null), json!({"_event": "Connected"}));
    }
}
