//! Home Assistant MQTT discovery documents for a printer node.
//!
//! Every document lands on `{discovery_topic}/{component}/{node_id}_{SUFFIX}/config`
//! and uses the abbreviated key set (`stat_t`, `val_tpl`, ...). State topics
//! are relative to the `~` base so a base-topic change only touches one field.

use serde::Serialize;

use crate::commands::ControlKind;
use crate::device::DeviceDescriptor;
use crate::topics::{TopicResolver, TopicTemplate};

pub const AVAILABLE: &str = "connected";
pub const NOT_AVAILABLE: &str = "disconnected";

const ON: &str = "True";
const OFF: &str = "False";
const CELSIUS: &str = "°C";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    BinarySensor,
    Sensor,
    Switch,
}

impl Component {
    pub fn as_str(self) -> &'static str {
        match self {
            Component::BinarySensor => "binary_sensor",
            Component::Sensor => "sensor",
            Component::Switch => "switch",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryPayload {
    pub name: String,
    pub uniq_id: String,
    #[serde(rename = "~")]
    pub base: String,
    pub avty_t: String,
    pub pl_avail: String,
    pub pl_not_avail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmd_t: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stat_t: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_attr_t: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_attr_tpl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub val_tpl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pl_on: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pl_off: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_meas: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dev_cla: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ic: Option<String>,
    pub device: DeviceDescriptor,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryDocument {
    pub topic: String,
    pub payload: DiscoveryPayload,
}

impl DiscoveryDocument {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.payload)
    }
}

/// Everything a catalog needs to render documents for one node.
#[derive(Debug, Clone)]
pub struct CatalogContext<'a> {
    pub node_id: &'a str,
    pub node_name: &'a str,
    pub discovery_topic: &'a str,
    pub topics: &'a TopicResolver,
    pub device: &'a DeviceDescriptor,
    pub tool_count: usize,
}

struct Entity {
    component: Component,
    suffix: String,
    payload: DiscoveryPayload,
}

impl Entity {
    fn new(ctx: &CatalogContext<'_>, component: Component, suffix: impl Into<String>, name: &str) -> Self {
        let suffix = suffix.into();
        let payload = DiscoveryPayload {
            name: format!("{} {}", ctx.node_name, name),
            uniq_id: format!("{}_{}", ctx.node_id, suffix),
            base: ctx.topics.base(),
            avty_t: ctx.topics.relative(TopicTemplate::LastWill, ""),
            pl_avail: AVAILABLE.to_string(),
            pl_not_avail: NOT_AVAILABLE.to_string(),
            cmd_t: None,
            stat_t: None,
            json_attr_t: None,
            json_attr_tpl: None,
            val_tpl: None,
            pl_on: None,
            pl_off: None,
            unit_of_meas: None,
            dev_cla: None,
            ic: None,
            device: ctx.device.clone(),
        };
        Self { component, suffix, payload }
    }

    fn state(mut self, topic: String) -> Self {
        self.payload.stat_t = Some(topic);
        self
    }

    fn command(mut self, topic: String) -> Self {
        self.payload.cmd_t = Some(topic);
        self
    }

    fn attributes(mut self, topic: String, template: Option<&str>) -> Self {
        self.payload.json_attr_t = Some(topic);
        self.payload.json_attr_tpl = template.map(str::to_string);
        self
    }

    fn value(mut self, template: &str) -> Self {
        self.payload.val_tpl = Some(template.to_string());
        self
    }

    fn on_off(mut self, on: &str, off: &str) -> Self {
        self.payload.pl_on = Some(on.to_string());
        self.payload.pl_off = Some(off.to_string());
        self
    }

    fn unit(mut self, unit: &str) -> Self {
        self.payload.unit_of_meas = Some(unit.to_string());
        self
    }

    fn class(mut self, class: &str) -> Self {
        self.payload.dev_cla = Some(class.to_string());
        self
    }

    fn icon(mut self, icon: &str) -> Self {
        self.payload.ic = Some(icon.to_string());
        self
    }

    // Only offered while a print is running.
    fn while_printing(mut self, ctx: &CatalogContext<'_>) -> Self {
        self.payload.avty_t = ctx.topics.relative(TopicTemplate::Hass, "is_printing");
        self.payload.pl_avail = ON.to_string();
        self.payload.pl_not_avail = OFF.to_string();
        self
    }

    fn into_document(self, ctx: &CatalogContext<'_>) -> DiscoveryDocument {
        DiscoveryDocument {
            topic: format!(
                "{}/{}/{}_{}/config",
                ctx.discovery_topic,
                self.component.as_str(),
                ctx.node_id,
                self.suffix
            ),
            payload: self.payload,
        }
    }
}

/// Binary sensors and sensors describing printer state.
pub fn sensor_catalog(ctx: &CatalogContext<'_>) -> Vec<DiscoveryDocument> {
    let t = ctx.topics;
    let connected = t.relative(TopicTemplate::Event, "Connected");
    let printing = t.relative(TopicTemplate::Hass, "printing");
    let print_progress = t.relative(TopicTemplate::Progress, "printing");
    let slice_progress = t.relative(TopicTemplate::Progress, "slicing");

    let mut entities = vec![
        Entity::new(ctx, Component::BinarySensor, "CONNECTED", "Connected")
            .state(connected.clone())
            .attributes(connected, None)
            .on_off("Connected", "Disconnected")
            .value("{{value_json._event}}")
            .class("connectivity"),
        Entity::new(ctx, Component::BinarySensor, "PRINTING", "Printing")
            .state(printing.clone())
            .on_off(ON, OFF)
            .value("{{value_json.state.flags.printing}}"),
        Entity::new(ctx, Component::Sensor, "EVENT", "Last Event")
            .state(t.relative(TopicTemplate::Event, "+"))
            .value("{{value_json._event}}"),
        Entity::new(ctx, Component::Sensor, "PRINTING_S", "Print Status")
            .state(printing.clone())
            .attributes(printing.clone(), Some("{{value_json.state|tojson}}"))
            .value("{{value_json.state.text}}"),
        Entity::new(ctx, Component::Sensor, "PRINTING_P", "Print Progress")
            .state(print_progress.clone())
            .unit("%")
            .value("{{value_json.progress|float|default(0,true)}}"),
        Entity::new(ctx, Component::Sensor, "PRINTING_F", "Print File")
            .state(print_progress)
            .value("{{value_json.path}}")
            .icon("mdi:file"),
        Entity::new(ctx, Component::Sensor, "PRINTING_T", "Print Time")
            .state(printing.clone())
            .value("{{value_json.progress.printTimeFormatted}}")
            .icon("mdi:clock-start"),
        Entity::new(ctx, Component::Sensor, "PRINTING_E", "Print Time Left")
            .state(printing.clone())
            .value("{{value_json.progress.printTimeLeftFormatted}}")
            .icon("mdi:clock-end"),
        Entity::new(ctx, Component::Sensor, "PRINTING_ETA", "Print Estimated Time")
            .state(printing.clone())
            .attributes(printing.clone(), Some("{{value_json.job|tojson}}"))
            .value("{{value_json.job.estimatedPrintTimeFormatted}}"),
        Entity::new(ctx, Component::Sensor, "PRINTING_Z", "Current Z")
            .state(printing)
            .unit("mm")
            .value("{{value_json.currentZ|float}}")
            .icon("mdi:axis-z-arrow"),
        Entity::new(ctx, Component::Sensor, "SLICING_P", "Slicing Progress")
            .state(slice_progress.clone())
            .unit("%")
            .value("{{value_json.progress|float|default(0,true)}}"),
        Entity::new(ctx, Component::Sensor, "SLICING_F", "Slicing File")
            .state(slice_progress)
            .value("{{value_json.source_path}}")
            .icon("mdi:file"),
    ];

    for tool in 0..ctx.tool_count {
        let topic = t.relative(TopicTemplate::Temperature, &format!("tool{tool}"));
        entities.push(
            temperature(ctx, format!("TOOL{tool}"), &format!("Tool {tool} Temperature"), topic.clone())
                .value("{{value_json.actual|float}}")
                .icon("mdi:printer-3d-nozzle"),
        );
        entities.push(
            temperature(ctx, format!("TOOL_TARGET{tool}"), &format!("Tool {tool} Target"), topic)
                .value("{{value_json.target|float}}")
                .icon("mdi:printer-3d-nozzle"),
        );
    }

    let bed = t.relative(TopicTemplate::Temperature, "bed");
    entities.push(
        temperature(ctx, "BED", "Bed Temperature", bed.clone())
            .value("{{value_json.actual|float}}")
            .icon("mdi:radiator"),
    );
    entities.push(
        temperature(ctx, "BED_TARGET", "Bed Target", bed)
            .value("{{value_json.target|float}}")
            .icon("mdi:radiator"),
    );

    entities.into_iter().map(|e| e.into_document(ctx)).collect()
}

fn temperature(ctx: &CatalogContext<'_>, suffix: impl Into<String>, name: &str, topic: String) -> Entity {
    Entity::new(ctx, Component::Sensor, suffix, name)
        .state(topic)
        .unit(CELSIUS)
        .class("temperature")
}

/// Switches backed by control topics. `jog`, `home` and `commands` have no
/// switch representation and only exist as subscriptions.
pub fn control_catalog(ctx: &CatalogContext<'_>) -> Vec<DiscoveryDocument> {
    let t = ctx.topics;
    let control = |kind: ControlKind| t.relative(TopicTemplate::Control, kind.topic_suffix());

    vec![
        Entity::new(ctx, Component::Switch, "STOP", "Emergency Stop")
            .command(control(ControlKind::Stop))
            .state(control(ControlKind::Stop))
            .on_off(ON, OFF)
            .value("{{False}}")
            .icon("mdi:alert-octagon"),
        Entity::new(ctx, Component::Switch, "CANCEL", "Cancel Print")
            .command(control(ControlKind::Cancel))
            .state(control(ControlKind::Cancel))
            .while_printing(ctx)
            .on_off(ON, OFF)
            .value("{{False}}")
            .icon("mdi:cancel"),
        Entity::new(ctx, Component::Switch, "PAUSE", "Pause Print")
            .command(control(ControlKind::Pause))
            .state(t.relative(TopicTemplate::Hass, "is_paused"))
            .while_printing(ctx)
            .on_off(ON, OFF)
            .icon("mdi:pause"),
        Entity::new(ctx, Component::Switch, "SHUTDOWN", "Shutdown System")
            .command(control(ControlKind::Shutdown))
            .state(control(ControlKind::Shutdown))
            .on_off(ON, OFF)
            .value("{{False}}")
            .icon("mdi:power"),
    ]
    .into_iter()
    .map(|e| e.into_document(ctx))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> DeviceDescriptor {
        DeviceDescriptor::with_host("A1B2C3", "Prusa", Some("b8:27:eb:01:02:03".into()), "0.1.0")
    }

    fn ctx<'a>(topics: &'a TopicResolver, device: &'a DeviceDescriptor, tools: usize) -> CatalogContext<'a> {
        CatalogContext {
            node_id: "A1B2C3",
            node_name: "Prusa",
            discovery_topic: "homeassistant",
            topics,
            device,
            tool_count: tools,
        }
    }

    #[test]
    fn sensor_catalog_covers_every_tool() {
        let topics = TopicResolver::new();
        let device = device();
        let docs = sensor_catalog(&ctx(&topics, &device, 2));
        assert_eq!(docs.len(), 12 + 2 * 2 + 2);
        let ids: Vec<_> = docs.iter().map(|d| d.payload.uniq_id.as_str()).collect();
        for id in ["A1B2C3_TOOL0", "A1B2C3_TOOL_TARGET1", "A1B2C3_BED_TARGET", "A1B2C3_CONNECTED"] {
            assert!(ids.contains(&id), "missing {id}");
        }
    }

    #[test]
    fn document_topic_and_common_fields() {
        let topics = TopicResolver::new();
        let device = device();
        let docs = sensor_catalog(&ctx(&topics, &device, 1));
        let connected = &docs[0];
        assert_eq!(connected.topic, "homeassistant/binary_sensor/A1B2C3_CONNECTED/config");

        let v: serde_json::Value = serde_json::from_str(&connected.to_json().unwrap()).unwrap();
        assert_eq!(v["~"], "octoPrint/");
        assert_eq!(v["avty_t"], "~mqtt");
        assert_eq!(v["pl_avail"], "connected");
        assert_eq!(v["pl_not_avail"], "disconnected");
        assert_eq!(v["stat_t"], "~event/Connected");
        assert_eq!(v["dev_cla"], "connectivity");
        assert_eq!(v["name"], "Prusa Connected");
        assert_eq!(v["device"]["ids"][0], "A1B2C3");
        assert!(v.get("cmd_t").is_none());
    }

    #[test]
    fn temperature_sensors_use_tool_topics() {
        let topics = TopicResolver::new();
        let device = device();
        let docs = sensor_catalog(&ctx(&topics, &device, 1));
        let target = docs.iter().find(|d| d.payload.uniq_id == "A1B2C3_TOOL_TARGET0").unwrap();
        assert_eq!(target.payload.stat_t.as_deref(), Some("~temperature/tool0"));
        assert_eq!(target.payload.val_tpl.as_deref(), Some("{{value_json.target|float}}"));
        assert_eq!(target.payload.unit_of_meas.as_deref(), Some("°C"));
    }

    #[test]
    fn controls_gate_on_printing_flag() {
        let topics = TopicResolver::new();
        let device = device();
        let docs = control_catalog(&ctx(&topics, &device, 1));
        assert_eq!(docs.len(), 4);

        let pause = docs.iter().find(|d| d.payload.uniq_id == "A1B2C3_PAUSE").unwrap();
        assert_eq!(pause.topic, "homeassistant/switch/A1B2C3_PAUSE/config");
        assert_eq!(pause.payload.cmd_t.as_deref(), Some("~hassControl/pause"));
        assert_eq!(pause.payload.stat_t.as_deref(), Some("~hass/is_paused"));
        assert_eq!(pause.payload.avty_t, "~hass/is_printing");
        assert_eq!(pause.payload.pl_avail, "True");
        assert!(pause.payload.val_tpl.is_none());

        let stop = docs.iter().find(|d| d.payload.uniq_id == "A1B2C3_STOP").unwrap();
        assert_eq!(stop.payload.avty_t, "~mqtt");
    }

    #[test]
    fn rendering_is_deterministic() {
        let topics = TopicResolver::new();
        let device = device();
        let render = || {
            sensor_catalog(&ctx(&topics, &device, 3))
                .iter()
                .map(|d| (d.topic.clone(), d.to_json().unwrap()))
                .collect::<Vec<_>>()
        };
        assert_eq!(render(), render());
    }
}
