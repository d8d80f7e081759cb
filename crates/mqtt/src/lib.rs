pub mod config;
pub mod client;

pub use config::{Availability, MqttConfig};
pub use client::{MqttEvent, MqttService};
