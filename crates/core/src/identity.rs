use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_DISCOVERY_TOPIC: &str = "homeassistant";

/// Root of all topic addressing for one printer host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub unique_id: String,
    pub node_id: String,
    pub discovery_topic: String,
}

impl NodeIdentity {
    pub fn generate(discovery_topic: impl Into<String>) -> Self {
        let uuid = Uuid::new_v4();
        Self {
            unique_id: uuid.to_string(),
            node_id: uuid.simple().to_string(),
            discovery_topic: discovery_topic.into(),
        }
    }

    /// Short node id used by identities that predate `node_id`.
    pub fn short_node_id(unique_id: &str) -> String {
        unique_id.chars().take(6).collect::<String>().to_uppercase()
    }

    /// Whether switching from `self` to `other` requires re-registering
    /// every discovery document.
    pub fn requires_reregistration(&self, other: &NodeIdentity) -> bool {
        self != other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_node_id_is_simple_hex() {
        let id = NodeIdentity::generate(DEFAULT_DISCOVERY_TOPIC);
        assert_eq!(id.node_id.len(), 32);
        assert!(id.node_id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id.unique_id.replace('-', ""), id.node_id);
        assert_eq!(id.discovery_topic, "homeassistant");
    }

    #[test]
    fn short_node_id_uppercases_prefix() {
        assert_eq!(NodeIdentity::short_node_id("3fa85f64-5717"), "3FA85F");
        assert_eq!(NodeIdentity::short_node_id("ab"), "AB");
    }

    #[test]
    fn any_field_change_requires_reregistration() {
        let a = NodeIdentity::generate("homeassistant");
        let mut b = a.clone();
        assert!(!a.requires_reregistration(&b));
        b.discovery_topic = "hass".into();
        assert!(a.requires_reregistration(&b));
    }
}
