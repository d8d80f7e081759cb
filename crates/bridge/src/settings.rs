use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use hassprint_core::identity::DEFAULT_DISCOVERY_TOPIC;
use hassprint_core::{NodeIdentity, TopicResolver, TopicTemplate};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

pub const DEFAULT_NODE_NAME: &str = "OctoPrint";
const IDENTITY_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("identity file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("identity file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Settings the engine reads on every registration and publish.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeSettings {
    pub identity: NodeIdentity,
    pub node_name: String,
    pub topics: TopicResolver,
    /// Local command run for a shutdown request instead of asking the host.
    pub shutdown_command: Option<String>,
}

impl BridgeSettings {
    pub fn new(identity: NodeIdentity) -> Self {
        Self {
            identity,
            node_name: DEFAULT_NODE_NAME.to_string(),
            topics: TopicResolver::new(),
            shutdown_command: None,
        }
    }

    /// Whether moving to `next` invalidates every published discovery document.
    pub fn requires_reregistration(&self, next: &BridgeSettings) -> bool {
        self.identity.requires_reregistration(&next.identity)
            || self.node_name != next.node_name
            || self.topics != next.topics
    }
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub node_name: String,
    pub discovery_topic: Option<String>,
    pub state_path: PathBuf,
    pub shutdown_command: Option<String>,
    pub http_addr: SocketAddr,
    pub topics: TopicResolver,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            node_name: DEFAULT_NODE_NAME.to_string(),
            discovery_topic: None,
            state_path: PathBuf::from("./data/identity.json"),
            shutdown_command: None,
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8090)),
            topics: TopicResolver::new(),
        }
    }
}

fn topic_env_var(template: TopicTemplate) -> &'static str {
    match template {
        TopicTemplate::Base => "HASSPRINT_TOPIC_BASE",
        TopicTemplate::Event => "HASSPRINT_TOPIC_EVENT",
        TopicTemplate::Progress => "HASSPRINT_TOPIC_PROGRESS",
        TopicTemplate::Temperature => "HASSPRINT_TOPIC_TEMPERATURE",
        TopicTemplate::LastWill => "HASSPRINT_TOPIC_LW",
        TopicTemplate::Hass => "HASSPRINT_TOPIC_HASS",
        TopicTemplate::Control => "HASSPRINT_TOPIC_CONTROL",
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl BridgeConfig {
    pub fn from_env() -> Self {
        let mut cfg = BridgeConfig::default();

        if let Some(v) = non_empty("HASSPRINT_NODE_NAME") {
            cfg.node_name = v;
        }
        cfg.discovery_topic = non_empty("HASSPRINT_DISCOVERY_TOPIC");
        if let Some(v) = non_empty("HASSPRINT_STATE_PATH") {
            cfg.state_path = PathBuf::from(v);
        }
        cfg.shutdown_command = non_empty("HASSPRINT_SHUTDOWN_COMMAND");
        if let Some(v) = non_empty("HASSPRINT_HTTP_ADDR") {
            match v.parse() {
                Ok(addr) => cfg.http_addr = addr,
                Err(_) => warn!(value = %v, "Ignoring invalid HASSPRINT_HTTP_ADDR"),
            }
        }
        for template in TopicTemplate::ALL {
            if let Ok(v) = env::var(topic_env_var(template)) {
                cfg.topics.set(template, v);
            }
        }

        cfg
    }

    /// Loads (or creates) the persisted identity and combines it with the
    /// environment-provided settings.
    pub fn load_settings(&self) -> Result<BridgeSettings, SettingsError> {
        let store = IdentityStore::new(&self.state_path);
        let mut identity = store.load_or_create(DEFAULT_DISCOVERY_TOPIC)?;
        if let Some(topic) = &self.discovery_topic {
            if *topic != identity.discovery_topic {
                info!(from = %identity.discovery_topic, to = %topic, "Discovery topic overridden from environment");
                identity.discovery_topic = topic.clone();
                store.save(&identity)?;
            }
        }
        Ok(BridgeSettings {
            identity,
            node_name: self.node_name.clone(),
            topics: self.topics.clone(),
            shutdown_command: self.shutdown_command.clone(),
        })
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredIdentity {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    unique_id: Option<String>,
    #[serde(default)]
    node_id: Option<String>,
    #[serde(default)]
    discovery_topic: Option<String>,
}

/// Versioned JSON file holding the node identity.
#[derive(Debug, Clone)]
pub struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_stored(&self) -> Result<Option<StoredIdentity>, SettingsError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// `Ok(None)` when the file does not exist yet.
    pub fn load(&self) -> Result<Option<NodeIdentity>, SettingsError> {
        Ok(self.read_stored()?.and_then(migrate))
    }

    pub fn save(&self, identity: &NodeIdentity) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let stored = StoredIdentity {
            version: IDENTITY_VERSION,
            unique_id: Some(identity.unique_id.clone()),
            node_id: Some(identity.node_id.clone()),
            discovery_topic: Some(identity.discovery_topic.clone()),
        };
        fs::write(&self.path, serde_json::to_vec_pretty(&stored)?)?;
        Ok(())
    }

    /// Returns the stored identity, generating and persisting one on first
    /// start. Identities written by older versions are upgraded in place.
    pub fn load_or_create(&self, default_discovery_topic: &str) -> Result<NodeIdentity, SettingsError> {
        let stored = self.read_stored()?;
        let version = stored.as_ref().map(|s| s.version);
        match stored.and_then(migrate) {
            Some(identity) => {
                if version != Some(IDENTITY_VERSION) {
                    info!(path = %self.path.display(), "Upgrading identity file");
                    self.save(&identity)?;
                }
                Ok(identity)
            }
            None => {
                let identity = NodeIdentity::generate(default_discovery_topic);
                info!(node_id = %identity.node_id, path = %self.path.display(), "Generated node identity");
                self.save(&identity)?;
                Ok(identity)
            }
        }
    }
}

fn migrate(stored: StoredIdentity) -> Option<NodeIdentity> {
    let unique_id = stored.unique_id.filter(|u| !u.is_empty())?;
    let node_id = match stored.node_id.filter(|n| !n.is_empty()) {
        Some(node_id) => node_id,
        None => NodeIdentity::short_node_id(&unique_id),
    };
    Some(NodeIdentity {
        unique_id,
        node_id,
        discovery_topic: stored
            .discovery_topic
            .unwrap_or_else(|| DEFAULT_DISCOVERY_TOPIC.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        env::temp_dir()
            .join(format!("hassprint-{}-{}", name, uuid::Uuid::new_v4().simple()))
            .join("identity.json")
    }

    #[test]
    fn first_start_generates_and_persists() {
        let path = temp_path("first");
        let store = IdentityStore::new(&path);
        let created = store.load_or_create("homeassistant").unwrap();
        assert!(path.exists());
        assert_eq!(store.load_or_create("ignored").unwrap(), created);
        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
    }

    #[test]
    fn unversioned_identity_gets_short_node_id() {
        let path = temp_path("migrate");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{"unique_id":"3fa85f64-5717-4562-b3fc-2c963f66afa6"}"#).unwrap();

        let identity = IdentityStore::new(&path).load_or_create("homeassistant").unwrap();
        assert_eq!(identity.node_id, "3FA85F");
        assert_eq!(identity.discovery_topic, "homeassistant");

        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        assert_eq!(raw["node_id"], "3FA85F");
    }

    #[test]
    fn missing_file_loads_as_none() {
        assert!(IdentityStore::new(temp_path("missing")).load().unwrap().is_none());
    }

    #[test]
    fn node_name_change_requires_reregistration() {
        let base = BridgeSettings::new(NodeIdentity::generate("homeassistant"));
        let mut renamed = base.clone();
        assert!(!base.requires_reregistration(&renamed));
        renamed.node_name = "Voron".into();
        assert!(base.requires_reregistration(&renamed));
        let mut command = base.clone();
        command.shutdown_command = Some("poweroff".into());
        assert!(!base.requires_reregistration(&command));
    }
}
