use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

pub const MANUFACTURER: &str = "hassprint";
pub const MODEL: &str = "HomeAssistant Discovery for OctoPrint";

/// Device block shared by every discovery document of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cns: Vec<(String, String)>,
    pub name: String,
    pub mf: String,
    pub mdl: String,
    pub sw: String,
}

impl DeviceDescriptor {
    pub fn build(node_id: &str, node_name: &str) -> Self {
        Self::with_host(node_id, node_name, mac_address(), env!("CARGO_PKG_VERSION"))
    }

    pub fn with_host(node_id: &str, node_name: &str, mac: Option<String>, sw_version: &str) -> Self {
        Self {
            ids: vec![node_id.to_string()],
            cns: mac.map(|m| vec![("mac".to_string(), m)]).unwrap_or_default(),
            name: node_name.to_string(),
            mf: MANUFACTURER.to_string(),
            mdl: MODEL.to_string(),
            sw: sw_version.to_string(),
        }
    }
}

/// First non-loopback interface with a non-zero hardware address, in
/// interface-name order. Interfaces backed by a device (`<if>/device`) win
/// over virtual ones such as bridges and docker links.
pub fn mac_address() -> Option<String> {
    mac_address_in(Path::new("/sys/class/net"))
}

fn mac_address_in(root: &Path) -> Option<String> {
    let mut names: Vec<String> = fs::read_dir(root)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n != "lo")
        .collect();
    names.sort();
    let (physical, others): (Vec<String>, Vec<String>) =
        names.into_iter().partition(|name| root.join(name).join("device").exists());
    physical.into_iter().chain(others).find_map(|name| {
        let raw = fs::read_to_string(root.join(&name).join("address")).ok()?;
        normalize_mac(raw.trim())
    })
}

fn normalize_mac(raw: &str) -> Option<String> {
    let octets: Vec<&str> = raw.split(':').collect();
    if octets.len() != 6 || !octets.iter().all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit())) {
        return None;
    }
    if octets.iter().all(|o| *o == "00") {
        return None;
    }
    Some(raw.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_abbreviated_fields() {
        let d = DeviceDescriptor::with_host("ABC123", "Voron", Some("b8:27:eb:00:11:22".into()), "1.2.0");
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["ids"], serde_json::json!(["ABC123"]));
        assert_eq!(v["cns"], serde_json::json!([["mac", "b8:27:eb:00:11:22"]]));
        assert_eq!(v["name"], "Voron");
        assert_eq!(v["sw"], "1.2.0");
        assert_eq!(v["mf"], MANUFACTURER);
    }

    #[test]
    fn connections_omitted_without_mac() {
        let d = DeviceDescriptor::with_host("ABC123", "Voron", None, "1.2.0");
        let v = serde_json::to_value(&d).unwrap();
        assert!(v.get("cns").is_none());
    }

    fn fake_interface(root: &Path, name: &str, mac: &str, physical: bool) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("address"), format!("{mac}\n")).unwrap();
        if physical {
            fs::create_dir_all(dir.join("device")).unwrap();
        }
    }

    #[test]
    fn physical_interfaces_win_over_virtual_ones() {
        let root = std::env::temp_dir().join(format!("hassprint-net-{}", uuid::Uuid::new_v4()));
        fake_interface(&root, "lo", "00:00:00:00:00:00", false);
        fake_interface(&root, "br-1a2b", "02:42:ac:11:00:01", false);
        fake_interface(&root, "docker0", "02:42:ac:11:00:02", false);
        fake_interface(&root, "eth0", "B8:27:EB:00:11:22", true);
        assert_eq!(mac_address_in(&root).as_deref(), Some("b8:27:eb:00:11:22"));

        // only virtual links left: still better than no connection entry
        fs::remove_dir_all(root.join("eth0")).unwrap();
        assert_eq!(mac_address_in(&root).as_deref(), Some("02:42:ac:11:00:01"));
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn mac_validation() {
        assert_eq!(normalize_mac("B8:27:EB:00:11:22").as_deref(), Some("b8:27:eb:00:11:22"));
        assert_eq!(normalize_mac("00:00:00:00:00:00"), None);
        assert_eq!(normalize_mac("garbage"), None);
    }
}
