use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;

use crate::config::load_yaml_file;
use crate::models::NetworkHost;

/// Load already-resolved hosts from a YAML list
pub fn load_inventory(path: &Path) -> Result<Vec<NetworkHost>> {
    let hosts: Vec<NetworkHost> = load_yaml_file(path).context("Failed to load inventory")?;

    let mut seen = HashSet::new();
    for host in &hosts {
        if !is_valid_hostname(&host.name) {
            bail!("Invalid host name in inventory: {:?}", host.name);
        }
        if !is_valid_address(&host.host_name) {
            bail!("Invalid address for {}: {:?}", host.name, host.host_name);
        }
        if !seen.insert(host.name.as_str()) {
            bail!("Duplicate host in inventory: {}", host.name);
        }
    }

    tracing::debug!("Loaded {} hosts from {}", hosts.len(), path.display());
    Ok(hosts)
}

/// Pick hosts by name, keeping the requested order. No names selects every host.
pub fn select_hosts(hosts: Vec<NetworkHost>, names: &[String]) -> Result<Vec<NetworkHost>> {
    if names.is_empty() {
        return Ok(hosts);
    }

    names
        .iter()
        .map(|name| {
            hosts
                .iter()
                .find(|h| &h.name == name)
                .cloned()
                .with_context(|| format!("Host not found in inventory: {}", name))
        })
        .collect()
}

/// A connection address is an IP literal (v4 or v6) or a valid hostname
pub fn is_valid_address(address: &str) -> bool {
    address.parse::<IpAddr>().is_ok() || is_valid_hostname(address)
}

/// Validate a hostname.
/// Allows alphanumeric, hyphens, dots, and underscores. No path separators or shell metacharacters.
/// Host names end up in data and template paths, so this also keeps them inside the config tree.
pub fn is_valid_hostname(hostname: &str) -> bool {
    if hostname.is_empty() || hostname.len() > 253 || hostname.starts_with('.') {
        return false;
    }
    hostname.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_load_inventory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.yaml");
        fs::write(
            &path,
            "- name: r1\n  host_name: r1.example.net\n  platform: mx\n  type: router\n- name: sw1\n  host_name: 10.0.0.5\n",
        )
        .unwrap();

        let hosts = load_inventory(&path).unwrap();
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0].platform.as_deref(), Some("mx"));
        assert_eq!(hosts[0].device_type.as_deref(), Some("router"));
        assert_eq!(hosts[1].host_name, "10.0.0.5");
        assert_eq!(hosts[1].data, serde_yaml::Value::Null);
    }

    #[test]
    fn test_duplicate_hosts_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.yaml");
        fs::write(&path, "- {name: r1, host_name: a}\n- {name: r1, host_name: b}\n").unwrap();
        assert!(load_inventory(&path).is_err());
    }

    #[test]
    fn test_select_hosts() {
        let hosts = vec![NetworkHost::new("r1", "a"), NetworkHost::new("r2", "b")];
        let picked = select_hosts(hosts.clone(), &["r2".to_string()]).unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].name, "r2");
        assert_eq!(select_hosts(hosts.clone(), &[]).unwrap().len(), 2);
        assert!(select_hosts(hosts, &["r9".to_string()]).is_err());
    }

    #[test]
    fn test_ipv6_address_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.yaml");
        fs::write(
            &path,
            "- {name: r1, host_name: \"2001:db8::1\"}\n- {name: r2, host_name: 192.0.2.7}\n",
        )
        .unwrap();

        let hosts = load_inventory(&path).unwrap();
        assert_eq!(hosts[0].host_name, "2001:db8::1");
        assert_eq!(hosts[1].host_name, "192.0.2.7");
    }

    #[test]
    fn test_is_valid_address() {
        assert!(is_valid_address("2001:db8::1"));
        assert!(is_valid_address("::1"));
        assert!(is_valid_address("10.0.0.5"));
        assert!(is_valid_address("r1.example.net"));
        assert!(!is_valid_address("2001:db8::1; reboot"));
        assert!(!is_valid_address("../r1"));
    }

    #[test]
    fn test_is_valid_hostname() {
        assert!(is_valid_hostname("switch-01"));
        assert!(is_valid_hostname("router.lab.local"));
        assert!(is_valid_hostname("my_host"));
        assert!(!is_valid_hostname(""));
        assert!(!is_valid_hostname("host name")); // spaces
        assert!(!is_valid_hostname("host;rm")); // semicolon
        assert!(!is_valid_hostname("../etc/passwd")); // path traversal
        assert!(!is_valid_hostname("host\nname")); // newline
    }
}
