use serde_yaml::Value;
use std::path::Path;

use crate::models::{HostData, NetworkHost};

use super::Composer;

/// Merge one data layer into the accumulated host data.
///
/// Mappings merge key by key, recursing into nested mappings. Every other
/// combination (scalars, sequences, nulls, tagged values, or a kind change)
/// is replaced wholesale by the layer's value. Keys the layer does not
/// mention are left untouched.
pub fn merge_layer(acc: &mut HostData, layer: HostData) {
    match (acc, layer) {
        (Value::Mapping(acc_map), Value::Mapping(layer_map)) => {
            for (key, value) in layer_map {
                match acc_map.get_mut(&key) {
                    Some(existing) => merge_layer(existing, value),
                    None => {
                        acc_map.insert(key, value);
                    }
                }
            }
        }
        (acc, layer) => *acc = layer,
    }
}

impl Composer {
    /// Merge every data file of the host's hierarchy, in order, into fresh host data
    pub fn data_for_host(&self, host: &NetworkHost) -> HostData {
        compose_files(&self.hierarchy_for_host(host))
    }
}

/// Load and merge data files in order. Unreadable or malformed layers are logged and skipped.
pub fn compose_files(files: &[impl AsRef<Path>]) -> HostData {
    let mut host_data = HostData::Mapping(Default::default());

    for f in files {
        let f = f.as_ref();
        match load_layer(f) {
            Ok(layer) => merge_layer(&mut host_data, layer),
            Err(e) => tracing::error!("Skipping data layer {}: {}", f.display(), e),
        }
    }

    host_data
}

fn load_layer(path: &Path) -> anyhow::Result<HostData> {
    let content = std::fs::read_to_string(path)?;
    let layer: HostData = serde_yaml::from_str(&content)?;
    // An empty document is an empty layer, not an instruction to clear everything
    Ok(match layer {
        Value::Null => HostData::Mapping(Default::default()),
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn yaml(s: &str) -> HostData {
        serde_yaml::from_str(s).unwrap()
    }

    fn merged(layers: &[&str]) -> HostData {
        let mut acc = HostData::Mapping(Default::default());
        for layer in layers {
            merge_layer(&mut acc, yaml(layer));
        }
        acc
    }

    #[test]
    fn test_later_layer_wins() {
        let result = merged(&["site: east", "site: west\nrole: edge"]);
        assert_eq!(result, yaml("site: west\nrole: edge"));
    }

    #[test]
    fn test_key_in_one_layer_is_unchanged() {
        let result = merged(&["ntp: [10.0.0.1]\nsite: east", "site: west"]);
        assert_eq!(result["ntp"], yaml("[10.0.0.1]"));
    }

    #[test]
    fn test_nested_mappings_merge_recursively() {
        let result = merged(&[
            "snmp:\n  community: public\n  location: dc1\n",
            "snmp:\n  community: secret\n",
        ]);
        assert_eq!(result, yaml("snmp:\n  community: secret\n  location: dc1\n"));
    }

    #[test]
    fn test_sequences_are_replaced_not_concatenated() {
        let result = merged(&["ntp: [a, b]", "ntp: [c]"]);
        assert_eq!(result["ntp"], yaml("[c]"));
    }

    #[test]
    fn test_kind_change_replaces() {
        let result = merged(&["dns:\n  primary: 1.1.1.1", "dns: none"]);
        assert_eq!(result["dns"], yaml("none"));
        let result = merged(&["dns: none", "dns:\n  primary: 1.1.1.1"]);
        assert_eq!(result["dns"], yaml("primary: 1.1.1.1"));
    }

    #[test]
    fn test_explicit_null_overrides() {
        let result = merged(&["banner: hello", "banner: null"]);
        assert_eq!(result["banner"], Value::Null);
    }

    #[test]
    fn test_first_seen_key_order_is_kept() {
        let result = merged(&["a: 1\nb: 2", "c: 3\na: 4"]);
        let keys: Vec<&str> = result
            .as_mapping()
            .unwrap()
            .keys()
            .map(|k| k.as_str().unwrap())
            .collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_compose_skips_malformed_layer() {
        let dir = tempfile::tempdir().unwrap();
        let good1 = dir.path().join("common.yaml");
        let bad = dir.path().join("bad.yaml");
        let good2 = dir.path().join("r1.yaml");
        let empty = dir.path().join("empty.yaml");
        fs::write(&good1, "site: east\nrole: core\n").unwrap();
        fs::write(&bad, "site: [unclosed\n").unwrap();
        fs::write(&empty, "").unwrap();
        fs::write(&good2, "role: edge\n").unwrap();

        let result = compose_files(&[&good1, &bad, &empty, &good2]);
        assert_eq!(result, yaml("site: east\nrole: edge\n"));
    }

    #[test]
    fn test_compose_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.yaml");
        let b = dir.path().join("b.yaml");
        fs::write(&a, "x:\n  y: 1\n  z: [1, 2]\n").unwrap();
        fs::write(&b, "x:\n  y: 2\nw: true\n").unwrap();

        let first = serde_yaml::to_string(&compose_files(&[&a, &b])).unwrap();
        let second = serde_yaml::to_string(&compose_files(&[&a, &b])).unwrap();
        assert_eq!(first, second);
    }
}
