mod convert;

pub use convert::convert_go_template_to_tera;

use serde_yaml::Value as Yaml;
use std::collections::HashMap;
use std::path::Path;
use tera::{Context, Tera, Value};

use crate::models::{HostData, NetworkHost};

/// Template file extension searched for in template directories
pub const TEMPLATE_EXTENSION: &str = "tmpl";

/// Build a rendering context holding only the identity fields of a host.
/// Used for path templates, which are rendered before any data is merged.
pub fn identity_context(host: &NetworkHost) -> Context {
    let identity = host.identity();
    let mut context = Context::new();
    context.insert("Name", identity.name);
    context.insert("HostName", identity.host_name);
    context.insert("Domain", identity.domain);
    context.insert("Platform", identity.platform);
    context.insert("Type", identity.device_type);
    context.insert("Description", identity.description);
    context
}

/// Build a rendering context with identity fields and the merged host data
pub fn host_context(host: &NetworkHost) -> Context {
    let mut context = identity_context(host);
    context.insert("Data", &template_value(&host.data));
    context
}

/// Convert host data to a template value. YAML allows mapping keys that JSON
/// does not (null, numbers, sequences); those keys are stringified.
fn template_value(value: &HostData) -> Value {
    match value {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(*b),
        Yaml::Number(n) => number_value(n),
        Yaml::String(s) => Value::String(s.clone()),
        Yaml::Sequence(items) => Value::Array(items.iter().map(template_value).collect()),
        Yaml::Mapping(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (key_string(k), template_value(v)))
                .collect(),
        ),
        Yaml::Tagged(tagged) => template_value(&tagged.value),
    }
}

fn number_value(n: &serde_yaml::Number) -> Value {
    if let Some(i) = n.as_i64() {
        Value::from(i)
    } else if let Some(u) = n.as_u64() {
        Value::from(u)
    } else {
        n.as_f64()
            .and_then(serde_json::Number::from_f64)
            .map_or(Value::Null, Value::Number)
    }
}

fn key_string(key: &HostData) -> String {
    match key {
        Yaml::String(s) => s.clone(),
        Yaml::Number(n) => n.to_string(),
        Yaml::Bool(b) => b.to_string(),
        other => template_value(other).to_string(),
    }
}

/// Go's `range` over a map yields its values in key order; arrays pass through
fn range_values(value: &Value, _args: &HashMap<String, Value>) -> tera::Result<Value> {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Ok(Value::Array(entries.into_iter().map(|(_, v)| v.clone()).collect()))
        }
        other => Ok(other.clone()),
    }
}

/// Render a template string against a context.
/// Go-style actions are converted to Tera before parsing.
pub fn render_str(name: &str, source: &str, context: &Context) -> anyhow::Result<String> {
    let tera_content = convert_go_template_to_tera(source);

    let mut tera = Tera::default();
    tera.autoescape_on(vec![]);
    tera.register_filter(convert::RANGE_VALUES_FILTER, range_values);
    tera.add_raw_template(name, &tera_content)
        .map_err(|e| anyhow::anyhow!("Invalid template {}: {}", name, error_chain(&e)))?;

    tera.render(name, context)
        .map_err(|e| anyhow::anyhow!("Template rendering failed for {}: {}", name, error_chain(&e)))
}

/// Render a template string, logging failures and yielding an empty string
pub fn render_string(name: &str, source: &str, context: &Context) -> String {
    match render_str(name, source, context) {
        Ok(rendered) => rendered,
        Err(e) => {
            tracing::error!("{}", e);
            String::new()
        }
    }
}

/// Render a template file for a host with identity fields and merged data
pub fn render_host_template_file(host: &NetworkHost, path: &Path) -> anyhow::Result<String> {
    tracing::debug!("Rendering host template file {} for host {}", path.display(), host.name);

    let source = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read template {}: {}", path.display(), e))?;

    render_str(&path.display().to_string(), &source, &host_context(host))
}

/// Tera nests the useful message in the error source chain
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_with_data(yaml: &str) -> NetworkHost {
        let mut host = NetworkHost::new("r1", "r1.example.net");
        host.data = serde_yaml::from_str(yaml).unwrap();
        host
    }

    #[test]
    fn test_literal_round_trip() {
        let host = NetworkHost::new("r1", "r1.example.net");
        let text = "system {\n    services ssh;\n}\n";
        assert_eq!(render_string("literal", text, &host_context(&host)), text);
    }

    #[test]
    fn test_identity_fields() {
        let mut host = NetworkHost::new("r1", "r1.example.net");
        host.platform = Some("mx".to_string());
        let rendered = render_string(
            "path",
            "hosts/{{.Name}}-{{.Platform}}.yaml",
            &identity_context(&host),
        );
        assert_eq!(rendered, "hosts/r1-mx.yaml");
    }

    #[test]
    fn test_missing_optional_identity_renders_empty() {
        let host = NetworkHost::new("r1", "r1.example.net");
        assert_eq!(
            render_string("path", "{{.Domain}}/{{.Name}}.yaml", &identity_context(&host)),
            "/r1.yaml"
        );
    }

    #[test]
    fn test_data_is_absent_from_identity_context() {
        let host = host_with_data("site: east");
        assert_eq!(render_string("path", "{{.Data.site}}.yaml", &identity_context(&host)), "");
        assert_eq!(render_string("file", "{{.Data.site}}.yaml", &host_context(&host)), "east.yaml");
    }

    #[test]
    fn test_range_over_host_data() {
        let host = host_with_data("ntp:\n  - 10.0.0.1\n  - 10.0.0.2\n");
        let rendered = render_string(
            "ntp",
            "{{range .Data.ntp}}server {{.}};\n{{end}}",
            &host_context(&host),
        );
        assert_eq!(rendered, "server 10.0.0.1;\nserver 10.0.0.2;\n");
    }

    #[test]
    fn test_no_autoescape() {
        let host = host_with_data("banner: \"<b>&\"");
        assert_eq!(render_string("x.html", "{{.Data.banner}}", &host_context(&host)), "<b>&");
    }

    #[test]
    fn test_parse_error_yields_empty() {
        let host = NetworkHost::new("r1", "r1.example.net");
        assert_eq!(render_string("bad", "{% if %}", &host_context(&host)), "");
        assert!(render_str("bad", "{% if %}", &host_context(&host)).is_err());
    }

    #[test]
    fn test_render_missing_file_yields_empty() {
        let host = NetworkHost::new("r1", "r1.example.net");
        let dir = tempfile::tempdir().unwrap();
        assert!(render_host_template_file(&host, &dir.path().join("missing.tmpl")).is_err());
    }

    #[test]
    fn test_non_string_keys_do_not_break_rendering() {
        let host = host_with_data(
            "site: east\nvlans:\n  ~: unassigned\n  10: core\n? [a, b]\n: pair\n",
        );
        let context = host_context(&host);
        assert_eq!(
            render_string(
                "keys",
                "{{.Data.site}} {{index .Data.vlans \"null\"}} {{index .Data.vlans \"10\"}}",
                &context,
            ),
            "east unassigned core"
        );

        let value = template_value(&host.data);
        assert_eq!(value["[\"a\",\"b\"]"], "pair");
    }

    #[test]
    fn test_tagged_and_float_values() {
        let host = host_with_data("mtu: !jumbo 9192\nratio: 0.5\n");
        let value = template_value(&host.data);
        assert_eq!(value["mtu"], 9192);
        assert_eq!(value["ratio"], 0.5);
    }

    #[test]
    fn test_range_over_mapping_yields_values_in_key_order() {
        let host = host_with_data("vlans:\n  core: 20\n  access: 10\n");
        let rendered = render_string(
            "vlans",
            "{{range .Data.vlans}}vlan {{.}};{{end}}",
            &host_context(&host),
        );
        assert_eq!(rendered, "vlan 10;vlan 20;");
    }
}
