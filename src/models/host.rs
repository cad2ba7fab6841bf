use serde::{Deserialize, Serialize};

/// HostData is the merged, recursively structured configuration for one host.
/// Mappings keep the key order of the layer that first introduced each key.
pub type HostData = serde_yaml::Value;

/// NetworkHost identifies a device to provision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkHost {
    /// Symbolic name used by the data hierarchy (e.g. "r1")
    pub name: String,
    /// Address used to reach the device
    pub host_name: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default, rename = "type")]
    pub device_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Populated by the data composer during a provisioning run
    #[serde(skip)]
    pub data: HostData,
}

impl NetworkHost {
    pub fn new(name: impl Into<String>, host_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host_name: host_name.into(),
            domain: None,
            platform: None,
            device_type: None,
            description: None,
            data: HostData::Null,
        }
    }

    /// Identity fields as exposed to templates. Data is not part of the identity.
    pub fn identity(&self) -> HostIdentity<'_> {
        HostIdentity {
            name: &self.name,
            host_name: &self.host_name,
            domain: self.domain.as_deref().unwrap_or(""),
            platform: self.platform.as_deref().unwrap_or(""),
            device_type: self.device_type.as_deref().unwrap_or(""),
            description: self.description.as_deref().unwrap_or(""),
        }
    }
}

/// Borrowed view of the identity fields of a host
#[derive(Debug, Clone, Copy, Serialize)]
pub struct HostIdentity<'a> {
    #[serde(rename = "Name")]
    pub name: &'a str,
    #[serde(rename = "HostName")]
    pub host_name: &'a str,
    #[serde(rename = "Domain")]
    pub domain: &'a str,
    #[serde(rename = "Platform")]
    pub platform: &'a str,
    #[serde(rename = "Type")]
    pub device_type: &'a str,
    #[serde(rename = "Description")]
    pub description: &'a str,
}
