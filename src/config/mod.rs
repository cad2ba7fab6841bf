use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

use crate::device::ConfigFormat;

/// Config holds process-level configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub config_dir: PathBuf,
    pub settings_file: PathBuf,
    pub inventory_file: PathBuf,
    pub concurrency: usize,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn load() -> Self {
        let config_dir = PathBuf::from(get_env("CONFIG_DIR", "./etc"));
        let settings_file = env::var("SETTINGS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir.join("settings.yaml"));
        let inventory_file = env::var("INVENTORY_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir.join("inventory.yaml"));

        Self {
            config_dir,
            settings_file,
            inventory_file,
            concurrency: get_env("PROVISION_CONCURRENCY", "4")
                .parse()
                .unwrap_or(4)
                .max(1),
        }
    }
}

fn get_env(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Settings is the top-level settings document
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub junos: SessionConfig,
    #[serde(default)]
    pub push: PushOptions,
}

/// How the rendered candidate is loaded onto the device
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PushOptions {
    #[serde(default)]
    pub format: ConfigFormat,
    /// Merge into the candidate instead of replacing the statements it names
    #[serde(default)]
    pub merge: bool,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let settings: Self = load_yaml_file(path).context("Failed to load settings")?;
        if settings.junos.timeout_secs == 0 {
            bail!("Invalid settings in {}: junos.timeout_secs must be at least 1", path.display());
        }
        Ok(settings)
    }
}

/// SessionConfig carries everything needed to open a device session
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub username: String,
    #[serde(default, rename = "keyfile")]
    pub key_file: Option<PathBuf>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl SessionConfig {
    /// Session timeout in milliseconds as libssh2 takes it, saturating at `u32::MAX`
    pub fn timeout_millis(&self) -> u32 {
        u32::try_from(self.timeout_secs)
            .ok()
            .and_then(|secs| secs.checked_mul(1000))
            .unwrap_or(u32::MAX)
    }
}

fn default_port() -> u16 {
    830
}

fn default_timeout_secs() -> u64 {
    30
}

/// DataSpec is the data hierarchy document (`data.yaml`)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataSpec {
    /// Data layer path templates, most general first
    #[serde(rename = "Hierarchy", default)]
    pub hierarchy: Vec<String>,
    /// Template directory path templates
    #[serde(rename = "TemplatePaths", default)]
    pub template_paths: Vec<String>,
    #[serde(rename = "DataDir", default)]
    pub data_dir: String,
    #[serde(rename = "TemplateDir", default)]
    pub template_dir: String,
}

impl DataSpec {
    pub const FILE_NAME: &'static str = "data.yaml";

    /// Load `data.yaml` from a configuration directory
    pub fn load(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join(Self::FILE_NAME);
        tracing::debug!("Loading data spec from: {}", path.display());
        load_yaml_file(&path).context("Failed to load data hierarchy")
    }
}

/// Read and deserialize a YAML document
pub fn load_yaml_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_yaml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}
