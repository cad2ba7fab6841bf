mod merge;
mod paths;

use std::path::{Path, PathBuf};

use crate::config::DataSpec;
use crate::models::NetworkHost;
use crate::render;

/// Composer turns a host's identity into its merged data and rendered candidate
/// configuration. It holds only read-only configuration and can be shared freely
/// between concurrent provisioning runs.
#[derive(Debug, Clone)]
pub struct Composer {
    config_dir: PathBuf,
    spec: DataSpec,
}

impl Composer {
    pub fn new(config_dir: impl Into<PathBuf>, spec: DataSpec) -> Self {
        Self {
            config_dir: config_dir.into(),
            spec,
        }
    }

    /// Load `data.yaml` from the configuration directory
    pub fn load(config_dir: &Path) -> anyhow::Result<Self> {
        let spec = DataSpec::load(config_dir)?;
        Ok(Self::new(config_dir, spec))
    }

    /// Merge the host's data, assign it onto the host, then render every template file.
    /// Yields one fragment per template file, in template order; a template that fails
    /// to render contributes an empty fragment and is listed in `failed`.
    pub fn render_candidate(&self, host: &mut NetworkHost) -> Candidate {
        let templates = self.templates_for_host(host);
        tracing::debug!("Templates for host {}: {:?}", host.name, templates);

        host.data = self.data_for_host(host);

        let mut candidate = Candidate::default();
        for template in templates {
            match render::render_host_template_file(host, &template) {
                Ok(fragment) => candidate.fragments.push(fragment),
                Err(e) => {
                    tracing::error!("{}", e);
                    candidate.fragments.push(String::new());
                    candidate.failed.push(template);
                }
            }
        }
        tracing::debug!("Rendered {} fragments for {}", candidate.fragments.len(), host.name);

        candidate
    }
}

/// Rendered configuration for one host
#[derive(Debug, Clone, Default)]
pub struct Candidate {
    pub fragments: Vec<String>,
    /// Template files that failed to render
    pub failed: Vec<PathBuf>,
}

impl Candidate {
    pub fn is_empty(&self) -> bool {
        self.fragments.iter().all(|fragment| fragment.trim().is_empty())
    }
}
