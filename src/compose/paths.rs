use std::path::{Path, PathBuf};

use crate::models::NetworkHost;
use crate::render::{self, TEMPLATE_EXTENSION};

use super::Composer;

impl Composer {
    /// Render a list of path templates against the identity of a host.
    ///
    /// The result always has the same length and order as `templates`; an entry
    /// that fails to render comes back as an empty string.
    pub fn template_strings_for_host(
        &self,
        host: &NetworkHost,
        templates: &[String],
    ) -> Vec<String> {
        let context = render::identity_context(host);
        templates
            .iter()
            .map(|t| render::render_string("path", t, &context))
            .collect()
    }

    /// Existing data files to consult for a host, most general first
    pub fn hierarchy_for_host(&self, host: &NetworkHost) -> Vec<PathBuf> {
        let paths = self.template_strings_for_host(host, &self.spec.hierarchy);
        let data_root = self.config_dir.join(&self.spec.data_dir);

        let mut files = Vec::new();
        for (raw, rendered) in self.spec.hierarchy.iter().zip(paths) {
            let Some(abs) = join_rendered(&data_root, &rendered) else {
                tracing::warn!(
                    "Hierarchy entry {} rendered empty for {}, skipping",
                    raw,
                    host.name
                );
                continue;
            };

            if abs.exists() {
                files.push(abs);
            } else {
                tracing::warn!("Data file {} does not exist", abs.display());
            }
        }

        files
    }

    /// Template files for a host: each template path in order, files within a path in glob order
    pub fn templates_for_host(&self, host: &NetworkHost) -> Vec<PathBuf> {
        let paths = self.template_strings_for_host(host, &self.spec.template_paths);
        let template_root = self.config_dir.join(&self.spec.template_dir);

        let mut files = Vec::new();
        for (raw, rendered) in self.spec.template_paths.iter().zip(paths) {
            let Some(dir) = join_rendered(&template_root, &rendered) else {
                tracing::warn!("Template path {} rendered empty for {}, skipping", raw, host.name);
                continue;
            };

            if !dir.is_dir() {
                tracing::warn!("Template path {} does not exist", dir.display());
                continue;
            }

            let pattern = format!(
                "{}/*.{}",
                glob::Pattern::escape(&dir.to_string_lossy()),
                TEMPLATE_EXTENSION
            );
            match glob::glob(&pattern) {
                Ok(entries) => {
                    for entry in entries {
                        match entry {
                            Ok(path) => files.push(path),
                            Err(e) => tracing::error!("Failed to read template entry: {}", e),
                        }
                    }
                }
                Err(e) => tracing::error!("Invalid template glob {}: {}", pattern, e),
            }
        }

        files
    }
}

/// Join a rendered relative path under a root. Empty renders yield None.
/// Leading separators are stripped so the result stays under `root`.
fn join_rendered(root: &Path, rendered: &str) -> Option<PathBuf> {
    let relative = rendered.trim().trim_start_matches('/');
    if relative.is_empty() {
        return None;
    }
    Some(root.join(relative))
}
