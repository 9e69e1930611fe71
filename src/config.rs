//! Directory and policy settings, loaded from an optional TOML file

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

/// Runtime settings for the pipeline
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    /// Where CSV snapshots are written and read back from
    #[serde(default = "default_processed_dir")]
    pub processed_dir: PathBuf,

    /// Where rendered figures are written
    #[serde(default = "default_figures_dir")]
    pub figures_dir: PathBuf,

    /// Fail when an order request references a product missing from its order,
    /// instead of leaving the member's order value empty
    #[serde(default)]
    pub strict_references: bool,
}

fn default_processed_dir() -> PathBuf {
    PathBuf::from("data/processed")
}

fn default_figures_dir() -> PathBuf {
    PathBuf::from("figures")
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            processed_dir: default_processed_dir(),
            figures_dir: default_figures_dir(),
            strict_references: false,
        }
    }
}

impl Settings {
    /// Read settings from a TOML file; missing keys fall back to defaults
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let settings: Self = toml::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(settings)
    }
}
