use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use geo_store::StoreConfig;
use serde::Deserialize;

pub const CONFIG_FILE: &str = "config.yaml";

/// Contents of `<config_root>/config.yaml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub store: StoreConfig,
}

/// Expand a leading `~` to `$HOME`. Paths without one come back unchanged.
pub fn expand_home(path: &Path, home: Option<&Path>) -> PathBuf {
    match (path.strip_prefix("~"), home) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

/// Read the config file if it exists. The database lands in the config root
/// unless `store.data_dir` says otherwise.
pub fn load_config(config_root: &Path) -> Result<FileConfig> {
    let path = config_root.join(CONFIG_FILE);
    let mut config = if path.exists() {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        parse_config(&text).with_context(|| format!("invalid config {}", path.display()))?
    } else {
        FileConfig::default()
    };

    if config.store.data_dir.is_none() && !config.store.in_memory {
        config.store.data_dir = Some(config_root.to_path_buf());
    }
    Ok(config)
}

fn parse_config(text: &str) -> Result<FileConfig> {
    if text.trim().is_empty() {
        return Ok(FileConfig::default());
    }
    Ok(serde_yaml::from_str(text)?)
}
