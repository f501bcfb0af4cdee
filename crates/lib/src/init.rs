//! Initialize the configuration directory: create ~/.pibot and a default
//! config record.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::Config;

/// Create the config directory and a default config file if they do not exist.
/// The default record is written in full so the relay fields (chat id, topic
/// id, polling interval) are visible and editable.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        let default_config = serde_json::to_string_pretty(&Config::default())
            .context("serializing default config")?;
        std::fs::write(config_path, default_config)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    } else {
        log::debug!("config already exists at {}, skipping", config_path.display());
    }

    Ok(config_dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_directory_and_default_config_once() {
        let dir = std::env::temp_dir().join(format!("pibot-init-test-{}", uuid::Uuid::new_v4()));
        let config_path = dir.join("config.json");

        init_config_dir(&config_path).expect("init");
        let written: Config =
            serde_json::from_str(&std::fs::read_to_string(&config_path).expect("read"))
                .expect("parse");
        assert_eq!(written.gateway.port, 3000);

        // second run leaves an edited file alone
        std::fs::write(&config_path, "{\"gateway\":{\"port\":4000}}").expect("edit");
        init_config_dir(&config_path).expect("init again");
        let kept: Config =
            serde_json::from_str(&std::fs::read_to_string(&config_path).expect("read"))
                .expect("parse");
        assert_eq!(kept.gateway.port, 4000);
    }
}
