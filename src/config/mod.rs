pub mod scan_config;

use std::path::Path;

use anyhow::Result;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::config::scan_config::ScanConfig;
use crate::core::bluetooth::GattCatalog;

pub const CONFIG_FILE_NAME: &str = "bridge_config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Service and characteristic the bridge looks for
    pub gatt: GattCatalog,
    pub scan: ScanConfig,
    /// Default log level, overridden by RUST_LOG
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            gatt: GattCatalog::default(),
            scan: ScanConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Loads the config from `path`, falling back to defaults if the file is missing.
    pub async fn load_config(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Config file not found at {:?}, using default.", path);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(path).await?;
        let config: Self = serde_json::from_str(&config_json)?;

        info!("Config loaded from {:?}", path);
        Ok(config)
    }

    /// Saves the config to `path`, creating parent directories as needed.
    pub async fn save_config(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            if let Err(e) = fs::create_dir_all(dir).await {
                error!("Failed to create config directory {:?}: {}", dir, e);
                return Err(e.into());
            }
        }

        let config_json = match serde_json::to_string_pretty(&self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize bridge config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(path, config_json).await?;

        info!("Bridge config saved to {:?}.", path);
        Ok(())
    }
}
