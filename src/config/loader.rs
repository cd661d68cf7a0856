use super::structs::ProvisionConfig;
use anyhow::{Context, Result};
use log::info;
use std::fs;
use std::path::Path;

pub const CONFIG_PATH: &str = "/etc/yeager-installer/config.toml";

/// Load operator overrides, falling back to built-in defaults when no file exists.
///
/// A present but broken file is an error: guessing would install to the
/// default paths behind the operator's back.
pub fn load_config(path: &Path) -> Result<ProvisionConfig> {
    let config = if path.exists() {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: ProvisionConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        info!("Loaded configuration from {}", path.display());
        config
    } else {
        info!("No config file found at {}. Using defaults.", path.display());
        ProvisionConfig::default()
    };

    config
        .validate()
        .with_context(|| format!("Invalid configuration ({})", path.display()))?;

    Ok(config)
}
