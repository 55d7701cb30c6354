use super::{BusConfig, ConfigError};
use std::fs;
use std::path::Path;

pub const CONFIG_FILE_NAME: &str = "bus.yaml";

pub fn load_config(path: &Path) -> Result<BusConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let config: BusConfig = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })?;
    config.validate()?;
    Ok(config)
}

// Missing file means defaults; a present-but-broken file is an error the
// operator has to see.
pub fn load_config_for_root(root: &Path) -> Result<BusConfig, ConfigError> {
    let path = root.join(CONFIG_FILE_NAME);
    if !path.exists() {
        return Ok(BusConfig::default());
    }
    load_config(&path)
}
