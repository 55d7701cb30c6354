pub mod error;
pub mod load;
pub mod settings;

pub use error::ConfigError;
pub use load::{load_config, load_config_for_root, CONFIG_FILE_NAME};
pub use settings::BusConfig;
