//! Engine configuration
//!
//! Configuration is JSON with defaults for every field, sourced from the
//! `ZCLIP_CONFIG_JSON` environment variable when set, otherwise from a
//! `config.json` next to the process. An absent config is not an error;
//! an unreadable or malformed one is.

use log::LevelFilter;
use serde::Deserialize;
use std::{env, fs, io};

/// The engine version extracted from the Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable holding inline JSON configuration
const CONFIG_ENV_KEY: &str = "ZCLIP_CONFIG_JSON";

/// On-disk configuration file, relative to the working directory
const CONFIG_FILE: &str = "config.json";

/// Errors raised while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read the configuration file: {0}")]
    Io(#[from] io::Error),
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Loads the configuration from the environment or from disk, falling back
/// to the defaults when neither source is present
pub fn load_config() -> Result<Config, ConfigError> {
    if let Ok(raw) = env::var(CONFIG_ENV_KEY) {
        return Ok(serde_json::from_str(&raw)?);
    }

    match fs::read_to_string(CONFIG_FILE) {
        Ok(raw) => Ok(serde_json::from_str(&raw)?),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Config::default()),
        Err(err) => Err(ConfigError::Io(err)),
    }
}

#[derive(Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backing file for the binding and report tables
    pub storage_file: String,
    /// Host name advertised as the sender of outbound notifications
    pub host: String,
    /// DTLS pre-shared key identity (placeholder security surface)
    pub psk_identity: String,
    /// DTLS pre-shared key (placeholder security surface)
    pub psk_key: String,
    pub logging: LevelFilter,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_file: "data/zcl.bin".to_string(),
            host: "localhost".to_string(),
            psk_identity: String::new(),
            psk_key: "b".to_string(),
            logging: LevelFilter::Info,
        }
    }
}

#[cfg(test)]
mod test {
    use super::Config;

    /// Partial configuration falls back to defaults field by field
    #[test]
    fn test_partial_config() {
        let config: Config = serde_json::from_str(r#"{"host": "node7"}"#).unwrap();
        assert_eq!(config.host, "node7");
        assert_eq!(config.storage_file, "data/zcl.bin");
        assert_eq!(config.logging, log::LevelFilter::Info);
    }

    /// Malformed JSON surfaces as a parse error instead of defaults
    #[test]
    fn test_malformed_config() {
        assert!(serde_json::from_str::<Config>("{not json").is_err());
    }
}
