//! Configuration management for MyCoin

use crate::amount::Amount;
use crate::blockchain::{EngineSettings, DEFAULT_DIFFICULTY};
use crate::economics::DEFAULT_BASE_REWARD;
use crate::pow::MAX_DIFFICULTY;
use crate::transfer::DEFAULT_TRANSFER_DIFFICULTY;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub mining: MiningSettings,
    #[serde(default)]
    pub wallet: WalletConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: default_port() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MiningSettings {
    #[serde(default = "default_difficulty")]
    pub difficulty: u32,
    #[serde(default = "default_base_reward")]
    pub base_reward: u32,
    #[serde(default = "default_transfer_difficulty")]
    pub transfer_difficulty: u32,
    #[serde(default = "default_cycle_pause_ms")]
    pub cycle_pause_ms: u64,
    /// Start the mining loop at boot. Requires a mining address.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub address: Option<String>,
}

impl Default for MiningSettings {
    fn default() -> Self {
        Self {
            difficulty: default_difficulty(),
            base_reward: default_base_reward(),
            transfer_difficulty: default_transfer_difficulty(),
            cycle_pause_ms: default_cycle_pause_ms(),
            enabled: false,
            address: None,
        }
    }
}

impl MiningSettings {
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            base_reward: Amount::from_num(self.base_reward),
            cycle_pause: Duration::from_millis(self.cycle_pause_ms),
            default_difficulty: self.difficulty,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    #[serde(default = "default_initial_balance")]
    pub initial_balance: u32,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            initial_balance: default_initial_balance(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.database.path.is_empty() {
            return Err("database.path must be set in config.toml".into());
        }
        if self.mining.difficulty == 0 || self.mining.difficulty > MAX_DIFFICULTY {
            return Err(format!("mining.difficulty must be between 1 and {}", MAX_DIFFICULTY).into());
        }
        if self.mining.transfer_difficulty > MAX_DIFFICULTY {
            return Err(format!("mining.transfer_difficulty must be at most {}", MAX_DIFFICULTY).into());
        }
        if self.mining.enabled && self.mining.address.is_none() {
            return Err("mining.address must be set when mining.enabled is true".into());
        }
        Ok(())
    }
}

/// Parses and validates a TOML document. An empty document yields defaults.
pub fn parse_config(config_str: &str) -> Result<Config, Box<dyn std::error::Error>> {
    let config: Config = toml::from_str(config_str)?;
    config.validate()?;
    Ok(config)
}

/// Loads `path`, falling back to defaults when the file is absent. The `PORT`
/// environment variable overrides `server.port`.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, Box<dyn std::error::Error>> {
    let config_str = fs::read_to_string(path.as_ref()).unwrap_or_default();
    let mut config = parse_config(&config_str)?;

    if let Ok(port) = std::env::var("PORT") {
        config.server.port = port
            .parse()
            .map_err(|e| format!("PORT must be a valid port number: {}", e))?;
    }

    Ok(config)
}

fn default_port() -> u16 {
    4000
}

fn default_db_path() -> String {
    "./data/mycoin.db".to_string()
}

fn default_difficulty() -> u32 {
    DEFAULT_DIFFICULTY
}

fn default_base_reward() -> u32 {
    DEFAULT_BASE_REWARD
}

fn default_transfer_difficulty() -> u32 {
    DEFAULT_TRANSFER_DIFFICULTY
}

fn default_cycle_pause_ms() -> u64 {
    1000
}

fn default_initial_balance() -> u32 {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_empty() {
        let config = parse_config("").unwrap();
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.database.path, "./data/mycoin.db");
        assert_eq!(config.mining.difficulty, 4);
        assert_eq!(config.mining.base_reward, 50);
        assert_eq!(config.mining.transfer_difficulty, 4);
        assert_eq!(config.mining.cycle_pause_ms, 1000);
        assert!(!config.mining.enabled);
        assert_eq!(config.wallet.initial_balance, 100);
    }

    #[test]
    fn test_partial_sections() {
        let config = parse_config(
            r#"
            [mining]
            difficulty = 2
            address = "0xabc"
            enabled = true
            "#,
        )
        .unwrap();
        assert_eq!(config.mining.difficulty, 2);
        assert_eq!(config.mining.base_reward, 50);
        assert_eq!(config.mining.address.as_deref(), Some("0xabc"));
        assert_eq!(config.server.port, 4000);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(parse_config("[database]\npath = \"\"").is_err());
        assert!(parse_config("[mining]\ndifficulty = 0").is_err());
        assert!(parse_config("[mining]\nenabled = true").is_err());
        assert!(parse_config("[server]\nport = \"not a number\"").is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = parse_config(
            &fs::read_to_string(dir.path().join("absent.toml")).unwrap_or_default(),
        )
        .unwrap();
        assert_eq!(config.mining.engine_settings().cycle_pause, Duration::from_millis(1000));
    }
}
