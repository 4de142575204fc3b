// Runtime configuration loaded from the environment (and `.env` if present)

use crate::engine::{DEFAULT_INITIAL_BALANCE, DEFAULT_SETTLEMENT_CHUNK};
use crate::store::DEFAULT_MAX_TX_ATTEMPTS;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_DB_PATH: &str = "data/playmoney.sled";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:1234";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: cannot parse '{value}'")]
    Invalid { var: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub bind_addr: SocketAddr,
    /// Admin PIN; admin endpoints are disabled when unset
    pub admin_pin: Option<String>,
    pub initial_balance: u64,
    pub settlement_chunk_size: usize,
    pub max_tx_attempts: u32,
}

// keep the PIN out of logs
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("db_path", &self.db_path)
            .field("bind_addr", &self.bind_addr)
            .field("admin_pin", &self.admin_pin.as_ref().map(|_| "<set>"))
            .field("initial_balance", &self.initial_balance)
            .field("settlement_chunk_size", &self.settlement_chunk_size)
            .field("max_tx_attempts", &self.max_tx_attempts)
            .finish()
    }
}

fn parse_var<T: FromStr>(vars: &HashMap<String, String>, var: &'static str, default: T) -> Result<T, ConfigError> {
    match vars.get(var).map(|v| v.trim()) {
        None | Some("") => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
            var,
            value: value.to_string(),
        }),
    }
}

impl Config {
    /// Load `.env` (if any) and read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_vars(std::env::vars().collect())
    }

    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        let default_addr = SocketAddr::from(([0, 0, 0, 0], 1234));
        let config = Self {
            db_path: vars
                .get("PLAYMONEY_DB_PATH")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            bind_addr: parse_var(&vars, "PLAYMONEY_BIND_ADDR", default_addr)?,
            admin_pin: vars
                .get("BETTING_ADMIN_PIN")
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty()),
            initial_balance: parse_var(&vars, "PLAYMONEY_INITIAL_BALANCE", DEFAULT_INITIAL_BALANCE)?,
            settlement_chunk_size: parse_var(&vars, "PLAYMONEY_SETTLEMENT_CHUNK", DEFAULT_SETTLEMENT_CHUNK)?,
            max_tx_attempts: parse_var(&vars, "PLAYMONEY_MAX_TX_ATTEMPTS", DEFAULT_MAX_TX_ATTEMPTS)?,
        };

        if config.settlement_chunk_size == 0 {
            return Err(ConfigError::Zero("PLAYMONEY_SETTLEMENT_CHUNK"));
        }
        if config.max_tx_attempts == 0 {
            return Err(ConfigError::Zero("PLAYMONEY_MAX_TX_ATTEMPTS"));
        }
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 1234)),
            admin_pin: None,
            initial_balance: DEFAULT_INITIAL_BALANCE,
            settlement_chunk_size: DEFAULT_SETTLEMENT_CHUNK,
            max_tx_attempts: DEFAULT_MAX_TX_ATTEMPTS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(HashMap::new()).unwrap();
        assert_eq!(config.db_path, PathBuf::from(DEFAULT_DB_PATH));
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
        assert_eq!(config.admin_pin, None);
        assert_eq!(config.initial_balance, 10_000);
        assert_eq!(config.settlement_chunk_size, 200);
        assert_eq!(config.max_tx_attempts, 16);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_vars(vars(&[
            ("PLAYMONEY_DB_PATH", "/tmp/pm.sled"),
            ("PLAYMONEY_BIND_ADDR", "127.0.0.1:8080"),
            ("BETTING_ADMIN_PIN", " 4321 "),
            ("PLAYMONEY_INITIAL_BALANCE", "500"),
            ("PLAYMONEY_SETTLEMENT_CHUNK", "25"),
        ]))
        .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/pm.sled"));
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.admin_pin.as_deref(), Some("4321"));
        assert_eq!(config.initial_balance, 500);
        assert_eq!(config.settlement_chunk_size, 25);
    }

    #[test]
    fn test_bad_values() {
        let err = Config::from_vars(vars(&[("PLAYMONEY_INITIAL_BALANCE", "lots")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: "PLAYMONEY_INITIAL_BALANCE",
                value: "lots".into()
            }
        );
        let err = Config::from_vars(vars(&[("PLAYMONEY_SETTLEMENT_CHUNK", "0")])).unwrap_err();
        assert_eq!(err, ConfigError::Zero("PLAYMONEY_SETTLEMENT_CHUNK"));
    }

    #[test]
    fn test_blank_pin_means_no_admin() {
        let config = Config::from_vars(vars(&[("BETTING_ADMIN_PIN", "   ")])).unwrap();
        assert!(config.admin_pin.is_none());
        assert!(!format!("{:?}", config).contains("   "));
    }
}
