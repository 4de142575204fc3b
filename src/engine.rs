//! The engine facade.
//!
//! `Engine` owns the store and exposes every operation the admin and user
//! surfaces need. Its behaviour is split across modules:
//!
//! - `ledger`                     wallets, balances, ledger history
//! - `users`                      user records and administration
//! - `market_resolve::markets`    market CRUD and bet queries
//! - `market_resolve::settlement` place bet, resolve, cancel

use crate::config::Config;
use crate::error::EngineResult;
use crate::store::{FaultInjector, Store, DEFAULT_MAX_TX_ATTEMPTS};
use std::path::Path;

pub const DEFAULT_INITIAL_BALANCE: u64 = 10_000;
pub const DEFAULT_SETTLEMENT_CHUNK: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Grant applied when a user is created without an explicit balance
    pub initial_balance: u64,
    /// Maximum number of wallet credits committed per settlement transaction
    pub settlement_chunk_size: usize,
    pub max_tx_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_balance: DEFAULT_INITIAL_BALANCE,
            settlement_chunk_size: DEFAULT_SETTLEMENT_CHUNK,
            max_tx_attempts: DEFAULT_MAX_TX_ATTEMPTS,
        }
    }
}

impl From<&Config> for EngineConfig {
    fn from(config: &Config) -> Self {
        Self {
            initial_balance: config.initial_balance,
            settlement_chunk_size: config.settlement_chunk_size,
            max_tx_attempts: config.max_tx_attempts,
        }
    }
}

pub struct Engine {
    pub(crate) store: Store,
    pub(crate) config: EngineConfig,
}

impl Engine {
    pub fn new(store: Store, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn open(path: impl AsRef<Path>, config: EngineConfig) -> EngineResult<Self> {
        let store = Store::open(path, config.max_tx_attempts)?;
        Ok(Self::new(store, config))
    }

    /// Engine over a throwaway in-memory store
    pub fn temporary() -> EngineResult<Self> {
        Self::temporary_with(EngineConfig::default())
    }

    pub fn temporary_with(config: EngineConfig) -> EngineResult<Self> {
        Ok(Self::new(Store::temporary()?, config))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn faults(&self) -> &FaultInjector {
        self.store.faults()
    }

    pub fn flush(&self) -> EngineResult<usize> {
        self.store.flush()
    }
}
