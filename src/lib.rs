//! Play-money prediction market: wallets, ledger, pari-mutuel settlement
//! Exports all modules for use as a library crate

pub mod app_state;
pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod market_resolve;
pub mod models;
pub mod routes;
pub mod store;
pub mod users;

pub use app_state::{AppState, SharedState};
pub use auth::{Action, Actor, Authorizer, PinAuthorizer};
pub use config::{Config, ConfigError};
pub use engine::{Engine, EngineConfig};
pub use error::{EngineError, EngineResult, ErrorKind};
pub use ledger::Posting;
pub use market_resolve::{
    Credit, DeletedMarket, Settlement, SettlementKind, SettlementOutcome, SettlementReport,
};
pub use models::{
    Bet, LedgerEntry, LedgerKind, Market, MarketStatus, Meta, PoolCheck, Reconciliation, User, Wallet,
};
pub use routes::router;
pub use store::{FaultInjector, Store};
pub use users::{slug_user_id, UserSummary};
