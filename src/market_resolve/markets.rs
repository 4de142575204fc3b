use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::market_resolve::SettlementKind;
use crate::models::{Bet, Market, MarketStatus, PoolCheck};
use crate::store::{abort, child_prefix, tx_get, tx_put};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::info;
use uuid::Uuid;

/// Fence written while a settlement is in flight; blocks new bets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settlement {
    pub market_id: String,
    pub kind: SettlementKind,
    /// Credits per chunk, fixed when the settlement begins
    pub chunk_size: usize,
    pub started_at: DateTime<Utc>,
}

/// Outcome of deleting a terminal market
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DeletedMarket {
    pub market_id: String,
    pub bets_deleted: usize,
}

/// Trim and check market options: at least two, none empty, all distinct.
fn normalize_options(options: Vec<String>) -> EngineResult<Vec<String>> {
    let options: Vec<String> = options.into_iter().map(|o| o.trim().to_string()).collect();
    if options.len() < 2 {
        return Err(EngineError::InvalidMarket("at least two options are required".into()));
    }
    if options.iter().any(|o| o.is_empty()) {
        return Err(EngineError::InvalidMarket("options cannot be empty".into()));
    }
    let mut seen = HashSet::new();
    if let Some(dup) = options.iter().find(|o| !seen.insert(o.as_str())) {
        return Err(EngineError::InvalidMarket(format!("duplicate option '{}'", dup)));
    }
    Ok(options)
}

impl Engine {
    pub fn create_market(
        &self,
        title: &str,
        description: &str,
        options: Vec<String>,
        close_time: DateTime<Utc>,
    ) -> EngineResult<Market> {
        let title = title.trim();
        if title.is_empty() {
            return Err(EngineError::InvalidMarket("title is required".into()));
        }
        let options = normalize_options(options)?;
        let market = Market::new(
            format!("mkt_{}", Uuid::new_v4().simple()),
            title.to_string(),
            description.trim().to_string(),
            options,
            close_time,
        );

        self.store.transact("create_market", &self.store.markets, |markets| {
            tx_put(markets, market.id.as_bytes(), &market)
        })?;

        info!(market_id = %market.id, title = %market.title, options = market.options.len(), "market created");
        Ok(market)
    }

    pub fn get_market(&self, market_id: &str) -> EngineResult<Option<Market>> {
        self.store.get(&self.store.markets, market_id.as_bytes())
    }

    /// Markets newest first, optionally filtered by status.
    pub fn list_markets(&self, status: Option<MarketStatus>, limit: usize) -> EngineResult<Vec<Market>> {
        let mut markets: Vec<Market> = self.store.scan_prefix(&self.store.markets, b"")?;
        if let Some(status) = status {
            markets.retain(|m| m.status == status);
        }
        markets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        markets.truncate(limit);
        Ok(markets)
    }

    /// Bets of a market in the order they were placed.
    pub fn list_bets(&self, market_id: &str) -> EngineResult<Vec<Bet>> {
        if self.get_market(market_id)?.is_none() {
            return Err(EngineError::MarketNotFound(market_id.to_string()));
        }
        self.store.scan_prefix(&self.store.bets, &child_prefix(market_id))
    }

    /// The settlement fence of a market, if one is in flight.
    pub fn get_settlement(&self, market_id: &str) -> EngineResult<Option<Settlement>> {
        self.store.get(&self.store.settlements, market_id.as_bytes())
    }

    /// Compare stored totals against the bets actually recorded.
    pub fn verify_pool(&self, market_id: &str) -> EngineResult<PoolCheck> {
        let market = self
            .get_market(market_id)?
            .ok_or_else(|| EngineError::MarketNotFound(market_id.to_string()))?;
        let bets = self.list_bets(market_id)?;

        let totals_sum: u64 = market.totals.values().sum();
        let bets_sum: u64 = bets.iter().map(|b| b.amount).sum();
        let per_option_ok = market.options.iter().all(|option| {
            let staked: u64 = bets.iter().filter(|b| &b.option == option).map(|b| b.amount).sum();
            staked == market.total_for(option)
        });

        Ok(PoolCheck {
            market_id: market.id,
            total_pool: market.total_pool,
            totals_sum,
            bets_sum,
            consistent: per_option_ok && totals_sum == market.total_pool && bets_sum == market.total_pool,
        })
    }

    /// Remove a resolved or cancelled market and its bets. Wallets are untouched.
    pub fn delete_market(&self, market_id: &str) -> EngineResult<DeletedMarket> {
        let market = self
            .get_market(market_id)?
            .ok_or_else(|| EngineError::MarketNotFound(market_id.to_string()))?;
        if !market.status.is_terminal() {
            return Err(EngineError::MarketStillOpen(market_id.to_string()));
        }
        // terminal markets take no new bets, so the key set is stable
        let bet_keys = self.store.scan_prefix_keys(&self.store.bets, &child_prefix(market_id))?;

        self.store.transact(
            "delete_market",
            (&self.store.markets, &self.store.bets),
            |(markets, bets)| {
                let Some(market) = tx_get::<Market>(markets, market_id.as_bytes())? else {
                    return abort(EngineError::MarketNotFound(market_id.to_string()));
                };
                if !market.status.is_terminal() {
                    return abort(EngineError::MarketStillOpen(market_id.to_string()));
                }
                for key in &bet_keys {
                    bets.remove(key.clone())?;
                }
                markets.remove(market_id.as_bytes())?;
                Ok(())
            },
        )?;

        info!(market_id, bets_deleted = bet_keys.len(), "market deleted");
        Ok(DeletedMarket {
            market_id: market_id.to_string(),
            bets_deleted: bet_keys.len(),
        })
    }
}
