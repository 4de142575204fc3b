// Data models for the play-money prediction market

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Free-form annotation attached to ledger entries
pub type Meta = BTreeMap<String, String>;

pub const INITIAL_GRANT_REF: &str = "initial_grant";

// ===== USERS & WALLETS =====

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub user_id: String,
    pub display_name: String,
    pub is_disabled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Wallet {
    pub user_id: String,
    pub balance: u64,
    /// Sequence of the next ledger entry; bumped in the same transaction
    /// that appends the entry, so ledger keys follow commit order
    pub ledger_seq: u64,
    pub updated_at: DateTime<Utc>,
}

/// Direction of a ledger entry. Amounts are always stored positive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LedgerKind {
    Credit,
    Debit,
    Payout,
    Refund,
}

impl LedgerKind {
    pub fn is_inflow(self) -> bool {
        !matches!(self, LedgerKind::Debit)
    }
}

impl fmt::Display for LedgerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LedgerKind::Credit => "credit",
            LedgerKind::Debit => "debit",
            LedgerKind::Payout => "payout",
            LedgerKind::Refund => "refund",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    pub id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: LedgerKind,
    pub amount: u64,
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(default)]
    pub meta: Meta,
}

impl LedgerEntry {
    /// Signed effect of this entry on the owner's balance
    pub fn signed_amount(&self) -> i128 {
        if self.kind.is_inflow() {
            self.amount as i128
        } else {
            -(self.amount as i128)
        }
    }
}

// ===== MARKETS & BETS =====

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MarketStatus {
    #[serde(rename = "open")]
    Open,
    #[serde(rename = "resolved")]
    Resolved,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl MarketStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, MarketStatus::Open)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "open" => Some(MarketStatus::Open),
            "resolved" => Some(MarketStatus::Resolved),
            "cancelled" | "canceled" => Some(MarketStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MarketStatus::Open => "open",
            MarketStatus::Resolved => "resolved",
            MarketStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Market {
    pub id: String,
    pub title: String,
    pub description: String,
    /// Outcome options in display order
    pub options: Vec<String>,
    pub status: MarketStatus,
    /// Bets are refused once `now >= close_time`
    pub close_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Staked amount per option; every option is present
    pub totals: BTreeMap<String, u64>,
    pub total_pool: u64,
    pub resolved_option: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Number of bets recorded; doubles as the next bet sequence
    pub bet_count: u64,
}

impl Market {
    pub fn new(
        id: String,
        title: String,
        description: String,
        options: Vec<String>,
        close_time: DateTime<Utc>,
    ) -> Self {
        let totals = options.iter().map(|opt| (opt.clone(), 0)).collect();
        Self {
            id,
            title,
            description,
            options,
            status: MarketStatus::Open,
            close_time,
            created_at: Utc::now(),
            totals,
            total_pool: 0,
            resolved_option: None,
            resolved_at: None,
            bet_count: 0,
        }
    }

    pub fn has_option(&self, option: &str) -> bool {
        self.options.iter().any(|o| o == option)
    }

    pub fn total_for(&self, option: &str) -> u64 {
        self.totals.get(option).copied().unwrap_or(0)
    }

    pub fn is_closed_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.close_time
    }

    /// Apply a stake to the running totals. Returns the bet's sequence.
    pub fn record_stake(&mut self, option: &str, amount: u64) -> u64 {
        *self.totals.entry(option.to_string()).or_insert(0) += amount;
        self.total_pool += amount;
        let seq = self.bet_count;
        self.bet_count += 1;
        seq
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bet {
    pub id: String,
    pub market_id: String,
    pub user_id: String,
    pub option: String,
    pub amount: u64,
    pub timestamp: DateTime<Utc>,
}

// ===== AUDIT =====

/// Result of replaying a user's ledger against the stored balance
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Reconciliation {
    pub user_id: String,
    pub balance: u64,
    pub ledger_net: i128,
    pub entries: usize,
    pub consistent: bool,
}

/// Result of summing a market's bets against its stored totals
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PoolCheck {
    pub market_id: String,
    pub total_pool: u64,
    pub totals_sum: u64,
    pub bets_sum: u64,
    pub consistent: bool,
}
