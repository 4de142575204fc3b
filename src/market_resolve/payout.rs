use crate::models::{Bet, LedgerKind, Market};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a settlement does to a market once it completes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SettlementKind {
    Resolve { winning_option: String },
    Cancel,
}

impl fmt::Display for SettlementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettlementKind::Resolve { winning_option } => write!(f, "resolve ({})", winning_option),
            SettlementKind::Cancel => f.write_str("cancel"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SettlementOutcome {
    /// Winners split the whole pool pro rata
    Payout,
    /// Nobody backed the winning option; every stake goes back
    NoWinnerRefund,
    Cancelled,
}

/// One wallet credit owed by a settlement
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Credit {
    pub user_id: String,
    pub bet_id: String,
    pub kind: LedgerKind,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SettlementPlan {
    pub outcome: SettlementOutcome,
    pub total_pool: u64,
    pub win_pool: u64,
    pub credits: Vec<Credit>,
}

impl SettlementPlan {
    pub fn distributed(&self) -> u64 {
        self.credits.iter().map(|c| c.amount).sum()
    }

    /// Units lost to floor rounding; never redistributed
    pub fn rounding_loss(&self) -> u64 {
        match self.outcome {
            SettlementOutcome::Payout => self.total_pool.saturating_sub(self.distributed()),
            _ => 0,
        }
    }
}

/// Pari-mutuel share of the pool for a winning stake: floor(stake * pool / win_pool).
pub fn pari_mutuel_payout(stake: u64, win_pool: u64, total_pool: u64) -> u64 {
    if win_pool == 0 {
        return 0;
    }
    (stake as u128 * total_pool as u128 / win_pool as u128) as u64
}

fn refund_all(bets: &[Bet]) -> Vec<Credit> {
    bets.iter()
        .map(|bet| Credit {
            user_id: bet.user_id.clone(),
            bet_id: bet.id.clone(),
            kind: LedgerKind::Refund,
            amount: bet.amount,
        })
        .collect()
}

/// Work out every credit a settlement owes, in bet order.
///
/// Pools come from the stored market totals. Winning bets whose share floors
/// to zero are dropped.
pub fn plan_settlement(market: &Market, bets: &[Bet], kind: &SettlementKind) -> SettlementPlan {
    let total_pool = market.total_pool;

    let SettlementKind::Resolve { winning_option } = kind else {
        return SettlementPlan {
            outcome: SettlementOutcome::Cancelled,
            total_pool,
            win_pool: 0,
            credits: refund_all(bets),
        };
    };

    let win_pool = market.total_for(winning_option);
    if win_pool == 0 {
        return SettlementPlan {
            outcome: SettlementOutcome::NoWinnerRefund,
            total_pool,
            win_pool,
            credits: refund_all(bets),
        };
    }

    let credits = bets
        .iter()
        .filter(|bet| &bet.option == winning_option)
        .filter_map(|bet| {
            let amount = pari_mutuel_payout(bet.amount, win_pool, total_pool);
            (amount > 0).then(|| Credit {
                user_id: bet.user_id.clone(),
                bet_id: bet.id.clone(),
                kind: LedgerKind::Payout,
                amount,
            })
        })
        .collect();

    SettlementPlan {
        outcome: SettlementOutcome::Payout,
        total_pool,
        win_pool,
        credits,
    }
}
