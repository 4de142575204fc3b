//! Betting and settlement.
//!
//! `place_bet` is a single transaction over the market, its fence, the
//! bettor's wallet and ledger, and the bet tree.
//!
//! Resolve and cancel run in four steps so large markets never need one
//! huge transaction:
//!
//! 1. begin: write a fence in `settlements`; `place_bet` refuses while it exists
//! 2. plan: read every bet and compute the credits (pure, deterministic)
//! 3. apply: commit the credits in chunks, each guarded by an idempotency key
//! 4. finish: mark the market terminal, drop the fence and the chunk keys
//!
//! Re-running the same settlement after a crash resumes at the first chunk
//! without a key. Chunk boundaries come from the chunk size recorded in the
//! fence, never from the live config, so a resumed run sees the same chunks.

use crate::engine::Engine;
use crate::error::{positive_amount, EngineError, EngineResult};
use crate::ledger::{post_tx, Posting};
use crate::market_resolve::markets::Settlement;
use crate::market_resolve::payout::{plan_settlement, Credit, SettlementKind, SettlementOutcome};
use crate::models::{Bet, LedgerKind, Market, MarketStatus, User, Wallet};
use crate::store::{abort, child_key, chunk_key, tx_get, tx_put};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Marker for a committed chunk of credits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct SettledChunk {
    chunk: u32,
    credits: usize,
    amount: u64,
    applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SettlementReport {
    pub market_id: String,
    pub outcome: SettlementOutcome,
    pub status: MarketStatus,
    pub resolved_option: Option<String>,
    pub total_pool: u64,
    pub win_pool: u64,
    pub distributed: u64,
    pub rounding_loss: u64,
    pub credits: Vec<Credit>,
    pub chunks: u32,
    /// Chunks found already committed by an earlier interrupted run
    pub chunks_skipped: u32,
    pub resumed: bool,
}

fn credit_posting(market_id: &str, credit: &Credit, kind: &SettlementKind) -> Posting {
    let posting = Posting::new(&credit.user_id, credit.kind, credit.amount, market_id)
        .with_meta("bet_id", &credit.bet_id);
    match (credit.kind, kind) {
        (LedgerKind::Payout, SettlementKind::Resolve { winning_option }) => {
            posting.with_meta("option", winning_option)
        }
        (_, SettlementKind::Cancel) => posting.with_meta("reason", "cancelled"),
        _ => posting.with_meta("reason", "no_winners"),
    }
}

impl Engine {
    /// Stake `amount` of `user_id`'s balance on `option`.
    pub fn place_bet(&self, market_id: &str, user_id: &str, option: &str, amount: i64) -> EngineResult<Bet> {
        let amount = positive_amount(amount)?;
        let now = Utc::now();
        let bet = Bet {
            id: format!("bet_{}", Uuid::new_v4().simple()),
            market_id: market_id.to_string(),
            user_id: user_id.to_string(),
            option: option.to_string(),
            amount,
            timestamp: now,
        };
        let posting = Posting::new(user_id, LedgerKind::Debit, amount, market_id)
            .with_meta("option", option)
            .with_meta("bet_id", &bet.id);

        let s = &self.store;
        let (market, wallet) = s.transact(
            "place_bet",
            (&s.markets, &s.settlements, &s.users, &s.wallets, &s.ledger, &s.bets),
            |(markets, fences, users, wallets, ledger, bets)| {
                let Some(mut market) = tx_get::<Market>(markets, market_id.as_bytes())? else {
                    return abort(EngineError::MarketNotFound(market_id.to_string()));
                };
                if market.status != MarketStatus::Open || fences.get(market_id.as_bytes())?.is_some() {
                    return abort(EngineError::MarketNotOpen(market_id.to_string()));
                }
                if market.is_closed_at(now) {
                    return abort(EngineError::MarketClosed {
                        market_id: market_id.to_string(),
                        close_time: market.close_time,
                    });
                }
                if !market.has_option(option) {
                    return abort(EngineError::InvalidOption {
                        market_id: market_id.to_string(),
                        option: option.to_string(),
                    });
                }
                if tx_get::<Wallet>(wallets, user_id.as_bytes())?.is_none() {
                    return abort(EngineError::WalletNotFound(user_id.to_string()));
                }
                if let Some(user) = tx_get::<User>(users, user_id.as_bytes())? {
                    if user.is_disabled {
                        return abort(EngineError::UserDisabled(user_id.to_string()));
                    }
                }

                let wallet = post_tx(wallets, ledger, &posting, now)?;
                let bet_seq = market.record_stake(option, amount);
                tx_put(bets, &child_key(market_id, bet_seq), &bet)?;
                tx_put(markets, market_id.as_bytes(), &market)?;
                Ok((market, wallet))
            },
        )?;

        info!(
            market_id,
            user_id,
            option,
            amount,
            bet_id = %bet.id,
            total_pool = market.total_pool,
            balance = wallet.balance,
            "bet placed"
        );
        Ok(bet)
    }

    /// Resolve with `winning_option`; winners split the pool pro rata.
    pub fn resolve_market(&self, market_id: &str, winning_option: &str) -> EngineResult<SettlementReport> {
        self.settle(
            market_id,
            SettlementKind::Resolve {
                winning_option: winning_option.to_string(),
            },
        )
    }

    /// Cancel and refund every bet in full.
    pub fn cancel_market(&self, market_id: &str) -> EngineResult<SettlementReport> {
        self.settle(market_id, SettlementKind::Cancel)
    }

    fn settle(&self, market_id: &str, kind: SettlementKind) -> EngineResult<SettlementReport> {
        let (market, fence, resumed) = self.begin_settlement(market_id, &kind)?;
        if resumed {
            warn!(market_id, %kind, chunk_size = fence.chunk_size, "resuming interrupted settlement");
        } else {
            info!(market_id, %kind, total_pool = market.total_pool, "settlement started");
        }

        let bets = self.list_bets(market_id)?;
        let plan = plan_settlement(&market, &bets, &kind);

        let chunk_size = fence.chunk_size.max(1);
        let mut chunks = 0u32;
        let mut chunks_skipped = 0u32;
        for (index, credits) in plan.credits.chunks(chunk_size).enumerate() {
            let index = index as u32;
            if !self.apply_chunk(market_id, index, credits, &kind)? {
                chunks_skipped += 1;
            }
            chunks += 1;
        }

        let market = self.finish_settlement(market_id, &kind, chunks)?;
        let report = SettlementReport {
            market_id: market.id,
            outcome: plan.outcome,
            status: market.status,
            resolved_option: market.resolved_option,
            total_pool: plan.total_pool,
            win_pool: plan.win_pool,
            distributed: plan.distributed(),
            rounding_loss: plan.rounding_loss(),
            credits: plan.credits,
            chunks,
            chunks_skipped,
            resumed,
        };
        info!(
            market_id,
            status = %report.status,
            distributed = report.distributed,
            rounding_loss = report.rounding_loss,
            credits = report.credits.len(),
            chunks,
            "settlement finished"
        );
        Ok(report)
    }

    /// Fence the market. Returns the market, the fence (new or found) and
    /// whether an earlier run of the same settlement was found.
    fn begin_settlement(&self, market_id: &str, kind: &SettlementKind) -> EngineResult<(Market, Settlement, bool)> {
        let chunk_size = self.config.settlement_chunk_size.max(1);
        let s = &self.store;
        s.transact(
            "begin_settlement",
            (&s.markets, &s.settlements),
            |(markets, fences)| {
                let Some(market) = tx_get::<Market>(markets, market_id.as_bytes())? else {
                    return abort(EngineError::MarketNotFound(market_id.to_string()));
                };
                if market.status.is_terminal() {
                    return abort(EngineError::AlreadyFinal {
                        market_id: market_id.to_string(),
                        status: market.status,
                    });
                }
                if let SettlementKind::Resolve { winning_option } = kind {
                    if !market.has_option(winning_option) {
                        return abort(EngineError::InvalidOption {
                            market_id: market_id.to_string(),
                            option: winning_option.clone(),
                        });
                    }
                }

                match tx_get::<Settlement>(fences, market_id.as_bytes())? {
                    Some(fence) if &fence.kind == kind => Ok((market, fence, true)),
                    Some(fence) => abort(EngineError::SettlementInProgress {
                        market_id: market_id.to_string(),
                        kind: fence.kind,
                    }),
                    None => {
                        let fence = Settlement {
                            market_id: market_id.to_string(),
                            kind: kind.clone(),
                            chunk_size,
                            started_at: Utc::now(),
                        };
                        tx_put(fences, market_id.as_bytes(), &fence)?;
                        Ok((market, fence, false))
                    }
                }
            },
        )
    }

    /// Commit one chunk of credits. Returns false when the chunk was already
    /// committed by an earlier run.
    fn apply_chunk(&self, market_id: &str, index: u32, credits: &[Credit], kind: &SettlementKind) -> EngineResult<bool> {
        let postings: Vec<Posting> = credits.iter().map(|c| credit_posting(market_id, c, kind)).collect();
        let key = chunk_key(market_id, index);
        let now = Utc::now();

        let s = &self.store;
        let applied = s.transact(
            "settle_chunk",
            (&s.markets, &s.settlements, &s.wallets, &s.ledger, &s.settlement_chunks),
            |(markets, fences, wallets, ledger, chunks)| {
                // a concurrent finish removes chunk keys together with the fence
                match tx_get::<Settlement>(fences, market_id.as_bytes())? {
                    Some(fence) if &fence.kind == kind => {}
                    Some(fence) => {
                        return abort(EngineError::SettlementInProgress {
                            market_id: market_id.to_string(),
                            kind: fence.kind,
                        })
                    }
                    None => {
                        let status = tx_get::<Market>(markets, market_id.as_bytes())?
                            .map(|m| m.status)
                            .unwrap_or(MarketStatus::Open);
                        return abort(if status.is_terminal() {
                            EngineError::AlreadyFinal {
                                market_id: market_id.to_string(),
                                status,
                            }
                        } else {
                            EngineError::MarketNotOpen(market_id.to_string())
                        });
                    }
                }
                if chunks.get(key.as_slice())?.is_some() {
                    return Ok(false);
                }
                for posting in &postings {
                    post_tx(wallets, ledger, posting, now)?;
                }
                let marker = SettledChunk {
                    chunk: index,
                    credits: postings.len(),
                    amount: postings.iter().map(|p| p.amount).sum(),
                    applied_at: now,
                };
                tx_put(chunks, &key, &marker)?;
                Ok(true)
            },
        )?;

        if applied {
            info!(market_id, chunk = index, credits = credits.len(), "settlement chunk applied");
        } else {
            debug!(market_id, chunk = index, "settlement chunk already applied, skipping");
        }
        Ok(applied)
    }

    fn finish_settlement(&self, market_id: &str, kind: &SettlementKind, chunk_count: u32) -> EngineResult<Market> {
        let now = Utc::now();
        let s = &self.store;
        s.transact(
            "finish_settlement",
            (&s.markets, &s.settlements, &s.settlement_chunks),
            |(markets, fences, chunks)| {
                let Some(mut market) = tx_get::<Market>(markets, market_id.as_bytes())? else {
                    return abort(EngineError::MarketNotFound(market_id.to_string()));
                };
                if market.status.is_terminal() {
                    return abort(EngineError::AlreadyFinal {
                        market_id: market_id.to_string(),
                        status: market.status,
                    });
                }
                if let Some(fence) = tx_get::<Settlement>(fences, market_id.as_bytes())? {
                    if &fence.kind != kind {
                        return abort(EngineError::SettlementInProgress {
                            market_id: market_id.to_string(),
                            kind: fence.kind,
                        });
                    }
                }

                match kind {
                    SettlementKind::Resolve { winning_option } => {
                        market.status = MarketStatus::Resolved;
                        market.resolved_option = Some(winning_option.clone());
                    }
                    SettlementKind::Cancel => {
                        market.status = MarketStatus::Cancelled;
                        market.resolved_option = None;
                    }
                }
                market.resolved_at = Some(now);
                tx_put(markets, market_id.as_bytes(), &market)?;

                fences.remove(market_id.as_bytes())?;
                for index in 0..chunk_count {
                    chunks.remove(chunk_key(market_id, index))?;
                }
                Ok(market)
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn setup() -> (Engine, Market) {
        let engine = Engine::temporary().unwrap();
        for user in ["alice", "bob", "carol"] {
            engine.create_wallet(user, 1_000).unwrap();
        }
        let market = engine
            .create_market("Who wins?", "", vec!["A".into(), "B".into()], Utc::now() + Duration::hours(1))
            .unwrap();
        (engine, market)
    }

    #[test]
    fn test_place_bet_debits_and_updates_totals() {
        let (engine, market) = setup();
        let bet = engine.place_bet(&market.id, "alice", "A", 100).unwrap();

        assert_eq!(bet.amount, 100);
        assert_eq!(engine.get_balance("alice").unwrap(), 900);
        let market = engine.get_market(&market.id).unwrap().unwrap();
        assert_eq!(market.total_for("A"), 100);
        assert_eq!(market.total_pool, 100);

        let entry = &engine.list_ledger("alice", 1).unwrap()[0];
        assert_eq!(entry.kind, LedgerKind::Debit);
        assert_eq!(entry.reference, market.id);
        assert_eq!(entry.meta.get("option").map(String::as_str), Some("A"));
    }

    #[test]
    fn test_place_bet_check_order() {
        let (engine, market) = setup();
        assert!(matches!(engine.place_bet(&market.id, "alice", "Z", 0), Err(EngineError::InvalidAmount(0))));
        assert!(matches!(engine.place_bet("mkt_none", "alice", "A", 5), Err(EngineError::MarketNotFound(_))));
        assert!(matches!(engine.place_bet(&market.id, "alice", "Z", 5), Err(EngineError::InvalidOption { .. })));
        assert!(matches!(engine.place_bet(&market.id, "nobody", "A", 5), Err(EngineError::WalletNotFound(_))));
        assert!(matches!(
            engine.place_bet(&market.id, "alice", "A", 1_001),
            Err(EngineError::InsufficientFunds { .. })
        ));
        assert_eq!(engine.get_balance("alice").unwrap(), 1_000);
        assert!(engine.list_bets(&market.id).unwrap().is_empty());
    }

    #[test]
    fn test_closed_market_refuses_bets() {
        let engine = Engine::temporary().unwrap();
        engine.create_wallet("alice", 10).unwrap();
        let market = engine
            .create_market("late", "", vec!["A".into(), "B".into()], Utc::now() - Duration::seconds(1))
            .unwrap();
        assert!(matches!(
            engine.place_bet(&market.id, "alice", "A", 5),
            Err(EngineError::MarketClosed { .. })
        ));
    }

    #[test]
    fn test_disabled_user_cannot_bet() {
        let (engine, market) = setup();
        engine.create_user(Some("dan"), "Dan", Some(50)).unwrap();
        engine.set_user_disabled("dan", true).unwrap();
        assert!(matches!(engine.place_bet(&market.id, "dan", "A", 5), Err(EngineError::UserDisabled(_))));
        assert_eq!(engine.get_balance("dan").unwrap(), 50);
    }

    #[test]
    fn test_resolve_pays_pro_rata_and_sets_status() {
        let (engine, market) = setup();
        engine.place_bet(&market.id, "alice", "A", 100).unwrap();
        engine.place_bet(&market.id, "bob", "A", 300).unwrap();
        engine.place_bet(&market.id, "carol", "B", 400).unwrap();

        let report = engine.resolve_market(&market.id, "A").unwrap();
        assert_eq!(report.outcome, SettlementOutcome::Payout);
        assert_eq!(report.distributed, 800);
        assert!(!report.resumed);

        assert_eq!(engine.get_balance("alice").unwrap(), 1_100);
        assert_eq!(engine.get_balance("bob").unwrap(), 1_300);
        assert_eq!(engine.get_balance("carol").unwrap(), 600);

        let market = engine.get_market(&market.id).unwrap().unwrap();
        assert_eq!(market.status, MarketStatus::Resolved);
        assert_eq!(market.resolved_option.as_deref(), Some("A"));
        assert!(market.resolved_at.is_some());
        assert!(engine.get_settlement(&market.id).unwrap().is_none());
    }

    #[test]
    fn test_resolve_with_unknown_option_changes_nothing() {
        let (engine, market) = setup();
        engine.place_bet(&market.id, "alice", "A", 10).unwrap();
        assert!(matches!(
            engine.resolve_market(&market.id, "C"),
            Err(EngineError::InvalidOption { .. })
        ));
        assert!(engine.get_settlement(&market.id).unwrap().is_none());
        // still open for bets
        engine.place_bet(&market.id, "bob", "B", 10).unwrap();
    }

    #[test]
    fn test_cancel_refunds_everything() {
        let (engine, market) = setup();
        engine.place_bet(&market.id, "alice", "A", 100).unwrap();
        engine.place_bet(&market.id, "alice", "B", 50).unwrap();

        let report = engine.cancel_market(&market.id).unwrap();
        assert_eq!(report.outcome, SettlementOutcome::Cancelled);
        assert_eq!(report.status, MarketStatus::Cancelled);
        assert_eq!(engine.get_balance("alice").unwrap(), 1_000);

        let refunds: Vec<_> = engine
            .list_ledger("alice", 10)
            .unwrap()
            .into_iter()
            .filter(|e| e.kind == LedgerKind::Refund)
            .collect();
        assert_eq!(refunds.len(), 2);
        assert!(refunds.iter().all(|e| e.meta.get("reason").map(String::as_str) == Some("cancelled")));
    }

    #[test]
    fn test_cancelled_market_rejects_further_settlement() {
        let (engine, market) = setup();
        engine.place_bet(&market.id, "alice", "A", 100).unwrap();
        engine.place_bet(&market.id, "bob", "B", 40).unwrap();
        engine.cancel_market(&market.id).unwrap();

        let ledger_len = |user: &str| engine.list_ledger(user, 100).unwrap().len();
        let before = (ledger_len("alice"), ledger_len("bob"));

        for result in [engine.resolve_market(&market.id, "A"), engine.cancel_market(&market.id)] {
            assert!(matches!(
                result,
                Err(EngineError::AlreadyFinal { status: MarketStatus::Cancelled, .. })
            ));
        }
        assert_eq!(engine.get_balance("alice").unwrap(), 1_000);
        assert_eq!(engine.get_balance("bob").unwrap(), 1_000);
        assert_eq!((ledger_len("alice"), ledger_len("bob")), before);
        assert!(engine.get_settlement(&market.id).unwrap().is_none());
    }

    #[test]
    fn test_resume_keeps_chunk_size_of_first_run() {
        let mut engine = Engine::temporary().unwrap();
        engine.config.settlement_chunk_size = 2;
        for user in ["w1", "w2", "w3", "loser"] {
            engine.create_wallet(user, 1_000).unwrap();
        }
        let market = engine
            .create_market("sized", "", vec!["A".into(), "B".into()], Utc::now() + Duration::hours(1))
            .unwrap();
        for user in ["w1", "w2", "w3"] {
            engine.place_bet(&market.id, user, "A", 100).unwrap();
        }
        engine.place_bet(&market.id, "loser", "B", 300).unwrap();

        // chunk 0 (w1, w2) commits, chunk 1 (w3) does not
        engine.faults().abort_commits("settle_chunk", 1, 1);
        assert!(matches!(
            engine.resolve_market(&market.id, "A"),
            Err(EngineError::CommitAborted("settle_chunk"))
        ));
        assert_eq!(engine.get_settlement(&market.id).unwrap().unwrap().chunk_size, 2);

        // restart with a different chunk size
        engine.config.settlement_chunk_size = 1;
        let report = engine.resolve_market(&market.id, "A").unwrap();
        assert!(report.resumed);
        assert_eq!(report.chunks, 2);
        assert_eq!(report.chunks_skipped, 1);

        let balances: Vec<u64> = ["w1", "w2", "w3", "loser"]
            .iter()
            .map(|u| engine.get_balance(u).unwrap())
            .collect();
        assert_eq!(balances, vec![1_100, 1_100, 1_100, 700]);
        for user in ["w1", "w2", "w3"] {
            let payouts = engine
                .list_ledger(user, 10)
                .unwrap()
                .into_iter()
                .filter(|e| e.kind == LedgerKind::Payout)
                .count();
            assert_eq!(payouts, 1, "{} paid more than once", user);
            assert!(engine.reconcile_wallet(user).unwrap().consistent);
        }

        // the next settlement picks up the new size
        let next = engine
            .create_market("next", "", vec!["A".into(), "B".into()], Utc::now() + Duration::hours(1))
            .unwrap();
        engine.place_bet(&next.id, "w1", "A", 10).unwrap();
        engine.place_bet(&next.id, "w2", "A", 10).unwrap();
        assert_eq!(engine.resolve_market(&next.id, "A").unwrap().chunks, 2);
    }

    #[test]
    fn test_fence_blocks_bets_and_other_settlements() {
        let (engine, market) = setup();
        engine.place_bet(&market.id, "alice", "A", 10).unwrap();
        engine.faults().abort_commits("finish_settlement", 0, 1);

        assert!(matches!(
            engine.resolve_market(&market.id, "A"),
            Err(EngineError::CommitAborted("finish_settlement"))
        ));
        assert!(engine.get_settlement(&market.id).unwrap().is_some());
        assert!(matches!(
            engine.place_bet(&market.id, "bob", "A", 10),
            Err(EngineError::MarketNotOpen(_))
        ));
        assert!(matches!(
            engine.cancel_market(&market.id),
            Err(EngineError::SettlementInProgress { .. })
        ));
        assert!(matches!(
            engine.resolve_market(&market.id, "B"),
            Err(EngineError::SettlementInProgress { .. })
        ));

        let report = engine.resolve_market(&market.id, "A").unwrap();
        assert!(report.resumed);
        assert_eq!(report.chunks_skipped, 1);
        assert_eq!(engine.get_balance("alice").unwrap(), 1_000);
    }
}
