//! Wallet and ledger primitives
//!
//! A wallet balance only ever changes together with exactly one appended
//! ledger entry, inside the same transaction. For every user:
//!
//!   balance == Σcredit + Σpayout + Σrefund − Σdebit
//!
//! Ledger entries are keyed `user_id 0x00 seq`, so a reverse prefix scan
//! returns them newest first. `seq` is the wallet's own counter, read and
//! bumped inside the posting transaction, so key order is commit order.

use crate::engine::Engine;
use crate::error::{positive_amount, EngineError, EngineResult};
use crate::models::{LedgerEntry, LedgerKind, Meta, Reconciliation, Wallet, INITIAL_GRANT_REF};
use crate::store::{abort, child_key, child_prefix, decode, tx_get, tx_put, TxResult};
use chrono::{DateTime, Utc};
use sled::transaction::TransactionalTree;
use tracing::info;
use uuid::Uuid;

pub const DEFAULT_LEDGER_LIMIT: usize = 50;

/// One balance change waiting to be applied
#[derive(Debug, Clone, PartialEq)]
pub struct Posting {
    pub user_id: String,
    pub kind: LedgerKind,
    pub amount: u64,
    pub reference: String,
    pub meta: Meta,
}

impl Posting {
    pub fn new(user_id: &str, kind: LedgerKind, amount: u64, reference: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            kind,
            amount,
            reference: reference.to_string(),
            meta: Meta::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: &str) -> Self {
        self.meta.insert(key.to_string(), value.to_string());
        self
    }
}

// ============================================================================
// TRANSACTIONAL PRIMITIVES
// ============================================================================

fn append_entry_tx(
    ledger: &TransactionalTree,
    posting: &Posting,
    seq: u64,
    now: DateTime<Utc>,
) -> TxResult<LedgerEntry> {
    let entry = LedgerEntry {
        id: format!("tx_{}", Uuid::new_v4().simple()),
        user_id: posting.user_id.clone(),
        timestamp: now,
        kind: posting.kind,
        amount: posting.amount,
        reference: posting.reference.clone(),
        meta: posting.meta.clone(),
    };
    tx_put(ledger, &child_key(&posting.user_id, seq), &entry)?;
    Ok(entry)
}

/// Create a wallet holding `initial_balance` and record the grant.
pub(crate) fn create_wallet_tx(
    wallets: &TransactionalTree,
    ledger: &TransactionalTree,
    user_id: &str,
    initial_balance: u64,
    now: DateTime<Utc>,
) -> TxResult<Wallet> {
    if tx_get::<Wallet>(wallets, user_id.as_bytes())?.is_some() {
        return abort(EngineError::WalletExists(user_id.to_string()));
    }
    let mut wallet = Wallet {
        user_id: user_id.to_string(),
        balance: initial_balance,
        ledger_seq: 0,
        updated_at: now,
    };

    // zero grants leave no entry: ledger amounts are strictly positive
    if initial_balance > 0 {
        let grant = Posting::new(user_id, LedgerKind::Credit, initial_balance, INITIAL_GRANT_REF)
            .with_meta("note", "initial balance");
        append_entry_tx(ledger, &grant, wallet.ledger_seq, now)?;
        wallet.ledger_seq += 1;
    }
    tx_put(wallets, user_id.as_bytes(), &wallet)?;
    Ok(wallet)
}

/// Apply one posting to its wallet and append the matching entry.
pub(crate) fn post_tx(
    wallets: &TransactionalTree,
    ledger: &TransactionalTree,
    posting: &Posting,
    now: DateTime<Utc>,
) -> TxResult<Wallet> {
    if posting.amount == 0 {
        return abort(EngineError::InvalidAmount(0));
    }
    let Some(mut wallet) = tx_get::<Wallet>(wallets, posting.user_id.as_bytes())? else {
        return abort(EngineError::WalletNotFound(posting.user_id.clone()));
    };

    wallet.balance = match posting.kind {
        LedgerKind::Debit => {
            if wallet.balance < posting.amount {
                return abort(EngineError::InsufficientFunds {
                    user_id: posting.user_id.clone(),
                    balance: wallet.balance,
                    required: posting.amount,
                });
            }
            wallet.balance - posting.amount
        }
        _ => match wallet.balance.checked_add(posting.amount) {
            Some(balance) => balance,
            None => return abort(EngineError::Overflow(posting.user_id.clone())),
        },
    };
    append_entry_tx(ledger, posting, wallet.ledger_seq, now)?;
    wallet.ledger_seq += 1;
    wallet.updated_at = now;

    tx_put(wallets, posting.user_id.as_bytes(), &wallet)?;
    Ok(wallet)
}

// ============================================================================
// ENGINE OPERATIONS
// ============================================================================

impl Engine {
    /// Create a wallet with an initial grant. Fails if one already exists.
    pub fn create_wallet(&self, user_id: &str, initial_balance: i64) -> EngineResult<Wallet> {
        if initial_balance < 0 {
            return Err(EngineError::InvalidAmount(initial_balance));
        }
        let now = Utc::now();
        let wallet = self.store.transact(
            "create_wallet",
            (&self.store.wallets, &self.store.ledger),
            |(wallets, ledger)| create_wallet_tx(wallets, ledger, user_id, initial_balance as u64, now),
        )?;
        info!(user_id, balance = wallet.balance, "wallet created");
        Ok(wallet)
    }

    /// Add funds outside of any market (admin top-up).
    pub fn credit(&self, user_id: &str, amount: i64, reference: &str, meta: Meta) -> EngineResult<Wallet> {
        let amount = positive_amount(amount)?;
        let posting = Posting {
            meta,
            ..Posting::new(user_id, LedgerKind::Credit, amount, reference)
        };
        self.post("credit", posting)
    }

    /// Remove funds outside of any market.
    pub fn debit(&self, user_id: &str, amount: i64, reference: &str, meta: Meta) -> EngineResult<Wallet> {
        let amount = positive_amount(amount)?;
        let posting = Posting {
            meta,
            ..Posting::new(user_id, LedgerKind::Debit, amount, reference)
        };
        self.post("debit", posting)
    }

    fn post(&self, op: &'static str, posting: Posting) -> EngineResult<Wallet> {
        let now = Utc::now();
        let wallet = self.store.transact(op, (&self.store.wallets, &self.store.ledger), |(wallets, ledger)| {
            post_tx(wallets, ledger, &posting, now)
        })?;
        info!(
            user_id = %posting.user_id,
            kind = %posting.kind,
            amount = posting.amount,
            reference = %posting.reference,
            balance = wallet.balance,
            "wallet posting"
        );
        Ok(wallet)
    }

    pub fn get_wallet(&self, user_id: &str) -> EngineResult<Option<Wallet>> {
        self.store.get(&self.store.wallets, user_id.as_bytes())
    }

    /// Current balance, 0 when the user has no wallet.
    pub fn get_balance(&self, user_id: &str) -> EngineResult<u64> {
        Ok(self.get_wallet(user_id)?.map(|w| w.balance).unwrap_or(0))
    }

    /// Ledger entries, newest first.
    pub fn list_ledger(&self, user_id: &str, limit: usize) -> EngineResult<Vec<LedgerEntry>> {
        self.store
            .ledger
            .scan_prefix(child_prefix(user_id))
            .rev()
            .take(limit)
            .map(|item| {
                let (_, bytes) = item?;
                decode(&bytes)
            })
            .collect()
    }

    /// Replay the full ledger of `user_id` against its balance.
    pub fn reconcile_wallet(&self, user_id: &str) -> EngineResult<Reconciliation> {
        let wallet = self.get_wallet(user_id)?;
        let balance = wallet.as_ref().map(|w| w.balance).unwrap_or(0);
        let expected_entries = wallet.as_ref().map(|w| w.ledger_seq).unwrap_or(0);
        let entries: Vec<LedgerEntry> = self.store.scan_prefix(&self.store.ledger, &child_prefix(user_id))?;
        let ledger_net: i128 = entries.iter().map(LedgerEntry::signed_amount).sum();
        Ok(Reconciliation {
            user_id: user_id.to_string(),
            balance,
            ledger_net,
            entries: entries.len(),
            consistent: ledger_net == balance as i128 && entries.len() as u64 == expected_entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_wallet_records_initial_grant() {
        let engine = Engine::temporary().unwrap();
        engine.create_wallet("alice", 1_000).unwrap();

        assert_eq!(engine.get_balance("alice").unwrap(), 1_000);
        let entries = engine.list_ledger("alice", 10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, LedgerKind::Credit);
        assert_eq!(entries[0].reference, INITIAL_GRANT_REF);
    }

    #[test]
    fn test_create_wallet_twice_is_rejected() {
        let engine = Engine::temporary().unwrap();
        engine.create_wallet("alice", 100).unwrap();
        let err = engine.create_wallet("alice", 100).unwrap_err();
        assert!(matches!(err, EngineError::WalletExists(_)));
        assert_eq!(engine.get_balance("alice").unwrap(), 100);
    }

    #[test]
    fn test_balance_of_unknown_user_is_zero() {
        let engine = Engine::temporary().unwrap();
        assert_eq!(engine.get_balance("nobody").unwrap(), 0);
        assert!(engine.list_ledger("nobody", 10).unwrap().is_empty());
    }

    #[test]
    fn test_debit_insufficient_funds_leaves_balance() {
        let engine = Engine::temporary().unwrap();
        engine.create_wallet("bob", 50).unwrap();

        let err = engine.debit("bob", 51, "manual", Meta::new()).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds { balance: 50, required: 51, .. }));
        assert_eq!(engine.get_balance("bob").unwrap(), 50);
        assert_eq!(engine.list_ledger("bob", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_non_positive_amounts_rejected() {
        let engine = Engine::temporary().unwrap();
        engine.create_wallet("carol", 10).unwrap();
        assert!(matches!(engine.credit("carol", 0, "x", Meta::new()), Err(EngineError::InvalidAmount(0))));
        assert!(matches!(engine.debit("carol", -5, "x", Meta::new()), Err(EngineError::InvalidAmount(-5))));
        assert!(matches!(engine.create_wallet("dave", -1), Err(EngineError::InvalidAmount(-1))));
    }

    #[test]
    fn test_ledger_is_newest_first_and_bounded() {
        let engine = Engine::temporary().unwrap();
        engine.create_wallet("erin", 100).unwrap();
        engine.debit("erin", 10, "a", Meta::new()).unwrap();
        engine.credit("erin", 25, "b", Meta::new()).unwrap();
        engine.debit("erin", 5, "c", Meta::new()).unwrap();

        let entries = engine.list_ledger("erin", 2).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].reference, "c");
        assert_eq!(entries[1].reference, "b");

        let recon = engine.reconcile_wallet("erin").unwrap();
        assert_eq!(recon.balance, 110);
        assert_eq!(recon.entries, 4);
        assert!(recon.consistent);
    }

    #[test]
    fn test_ledger_keys_follow_wallet_sequence() {
        let engine = Engine::temporary().unwrap();
        engine.create_wallet("finn", 10).unwrap();
        engine.credit("finn", 5, "a", Meta::new()).unwrap();
        engine.debit("finn", 3, "b", Meta::new()).unwrap();

        let wallet = engine.get_wallet("finn").unwrap().unwrap();
        assert_eq!(wallet.ledger_seq, 3);
        let keys: Vec<Vec<u8>> = engine
            .store
            .ledger
            .scan_prefix(child_prefix("finn"))
            .keys()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
            .into_iter()
            .map(|k| k.to_vec())
            .collect();
        let expected: Vec<Vec<u8>> = (0..3).map(|seq| child_key("finn", seq)).collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_credit_without_wallet_fails() {
        let engine = Engine::temporary().unwrap();
        let err = engine.credit("ghost", 5, "x", Meta::new()).unwrap_err();
        assert!(matches!(err, EngineError::WalletNotFound(_)));
    }
}
