//! Sled-backed persistence and the unit-of-work wrapper.
//!
//! Every logical collection lives in its own tree:
//!
//! - `users`             user_id -> User
//! - `wallets`           user_id -> Wallet
//! - `ledger`            user_id 0x00 seq -> LedgerEntry
//! - `markets`           market_id -> Market
//! - `bets`              market_id 0x00 seq -> Bet
//! - `settlements`       market_id -> Settlement (fence)
//! - `settlement_chunks` market_id 0x00 chunk -> SettledChunk
//!
//! `seq` is a counter on the parent record (`Wallet::ledger_seq`,
//! `Market::bet_count`) bumped in the same transaction that writes the
//! child, so a prefix scan yields children in commit order.

use crate::error::{EngineError, EngineResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    Transactional, TransactionalTree,
};
use std::cell::Cell;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};

pub type TxResult<T> = ConflictableTransactionResult<T, EngineError>;

pub const DEFAULT_MAX_TX_ATTEMPTS: u32 = 16;

// ============================================================================
// CODEC & KEYS
// ============================================================================

pub(crate) fn encode<T: Serialize>(value: &T) -> EngineResult<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> EngineResult<T> {
    Ok(bincode::deserialize(bytes)?)
}

/// Key prefix shared by all children of `parent`
pub(crate) fn child_prefix(parent: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(parent.len() + 9);
    key.extend_from_slice(parent.as_bytes());
    key.push(0);
    key
}

pub(crate) fn child_key(parent: &str, seq: u64) -> Vec<u8> {
    let mut key = child_prefix(parent);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

pub(crate) fn chunk_key(market_id: &str, chunk: u32) -> Vec<u8> {
    let mut key = child_prefix(market_id);
    key.extend_from_slice(&chunk.to_be_bytes());
    key
}

// ============================================================================
// TRANSACTION HELPERS
// ============================================================================

pub(crate) fn abort<T>(err: EngineError) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(err))
}

pub(crate) trait OrAbort<T> {
    fn or_abort(self) -> TxResult<T>;
}

impl<T> OrAbort<T> for EngineResult<T> {
    fn or_abort(self) -> TxResult<T> {
        self.map_err(ConflictableTransactionError::Abort)
    }
}

pub(crate) fn tx_get<T: DeserializeOwned>(tree: &TransactionalTree, key: &[u8]) -> TxResult<Option<T>> {
    match tree.get(key)? {
        Some(bytes) => decode(&bytes).map(Some).or_abort(),
        None => Ok(None),
    }
}

pub(crate) fn tx_put<T: Serialize>(tree: &TransactionalTree, key: &[u8], value: &T) -> TxResult<()> {
    let bytes = encode(value).or_abort()?;
    tree.insert(key, bytes)?;
    Ok(())
}

// ============================================================================
// FAULT INJECTION
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct FaultPlan {
    skip: u32,
    fail: u32,
}

/// Aborts commits of named operations right before they would apply.
#[derive(Debug, Default)]
pub struct FaultInjector {
    plans: Mutex<HashMap<&'static str, FaultPlan>>,
}

impl FaultInjector {
    /// Let `skip` commits of `op` through, then abort the next `fail` ones.
    pub fn abort_commits(&self, op: &'static str, skip: u32, fail: u32) {
        let mut plans = self.plans.lock().unwrap_or_else(|p| p.into_inner());
        plans.insert(op, FaultPlan { skip, fail });
    }

    pub fn clear(&self) {
        self.plans.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }

    fn before_commit(&self, op: &'static str) -> TxResult<()> {
        let mut plans = self.plans.lock().unwrap_or_else(|p| p.into_inner());
        let Some(plan) = plans.get_mut(op) else {
            return Ok(());
        };
        if plan.skip > 0 {
            plan.skip -= 1;
            return Ok(());
        }
        if plan.fail == 0 {
            plans.remove(op);
            return Ok(());
        }
        plan.fail -= 1;
        warn!(op, "injected commit abort");
        abort(EngineError::CommitAborted(op))
    }
}

// ============================================================================
// STORE
// ============================================================================

pub struct Store {
    db: sled::Db,
    pub(crate) users: sled::Tree,
    pub(crate) wallets: sled::Tree,
    pub(crate) ledger: sled::Tree,
    pub(crate) markets: sled::Tree,
    pub(crate) bets: sled::Tree,
    pub(crate) settlements: sled::Tree,
    pub(crate) settlement_chunks: sled::Tree,
    max_attempts: u32,
    faults: FaultInjector,
}

impl Store {
    pub fn open(path: impl AsRef<Path>, max_attempts: u32) -> EngineResult<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).map_err(sled::Error::Io)?;
            }
        }
        let db = sled::open(path)?;
        info!(path = %path.display(), "opened store");
        Self::from_db(db, max_attempts)
    }

    /// In-memory database that disappears on drop
    pub fn temporary() -> EngineResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db, DEFAULT_MAX_TX_ATTEMPTS)
    }

    fn from_db(db: sled::Db, max_attempts: u32) -> EngineResult<Self> {
        Ok(Self {
            users: db.open_tree("users")?,
            wallets: db.open_tree("wallets")?,
            ledger: db.open_tree("ledger")?,
            markets: db.open_tree("markets")?,
            bets: db.open_tree("bets")?,
            settlements: db.open_tree("settlements")?,
            settlement_chunks: db.open_tree("settlement_chunks")?,
            db,
            max_attempts: max_attempts.max(1),
            faults: FaultInjector::default(),
        })
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    pub fn flush(&self) -> EngineResult<usize> {
        Ok(self.db.flush()?)
    }

    pub(crate) fn get<T: DeserializeOwned>(&self, tree: &sled::Tree, key: &[u8]) -> EngineResult<Option<T>> {
        match tree.get(key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn scan_prefix<T: DeserializeOwned>(&self, tree: &sled::Tree, prefix: &[u8]) -> EngineResult<Vec<T>> {
        tree.scan_prefix(prefix)
            .map(|item| {
                let (_, bytes) = item?;
                decode(&bytes)
            })
            .collect()
    }

    pub(crate) fn scan_prefix_keys(&self, tree: &sled::Tree, prefix: &[u8]) -> EngineResult<Vec<sled::IVec>> {
        tree.scan_prefix(prefix)
            .map(|item| -> EngineResult<sled::IVec> { Ok(item?.0) })
            .collect()
    }

    /// Run `f` as one atomic unit over `trees`.
    ///
    /// Sled re-runs the closure when it detects a conflicting writer; after
    /// `max_attempts` runs the operation fails with `TransactionConflict`.
    pub(crate) fn transact<T, A, F>(&self, op: &'static str, trees: T, f: F) -> EngineResult<A>
    where
        T: Transactional<EngineError>,
        F: Fn(&T::View) -> TxResult<A>,
    {
        let attempts = Cell::new(0u32);
        let outcome = trees.transaction(|view| {
            let attempt = attempts.get() + 1;
            attempts.set(attempt);
            if attempt > self.max_attempts {
                return abort(EngineError::TransactionConflict {
                    op,
                    attempts: self.max_attempts,
                });
            }
            if attempt > 1 {
                debug!(op, attempt, "retrying transaction after conflict");
            }
            let value = f(view)?;
            self.faults.before_commit(op)?;
            Ok(value)
        });

        match outcome {
            Ok(value) => Ok(value),
            Err(TransactionError::Abort(err)) => Err(err),
            Err(TransactionError::Storage(err)) => Err(EngineError::Storage(err)),
        }
    }
}
