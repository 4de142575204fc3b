// ============================================================================
// Market Resolve Module - Markets, Betting & Settlement
// ============================================================================
//
//   - markets:    market creation, listing, deletion, pool checks
//   - payout:     pari-mutuel settlement math (pure)
//   - settlement: place bet, resolve, cancel
//
// ============================================================================

pub mod markets;
pub mod payout;
pub mod settlement;

pub use markets::{DeletedMarket, Settlement};
pub use payout::{pari_mutuel_payout, plan_settlement, Credit, SettlementKind, SettlementOutcome, SettlementPlan};
pub use settlement::SettlementReport;
