//! Courier Engine Layer
//!
//! Pure settlement decisions, deterministic, no I/O.
//! Takes an order and its transition → Returns the ledger work to perform.

#![warn(clippy::all)]

pub mod error;
pub mod settlement;

pub use error::EngineError;
pub use settlement::{
    plan_transition, settle, settlement_effect, LedgerPosting, SettlementKey, SettlementPlan,
    SkippedPosting,
};
