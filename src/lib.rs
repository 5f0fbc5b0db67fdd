//! PriceKeeper Library
//!
//! Minute-aligned price recorder: polls a price oracle, appends every reading
//! to JSON time series on disk and anchors a compact snapshot on Solana as a
//! memo transaction.

pub mod config;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod mirror;
pub mod oracle;
pub mod persistence;
pub mod pipeline;
pub mod schedule;
pub mod types;

pub use pipeline::{CycleOutcome, CycleReport, CycleState, Pipeline, PublishOutcome};
