//! Ledger operations
//!
//! The only path by which balances change during normal operation.

mod commands;
mod engine;

pub use commands::{DepositCommand, TransferCommand, WithdrawCommand};
pub use engine::LedgerEngine;
