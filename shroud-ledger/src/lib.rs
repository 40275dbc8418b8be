//! Client-side encoding of the on-ledger agent-vault program.
//!
//! The program itself is an external, fixed contract: this crate pins its
//! account byte layout, instruction selectors, PDA seeds, constants, and
//! error codes, and provides the ledger access traits the rest of the
//! system is written against.

pub mod error;
pub mod instruction;
pub mod memory;
pub mod reader;
pub mod rpc;
pub mod state;

/// Fixed fee the program transfers to the relay for every proof-gated
/// private operation.
pub const PRIVATE_OPERATION_FEE: u64 = 50_000;

/// Reimbursement the program pays the spend fee-payer from the vault.
pub const SPEND_FEE_REIMBURSEMENT: u64 = 10_000;

/// Day-bucket granularity for the daily spending limit.
pub const SECONDS_PER_DAY: i64 = 86_400;

/// Verifier witness framing: fixed header, then one 32-byte commitment.
pub const WITNESS_HEADER_SIZE: usize = 12;
pub const COMMITMENT_SIZE: usize = 32;
pub const MIN_WITNESS_SIZE: usize = WITNESS_HEADER_SIZE + COMMITMENT_SIZE;

/// Byte size of the succinct chain proof the verifier program accepts.
pub const CHAIN_PROOF_SIZE: usize = 324;
