//! Ledger access traits the rest of the system is written against.
//!
//! Production uses the JSON-RPC implementation in [`crate::rpc`]; tests use
//! the in-memory ledger in [`crate::memory`].

use std::time::Duration;

use async_trait::async_trait;
use solana_sdk::{hash::Hash, pubkey::Pubkey, signature::Signature, transaction::Transaction};

use crate::error::ProgramFault;

#[derive(Debug, thiserror::Error)]
pub enum LedgerIoError {
    #[error("ledger rpc error: {0}")]
    Rpc(String),
    #[error("ledger call timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Program(#[from] ProgramFault),
    #[error("transaction rejected: {0}")]
    Rejected(String),
}

/// Raw account as read from the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawAccount {
    pub address: Pubkey,
    pub lamports: u64,
    pub data: Vec<u8>,
}

/// What deposit verification needs to know about a referenced transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepositRecord {
    pub succeeded: bool,
    pub block_time: Option<i64>,
    /// Net lamport change of the queried recipient within the transaction.
    pub recipient_delta: i64,
}

/// Read-only ledger access: everything discovery needs.
#[async_trait]
pub trait LedgerReader: Send + Sync {
    fn program_id(&self) -> Pubkey;

    /// Look up the private-mode agent account carrying `commitment`,
    /// filtering by account size, the private owner discriminant, and an
    /// exact byte match at the commitment offset; public accounts can
    /// never match.
    async fn private_agent_by_commitment(
        &self,
        commitment: &[u8; 32],
    ) -> Result<Option<RawAccount>, LedgerIoError>;

    async fn balance(&self, address: &Pubkey) -> Result<u64, LedgerIoError>;
}

/// Full ledger access for the relay: reads plus submission and the deposit
/// lookup used by payment verification.
#[async_trait]
pub trait LedgerClient: LedgerReader {
    async fn latest_blockhash(&self) -> Result<Hash, LedgerIoError>;

    async fn send_transaction(&self, tx: &Transaction) -> Result<Signature, LedgerIoError>;

    /// Fetch the referenced transaction at "confirmed" commitment level and
    /// report the recipient's balance delta inside it. `None` means the
    /// reference is unknown to the ledger.
    async fn deposit_record(
        &self,
        reference: &Signature,
        recipient: &Pubkey,
    ) -> Result<Option<DepositRecord>, LedgerIoError>;
}
