//! In-memory ledger used by tests and local development.

use std::{
    collections::HashMap,
    sync::Mutex,
};

use async_trait::async_trait;
use solana_sdk::{hash::Hash, pubkey::Pubkey, signature::Signature, transaction::Transaction};

use crate::{
    error::ProgramFault,
    reader::{DepositRecord, LedgerClient, LedgerIoError, LedgerReader, RawAccount},
    state::{AgentAccount, ACCOUNT_SIZE, COMMITMENT_OFFSET, OWNER_TAG_OFFSET},
};

/// Outcome queued for the next submission.
#[derive(Clone, Debug)]
enum SendOutcome {
    Program(ProgramFault),
    Rejected(String),
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<Pubkey, RawAccount>,
    deposits: HashMap<Signature, DepositRecord>,
    failures: Vec<SendOutcome>,
    sent: Vec<Transaction>,
}

/// A ledger held entirely in process memory, with knobs for seeding state
/// and forcing submission failures.
pub struct MemoryLedger {
    program_id: Pubkey,
    inner: Mutex<Inner>,
}

impl MemoryLedger {
    pub fn new(program_id: Pubkey) -> Self {
        Self {
            program_id,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn set_account(&self, address: Pubkey, lamports: u64, data: Vec<u8>) {
        let mut inner = self.inner.lock().expect("memory ledger poisoned");
        inner.accounts.insert(
            address,
            RawAccount {
                address,
                lamports,
                data,
            },
        );
    }

    /// Seed a parsed agent account at `address` plus its vault balance.
    pub fn seed_agent(&self, address: Pubkey, account: &AgentAccount, vault_lamports: u64) {
        let (vault, _) = crate::instruction::vault_address(&self.program_id, &address);
        self.set_account(address, 1_000_000, account.encode().to_vec());
        self.set_account(vault, vault_lamports, Vec::new());
    }

    pub fn set_balance(&self, address: Pubkey, lamports: u64) {
        self.set_account(address, lamports, Vec::new());
    }

    pub fn set_deposit(&self, reference: Signature, record: DepositRecord) {
        let mut inner = self.inner.lock().expect("memory ledger poisoned");
        inner.deposits.insert(reference, record);
    }

    /// Queue a program fault for the next `send_transaction`.
    pub fn fail_next_send(&self, fault: ProgramFault) {
        let mut inner = self.inner.lock().expect("memory ledger poisoned");
        inner.failures.push(SendOutcome::Program(fault));
    }

    pub fn reject_next_send(&self, reason: impl Into<String>) {
        let mut inner = self.inner.lock().expect("memory ledger poisoned");
        inner.failures.push(SendOutcome::Rejected(reason.into()));
    }

    /// Transactions accepted so far, in submission order.
    pub fn sent(&self) -> Vec<Transaction> {
        self.inner
            .lock()
            .expect("memory ledger poisoned")
            .sent
            .clone()
    }
}

#[async_trait]
impl LedgerReader for MemoryLedger {
    fn program_id(&self) -> Pubkey {
        self.program_id
    }

    async fn private_agent_by_commitment(
        &self,
        commitment: &[u8; 32],
    ) -> Result<Option<RawAccount>, LedgerIoError> {
        let inner = self.inner.lock().expect("memory ledger poisoned");
        Ok(inner
            .accounts
            .values()
            .find(|account| {
                account.data.len() == ACCOUNT_SIZE
                    && account.data[OWNER_TAG_OFFSET] == 0
                    && &account.data[COMMITMENT_OFFSET..COMMITMENT_OFFSET + 32] == commitment
            })
            .cloned())
    }

    async fn balance(&self, address: &Pubkey) -> Result<u64, LedgerIoError> {
        let inner = self.inner.lock().expect("memory ledger poisoned");
        Ok(inner
            .accounts
            .get(address)
            .map(|account| account.lamports)
            .unwrap_or(0))
    }
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    async fn latest_blockhash(&self) -> Result<Hash, LedgerIoError> {
        Ok(Hash::default())
    }

    async fn send_transaction(&self, tx: &Transaction) -> Result<Signature, LedgerIoError> {
        let mut inner = self.inner.lock().expect("memory ledger poisoned");
        if let Some(outcome) = inner.failures.pop() {
            return Err(match outcome {
                SendOutcome::Program(fault) => LedgerIoError::Program(fault),
                SendOutcome::Rejected(reason) => LedgerIoError::Rejected(reason),
            });
        }
        inner.sent.push(tx.clone());
        Ok(tx
            .signatures
            .first()
            .copied()
            .unwrap_or_default())
    }

    async fn deposit_record(
        &self,
        reference: &Signature,
        _recipient: &Pubkey,
    ) -> Result<Option<DepositRecord>, LedgerIoError> {
        let inner = self.inner.lock().expect("memory ledger poisoned");
        Ok(inner.deposits.get(reference).copied())
    }
}
