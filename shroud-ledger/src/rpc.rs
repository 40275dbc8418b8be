//! JSON-RPC implementation of the ledger traits.

use std::time::Duration;

use async_trait::async_trait;
use solana_client::{
    nonblocking::rpc_client::RpcClient,
    rpc_config::{RpcAccountInfoConfig, RpcProgramAccountsConfig, RpcTransactionConfig},
    rpc_filter::{Memcmp, RpcFilterType},
};
use solana_sdk::{
    commitment_config::CommitmentConfig, hash::Hash, pubkey::Pubkey, signature::Signature,
    transaction::Transaction,
};
use solana_transaction_status::UiTransactionEncoding;
use tracing::debug;

use crate::{
    reader::{DepositRecord, LedgerClient, LedgerIoError, LedgerReader, RawAccount},
    state::{ACCOUNT_SIZE, COMMITMENT_OFFSET, OWNER_TAG_OFFSET},
};

pub struct RpcLedger {
    client: RpcClient,
    program_id: Pubkey,
    timeout: Duration,
}

impl RpcLedger {
    pub fn new(url: impl Into<String>, program_id: Pubkey, timeout: Duration) -> Self {
        Self {
            client: RpcClient::new_with_commitment(url.into(), CommitmentConfig::confirmed()),
            program_id,
            timeout,
        }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, LedgerIoError>
    where
        F: std::future::Future<Output = Result<T, solana_client::client_error::ClientError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Err(_) => Err(LedgerIoError::Timeout(self.timeout)),
            Ok(Err(err)) => Err(map_client_error(err)),
            Ok(Ok(value)) => Ok(value),
        }
    }
}

fn map_client_error(err: solana_client::client_error::ClientError) -> LedgerIoError {
    use solana_sdk::{instruction::InstructionError, transaction::TransactionError};

    if let Some(tx_err) = err.get_transaction_error() {
        if let TransactionError::InstructionError(_, InstructionError::Custom(code)) = tx_err {
            if let Some(fault) = crate::error::ProgramFault::from_code(code) {
                return LedgerIoError::Program(fault);
            }
        }
        return LedgerIoError::Rejected(tx_err.to_string());
    }
    LedgerIoError::Rpc(err.to_string())
}

#[async_trait]
impl LedgerReader for RpcLedger {
    fn program_id(&self) -> Pubkey {
        self.program_id
    }

    async fn private_agent_by_commitment(
        &self,
        commitment: &[u8; 32],
    ) -> Result<Option<RawAccount>, LedgerIoError> {
        let config = RpcProgramAccountsConfig {
            filters: Some(vec![
                RpcFilterType::DataSize(ACCOUNT_SIZE as u64),
                // Owner discriminant 0: private mode only.
                RpcFilterType::Memcmp(Memcmp::new_raw_bytes(OWNER_TAG_OFFSET, vec![0])),
                RpcFilterType::Memcmp(Memcmp::new_raw_bytes(
                    COMMITMENT_OFFSET,
                    commitment.to_vec(),
                )),
            ]),
            account_config: RpcAccountInfoConfig {
                encoding: Some(solana_account_decoder::UiAccountEncoding::Base64),
                commitment: Some(CommitmentConfig::confirmed()),
                ..RpcAccountInfoConfig::default()
            },
            with_context: None,
        };

        let mut accounts = self
            .bounded(
                self.client
                    .get_program_accounts_with_config(&self.program_id, config),
            )
            .await?;
        debug!(matches = accounts.len(), "commitment filter scan");

        Ok(accounts.pop().map(|(address, account)| RawAccount {
            address,
            lamports: account.lamports,
            data: account.data,
        }))
    }

    async fn balance(&self, address: &Pubkey) -> Result<u64, LedgerIoError> {
        self.bounded(self.client.get_balance(address)).await
    }
}

#[async_trait]
impl LedgerClient for RpcLedger {
    async fn latest_blockhash(&self) -> Result<Hash, LedgerIoError> {
        self.bounded(self.client.get_latest_blockhash()).await
    }

    async fn send_transaction(&self, tx: &Transaction) -> Result<Signature, LedgerIoError> {
        self.bounded(self.client.send_and_confirm_transaction(tx))
            .await
    }

    async fn deposit_record(
        &self,
        reference: &Signature,
        recipient: &Pubkey,
    ) -> Result<Option<DepositRecord>, LedgerIoError> {
        let statuses = self
            .bounded(self.client.get_signature_statuses(&[*reference]))
            .await?;
        if statuses.value.first().map(Option::is_none).unwrap_or(true) {
            return Ok(None);
        }

        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Base64),
            commitment: Some(CommitmentConfig::confirmed()),
            max_supported_transaction_version: Some(0),
        };
        let fetched = self
            .bounded(self.client.get_transaction_with_config(reference, config))
            .await?;

        let meta = fetched
            .transaction
            .meta
            .ok_or_else(|| LedgerIoError::Rpc("transaction meta missing".into()))?;
        let decoded = fetched
            .transaction
            .transaction
            .decode()
            .ok_or_else(|| LedgerIoError::Rpc("transaction payload undecodable".into()))?;

        let recipient_delta = decoded
            .message
            .static_account_keys()
            .iter()
            .position(|key| key == recipient)
            .and_then(|index| {
                let pre = *meta.pre_balances.get(index)? as i64;
                let post = *meta.post_balances.get(index)? as i64;
                Some(post - pre)
            })
            .unwrap_or(0);

        Ok(Some(DepositRecord {
            succeeded: meta.err.is_none(),
            block_time: fetched.block_time,
            recipient_delta,
        }))
    }
}
