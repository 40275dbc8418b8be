//! Commitment-based account discovery.
//!
//! The secret never goes anywhere: commitments are derived locally and the
//! ledger is only asked for exact byte matches against them.

use shroud_common::{
    secrets::{commitment_to_bytes, derive_agent, MAX_AGENTS},
    Fr,
};
use shroud_ledger::{
    instruction::vault_address,
    reader::{LedgerIoError, LedgerReader},
    state::{AgentAccount, StateError},
};
use solana_sdk::pubkey::Pubkey;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Ledger(#[from] LedgerIoError),
    #[error("matched account failed to parse: {0}")]
    Corrupt(#[from] StateError),
    #[error("all {MAX_AGENTS} agent slots are in use")]
    CapacityExceeded,
}

/// A located private agent account with a freshly read vault balance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentHandle {
    pub address: Pubkey,
    pub vault: Pubkey,
    pub commitment: [u8; 32],
    pub delegate: Pubkey,
    pub frozen: bool,
    pub balance: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveredAgent {
    pub nonce: u32,
    pub handle: AgentHandle,
}

/// Locate the private agent account carrying `commitment`, if any.
pub async fn find_by_commitment(
    reader: &dyn LedgerReader,
    commitment: &[u8; 32],
) -> Result<Option<AgentHandle>, DiscoveryError> {
    let Some(raw) = reader.private_agent_by_commitment(commitment).await? else {
        return Ok(None);
    };

    let account = AgentAccount::parse(&raw.data)?;
    // The ledger filter already constrains mode and commitment; re-check
    // here so a misbehaving reader cannot hand back a public account.
    if !account.is_private() || &account.commitment != commitment {
        return Ok(None);
    }

    let (vault, _) = vault_address(&reader.program_id(), &raw.address);
    let balance = reader.balance(&vault).await?;

    Ok(Some(AgentHandle {
        address: raw.address,
        vault,
        commitment: account.commitment,
        delegate: account.delegate,
        frozen: account.frozen,
        balance,
    }))
}

/// Scan the nonce space in order and return every agent whose derived
/// commitment exists on the ledger.
///
/// Scanning stops at the first missing nonce once at least one agent has
/// been found; a miss at nonce 0 never stops the scan. This assumes roughly
/// sequential allocation: an agent re-created at a higher nonce after a
/// lower one was closed will not be listed. Changing this changes
/// user-visible account lists.
pub async fn discover_all(
    master: &Fr,
    reader: &dyn LedgerReader,
) -> Result<Vec<DiscoveredAgent>, DiscoveryError> {
    let mut found = Vec::new();
    for nonce in 0..MAX_AGENTS {
        let keys = derive_agent(master, nonce);
        let commitment = commitment_to_bytes(&keys.commitment);
        match find_by_commitment(reader, &commitment).await? {
            Some(handle) => found.push(DiscoveredAgent { nonce, handle }),
            None if found.is_empty() => continue,
            None => break,
        }
    }
    debug!(agents = found.len(), "discovery scan complete");
    Ok(found)
}

/// First nonce with no matching account on the ledger.
pub async fn next_free_nonce(
    master: &Fr,
    reader: &dyn LedgerReader,
) -> Result<u32, DiscoveryError> {
    for nonce in 0..MAX_AGENTS {
        let keys = derive_agent(master, nonce);
        let commitment = commitment_to_bytes(&keys.commitment);
        if find_by_commitment(reader, &commitment).await?.is_none() {
            return Ok(nonce);
        }
    }
    Err(DiscoveryError::CapacityExceeded)
}
