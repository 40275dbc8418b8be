//! Instruction builders for the agent-vault program.
//!
//! Selectors are the program framework's 8-byte instruction discriminators,
//! derived from the instruction name at runtime; argument encoding is
//! little-endian borsh, options as a one-byte tag.

use sha2::{Digest, Sha256};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    system_program,
};

/// Seed prefixes fixed by the program.
pub const AGENT_STATE_SEED: &[u8] = b"agent_state";
pub const VAULT_SEED: &[u8] = b"vault";

/// `spend` carries exactly the selector plus one u64 amount.
pub const SPEND_DATA_LEN: usize = 16;

/// Index of the delegate account in the `spend` account list; it must be a
/// required signer of any transaction the relay cosigns.
pub const SPEND_DELEGATE_INDEX: usize = 2;

/// Spending constraints passed at creation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AgentLimits {
    pub max_per_tx: u64,
    pub daily_limit: u64,
    pub total_limit: u64,
    pub expires_at: i64,
}

/// Constraint update; `None` leaves the field unchanged, `Some(0)` means
/// unlimited (or never, for expiry), matching the program's convention.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LimitUpdate {
    pub max_per_tx: Option<u64>,
    pub daily_limit: Option<u64>,
    pub total_limit: Option<u64>,
    pub expires_at: Option<i64>,
}

/// 8-byte instruction selector, `sha256("global:<name>")[..8]`.
pub fn selector(name: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("global:{name}").as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// State PDA for a delegate key.
pub fn agent_state_address(program_id: &Pubkey, delegate: &Pubkey) -> (Pubkey, u8) {
    Pubkey::find_program_address(&[AGENT_STATE_SEED, delegate.as_ref()], program_id)
}

/// Vault PDA for a state account.
pub fn vault_address(program_id: &Pubkey, agent_state: &Pubkey) -> (Pubkey, u8) {
    Pubkey::find_program_address(&[VAULT_SEED, agent_state.as_ref()], program_id)
}

pub fn create_agent_private(
    program_id: &Pubkey,
    commitment: [u8; 32],
    limits: AgentLimits,
    delegate: &Pubkey,
    payer: &Pubkey,
) -> Instruction {
    let (agent_state, _) = agent_state_address(program_id, delegate);
    let (vault, _) = vault_address(program_id, &agent_state);

    let mut data = selector("create_agent_private").to_vec();
    data.extend_from_slice(&commitment);
    data.extend_from_slice(&limits.max_per_tx.to_le_bytes());
    data.extend_from_slice(&limits.daily_limit.to_le_bytes());
    data.extend_from_slice(&limits.total_limit.to_le_bytes());
    data.extend_from_slice(&limits.expires_at.to_le_bytes());

    Instruction::new_with_bytes(
        *program_id,
        &data,
        vec![
            AccountMeta::new(agent_state, false),
            AccountMeta::new_readonly(vault, false),
            AccountMeta::new_readonly(*delegate, false),
            AccountMeta::new(*payer, true),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
    )
}

pub fn deposit(
    program_id: &Pubkey,
    agent_state: &Pubkey,
    depositor: &Pubkey,
    amount: u64,
) -> Instruction {
    let (vault, _) = vault_address(program_id, agent_state);

    let mut data = selector("deposit").to_vec();
    data.extend_from_slice(&amount.to_le_bytes());

    Instruction::new_with_bytes(
        *program_id,
        &data,
        vec![
            AccountMeta::new_readonly(*agent_state, false),
            AccountMeta::new(vault, false),
            AccountMeta::new(*depositor, true),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
    )
}

pub fn spend(
    program_id: &Pubkey,
    delegate: &Pubkey,
    fee_payer: &Pubkey,
    destination: &Pubkey,
    amount: u64,
) -> Instruction {
    let (agent_state, _) = agent_state_address(program_id, delegate);
    let (vault, _) = vault_address(program_id, &agent_state);

    let mut data = selector("spend").to_vec();
    data.extend_from_slice(&amount.to_le_bytes());
    debug_assert_eq!(data.len(), SPEND_DATA_LEN);

    Instruction::new_with_bytes(
        *program_id,
        &data,
        vec![
            AccountMeta::new(agent_state, false),
            AccountMeta::new(vault, false),
            AccountMeta::new_readonly(*delegate, true),
            AccountMeta::new(*fee_payer, true),
            AccountMeta::new(*destination, false),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
    )
}

pub fn freeze_private(
    program_id: &Pubkey,
    agent_state: &Pubkey,
    fee_recipient: &Pubkey,
    verifier_program: &Pubkey,
    proof_bytes: &[u8],
    witness_bytes: &[u8],
) -> Instruction {
    proof_gated(
        program_id,
        "freeze_private",
        agent_state,
        fee_recipient,
        verifier_program,
        proof_bytes,
        witness_bytes,
        &[],
        None,
    )
}

pub fn unfreeze_private(
    program_id: &Pubkey,
    agent_state: &Pubkey,
    fee_recipient: &Pubkey,
    verifier_program: &Pubkey,
    proof_bytes: &[u8],
    witness_bytes: &[u8],
) -> Instruction {
    proof_gated(
        program_id,
        "unfreeze_private",
        agent_state,
        fee_recipient,
        verifier_program,
        proof_bytes,
        witness_bytes,
        &[],
        None,
    )
}

pub fn update_constraints_private(
    program_id: &Pubkey,
    agent_state: &Pubkey,
    fee_recipient: &Pubkey,
    verifier_program: &Pubkey,
    proof_bytes: &[u8],
    witness_bytes: &[u8],
    update: LimitUpdate,
) -> Instruction {
    let mut args = Vec::with_capacity(4 * 9);
    put_opt_u64(&mut args, update.max_per_tx);
    put_opt_u64(&mut args, update.daily_limit);
    put_opt_u64(&mut args, update.total_limit);
    put_opt_i64(&mut args, update.expires_at);
    proof_gated(
        program_id,
        "update_constraints_private",
        agent_state,
        fee_recipient,
        verifier_program,
        proof_bytes,
        witness_bytes,
        &args,
        None,
    )
}

pub fn withdraw_private(
    program_id: &Pubkey,
    agent_state: &Pubkey,
    destination: &Pubkey,
    fee_recipient: &Pubkey,
    verifier_program: &Pubkey,
    proof_bytes: &[u8],
    witness_bytes: &[u8],
    amount: u64,
) -> Instruction {
    proof_gated(
        program_id,
        "withdraw_private",
        agent_state,
        fee_recipient,
        verifier_program,
        proof_bytes,
        witness_bytes,
        &amount.to_le_bytes(),
        Some(destination),
    )
}

pub fn close_agent_private(
    program_id: &Pubkey,
    agent_state: &Pubkey,
    destination: &Pubkey,
    fee_recipient: &Pubkey,
    verifier_program: &Pubkey,
    proof_bytes: &[u8],
    witness_bytes: &[u8],
) -> Instruction {
    proof_gated(
        program_id,
        "close_agent_private",
        agent_state,
        fee_recipient,
        verifier_program,
        proof_bytes,
        witness_bytes,
        &[],
        Some(destination),
    )
}

/// Shared frame for the proof-gated private instructions: selector, the two
/// length-prefixed byte vectors, then any trailing args; accounts are the
/// state, its vault, an optional destination, the fee recipient, and the
/// verifier program.
#[allow(clippy::too_many_arguments)]
fn proof_gated(
    program_id: &Pubkey,
    name: &str,
    agent_state: &Pubkey,
    fee_recipient: &Pubkey,
    verifier_program: &Pubkey,
    proof_bytes: &[u8],
    witness_bytes: &[u8],
    trailing_args: &[u8],
    destination: Option<&Pubkey>,
) -> Instruction {
    let (vault, _) = vault_address(program_id, agent_state);

    let mut data = selector(name).to_vec();
    put_bytes(&mut data, proof_bytes);
    put_bytes(&mut data, witness_bytes);
    data.extend_from_slice(trailing_args);

    let mut accounts = vec![
        AccountMeta::new(*agent_state, false),
        AccountMeta::new(vault, false),
    ];
    if let Some(destination) = destination {
        accounts.push(AccountMeta::new(*destination, false));
    }
    accounts.push(AccountMeta::new(*fee_recipient, false));
    accounts.push(AccountMeta::new_readonly(*verifier_program, false));
    accounts.push(AccountMeta::new_readonly(system_program::id(), false));

    Instruction::new_with_bytes(*program_id, &data, accounts)
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

fn put_opt_u64(buf: &mut Vec<u8>, value: Option<u64>) {
    match value {
        None => buf.push(0),
        Some(v) => {
            buf.push(1);
            buf.extend_from_slice(&v.to_le_bytes());
        }
    }
}

fn put_opt_i64(buf: &mut Vec<u8>, value: Option<i64>) {
    match value {
        None => buf.push(0),
        Some(v) => {
            buf.push(1);
            buf.extend_from_slice(&v.to_le_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_program() -> Pubkey {
        Pubkey::new_from_array([7; 32])
    }

    #[test]
    fn selectors_are_stable_and_distinct() {
        assert_eq!(selector("spend"), selector("spend"));
        let names = [
            "create_agent_private",
            "deposit",
            "spend",
            "freeze_private",
            "unfreeze_private",
            "update_constraints_private",
            "withdraw_private",
            "close_agent_private",
        ];
        for a in names {
            for b in names {
                if a != b {
                    assert_ne!(selector(a), selector(b), "{a} vs {b}");
                }
            }
        }
    }

    #[test]
    fn pdas_chain_state_into_vault() {
        let program = test_program();
        let delegate = Pubkey::new_unique();
        let (state, _) = agent_state_address(&program, &delegate);
        let (vault_a, _) = vault_address(&program, &state);
        let (vault_b, _) = vault_address(&program, &state);
        assert_eq!(vault_a, vault_b);
        assert_ne!(state, vault_a);
    }

    #[test]
    fn spend_frame_matches_cosign_expectations() {
        let program = test_program();
        let delegate = Pubkey::new_unique();
        let fee_payer = Pubkey::new_unique();
        let destination = Pubkey::new_unique();
        let ix = spend(&program, &delegate, &fee_payer, &destination, 5_000_000);

        assert_eq!(ix.data.len(), SPEND_DATA_LEN);
        assert_eq!(&ix.data[..8], &selector("spend"));
        assert_eq!(&ix.data[8..], &5_000_000u64.to_le_bytes());
        assert_eq!(ix.accounts[SPEND_DELEGATE_INDEX].pubkey, delegate);
        assert!(ix.accounts[SPEND_DELEGATE_INDEX].is_signer);
    }

    #[test]
    fn create_embeds_commitment_and_limits() {
        let program = test_program();
        let delegate = Pubkey::new_unique();
        let payer = Pubkey::new_unique();
        let limits = AgentLimits {
            max_per_tx: 1,
            daily_limit: 2,
            total_limit: 3,
            expires_at: 4,
        };
        let ix = create_agent_private(&program, [9; 32], limits, &delegate, &payer);
        assert_eq!(&ix.data[8..40], &[9; 32]);
        assert_eq!(&ix.data[40..48], &1u64.to_le_bytes());
        assert_eq!(&ix.data[64..72], &4i64.to_le_bytes());
        // Payer is the only signer at creation.
        assert_eq!(
            ix.accounts.iter().filter(|meta| meta.is_signer).count(),
            1
        );
    }

    #[test]
    fn limit_update_encodes_three_way_fields() {
        let mut args = Vec::new();
        put_opt_u64(&mut args, None);
        put_opt_u64(&mut args, Some(0));
        assert_eq!(args[0], 0);
        assert_eq!(args[1], 1);
        assert_eq!(&args[2..10], &0u64.to_le_bytes());
    }

    #[test]
    fn proof_gated_data_prefixes_both_byte_vectors() {
        let program = test_program();
        let state = Pubkey::new_unique();
        let relay = Pubkey::new_unique();
        let verifier = Pubkey::new_unique();
        let ix = freeze_private(&program, &state, &relay, &verifier, &[1, 2, 3], &[4; 44]);
        assert_eq!(&ix.data[..8], &selector("freeze_private"));
        assert_eq!(&ix.data[8..12], &3u32.to_le_bytes());
        assert_eq!(&ix.data[12..15], &[1, 2, 3]);
        assert_eq!(&ix.data[15..19], &44u32.to_le_bytes());
    }
}
