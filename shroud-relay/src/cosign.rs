//! Validation of untrusted spend transactions before countersigning.
//!
//! The relay is an unattended signing oracle for exactly one instruction
//! shape; everything else must be rejected before its signature is added.
//! Each check fails independently so callers learn precisely what was
//! wrong.

use shroud_ledger::instruction::{selector, SPEND_DATA_LEN, SPEND_DELEGATE_INDEX};
use solana_sdk::{pubkey::Pubkey, signature::Signature, transaction::Transaction};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CosignFault {
    #[error("transaction could not be decoded")]
    Undecodable,
    #[error("fee payer must be the relay operator")]
    WrongFeePayer,
    #[error("transaction must contain exactly one instruction")]
    WrongInstructionCount,
    #[error("instruction targets an unexpected program")]
    WrongProgram,
    #[error("instruction data is not a spend frame")]
    WrongDataLength,
    #[error("instruction selector is not spend")]
    WrongSelector,
    #[error("instruction account list is malformed")]
    MalformedAccounts,
    #[error("delegate account is not a required signer")]
    DelegateNotSigner,
    #[error("delegate signature is missing")]
    MissingDelegateSignature,
    #[error("delegate signature is invalid")]
    InvalidDelegateSignature,
}

/// Validate a partially signed spend transaction; returns the delegate key
/// whose signature was verified over the exact message bytes.
pub fn validate_spend_transaction(
    tx: &Transaction,
    operator: &Pubkey,
    program_id: &Pubkey,
) -> Result<Pubkey, CosignFault> {
    let message = &tx.message;

    if message.account_keys.first() != Some(operator) {
        return Err(CosignFault::WrongFeePayer);
    }
    if message.instructions.len() != 1 {
        return Err(CosignFault::WrongInstructionCount);
    }

    let ix = &message.instructions[0];
    let program = message
        .account_keys
        .get(ix.program_id_index as usize)
        .ok_or(CosignFault::MalformedAccounts)?;
    if program != program_id {
        return Err(CosignFault::WrongProgram);
    }

    // Exact frame: selector plus one u64. A valid prefix with trailing
    // bytes is not a spend.
    if ix.data.len() != SPEND_DATA_LEN {
        return Err(CosignFault::WrongDataLength);
    }
    if ix.data[..8] != selector("spend") {
        return Err(CosignFault::WrongSelector);
    }

    let delegate_position = *ix
        .accounts
        .get(SPEND_DELEGATE_INDEX)
        .ok_or(CosignFault::MalformedAccounts)? as usize;
    let delegate = *message
        .account_keys
        .get(delegate_position)
        .ok_or(CosignFault::MalformedAccounts)?;
    if delegate_position >= message.header.num_required_signatures as usize {
        return Err(CosignFault::DelegateNotSigner);
    }

    let signature = tx
        .signatures
        .get(delegate_position)
        .ok_or(CosignFault::MissingDelegateSignature)?;
    if *signature == Signature::default() {
        return Err(CosignFault::MissingDelegateSignature);
    }
    if !signature.verify(delegate.as_ref(), &tx.message_data()) {
        return Err(CosignFault::InvalidDelegateSignature);
    }

    Ok(delegate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shroud_ledger::instruction::spend;
    use solana_sdk::{
        hash::Hash,
        instruction::{AccountMeta, Instruction},
        signature::Keypair,
        signer::Signer,
        system_program,
    };

    struct Fixture {
        operator: Keypair,
        delegate: Keypair,
        program: Pubkey,
        destination: Pubkey,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                operator: Keypair::new(),
                delegate: Keypair::new(),
                program: Pubkey::new_unique(),
                destination: Pubkey::new_unique(),
            }
        }

        fn signed_spend(&self) -> Transaction {
            let ix = spend(
                &self.program,
                &self.delegate.pubkey(),
                &self.operator.pubkey(),
                &self.destination,
                1_000,
            );
            let mut tx = Transaction::new_with_payer(&[ix], Some(&self.operator.pubkey()));
            tx.partial_sign(&[&self.delegate], Hash::default());
            tx
        }

        fn validate(&self, tx: &Transaction) -> Result<Pubkey, CosignFault> {
            validate_spend_transaction(tx, &self.operator.pubkey(), &self.program)
        }
    }

    #[test]
    fn a_fully_valid_transaction_passes() {
        let fixture = Fixture::new();
        let tx = fixture.signed_spend();
        assert_eq!(fixture.validate(&tx), Ok(fixture.delegate.pubkey()));
    }

    #[test]
    fn wrong_fee_payer_is_rejected() {
        let fixture = Fixture::new();
        let ix = spend(
            &fixture.program,
            &fixture.delegate.pubkey(),
            &fixture.operator.pubkey(),
            &fixture.destination,
            1_000,
        );
        let stranger = Keypair::new();
        let mut tx = Transaction::new_with_payer(&[ix], Some(&stranger.pubkey()));
        tx.partial_sign(&[&fixture.delegate], Hash::default());
        assert_eq!(fixture.validate(&tx), Err(CosignFault::WrongFeePayer));
    }

    #[test]
    fn extra_instructions_are_rejected() {
        let fixture = Fixture::new();
        let ix = spend(
            &fixture.program,
            &fixture.delegate.pubkey(),
            &fixture.operator.pubkey(),
            &fixture.destination,
            1_000,
        );
        let mut tx =
            Transaction::new_with_payer(&[ix.clone(), ix], Some(&fixture.operator.pubkey()));
        tx.partial_sign(&[&fixture.delegate], Hash::default());
        assert_eq!(fixture.validate(&tx), Err(CosignFault::WrongInstructionCount));
    }

    #[test]
    fn wrong_program_is_rejected() {
        let fixture = Fixture::new();
        let ix = spend(
            &Pubkey::new_unique(),
            &fixture.delegate.pubkey(),
            &fixture.operator.pubkey(),
            &fixture.destination,
            1_000,
        );
        let mut tx = Transaction::new_with_payer(&[ix], Some(&fixture.operator.pubkey()));
        tx.partial_sign(&[&fixture.delegate], Hash::default());
        assert_eq!(fixture.validate(&tx), Err(CosignFault::WrongProgram));
    }

    #[test]
    fn wrong_selector_is_rejected() {
        let fixture = Fixture::new();
        let mut ix = spend(
            &fixture.program,
            &fixture.delegate.pubkey(),
            &fixture.operator.pubkey(),
            &fixture.destination,
            1_000,
        );
        ix.data[..8].copy_from_slice(&selector("deposit"));
        let mut tx = Transaction::new_with_payer(&[ix], Some(&fixture.operator.pubkey()));
        tx.partial_sign(&[&fixture.delegate], Hash::default());
        assert_eq!(fixture.validate(&tx), Err(CosignFault::WrongSelector));
    }

    #[test]
    fn trailing_data_is_rejected() {
        let fixture = Fixture::new();
        let mut ix = spend(
            &fixture.program,
            &fixture.delegate.pubkey(),
            &fixture.operator.pubkey(),
            &fixture.destination,
            1_000,
        );
        ix.data.push(0);
        let mut tx = Transaction::new_with_payer(&[ix], Some(&fixture.operator.pubkey()));
        tx.partial_sign(&[&fixture.delegate], Hash::default());
        assert_eq!(fixture.validate(&tx), Err(CosignFault::WrongDataLength));
    }

    #[test]
    fn missing_delegate_signature_is_rejected() {
        let fixture = Fixture::new();
        let ix = spend(
            &fixture.program,
            &fixture.delegate.pubkey(),
            &fixture.operator.pubkey(),
            &fixture.destination,
            1_000,
        );
        let tx = Transaction::new_with_payer(&[ix], Some(&fixture.operator.pubkey()));
        assert_eq!(
            fixture.validate(&tx),
            Err(CosignFault::MissingDelegateSignature)
        );
    }

    #[test]
    fn corrupted_delegate_signature_is_rejected() {
        let fixture = Fixture::new();
        let mut tx = fixture.signed_spend();
        let delegate_slot = tx
            .message
            .account_keys
            .iter()
            .position(|key| *key == fixture.delegate.pubkey())
            .unwrap();
        tx.signatures[delegate_slot] = Signature::from([7u8; 64]);
        assert_eq!(
            fixture.validate(&tx),
            Err(CosignFault::InvalidDelegateSignature)
        );
    }

    #[test]
    fn non_signer_delegate_slot_is_rejected() {
        let fixture = Fixture::new();
        let (agent_state, _) = shroud_ledger::instruction::agent_state_address(
            &fixture.program,
            &fixture.delegate.pubkey(),
        );
        let (vault, _) =
            shroud_ledger::instruction::vault_address(&fixture.program, &agent_state);

        let mut data = selector("spend").to_vec();
        data.extend_from_slice(&1_000u64.to_le_bytes());
        let ix = Instruction::new_with_bytes(
            fixture.program,
            &data,
            vec![
                AccountMeta::new(agent_state, false),
                AccountMeta::new(vault, false),
                // Delegate demoted to a plain account.
                AccountMeta::new_readonly(fixture.delegate.pubkey(), false),
                AccountMeta::new(fixture.operator.pubkey(), true),
                AccountMeta::new(fixture.destination, false),
                AccountMeta::new_readonly(system_program::id(), false),
            ],
        );
        let tx = Transaction::new_with_payer(&[ix], Some(&fixture.operator.pubkey()));
        assert_eq!(fixture.validate(&tx), Err(CosignFault::DelegateNotSigner));
    }
}
