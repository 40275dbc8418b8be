//! Inbound payment verification.
//!
//! The referenced transaction is accepted at "confirmed" commitment level
//! rather than rooted finality, trading a one-confirmation reorg window
//! for creation latency. The exposure is bounded by the deposit itself.

use shroud_ledger::reader::LedgerClient;
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use tracing::debug;

use crate::error::RelayError;

/// Verify that `reference` paid at least `expected_lamports` to `operator`
/// recently enough to fund a creation.
pub async fn verify_deposit(
    ledger: &dyn LedgerClient,
    operator: &Pubkey,
    reference: &Signature,
    expected_lamports: u64,
    max_age_secs: i64,
    now: i64,
) -> Result<(), RelayError> {
    let record = ledger
        .deposit_record(reference, operator)
        .await?
        .ok_or(RelayError::DepositNotFound)?;

    if !record.succeeded {
        return Err(RelayError::DepositFailed);
    }

    let block_time = record.block_time.ok_or(RelayError::DepositPending)?;
    let age_secs = now.saturating_sub(block_time);
    if age_secs > max_age_secs {
        return Err(RelayError::DepositStale { age_secs });
    }

    if record.recipient_delta < expected_lamports as i64 {
        return Err(RelayError::DepositInsufficient {
            expected: expected_lamports,
            actual: record.recipient_delta,
        });
    }

    debug!(%reference, amount = record.recipient_delta, "deposit verified");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shroud_ledger::{memory::MemoryLedger, reader::DepositRecord};

    const NOW: i64 = 1_750_000_000;
    const WINDOW: i64 = 600;

    fn setup(record: Option<DepositRecord>) -> (MemoryLedger, Pubkey, Signature) {
        let ledger = MemoryLedger::new(Pubkey::new_unique());
        let operator = Pubkey::new_unique();
        let reference = Signature::from([9u8; 64]);
        if let Some(record) = record {
            ledger.set_deposit(reference, record);
        }
        (ledger, operator, reference)
    }

    #[tokio::test]
    async fn accepts_a_recent_sufficient_deposit() {
        let (ledger, operator, reference) = setup(Some(DepositRecord {
            succeeded: true,
            block_time: Some(NOW - 30),
            recipient_delta: 5_000_000,
        }));
        verify_deposit(&ledger, &operator, &reference, 5_000_000, WINDOW, NOW)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_reference_is_not_found() {
        let (ledger, operator, reference) = setup(None);
        let err = verify_deposit(&ledger, &operator, &reference, 1, WINDOW, NOW)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::DepositNotFound));
    }

    #[tokio::test]
    async fn failed_transaction_is_rejected() {
        let (ledger, operator, reference) = setup(Some(DepositRecord {
            succeeded: false,
            block_time: Some(NOW - 30),
            recipient_delta: 5_000_000,
        }));
        let err = verify_deposit(&ledger, &operator, &reference, 1, WINDOW, NOW)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::DepositFailed));
    }

    #[tokio::test]
    async fn stale_deposit_is_rejected_with_its_age() {
        let (ledger, operator, reference) = setup(Some(DepositRecord {
            succeeded: true,
            block_time: Some(NOW - WINDOW - 60),
            recipient_delta: 5_000_000,
        }));
        let err = verify_deposit(&ledger, &operator, &reference, 1, WINDOW, NOW)
            .await
            .unwrap_err();
        match err {
            RelayError::DepositStale { age_secs } => assert_eq!(age_secs, WINDOW + 60),
            other => panic!("expected stale, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_timestamp_means_pending() {
        let (ledger, operator, reference) = setup(Some(DepositRecord {
            succeeded: true,
            block_time: None,
            recipient_delta: 5_000_000,
        }));
        let err = verify_deposit(&ledger, &operator, &reference, 1, WINDOW, NOW)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::DepositPending));
    }

    #[tokio::test]
    async fn insufficient_delta_reports_both_amounts() {
        let (ledger, operator, reference) = setup(Some(DepositRecord {
            succeeded: true,
            block_time: Some(NOW - 30),
            recipient_delta: 400,
        }));
        let err = verify_deposit(&ledger, &operator, &reference, 1_000, WINDOW, NOW)
            .await
            .unwrap_err();
        match err {
            RelayError::DepositInsufficient { expected, actual } => {
                assert_eq!(expected, 1_000);
                assert_eq!(actual, 400);
            }
            other => panic!("expected insufficient, got {other:?}"),
        }
    }
}
