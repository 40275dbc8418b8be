//! Bit-exact parser for the program's agent account.
//!
//! The account is allocated at a fixed 171 bytes. The owner field is a
//! borsh `Option<Pubkey>`, so everything after it shifts by 32 bytes
//! between the two modes; private-mode offsets are the ones discovery
//! filters on and must match the table below exactly.

use solana_sdk::pubkey::Pubkey;

use crate::SECONDS_PER_DAY;

/// Allocated account size in both modes.
pub const ACCOUNT_SIZE: usize = 171;

/// Offset of the owner option discriminant (0 = private, 1 = public).
pub const OWNER_TAG_OFFSET: usize = 8;

/// Private-mode field offsets (owner tag 0, no owner key serialized).
pub const COMMITMENT_OFFSET: usize = 9;
pub const DELEGATE_OFFSET: usize = 41;
pub const MAX_PER_TX_OFFSET: usize = 73;
pub const DAILY_LIMIT_OFFSET: usize = 81;
pub const TOTAL_LIMIT_OFFSET: usize = 89;
pub const EXPIRES_AT_OFFSET: usize = 97;
pub const FROZEN_OFFSET: usize = 105;
pub const TOTAL_SPENT_OFFSET: usize = 106;
pub const DAILY_SPENT_OFFSET: usize = 114;
pub const LAST_DAY_OFFSET: usize = 122;
pub const BUMP_OFFSET: usize = 130;
pub const CREATED_AT_OFFSET: usize = 131;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StateError {
    #[error("agent account must be {ACCOUNT_SIZE} bytes, got {0}")]
    WrongSize(usize),
    #[error("invalid owner discriminant {0}")]
    BadOwnerTag(u8),
    #[error("invalid frozen flag {0}")]
    BadFrozenFlag(u8),
}

/// Derived lifecycle status; never stored on-chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentStatus {
    Active,
    Frozen,
    Expired,
}

/// Decoded agent account state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentAccount {
    /// Public owner wallet; `None` is what makes an account private-mode.
    pub owner: Option<Pubkey>,
    /// `hash(agent_secret)` in private mode, all zeros in public mode.
    pub commitment: [u8; 32],
    /// Delegate key allowed to spend within the limits.
    pub delegate: Pubkey,
    /// Per-transaction ceiling in lamports, 0 = unlimited.
    pub max_per_tx: u64,
    /// Per-day ceiling in lamports, 0 = unlimited.
    pub daily_limit: u64,
    /// Lifetime ceiling in lamports, 0 = unlimited.
    pub total_limit: u64,
    /// Unix expiry timestamp, 0 = never.
    pub expires_at: i64,
    pub frozen: bool,
    pub total_spent: u64,
    pub daily_spent: u64,
    /// Day bucket (`unix_timestamp / 86_400`) `daily_spent` belongs to.
    pub last_day: i64,
    pub bump: u8,
    pub created_at: i64,
}

impl AgentAccount {
    pub fn parse(data: &[u8]) -> Result<Self, StateError> {
        if data.len() != ACCOUNT_SIZE {
            return Err(StateError::WrongSize(data.len()));
        }
        let (owner, base) = match data[OWNER_TAG_OFFSET] {
            0 => (None, OWNER_TAG_OFFSET + 1),
            1 => (
                Some(Pubkey::new_from_array(read_32(data, OWNER_TAG_OFFSET + 1))),
                OWNER_TAG_OFFSET + 1 + 32,
            ),
            tag => return Err(StateError::BadOwnerTag(tag)),
        };

        let frozen = match data[base + 96] {
            0 => false,
            1 => true,
            flag => return Err(StateError::BadFrozenFlag(flag)),
        };

        Ok(Self {
            owner,
            commitment: read_32(data, base),
            delegate: Pubkey::new_from_array(read_32(data, base + 32)),
            max_per_tx: read_u64(data, base + 64),
            daily_limit: read_u64(data, base + 72),
            total_limit: read_u64(data, base + 80),
            expires_at: read_i64(data, base + 88),
            frozen,
            total_spent: read_u64(data, base + 97),
            daily_spent: read_u64(data, base + 105),
            last_day: read_i64(data, base + 113),
            bump: data[base + 121],
            created_at: read_i64(data, base + 122),
        })
    }

    /// Serialize back into the allocated 171-byte form (private mode pads
    /// the unused tail with zeros, as the runtime does).
    pub fn encode(&self) -> [u8; ACCOUNT_SIZE] {
        let mut data = [0u8; ACCOUNT_SIZE];
        let base = match self.owner {
            None => {
                data[OWNER_TAG_OFFSET] = 0;
                OWNER_TAG_OFFSET + 1
            }
            Some(owner) => {
                data[OWNER_TAG_OFFSET] = 1;
                data[OWNER_TAG_OFFSET + 1..OWNER_TAG_OFFSET + 33].copy_from_slice(owner.as_ref());
                OWNER_TAG_OFFSET + 33
            }
        };
        data[base..base + 32].copy_from_slice(&self.commitment);
        data[base + 32..base + 64].copy_from_slice(self.delegate.as_ref());
        data[base + 64..base + 72].copy_from_slice(&self.max_per_tx.to_le_bytes());
        data[base + 72..base + 80].copy_from_slice(&self.daily_limit.to_le_bytes());
        data[base + 80..base + 88].copy_from_slice(&self.total_limit.to_le_bytes());
        data[base + 88..base + 96].copy_from_slice(&self.expires_at.to_le_bytes());
        data[base + 96] = u8::from(self.frozen);
        data[base + 97..base + 105].copy_from_slice(&self.total_spent.to_le_bytes());
        data[base + 105..base + 113].copy_from_slice(&self.daily_spent.to_le_bytes());
        data[base + 113..base + 121].copy_from_slice(&self.last_day.to_le_bytes());
        data[base + 121] = self.bump;
        data[base + 122..base + 130].copy_from_slice(&self.created_at.to_le_bytes());
        data
    }

    pub fn is_private(&self) -> bool {
        self.owner.is_none()
    }

    /// Status is derived, never stored: frozen wins, then expiry, else active.
    pub fn status(&self, now: i64) -> AgentStatus {
        if self.frozen {
            AgentStatus::Frozen
        } else if self.expires_at != 0 && now > self.expires_at {
            AgentStatus::Expired
        } else {
            AgentStatus::Active
        }
    }

    /// Amount spent in the current day bucket. The on-chain counter is only
    /// reset lazily on the next spend, so a reader must treat a stale bucket
    /// as zero rather than trust the stored value.
    pub fn spent_today(&self, now: i64) -> u64 {
        if now / SECONDS_PER_DAY > self.last_day {
            0
        } else {
            self.daily_spent
        }
    }

    /// Remaining daily headroom; `None` when the daily limit is unlimited.
    pub fn daily_remaining(&self, now: i64) -> Option<u64> {
        if self.daily_limit == 0 {
            None
        } else {
            Some(self.daily_limit.saturating_sub(self.spent_today(now)))
        }
    }

    /// Client-side preflight of the program's spend checks, in the order
    /// the program applies them. Returns the fault the program would
    /// reject the spend with.
    pub fn preflight_spend(&self, amount: u64, now: i64) -> Result<(), crate::error::ProgramFault> {
        use crate::error::ProgramFault;

        if self.frozen {
            return Err(ProgramFault::AgentFrozen);
        }
        if self.expires_at > 0 && now >= self.expires_at {
            return Err(ProgramFault::AgentExpired);
        }
        if self.max_per_tx > 0 && amount > self.max_per_tx {
            return Err(ProgramFault::ExceedsPerTxLimit);
        }
        if self.daily_limit > 0 {
            let spent = self.spent_today(now);
            match spent.checked_add(amount) {
                Some(total) if total <= self.daily_limit => {}
                Some(_) => return Err(ProgramFault::ExceedsDailyLimit),
                None => return Err(ProgramFault::Overflow),
            }
        }
        if self.total_limit > 0 {
            match self.total_spent.checked_add(amount) {
                Some(total) if total <= self.total_limit => {}
                Some(_) => return Err(ProgramFault::ExceedsTotalLimit),
                None => return Err(ProgramFault::Overflow),
            }
        }
        Ok(())
    }
}

fn read_32(data: &[u8], offset: usize) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&data[offset..offset + 32]);
    out
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(data[offset..offset + 8].try_into().expect("8-byte slice"))
}

fn read_i64(data: &[u8], offset: usize) -> i64 {
    i64::from_le_bytes(data[offset..offset + 8].try_into().expect("8-byte slice"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_private() -> AgentAccount {
        AgentAccount {
            owner: None,
            commitment: [0xAB; 32],
            delegate: Pubkey::new_from_array([0xCD; 32]),
            max_per_tx: 0x0102_0304_0506_0708,
            daily_limit: 100_000_000,
            total_limit: 500_000_000,
            expires_at: 1_800_000_000,
            frozen: false,
            total_spent: 42,
            daily_spent: 90_000_000,
            last_day: 20_833,
            bump: 254,
            created_at: 1_700_000_000,
        }
    }

    // Offset table from the program's account definition; any drift here
    // breaks discovery filters and must fail loudly.
    #[test]
    fn private_mode_layout_is_bit_exact() {
        let account = sample_private();
        let data = account.encode();
        assert_eq!(data.len(), ACCOUNT_SIZE);

        let cases: &[(&str, usize, Vec<u8>)] = &[
            ("owner_tag", OWNER_TAG_OFFSET, vec![0]),
            ("commitment", COMMITMENT_OFFSET, vec![0xAB; 32]),
            ("delegate", DELEGATE_OFFSET, vec![0xCD; 32]),
            (
                "max_per_tx",
                MAX_PER_TX_OFFSET,
                account.max_per_tx.to_le_bytes().to_vec(),
            ),
            (
                "daily_limit",
                DAILY_LIMIT_OFFSET,
                account.daily_limit.to_le_bytes().to_vec(),
            ),
            (
                "total_limit",
                TOTAL_LIMIT_OFFSET,
                account.total_limit.to_le_bytes().to_vec(),
            ),
            (
                "expires_at",
                EXPIRES_AT_OFFSET,
                account.expires_at.to_le_bytes().to_vec(),
            ),
            ("frozen", FROZEN_OFFSET, vec![0]),
            (
                "total_spent",
                TOTAL_SPENT_OFFSET,
                account.total_spent.to_le_bytes().to_vec(),
            ),
            (
                "daily_spent",
                DAILY_SPENT_OFFSET,
                account.daily_spent.to_le_bytes().to_vec(),
            ),
            (
                "last_day",
                LAST_DAY_OFFSET,
                account.last_day.to_le_bytes().to_vec(),
            ),
            ("bump", BUMP_OFFSET, vec![254]),
            (
                "created_at",
                CREATED_AT_OFFSET,
                account.created_at.to_le_bytes().to_vec(),
            ),
        ];
        for (name, offset, expected) in cases {
            assert_eq!(
                &data[*offset..*offset + expected.len()],
                expected.as_slice(),
                "field {name} at offset {offset}"
            );
        }

        assert_eq!(AgentAccount::parse(&data).unwrap(), account);
    }

    #[test]
    fn public_mode_round_trips() {
        let mut account = sample_private();
        account.owner = Some(Pubkey::new_from_array([0x11; 32]));
        account.commitment = [0; 32];
        let data = account.encode();
        assert_eq!(data[OWNER_TAG_OFFSET], 1);
        assert_eq!(AgentAccount::parse(&data).unwrap(), account);
    }

    #[test]
    fn rejects_malformed_accounts() {
        let account = sample_private();
        let data = account.encode();
        assert_eq!(
            AgentAccount::parse(&data[..170]),
            Err(StateError::WrongSize(170))
        );

        let mut bad_tag = data;
        bad_tag[OWNER_TAG_OFFSET] = 7;
        assert_eq!(AgentAccount::parse(&bad_tag), Err(StateError::BadOwnerTag(7)));

        let mut bad_frozen = account.encode();
        bad_frozen[FROZEN_OFFSET] = 3;
        assert_eq!(
            AgentAccount::parse(&bad_frozen),
            Err(StateError::BadFrozenFlag(3))
        );
    }

    #[test]
    fn status_is_derived_in_priority_order() {
        let mut account = sample_private();
        let now = 1_750_000_000;
        assert_eq!(account.status(now), AgentStatus::Active);

        account.expires_at = now - 1;
        assert_eq!(account.status(now), AgentStatus::Expired);

        // Frozen takes precedence over expiry.
        account.frozen = true;
        assert_eq!(account.status(now), AgentStatus::Frozen);

        account.frozen = false;
        account.expires_at = 0;
        assert_eq!(account.status(now), AgentStatus::Active);
    }

    #[test]
    fn daily_counter_resets_on_bucket_rollover() {
        let account = sample_private();
        let same_day = account.last_day * SECONDS_PER_DAY + 1_000;
        assert_eq!(account.spent_today(same_day), 90_000_000);
        assert_eq!(account.daily_remaining(same_day), Some(10_000_000));

        let next_day = (account.last_day + 1) * SECONDS_PER_DAY + 1;
        assert_eq!(account.spent_today(next_day), 0);
        assert_eq!(account.daily_remaining(next_day), Some(100_000_000));
    }

    #[test]
    fn zero_daily_limit_means_unlimited() {
        let mut account = sample_private();
        account.daily_limit = 0;
        assert_eq!(account.daily_remaining(0), None);
    }

    // 100M daily limit with 90M spent today: a 20M spend fails on the daily
    // limit, a 5M spend fits and leaves exactly 5M of headroom.
    #[test]
    fn preflight_matches_the_programs_daily_limit_arithmetic() {
        use crate::error::ProgramFault;

        let mut account = sample_private();
        account.expires_at = 0;
        account.daily_limit = 100_000_000;
        account.daily_spent = 90_000_000;
        let now = account.last_day * SECONDS_PER_DAY + 60;

        assert_eq!(
            account.preflight_spend(20_000_000, now),
            Err(ProgramFault::ExceedsDailyLimit)
        );
        assert_eq!(account.preflight_spend(5_000_000, now), Ok(()));

        // After the program records the 5M spend.
        account.daily_spent += 5_000_000;
        assert_eq!(account.daily_remaining(now), Some(5_000_000));

        // A rolled-over bucket restores the full limit.
        let tomorrow = (account.last_day + 1) * SECONDS_PER_DAY + 60;
        assert_eq!(account.preflight_spend(20_000_000, tomorrow), Ok(()));

        account.frozen = true;
        assert_eq!(
            account.preflight_spend(1, now),
            Err(ProgramFault::AgentFrozen)
        );
    }
}
