//! Relay configuration.
//!
//! Everything is resolved once at startup into an explicit struct that is
//! passed to constructors; nothing in the core reads the environment ad
//! hoc.

use std::path::PathBuf;

use anyhow::Context;
use serde::Deserialize;
use solana_sdk::pubkey::Pubkey;

use crate::rate_limit::WindowConfig;

#[derive(Clone, Debug, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "defaults::listen_addr")]
    pub listen_addr: String,
    pub rpc_url: String,
    /// Agent-vault program id, base58.
    pub program_id: String,
    /// Proof verifier program id, base58.
    pub verifier_program_id: String,
    pub operator_keypair_path: PathBuf,
    /// Flat fee retained from every creation deposit.
    #[serde(default = "defaults::service_fee")]
    pub service_fee_lamports: u64,
    /// Operator balance below which /relay/status reports not ready.
    #[serde(default = "defaults::min_operator_balance")]
    pub min_operator_balance_lamports: u64,
    /// Acceptance window for creation deposits.
    #[serde(default = "defaults::deposit_max_age")]
    pub deposit_max_age_secs: i64,
    #[serde(default = "defaults::used_reference_db")]
    pub used_reference_db: PathBuf,
    #[serde(default = "defaults::rpc_timeout")]
    pub rpc_timeout_secs: u64,
    #[serde(default)]
    pub rate: RateSettings,
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct RateSettings {
    pub relay: WindowConfig,
    pub read: WindowConfig,
    pub proxy: WindowConfig,
}

impl Default for RateSettings {
    fn default() -> Self {
        Self {
            relay: WindowConfig {
                window_secs: 60,
                max_requests: 10,
            },
            read: WindowConfig {
                window_secs: 60,
                max_requests: 60,
            },
            proxy: WindowConfig {
                window_secs: 60,
                max_requests: 120,
            },
        }
    }
}

impl RelayConfig {
    /// Layer the optional config file under `SHROUD_RELAY__*` environment
    /// overrides. Called once from the binary.
    pub fn load() -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/relay").required(false))
            .add_source(config::Environment::with_prefix("SHROUD_RELAY").separator("__"))
            .build()
            .context("failed to assemble relay configuration")?;
        settings
            .try_deserialize()
            .context("relay configuration is invalid")
    }

    pub fn program_id(&self) -> anyhow::Result<Pubkey> {
        self.program_id
            .parse()
            .context("program_id is not a valid base58 key")
    }

    pub fn verifier_program_id(&self) -> anyhow::Result<Pubkey> {
        self.verifier_program_id
            .parse()
            .context("verifier_program_id is not a valid base58 key")
    }
}

mod defaults {
    use std::path::PathBuf;

    pub fn listen_addr() -> String {
        "0.0.0.0:8080".to_string()
    }

    pub fn service_fee() -> u64 {
        2_000_000
    }

    pub fn min_operator_balance() -> u64 {
        100_000_000
    }

    pub fn deposit_max_age() -> i64 {
        600
    }

    pub fn used_reference_db() -> PathBuf {
        PathBuf::from("data/used-references.db")
    }

    pub fn rpc_timeout() -> u64 {
        30
    }
}
