use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Context};
use shroud_ledger::rpc::RpcLedger;
use shroud_relay::{config::RelayConfig, replay::UsedReferenceStore, serve, AppState};
use solana_sdk::signature::read_keypair_file;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = RelayConfig::load()?;
    let listen_addr = config.listen_addr.clone();

    let operator = read_keypair_file(&config.operator_keypair_path)
        .map_err(|err| anyhow!("failed to read operator keypair: {err}"))?;

    let ledger = Arc::new(RpcLedger::new(
        &config.rpc_url,
        config.program_id()?,
        Duration::from_secs(config.rpc_timeout_secs),
    ));
    let replay = UsedReferenceStore::durable(&config.used_reference_db)
        .context("failed to open used-reference store")?;

    let state = AppState::new(&config, operator, ledger, replay)?;
    serve(state, &listen_addr).await
}
