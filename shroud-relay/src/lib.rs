//! Operator relay service.
//!
//! Executes agent-vault operations on behalf of callers who never appear
//! on-chain themselves: verifies inbound payments, creates private agents,
//! forwards proof-gated instructions with the operator as fee payer, and
//! countersigns delegate spend transactions after strict validation.
//! Stateless per request apart from the rate-limit counters and the
//! durable used-reference set.

pub mod config;
pub mod cosign;
pub mod deposit;
pub mod error;
pub mod rate_limit;
pub mod replay;
pub mod sealed;

use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::anyhow;
use axum::{
    extract::{ConnectInfo, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use shroud_ledger::{
    instruction::{self, AgentLimits, LimitUpdate},
    reader::LedgerClient,
    MIN_WITNESS_SIZE,
};
use solana_sdk::{
    instruction::Instruction,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
    system_instruction,
    transaction::Transaction,
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::{
    config::RelayConfig,
    cosign::{validate_spend_transaction, CosignFault},
    deposit::verify_deposit,
    error::RelayError,
    rate_limit::{Pool, RateLimiter},
    replay::{ReplayStoreError, UsedReferenceStore},
};

/// JSON-RPC methods the proxy pool forwards for the dashboard; everything
/// else is refused.
const PROXY_METHODS: &[&str] = &[
    "getAccountInfo",
    "getBalance",
    "getLatestBlockhash",
    "getMinimumBalanceForRentExemption",
    "getProgramAccounts",
    "getSignatureStatuses",
    "getTransaction",
    "sendTransaction",
    "simulateTransaction",
];

#[derive(Clone)]
pub struct AppState {
    operator: Arc<Keypair>,
    ledger: Arc<dyn LedgerClient>,
    replay: UsedReferenceStore,
    limiter: Arc<RateLimiter>,
    http: reqwest::Client,
    verifier_program: Pubkey,
    service_fee: u64,
    min_operator_balance: u64,
    deposit_max_age_secs: i64,
    rpc_url: String,
}

impl AppState {
    pub fn new(
        config: &RelayConfig,
        operator: Keypair,
        ledger: Arc<dyn LedgerClient>,
        replay: UsedReferenceStore,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.rpc_timeout_secs))
            .build()?;
        Ok(Self {
            operator: Arc::new(operator),
            ledger,
            replay,
            limiter: Arc::new(RateLimiter::new(
                config.rate.relay,
                config.rate.read,
                config.rate.proxy,
            )),
            http,
            verifier_program: config.verifier_program_id()?,
            service_fee: config.service_fee_lamports,
            min_operator_balance: config.min_operator_balance_lamports,
            deposit_max_age_secs: config.deposit_max_age_secs,
            rpc_url: config.rpc_url.clone(),
        })
    }

    pub fn operator_pubkey(&self) -> Pubkey {
        self.operator.pubkey()
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/relay/status", get(status_handler))
        .route("/relay/create-private", post(create_private_handler))
        .route("/relay/freeze-private", post(freeze_private_handler))
        .route("/relay/unfreeze-private", post(unfreeze_private_handler))
        .route("/relay/update-limits-private", post(update_limits_handler))
        .route("/relay/withdraw-private", post(withdraw_private_handler))
        .route("/relay/close-private", post(close_private_handler))
        .route("/relay/cosign-spend", post(cosign_spend_handler))
        .route("/relay/rpc", post(rpc_proxy_handler))
        .with_state(state)
}

pub async fn serve(state: AppState, listen_addr: &str) -> anyhow::Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = app_router(state).layer(cors);
    let listener = TcpListener::bind(listen_addr).await?;
    info!(%listen_addr, "relay listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

// === requests and responses ===

#[derive(Serialize)]
struct StatusResponse {
    operator: String,
    balance_lamports: u64,
    min_balance_lamports: u64,
    ready: bool,
}

#[derive(Deserialize)]
struct CreatePrivateRequest {
    /// 32-byte hex commitment derived client-side.
    commitment: String,
    #[serde(default)]
    max_per_tx: u64,
    #[serde(default)]
    daily_limit: u64,
    #[serde(default)]
    total_limit: u64,
    #[serde(default)]
    expires_at: i64,
    /// One-time X25519 public key the delegate secret is sealed to.
    encryption_public_key: String,
    /// Base58 signature of the funding payment.
    payment_reference: String,
    amount_lamports: u64,
}

#[derive(Serialize)]
struct CreatePrivateResponse {
    agent_state: String,
    vault: String,
    signature: String,
    /// Sealed delegate keypair, base64. Only the holder of the one-time
    /// secret key can open it; the plaintext is never stored or logged.
    encrypted_delegate_key: String,
    forwarded_lamports: u64,
}

#[derive(Deserialize)]
struct FreezeRequest {
    agent_state: String,
    proof_bytes: Vec<u8>,
    witness_bytes: Vec<u8>,
}

#[derive(Deserialize)]
struct UpdateLimitsRequest {
    agent_state: String,
    proof_bytes: Vec<u8>,
    witness_bytes: Vec<u8>,
    // Three-way fields: absent = leave unchanged, explicit 0 = unlimited,
    // explicit value = set. An explicit null is rejected at the boundary.
    #[serde(default, deserialize_with = "explicit")]
    max_per_tx: Option<Option<u64>>,
    #[serde(default, deserialize_with = "explicit")]
    daily_limit: Option<Option<u64>>,
    #[serde(default, deserialize_with = "explicit")]
    total_limit: Option<Option<u64>>,
    #[serde(default, deserialize_with = "explicit")]
    expires_at: Option<Option<i64>>,
}

#[derive(Deserialize)]
struct WithdrawRequest {
    agent_state: String,
    proof_bytes: Vec<u8>,
    witness_bytes: Vec<u8>,
    amount_lamports: u64,
    destination: String,
}

#[derive(Deserialize)]
struct CloseRequest {
    agent_state: String,
    proof_bytes: Vec<u8>,
    witness_bytes: Vec<u8>,
    destination: String,
}

#[derive(Serialize)]
struct SignatureResponse {
    signature: String,
}

#[derive(Deserialize)]
struct CosignRequest {
    /// Base64, partially signed: delegate signature present, fee-payer
    /// slot empty.
    transaction: String,
}

#[derive(Serialize)]
struct CosignResponse {
    signature: String,
    /// Fully countersigned transaction, base64, ready for submission.
    transaction: String,
}

fn explicit<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

// === handlers ===

async fn status_handler(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Result<Json<StatusResponse>, RelayError> {
    gate(&state, Pool::Read, &headers, connect.as_ref())?;

    let operator = state.operator_pubkey();
    let balance = state.ledger.balance(&operator).await?;
    Ok(Json(StatusResponse {
        operator: operator.to_string(),
        balance_lamports: balance,
        min_balance_lamports: state.min_operator_balance,
        ready: balance >= state.min_operator_balance,
    }))
}

async fn create_private_handler(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(req): Json<CreatePrivateRequest>,
) -> Result<Json<CreatePrivateResponse>, RelayError> {
    gate(&state, Pool::Relay, &headers, connect.as_ref())?;

    let commitment = parse_hex32(&req.commitment, "commitment")?;
    if commitment == [0u8; 32] {
        return Err(RelayError::Validation(
            "commitment must not be all zeros".into(),
        ));
    }
    shroud_common::fr_from_bytes(&commitment).map_err(|_| {
        RelayError::Validation("commitment is not a canonical field element".into())
    })?;
    let encryption_key = parse_hex32(&req.encryption_public_key, "encryption_public_key")?;
    let reference = parse_reference(&req.payment_reference)?;
    if req.amount_lamports < state.service_fee {
        return Err(RelayError::Validation(format!(
            "deposit must cover the {} lamport service fee",
            state.service_fee
        )));
    }

    let operator = state.operator_pubkey();
    verify_deposit(
        state.ledger.as_ref(),
        &operator,
        &reference,
        req.amount_lamports,
        state.deposit_max_age_secs,
        unix_now(),
    )
    .await?;

    // Fresh delegate per creation, never reused from any prior request.
    // Seal it before any side effect: a bad encryption key must not leave
    // an account on-chain whose delegate secret nobody can recover.
    let delegate = Keypair::new();
    let sealed = sealed::seal(&encryption_key, &delegate.to_bytes())
        .map_err(|err| RelayError::Validation(err.to_string()))?;

    // Mark before the ledger call: of two concurrent requests racing on
    // this reference, exactly one proceeds.
    mark_reference(&state, &req.payment_reference)?;

    let program = state.ledger.program_id();
    let (agent_state, _) = instruction::agent_state_address(&program, &delegate.pubkey());
    let (vault, _) = instruction::vault_address(&program, &agent_state);

    let limits = AgentLimits {
        max_per_tx: req.max_per_tx,
        daily_limit: req.daily_limit,
        total_limit: req.total_limit,
        expires_at: req.expires_at,
    };
    let mut instructions = vec![instruction::create_agent_private(
        &program,
        commitment,
        limits,
        &delegate.pubkey(),
        &operator,
    )];
    let forwarded = req.amount_lamports - state.service_fee;
    if forwarded > 0 {
        instructions.push(system_instruction::transfer(&operator, &vault, forwarded));
    }

    let signature = match submit_operator_tx(&state, &instructions).await {
        Ok(signature) => signature,
        Err(err) => {
            // Roll the mark back so the same payment can fund a retry.
            if let Err(release_err) = state.replay.release(&req.payment_reference) {
                error!(%release_err, "failed to release payment reference");
            }
            return Err(err);
        }
    };

    info!(%agent_state, %signature, "private agent created");
    Ok(Json(CreatePrivateResponse {
        agent_state: agent_state.to_string(),
        vault: vault.to_string(),
        signature: signature.to_string(),
        encrypted_delegate_key: BASE64.encode(sealed),
        forwarded_lamports: forwarded,
    }))
}

async fn freeze_private_handler(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(req): Json<FreezeRequest>,
) -> Result<Json<SignatureResponse>, RelayError> {
    gate(&state, Pool::Relay, &headers, connect.as_ref())?;
    validate_proof_shape(&req.proof_bytes, &req.witness_bytes)?;
    let agent_state = parse_pubkey(&req.agent_state, "agent_state")?;

    let ix = instruction::freeze_private(
        &state.ledger.program_id(),
        &agent_state,
        &state.operator_pubkey(),
        &state.verifier_program,
        &req.proof_bytes,
        &req.witness_bytes,
    );
    let signature = submit_operator_tx(&state, &[ix]).await?;
    Ok(Json(SignatureResponse {
        signature: signature.to_string(),
    }))
}

async fn unfreeze_private_handler(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(req): Json<FreezeRequest>,
) -> Result<Json<SignatureResponse>, RelayError> {
    gate(&state, Pool::Relay, &headers, connect.as_ref())?;
    validate_proof_shape(&req.proof_bytes, &req.witness_bytes)?;
    let agent_state = parse_pubkey(&req.agent_state, "agent_state")?;

    let ix = instruction::unfreeze_private(
        &state.ledger.program_id(),
        &agent_state,
        &state.operator_pubkey(),
        &state.verifier_program,
        &req.proof_bytes,
        &req.witness_bytes,
    );
    let signature = submit_operator_tx(&state, &[ix]).await?;
    Ok(Json(SignatureResponse {
        signature: signature.to_string(),
    }))
}

async fn update_limits_handler(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(req): Json<UpdateLimitsRequest>,
) -> Result<Json<SignatureResponse>, RelayError> {
    gate(&state, Pool::Relay, &headers, connect.as_ref())?;
    validate_proof_shape(&req.proof_bytes, &req.witness_bytes)?;
    let agent_state = parse_pubkey(&req.agent_state, "agent_state")?;

    let update = LimitUpdate {
        max_per_tx: three_way(req.max_per_tx, "max_per_tx")?,
        daily_limit: three_way(req.daily_limit, "daily_limit")?,
        total_limit: three_way(req.total_limit, "total_limit")?,
        expires_at: three_way(req.expires_at, "expires_at")?,
    };
    if update == LimitUpdate::default() {
        return Err(RelayError::Validation(
            "no limit changes requested".into(),
        ));
    }

    let ix = instruction::update_constraints_private(
        &state.ledger.program_id(),
        &agent_state,
        &state.operator_pubkey(),
        &state.verifier_program,
        &req.proof_bytes,
        &req.witness_bytes,
        update,
    );
    let signature = submit_operator_tx(&state, &[ix]).await?;
    Ok(Json(SignatureResponse {
        signature: signature.to_string(),
    }))
}

async fn withdraw_private_handler(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(req): Json<WithdrawRequest>,
) -> Result<Json<SignatureResponse>, RelayError> {
    gate(&state, Pool::Relay, &headers, connect.as_ref())?;
    validate_proof_shape(&req.proof_bytes, &req.witness_bytes)?;
    let agent_state = parse_pubkey(&req.agent_state, "agent_state")?;
    let destination = parse_pubkey(&req.destination, "destination")?;
    if req.amount_lamports == 0 {
        return Err(RelayError::Validation("amount must be positive".into()));
    }

    let ix = instruction::withdraw_private(
        &state.ledger.program_id(),
        &agent_state,
        &destination,
        &state.operator_pubkey(),
        &state.verifier_program,
        &req.proof_bytes,
        &req.witness_bytes,
        req.amount_lamports,
    );
    let signature = submit_operator_tx(&state, &[ix]).await?;
    Ok(Json(SignatureResponse {
        signature: signature.to_string(),
    }))
}

async fn close_private_handler(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(req): Json<CloseRequest>,
) -> Result<Json<SignatureResponse>, RelayError> {
    gate(&state, Pool::Relay, &headers, connect.as_ref())?;
    validate_proof_shape(&req.proof_bytes, &req.witness_bytes)?;
    let agent_state = parse_pubkey(&req.agent_state, "agent_state")?;
    let destination = parse_pubkey(&req.destination, "destination")?;

    let ix = instruction::close_agent_private(
        &state.ledger.program_id(),
        &agent_state,
        &destination,
        &state.operator_pubkey(),
        &state.verifier_program,
        &req.proof_bytes,
        &req.witness_bytes,
    );
    let signature = submit_operator_tx(&state, &[ix]).await?;
    Ok(Json(SignatureResponse {
        signature: signature.to_string(),
    }))
}

async fn cosign_spend_handler(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(req): Json<CosignRequest>,
) -> Result<Json<CosignResponse>, RelayError> {
    gate(&state, Pool::Relay, &headers, connect.as_ref())?;

    let raw = BASE64
        .decode(req.transaction.as_bytes())
        .map_err(|_| CosignFault::Undecodable)?;
    let mut tx: Transaction =
        bincode::deserialize(&raw).map_err(|_| CosignFault::Undecodable)?;

    let delegate = validate_spend_transaction(
        &tx,
        &state.operator_pubkey(),
        &state.ledger.program_id(),
    )?;

    let blockhash = tx.message.recent_blockhash;
    tx.try_partial_sign(&[state.operator.as_ref()], blockhash)
        .map_err(|err| RelayError::Internal(anyhow!("cosigning failed: {err}")))?;

    info!(%delegate, "spend cosigned");
    Ok(Json(CosignResponse {
        signature: tx.signatures[0].to_string(),
        transaction: BASE64.encode(
            bincode::serialize(&tx)
                .map_err(|err| RelayError::Internal(anyhow!("reserialize failed: {err}")))?,
        ),
    }))
}

async fn rpc_proxy_handler(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(body): Json<JsonValue>,
) -> Result<Json<JsonValue>, RelayError> {
    gate(&state, Pool::Proxy, &headers, connect.as_ref())?;

    let method = body
        .get("method")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| RelayError::Validation("rpc request must carry a method".into()))?;
    if !PROXY_METHODS.contains(&method) {
        return Err(RelayError::Validation(format!(
            "method '{method}' is not proxied"
        )));
    }

    let response = state
        .http
        .post(&state.rpc_url)
        .json(&body)
        .send()
        .await
        .map_err(RelayError::Upstream)?;
    let value = response
        .json::<JsonValue>()
        .await
        .map_err(RelayError::Upstream)?;
    Ok(Json(value))
}

// === shared helpers ===

fn gate(
    state: &AppState,
    pool: Pool,
    headers: &HeaderMap,
    connect: Option<&ConnectInfo<SocketAddr>>,
) -> Result<(), RelayError> {
    let key = caller_key(headers, connect);
    state
        .limiter
        .hit(pool, &key)
        .map_err(|retry_after_secs| RelayError::RateLimited { retry_after_secs })
}

fn caller_key(headers: &HeaderMap, connect: Option<&ConnectInfo<SocketAddr>>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| connect.map(|info| info.0.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn mark_reference(state: &AppState, reference: &str) -> Result<(), RelayError> {
    match state.replay.try_mark(reference) {
        Ok(()) => Ok(()),
        Err(ReplayStoreError::AlreadyUsed) => Err(RelayError::ReferenceUsed),
        Err(ReplayStoreError::Store(detail)) => {
            Err(RelayError::Internal(anyhow!("reference store: {detail}")))
        }
    }
}

/// Shape-only checks: the program is the arbiter of proof validity, the
/// relay just refuses obviously unusable payloads.
fn validate_proof_shape(proof: &[u8], witness: &[u8]) -> Result<(), RelayError> {
    if proof.is_empty() {
        return Err(RelayError::Validation("proof_bytes must not be empty".into()));
    }
    if witness.len() < MIN_WITNESS_SIZE {
        return Err(RelayError::Validation(format!(
            "witness_bytes must be at least {MIN_WITNESS_SIZE} bytes"
        )));
    }
    Ok(())
}

async fn submit_operator_tx(
    state: &AppState,
    instructions: &[Instruction],
) -> Result<Signature, RelayError> {
    let operator = state.operator_pubkey();
    let blockhash = state.ledger.latest_blockhash().await?;
    let tx = Transaction::new_signed_with_payer(
        instructions,
        Some(&operator),
        &[state.operator.as_ref()],
        blockhash,
    );
    Ok(state.ledger.send_transaction(&tx).await?)
}

fn three_way<T>(field: Option<Option<T>>, name: &str) -> Result<Option<T>, RelayError> {
    match field {
        None => Ok(None),
        Some(Some(value)) => Ok(Some(value)),
        Some(None) => Err(RelayError::Validation(format!(
            "{name}: null is not accepted, omit the field to leave it unchanged"
        ))),
    }
}

fn parse_hex32(value: &str, what: &str) -> Result<[u8; 32], RelayError> {
    let stripped = value.strip_prefix("0x").unwrap_or(value);
    let bytes = hex::decode(stripped)
        .map_err(|_| RelayError::Validation(format!("{what} must be hex")))?;
    bytes
        .try_into()
        .map_err(|_| RelayError::Validation(format!("{what} must be 32 bytes")))
}

fn parse_pubkey(value: &str, what: &str) -> Result<Pubkey, RelayError> {
    value
        .parse()
        .map_err(|_| RelayError::Validation(format!("{what} is not a valid base58 key")))
}

fn parse_reference(value: &str) -> Result<Signature, RelayError> {
    value
        .parse()
        .map_err(|_| RelayError::Validation("payment_reference is not a valid signature".into()))
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
